use maestro_core::{MaestroError, MaestroResult};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Display;
use std::hash::Hash;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Adjacency structure over dependency declarations.
///
/// Nodes keep their insertion order, which is the tie-break whenever two
/// nodes have no ordering constraint between them. Edges pointing at ids
/// that are not part of the graph are kept aside in
/// [`DependencyGraph::missing_dependencies`] and otherwise ignored.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K> {
    nodes: Vec<K>,
    index: HashMap<K, usize>,
    /// `deps[i]` = indices node `i` depends on.
    deps: Vec<Vec<usize>>,
    missing: Vec<(K, K)>,
}

impl<K> DependencyGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    /// Build a graph from `(id, dependencies)` pairs.
    ///
    /// A repeated id merges its dependencies into the first declaration.
    pub fn build<I, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, D)>,
        D: IntoIterator<Item = K>,
    {
        let entries: Vec<(K, Vec<K>)> = entries
            .into_iter()
            .map(|(id, deps)| (id, deps.into_iter().collect()))
            .collect();

        let mut nodes = Vec::new();
        let mut index = HashMap::new();
        for (id, _) in &entries {
            if !index.contains_key(id) {
                index.insert(id.clone(), nodes.len());
                nodes.push(id.clone());
            }
        }

        let mut deps = vec![Vec::new(); nodes.len()];
        let mut missing = Vec::new();
        for (id, declared) in entries {
            let Some(&node) = index.get(&id) else {
                continue;
            };
            for dep in declared {
                match index.get(&dep) {
                    Some(&d) if !deps[node].contains(&d) => deps[node].push(d),
                    Some(_) => {}
                    None => missing.push((id.clone(), dep)),
                }
            }
        }

        Self {
            nodes,
            index,
            deps,
            missing,
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` is a node.
    pub fn contains(&self, id: &K) -> bool {
        self.index.contains_key(id)
    }

    /// Direct dependencies of a node, in declaration order.
    pub fn dependencies_of(&self, id: &K) -> Vec<K> {
        self.index
            .get(id)
            .map(|&i| self.deps[i].iter().map(|&d| self.nodes[d].clone()).collect())
            .unwrap_or_default()
    }

    /// `(node, dependency)` pairs whose dependency is not a node of the graph.
    pub fn missing_dependencies(&self) -> &[(K, K)] {
        &self.missing
    }

    /// Dependencies-first order; insertion order among unconstrained nodes.
    ///
    /// Fails with [`MaestroError::Cycle`] naming one cycle if the graph is not a DAG.
    pub fn topological_order(&self) -> MaestroResult<Vec<K>> {
        let n = self.nodes.len();
        let mut remaining = vec![0usize; n];
        let mut dependents = vec![Vec::new(); n];
        for (node, deps) in self.deps.iter().enumerate() {
            remaining[node] = deps.len();
            for &d in deps {
                dependents[d].push(node);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| remaining[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.nodes[node].clone());
            for &dependent in &dependents[node] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() < n {
            let cycle = self.find_cycle().unwrap_or_default();
            return Err(MaestroError::Cycle(
                cycle.iter().map(ToString::to_string).collect(),
            ));
        }
        Ok(order)
    }

    /// Whether any cycle exists.
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Locate one cycle, returned as a closed path (`a -> b -> a`).
    ///
    /// Depth-first search with an explicit stack, so deep chains cannot
    /// overflow the call stack.
    pub fn find_cycle(&self) -> Option<Vec<K>> {
        let n = self.nodes.len();
        let mut marks = vec![Mark::Unvisited; n];

        for root in 0..n {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // (node, index of the next dependency edge to follow)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::OnStack;

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if let Some(&dep) = self.deps[node].get(top.1) {
                    top.1 += 1;
                    match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::OnStack;
                            stack.push((dep, 0));
                        }
                        Mark::OnStack => {
                            let start = stack.iter().position(|&(s, _)| s == dep).unwrap_or(0);
                            let mut cycle: Vec<K> = stack[start..]
                                .iter()
                                .map(|&(s, _)| self.nodes[s].clone())
                                .collect();
                            cycle.push(self.nodes[dep].clone());
                            return Some(cycle);
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }
        None
    }
}
