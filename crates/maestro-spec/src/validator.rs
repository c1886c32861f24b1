use crate::types::Specification;
use maestro_orchestrator::DependencyGraph;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static SEMVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+(?:\.\d+)?(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$")
        .expect("constant regex pattern is valid")
});

/// One problem found in a specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Where the problem is, e.g. `tasks[task-2].acceptance_criteria`.
    pub path: String,
    /// What is wrong.
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Structural and semantic checks on a parsed specification.
#[derive(Debug, Clone)]
pub struct SpecValidator {
    min_acceptance_criteria: usize,
}

impl Default for SpecValidator {
    fn default() -> Self {
        Self {
            min_acceptance_criteria: 1,
        }
    }
}

impl SpecValidator {
    /// Validator with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require at least `min` acceptance criteria per task.
    pub fn with_min_acceptance_criteria(mut self, min: usize) -> Self {
        self.min_acceptance_criteria = min;
        self
    }

    /// Every problem found; empty when the specification can be compiled.
    pub fn validate(&self, spec: &Specification) -> Vec<ValidationError> {
        let mut errors = self.check_schema(spec);
        errors.extend(self.check_acyclic(spec));
        errors.extend(self.check_acceptance_criteria(spec));
        errors
    }

    fn check_schema(&self, spec: &Specification) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let meta = &spec.metadata;

        if meta.id.trim().is_empty() {
            errors.push(ValidationError::new("metadata.id", "must not be empty"));
        }
        if !SEMVER.is_match(meta.version.trim()) {
            errors.push(ValidationError::new(
                "metadata.version",
                format!("'{}' is not a semantic version", meta.version),
            ));
        }
        if spec.tasks.is_empty() {
            errors.push(ValidationError::new("tasks", "at least one task is required"));
        }

        let known: HashSet<&str> = spec.tasks.iter().map(|t| t.id.as_str()).collect();
        let mut seen = HashSet::new();
        for (i, task) in spec.tasks.iter().enumerate() {
            let path = if task.id.is_empty() {
                format!("tasks[{i}]")
            } else {
                format!("tasks[{}]", task.id)
            };

            if task.id.trim().is_empty() {
                errors.push(ValidationError::new(format!("{path}.id"), "must not be empty"));
            } else if !seen.insert(task.id.as_str()) {
                errors.push(ValidationError::new(
                    format!("{path}.id"),
                    "duplicate task id",
                ));
            }
            if task.name.trim().is_empty() {
                errors.push(ValidationError::new(format!("{path}.name"), "must not be empty"));
            }
            if task.description.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{path}.description"),
                    "must not be empty",
                ));
            }
            for dep in &task.dependencies {
                if !known.contains(dep.as_str()) {
                    errors.push(ValidationError::new(
                        format!("{path}.dependencies"),
                        format!("unknown task '{dep}'"),
                    ));
                }
            }
        }
        errors
    }

    fn check_acyclic(&self, spec: &Specification) -> Option<ValidationError> {
        let graph = DependencyGraph::build(
            spec.tasks
                .iter()
                .map(|t| (t.id.clone(), t.dependencies.iter().cloned())),
        );
        graph.find_cycle().map(|cycle| {
            ValidationError::new(
                "tasks",
                format!("dependency cycle: {}", cycle.join(" -> ")),
            )
        })
    }

    fn check_acceptance_criteria(&self, spec: &Specification) -> Vec<ValidationError> {
        spec.tasks
            .iter()
            .filter(|t| {
                t.acceptance_criteria
                    .iter()
                    .filter(|c| !c.trim().is_empty())
                    .count()
                    < self.min_acceptance_criteria
            })
            .map(|t| {
                ValidationError::new(
                    format!("tasks[{}].acceptance_criteria", t.id),
                    format!(
                        "needs at least {} acceptance criterion",
                        self.min_acceptance_criteria
                    ),
                )
            })
            .collect()
    }
}
