use async_trait::async_trait;
use maestro_core::MaestroResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A worker the compiler may assign tasks to. Its `id` doubles as the
/// executor id jobs are queued under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCandidate {
    /// Executor id the worker is registered under.
    pub id: String,
    /// What the worker does.
    #[serde(default)]
    pub description: String,
    /// Words that signal a fit.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl WorkerCandidate {
    /// Candidate with no description or keywords.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            keywords: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the keywords.
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// The matcher's pick for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMatch {
    /// Chosen worker.
    pub worker_id: String,
    /// In `0.0..=1.0`.
    pub confidence: f64,
}

/// Picks the worker best suited to a described piece of work.
///
/// Implementations may call out to external services; an `Err` is treated
/// by callers as "matcher unavailable" and handled gracefully.
#[async_trait]
pub trait CapabilityMatcher: Send + Sync {
    /// Best candidate for `description`, or `None` when nothing fits.
    async fn best_match(
        &self,
        description: &str,
        candidates: &[WorkerCandidate],
    ) -> MaestroResult<Option<WorkerMatch>>;
}

/// Scores candidates by word overlap with the description.
///
/// A description naming a candidate id outright scores `1.0`. Otherwise
/// keyword and id hits count fully and description hits count half,
/// relative to the number of meaningful words in the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordMatcher;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "who", "can", "will", "should",
];

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

impl KeywordMatcher {
    /// Score of `candidate` for `description`, in `[0, 1]`.
    pub fn score(description: &str, candidate: &WorkerCandidate) -> f64 {
        let request = description.trim().to_lowercase();
        if request.is_empty() {
            return 0.0;
        }
        if request == candidate.id.to_lowercase() {
            return 1.0;
        }

        let wanted = words(&request);
        if wanted.is_empty() {
            return 0.0;
        }
        let mut strong: HashSet<String> = words(&candidate.id);
        for keyword in &candidate.keywords {
            strong.extend(words(keyword));
        }
        let weak = words(&candidate.description);

        let hits: f64 = wanted
            .iter()
            .map(|w| {
                if strong.contains(w) {
                    1.0
                } else if weak.contains(w) {
                    0.5
                } else {
                    0.0
                }
            })
            .sum();
        (hits / wanted.len() as f64).min(1.0)
    }
}

#[async_trait]
impl CapabilityMatcher for KeywordMatcher {
    async fn best_match(
        &self,
        description: &str,
        candidates: &[WorkerCandidate],
    ) -> MaestroResult<Option<WorkerMatch>> {
        let mut best: Option<WorkerMatch> = None;
        for candidate in candidates {
            let confidence = Self::score(description, candidate);
            if confidence <= 0.0 {
                continue;
            }
            if best.as_ref().map_or(true, |b| confidence > b.confidence) {
                best = Some(WorkerMatch {
                    worker_id: candidate.id.clone(),
                    confidence,
                });
            }
        }
        Ok(best)
    }
}
