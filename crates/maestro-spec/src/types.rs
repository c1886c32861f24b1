use maestro_orchestrator::Priority;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a specification document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    /// Being written.
    #[default]
    Draft,
    /// Awaiting review.
    Review,
    /// Approved for work.
    Approved,
    /// Being worked on.
    Active,
    /// All work done.
    Completed,
    /// Superseded.
    Deprecated,
}

impl SpecStatus {
    /// Lenient parse; unknown strings map to `Draft`.
    pub fn parse_status(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "review" | "in_review" | "in review" => SpecStatus::Review,
            "approved" => SpecStatus::Approved,
            "active" => SpecStatus::Active,
            "completed" | "done" => SpecStatus::Completed,
            "deprecated" => SpecStatus::Deprecated,
            _ => SpecStatus::Draft,
        }
    }
}

impl std::fmt::Display for SpecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecStatus::Draft => write!(f, "draft"),
            SpecStatus::Review => write!(f, "review"),
            SpecStatus::Approved => write!(f, "approved"),
            SpecStatus::Active => write!(f, "active"),
            SpecStatus::Completed => write!(f, "completed"),
            SpecStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// Header of a specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecMetadata {
    /// Unique id.
    pub id: String,
    /// Document version.
    pub version: String,
    /// Display title.
    pub title: Option<String>,
    /// Business domain.
    pub domain: String,
    /// Priority given to every compiled job.
    pub priority: Priority,
    /// Lifecycle status.
    pub status: SpecStatus,
    /// Ids of the specifications this one derives from, oldest first.
    #[serde(default)]
    pub lineage: Vec<String>,
    /// Keys the parser does not interpret, passed through as-is.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// What the mission is for and how success is judged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// The objective.
    pub what: String,
    /// Why it matters.
    pub why: String,
    /// Checks that decide success.
    pub success_criteria: Vec<String>,
}

/// Per-task progress as written in the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecTaskStatus {
    /// Not started.
    #[default]
    Pending,
    /// Underway.
    InProgress,
    /// Done.
    Completed,
    /// Waiting on something.
    Blocked,
}

impl SpecTaskStatus {
    /// Lenient parse; unknown strings map to `Pending`.
    pub fn parse_status(s: &str) -> Self {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "in_progress" | "started" | "active" => SpecTaskStatus::InProgress,
            "completed" | "done" | "complete" => SpecTaskStatus::Completed,
            "blocked" => SpecTaskStatus::Blocked,
            _ => SpecTaskStatus::Pending,
        }
    }
}

/// Estimated effort, kept verbatim and normalized to working days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effort {
    /// Text as written.
    pub raw: String,
    /// Working days.
    pub days: f64,
}

/// One task of a specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecTask {
    /// Normalized id, `task-<n>`.
    pub id: String,
    /// Short name.
    pub name: String,
    /// What the task does.
    pub description: String,
    /// Free-text hint describing the kind of worker wanted.
    pub preferred_worker: Option<String>,
    /// Advisory text for a human or downstream system; never executed.
    pub fallback: Option<String>,
    /// Artifacts the task needs.
    pub inputs: Vec<String>,
    /// Artifacts the task produces.
    pub outputs: Vec<String>,
    /// Ids of tasks this one depends on.
    pub dependencies: Vec<String>,
    /// Checks that decide when the task is done.
    pub acceptance_criteria: Vec<String>,
    /// Effort estimate, if given.
    pub estimated_effort: Option<Effort>,
    /// Progress as written.
    pub status: SpecTaskStatus,
}

impl SpecTask {
    /// Estimated days, 0 when unknown.
    pub fn effort_days(&self) -> f64 {
        self.estimated_effort.as_ref().map_or(0.0, |e| e.days)
    }
}

/// A parsed mission document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    /// Header fields.
    pub metadata: SpecMetadata,
    /// Goal section.
    pub goal: Goal,
    /// Background prose.
    pub context: Option<String>,
    /// Tasks in document order.
    pub tasks: Vec<SpecTask>,
}

impl Specification {
    /// Look up a task by id.
    pub fn task(&self, id: &str) -> Option<&SpecTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Sum of task efforts in days, without credit for parallel work.
    pub fn estimated_duration_days(&self) -> f64 {
        self.tasks.iter().map(SpecTask::effort_days).sum()
    }
}

/// Something the parser tolerated but the author should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// 1-based line in the source document, when known.
    pub line: Option<usize>,
    /// What was tolerated.
    pub message: String,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Parsed specification plus everything the parser had to skip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOutcome {
    /// The parsed document.
    pub specification: Specification,
    /// Problems the parser skipped past.
    pub warnings: Vec<ParseWarning>,
}
