use crate::types::{
    Effort, Goal, ParseOutcome, ParseWarning, SpecMetadata, SpecStatus, SpecTask, SpecTaskStatus,
    Specification,
};
use maestro_core::{short_id, MaestroError, MaestroResult};
use maestro_orchestrator::Priority;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::{debug, warn};

#[allow(clippy::expect_used)]
static TASK_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^task\s+(\d+)\s*(?:[:.\-]\s*(.*))?$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static BOLD_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*+]\s+)?\*\*([^*]+?)\*\*\s*:?\s*(.*)$")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*+]|\d+[.)])\s+(?:\[[ xX]\]\s+)?(.*)$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static EFFORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|days?|d|weeks?|wks?|w)\b")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static TASK_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:task)?\s*[-_#]?\s*(\d+)$").expect("constant regex pattern is valid")
});

/// Parser switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParserOptions {
    /// Fail the whole parse on a malformed task or metadata block instead
    /// of dropping it with a warning.
    #[serde(default)]
    pub strict: bool,
}

/// Turns a specification document into a [`Specification`].
///
/// The document is an optional metadata block followed by a markdown body:
///
/// ```text
/// ---
/// id: spec-auth
/// version: 1.2.0
/// priority: high
/// ---
/// # User authentication
/// ## Goal
/// **What:** Let users sign in
/// ## Tasks
/// ### Task 1: Create schema
/// **Description:** Tables for users and sessions
/// **Estimated Effort:** 4 hours
/// **Acceptance Criteria:**
/// - migrations apply cleanly
/// ```
#[derive(Debug, Clone, Default)]
pub struct SpecParser {
    options: ParserOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Description,
    PreferredWorker,
    Fallback,
    Effort,
    Status,
    Dependencies,
    Inputs,
    Outputs,
    AcceptanceCriteria,
}

impl Field {
    fn from_label(label: &str) -> Option<Field> {
        let label = normalize_label(label);
        let field = match label.as_str() {
            "description" | "summary" | "details" => Field::Description,
            "preferred worker" | "worker" | "preferred agent" | "agent" | "assignee"
            | "worker hint" => Field::PreferredWorker,
            "fallback" | "fallback strategy" | "fallback plan" => Field::Fallback,
            "estimated effort" | "effort" | "estimate" | "estimation" => Field::Effort,
            "status" => Field::Status,
            "dependencies" | "depends on" | "dependency" | "requires" => Field::Dependencies,
            "inputs" | "input" => Field::Inputs,
            "outputs" | "output" | "deliverables" => Field::Outputs,
            "acceptance criteria" | "acceptance" | "done when" => Field::AcceptanceCriteria,
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoalField {
    What,
    Why,
    SuccessCriteria,
}

impl GoalField {
    fn from_label(label: &str) -> Option<GoalField> {
        match normalize_label(label).as_str() {
            "what" | "objective" | "goal" | "summary" => Some(GoalField::What),
            "why" | "rationale" | "motivation" => Some(GoalField::Why),
            "success criteria" | "success" | "success metrics" => Some(GoalField::SuccessCriteria),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Goal,
    Context,
    Tasks,
    Other,
}

/// Where loose lines inside a task go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Before any label: the description.
    Start,
    In(Field),
    /// Inside an unrecognized subsection: dropped.
    Skipping,
}

struct TaskDraft {
    number: String,
    title: String,
    line: usize,
    fields: HashMap<Field, Vec<String>>,
    cursor: Cursor,
}

impl TaskDraft {
    fn push(&mut self, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let field = match self.cursor {
            Cursor::Start => Field::Description,
            Cursor::In(field) => field,
            Cursor::Skipping => return,
        };
        self.fields.entry(field).or_default().push(value.to_string());
    }

    fn joined(&self, field: Field) -> Option<String> {
        let text = self.fields.get(&field)?.join(" ");
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    fn split_values(&self, field: Field) -> Vec<String> {
        self.fields
            .get(&field)
            .map(|values| {
                values
                    .iter()
                    .flat_map(|v| v.split([',', ';']))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct BodyState {
    title: Option<String>,
    goal: Goal,
    saw_goal: bool,
    goal_field: Option<GoalField>,
    context: Vec<String>,
    tasks: Vec<SpecTask>,
}

impl SpecParser {
    /// Parser with the given options.
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    /// Parser that rejects malformed documents.
    pub fn strict() -> Self {
        Self::new(ParserOptions { strict: true })
    }

    /// Options in use.
    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Parse a document.
    ///
    /// Only strict mode returns an error; otherwise every problem becomes a
    /// [`ParseWarning`] and the offending task is left out.
    pub fn parse(&self, text: &str) -> MaestroResult<ParseOutcome> {
        let lines: Vec<&str> = text.lines().collect();
        let mut warnings = Vec::new();

        let (raw_metadata, body_start) = self.split_metadata(&lines, &mut warnings)?;
        let mut body = BodyState::default();
        self.parse_body(&lines, body_start, &mut body, &mut warnings)?;

        let metadata = build_metadata(raw_metadata, body.title.take());
        if !body.saw_goal {
            warnings.push(ParseWarning {
                line: None,
                message: "document has no Goal section".to_string(),
            });
        }
        if body.tasks.is_empty() {
            warnings.push(ParseWarning {
                line: None,
                message: "document declares no tasks".to_string(),
            });
        }
        for w in &warnings {
            warn!(spec_id = %metadata.id, warning = %w, "Specification parse warning");
        }

        let context = body.context.join("\n").trim().to_string();
        let specification = Specification {
            metadata,
            goal: body.goal,
            context: (!context.is_empty()).then_some(context),
            tasks: body.tasks,
        };
        debug!(
            spec_id = %specification.metadata.id,
            tasks = specification.tasks.len(),
            warnings = warnings.len(),
            "Specification parsed"
        );
        Ok(ParseOutcome {
            specification,
            warnings,
        })
    }

    /// Locate a leading `---` front matter block or a yaml/metadata code
    /// fence. Returns the decoded key/value pairs and the first body line.
    fn split_metadata(
        &self,
        lines: &[&str],
        warnings: &mut Vec<ParseWarning>,
    ) -> MaestroResult<(BTreeMap<String, serde_json::Value>, usize)> {
        let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
            return Ok((BTreeMap::new(), 0));
        };
        let opener = lines[first].trim();

        let closer = if opener == "---" {
            "---"
        } else if let Some(lang) = opener.strip_prefix("```") {
            match lang.trim().to_lowercase().as_str() {
                "" | "yaml" | "yml" | "metadata" => "```",
                _ => return Ok((BTreeMap::new(), 0)),
            }
        } else {
            return Ok((BTreeMap::new(), 0));
        };

        let Some(offset) = lines[first + 1..].iter().position(|l| l.trim() == closer) else {
            let message = format!("metadata block opened with '{opener}' is never closed");
            if self.options.strict {
                return Err(MaestroError::Parse(message));
            }
            warnings.push(ParseWarning {
                line: Some(first + 1),
                message,
            });
            return Ok((BTreeMap::new(), first + 1));
        };
        let close = first + 1 + offset;
        let block = lines[first + 1..close].join("\n");

        let pairs = match decode_metadata(&block) {
            Ok(pairs) => pairs,
            Err(e) if self.options.strict => return Err(e),
            Err(e) => {
                warnings.push(ParseWarning {
                    line: Some(first + 1),
                    message: format!("{e}; falling back to plain key: value lines"),
                });
                plain_pairs(&block)
            }
        };
        Ok((pairs, close + 1))
    }

    fn parse_body(
        &self,
        lines: &[&str],
        start: usize,
        body: &mut BodyState,
        warnings: &mut Vec<ParseWarning>,
    ) -> MaestroResult<()> {
        let mut section = Section::Preamble;
        let mut draft: Option<TaskDraft> = None;

        for (i, raw) in lines.iter().enumerate().skip(start) {
            let line_no = i + 1;
            let line = raw.trim();

            if let Some((level, text)) = heading(line) {
                if (2..=4).contains(&level) {
                    if let Some(caps) = TASK_HEADING.captures(text) {
                        self.finish_task(draft.take(), body, warnings)?;
                        draft = Some(TaskDraft {
                            number: caps[1].to_string(),
                            title: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
                            line: line_no,
                            fields: HashMap::new(),
                            cursor: Cursor::Start,
                        });
                        section = Section::Tasks;
                        continue;
                    }
                }

                if level <= 2 {
                    self.finish_task(draft.take(), body, warnings)?;
                    if level == 1 {
                        if body.title.is_none() {
                            body.title = Some(text.to_string());
                        }
                        continue;
                    }
                    section = classify_section(text);
                    if section == Section::Goal {
                        body.saw_goal = true;
                        body.goal_field = None;
                    }
                    continue;
                }

                // Level 3+ headings name a sub-field of the enclosing block.
                if let Some(task) = draft.as_mut() {
                    task.cursor = match Field::from_label(text) {
                        Some(field) => Cursor::In(field),
                        None => {
                            debug!(label = text, line = line_no, "Unrecognized task subsection");
                            warnings.push(ParseWarning {
                                line: Some(line_no),
                                message: format!(
                                    "Task {}: ignoring unrecognized subsection '{text}'",
                                    task.number
                                ),
                            });
                            Cursor::Skipping
                        }
                    };
                } else if section == Section::Goal {
                    body.goal_field = GoalField::from_label(text);
                }
                continue;
            }

            if line.is_empty() {
                continue;
            }

            if let Some(task) = draft.as_mut() {
                if let Some(caps) = BOLD_LABEL.captures(line) {
                    if let Some(field) = Field::from_label(&caps[1]) {
                        task.cursor = Cursor::In(field);
                        task.push(&caps[2]);
                        continue;
                    }
                }
                let value = LIST_ITEM
                    .captures(line)
                    .and_then(|c| c.get(1))
                    .map_or(line, |m| m.as_str());
                task.push(value);
                continue;
            }

            match section {
                Section::Goal => push_goal_line(body, line),
                Section::Context => body.context.push(line.to_string()),
                Section::Preamble | Section::Tasks | Section::Other => {}
            }
        }

        self.finish_task(draft.take(), body, warnings)
    }

    fn finish_task(
        &self,
        draft: Option<TaskDraft>,
        body: &mut BodyState,
        warnings: &mut Vec<ParseWarning>,
    ) -> MaestroResult<()> {
        let Some(draft) = draft else {
            return Ok(());
        };

        let description = draft.joined(Field::Description).unwrap_or_default();
        let mut missing = Vec::new();
        if draft.title.is_empty() {
            missing.push("name");
        }
        if description.is_empty() {
            missing.push("description");
        }
        if !missing.is_empty() {
            let message = format!(
                "Task {} dropped: missing {}",
                draft.number,
                missing.join(" and ")
            );
            if self.options.strict {
                return Err(MaestroError::Parse(format!("line {}: {message}", draft.line)));
            }
            warnings.push(ParseWarning {
                line: Some(draft.line),
                message,
            });
            return Ok(());
        }

        let estimated_effort = match draft.joined(Field::Effort) {
            Some(raw) => {
                let effort = parse_effort(&raw);
                if effort.is_none() {
                    warnings.push(ParseWarning {
                        line: Some(draft.line),
                        message: format!(
                            "Task {}: effort '{raw}' is not '<number> hour|day|week'",
                            draft.number
                        ),
                    });
                }
                effort
            }
            None => None,
        };

        let mut dependencies = Vec::new();
        for reference in draft.split_values(Field::Dependencies) {
            if is_none_marker(&reference) {
                continue;
            }
            let id = match normalize_task_ref(&reference) {
                Some(id) => id,
                None => {
                    warnings.push(ParseWarning {
                        line: Some(draft.line),
                        message: format!(
                            "Task {}: dependency '{reference}' is not a task reference",
                            draft.number
                        ),
                    });
                    reference
                }
            };
            if !dependencies.contains(&id) {
                dependencies.push(id);
            }
        }

        body.tasks.push(SpecTask {
            id: format!("task-{}", draft.number),
            name: draft.title.clone(),
            description,
            preferred_worker: draft.joined(Field::PreferredWorker),
            fallback: draft.joined(Field::Fallback),
            inputs: draft.split_values(Field::Inputs),
            outputs: draft.split_values(Field::Outputs),
            dependencies,
            acceptance_criteria: draft
                .fields
                .get(&Field::AcceptanceCriteria)
                .cloned()
                .unwrap_or_default(),
            estimated_effort,
            status: draft
                .joined(Field::Status)
                .map(|s| SpecTaskStatus::parse_status(&s))
                .unwrap_or_default(),
        });
        Ok(())
    }
}

/// Normalize an effort string to days: hours count as 1/8 day, weeks as
/// five days.
pub fn parse_effort(raw: &str) -> Option<Effort> {
    let caps = EFFORT.captures(raw)?;
    let amount: f64 = caps[1].parse().ok()?;
    let unit = caps[2].to_lowercase();
    let days = if unit.starts_with('h') {
        amount / 8.0
    } else if unit.starts_with('w') {
        amount * 5.0
    } else {
        amount
    };
    Some(Effort {
        raw: raw.trim().to_string(),
        days,
    })
}

/// `Task 2`, `task-2`, `#2` and `2` all name `task-2`.
pub fn normalize_task_ref(reference: &str) -> Option<String> {
    TASK_REF
        .captures(reference.trim())
        .map(|caps| format!("task-{}", &caps[1]))
}

fn is_none_marker(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "" | "none" | "n/a" | "na" | "-" | "nothing"
    )
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((level, rest.trim().trim_end_matches('#').trim()))
}

fn classify_section(title: &str) -> Section {
    let title = title.to_lowercase();
    if title.contains("goal") || title.contains("objective") {
        Section::Goal
    } else if title.contains("context") || title.contains("background") {
        Section::Context
    } else if title.contains("task") {
        Section::Tasks
    } else {
        Section::Other
    }
}

fn push_goal_line(body: &mut BodyState, line: &str) {
    if let Some(caps) = BOLD_LABEL.captures(line) {
        if let Some(field) = GoalField::from_label(&caps[1]) {
            body.goal_field = Some(field);
            let value = caps[2].trim();
            if !value.is_empty() {
                append_goal(&mut body.goal, field, value);
            }
            return;
        }
    }
    let item = LIST_ITEM.captures(line).and_then(|c| c.get(1));
    match (body.goal_field, item) {
        (Some(GoalField::SuccessCriteria), Some(m)) => {
            append_goal(&mut body.goal, GoalField::SuccessCriteria, m.as_str());
        }
        (Some(field), item) => {
            append_goal(&mut body.goal, field, item.map_or(line, |m| m.as_str()));
        }
        (None, _) => append_goal(&mut body.goal, GoalField::What, line),
    }
}

fn append_goal(goal: &mut Goal, field: GoalField, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    let target = match field {
        GoalField::What => &mut goal.what,
        GoalField::Why => &mut goal.why,
        GoalField::SuccessCriteria => {
            goal.success_criteria.push(value.to_string());
            return;
        }
    };
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(value);
}

fn decode_metadata(block: &str) -> MaestroResult<BTreeMap<String, serde_json::Value>> {
    if block.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yaml_ng::from_str(block)
        .map_err(|e| MaestroError::Parse(format!("Invalid metadata block: {e}")))
}

fn plain_pairs(block: &str) -> BTreeMap<String, serde_json::Value> {
    block
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), serde_json::Value::String(v.trim().to_string())))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn take_string(pairs: &mut BTreeMap<String, serde_json::Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = pairs.remove(*key) {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            let text = text.trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn take_list(pairs: &mut BTreeMap<String, serde_json::Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match pairs.remove(*key) {
            Some(serde_json::Value::Array(items)) => {
                return items
                    .into_iter()
                    .filter_map(|v| match v {
                        serde_json::Value::String(s) => Some(s),
                        serde_json::Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect();
            }
            Some(serde_json::Value::String(s)) => {
                return s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

fn build_metadata(
    mut pairs: BTreeMap<String, serde_json::Value>,
    heading_title: Option<String>,
) -> SpecMetadata {
    SpecMetadata {
        id: take_string(&mut pairs, &["id", "spec_id", "specId"])
            .unwrap_or_else(|| short_id("spec")),
        version: take_string(&mut pairs, &["version"]).unwrap_or_else(|| "1.0.0".to_string()),
        title: take_string(&mut pairs, &["title", "name"]).or(heading_title),
        domain: take_string(&mut pairs, &["domain"]).unwrap_or_else(|| "general".to_string()),
        priority: take_string(&mut pairs, &["priority"])
            .map(|p| Priority::parse_level(&p))
            .unwrap_or_default(),
        status: take_string(&mut pairs, &["status"])
            .map(|s| SpecStatus::parse_status(&s))
            .unwrap_or_default(),
        lineage: take_list(&mut pairs, &["lineage", "parents", "parent"]),
        extra: pairs,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const DOC: &str = r#"---
id: spec-auth
version: 2.1.0
domain: security
priority: high
status: approved
lineage: [spec-root, spec-auth-v1]
owner: platform-team
---
# User authentication

## Goal
**What:** Let users sign in with email and password.
**Why:** Accounts unlock saved preferences.
**Success Criteria:**
- 99% of logins under 300ms
- No plaintext passwords stored

## Context
Existing service uses sessions.
Cookies must stay HttpOnly.

## Tasks

### Task 1: Create schema
**Description:** Tables for users and sessions.
**Preferred Worker:** database engineer
**Estimated Effort:** 4 hours
**Outputs:** users table, sessions table
**Acceptance Criteria:**
- migrations apply cleanly
- rollback works

### Task 2: Login endpoint
#### Description
Accept credentials and issue a session.
#### Dependencies
- Task 1
#### Estimated Effort
2 days
#### Acceptance Criteria
- returns 401 on bad password

### Task 3: Audit trail
**Description**: Record every login attempt.
**Dependencies:** task-1, #2
**Fallback:** log to stdout
**Status:** in progress
**Estimated Effort:** 1 week
**Acceptance Criteria:** entries are append-only
"#;

    #[test]
    fn test_full_document() {
        let outcome = SpecParser::default().parse(DOC).unwrap();
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        let spec = outcome.specification;

        assert_eq!(spec.metadata.id, "spec-auth");
        assert_eq!(spec.metadata.version, "2.1.0");
        assert_eq!(spec.metadata.domain, "security");
        assert_eq!(spec.metadata.priority, Priority::High);
        assert_eq!(spec.metadata.status, SpecStatus::Approved);
        assert_eq!(spec.metadata.lineage, vec!["spec-root", "spec-auth-v1"]);
        assert_eq!(spec.metadata.title.as_deref(), Some("User authentication"));
        assert_eq!(spec.metadata.extra["owner"], "platform-team");

        assert_eq!(spec.goal.what, "Let users sign in with email and password.");
        assert_eq!(spec.goal.why, "Accounts unlock saved preferences.");
        assert_eq!(spec.goal.success_criteria.len(), 2);
        assert_eq!(
            spec.context.as_deref(),
            Some("Existing service uses sessions.\nCookies must stay HttpOnly.")
        );

        let ids: Vec<&str> = spec.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["task-1", "task-2", "task-3"]);

        let t1 = &spec.tasks[0];
        assert_eq!(t1.name, "Create schema");
        assert_eq!(t1.preferred_worker.as_deref(), Some("database engineer"));
        assert_eq!(t1.outputs, vec!["users table", "sessions table"]);
        assert_eq!(t1.acceptance_criteria, vec!["migrations apply cleanly", "rollback works"]);
        assert_eq!(t1.effort_days(), 0.5);

        let t2 = &spec.tasks[1];
        assert_eq!(t2.description, "Accept credentials and issue a session.");
        assert_eq!(t2.dependencies, vec!["task-1"]);
        assert_eq!(t2.effort_days(), 2.0);

        let t3 = &spec.tasks[2];
        assert_eq!(t3.dependencies, vec!["task-1", "task-2"]);
        assert_eq!(t3.fallback.as_deref(), Some("log to stdout"));
        assert_eq!(t3.status, SpecTaskStatus::InProgress);
        assert_eq!(t3.effort_days(), 5.0);
        assert_eq!(t3.acceptance_criteria, vec!["entries are append-only"]);

        assert_eq!(spec.estimated_duration_days(), 7.5);
    }

    #[test]
    fn test_defaults_without_metadata() {
        let doc = "## Tasks\n### Task 1: Only\n**Description:** one thing\n";
        let spec = SpecParser::default().parse(doc).unwrap().specification;
        assert!(spec.metadata.id.starts_with("spec-"));
        assert_eq!(spec.metadata.version, "1.0.0");
        assert_eq!(spec.metadata.status, SpecStatus::Draft);
        assert_eq!(spec.metadata.priority, Priority::Medium);
        assert_eq!(spec.tasks.len(), 1);
    }

    #[test]
    fn test_yaml_fence_metadata() {
        let doc = "```yaml\nid: fenced\nversion: 1.0\n```\n## Tasks\n### Task 1: A\n**Description:** a\n";
        let spec = SpecParser::default().parse(doc).unwrap().specification;
        assert_eq!(spec.metadata.id, "fenced");
        assert_eq!(spec.metadata.version, "1.0");
    }

    #[test]
    fn test_malformed_task_dropped_with_warning() {
        let doc = "## Tasks\n### Task 1: Good\n**Description:** fine\n### Task 2: Empty\n**Status:** pending\n";
        let outcome = SpecParser::default().parse(doc).unwrap();
        assert_eq!(outcome.specification.tasks.len(), 1);
        assert_eq!(outcome.warnings.len(), 2);
        let dropped = &outcome.warnings[0];
        assert_eq!(dropped.line, Some(4));
        assert!(dropped.message.contains("Task 2 dropped: missing description"));
    }

    #[test]
    fn test_unknown_subsection_does_not_leak_into_description() {
        let doc = "## Goal\nShip\n## Tasks\n### Task 1: A\n**Description:** real\n\
**Acceptance Criteria:**\n- done\n### Notes\nunrelated prose\n- stray bullet\n**Outputs:** report\n";
        let outcome = SpecParser::default().parse(doc).unwrap();
        let task = &outcome.specification.tasks[0];
        assert_eq!(task.description, "real");
        assert_eq!(task.acceptance_criteria, vec!["done"]);
        assert_eq!(task.outputs, vec!["report"]);

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].line, Some(8));
        assert!(outcome.warnings[0].message.contains("unrecognized subsection 'Notes'"));
    }

    #[test]
    fn test_strict_mode_rejects_malformed_task() {
        let doc = "## Goal\nx\n## Tasks\n### Task 1:\n**Description:** no title\n";
        let err = SpecParser::strict().parse(doc).unwrap_err();
        assert!(matches!(err, MaestroError::Parse(msg) if msg.contains("missing name")));
    }

    #[test]
    fn test_broken_yaml_falls_back_to_plain_pairs() {
        let doc = "---\nid: spec-x\ntitle: Auth: phase [one\n---\n## Goal\nx\n## Tasks\n### Task 1: A\n**Description:** a\n";
        let outcome = SpecParser::default().parse(doc).unwrap();
        assert_eq!(outcome.specification.metadata.id, "spec-x");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(SpecParser::strict().parse(doc).is_err());
    }

    #[test]
    fn test_effort_normalization() {
        assert_eq!(parse_effort("8 hours").unwrap().days, 1.0);
        assert_eq!(parse_effort("3 days").unwrap().days, 3.0);
        assert_eq!(parse_effort("2 weeks").unwrap().days, 10.0);
        assert_eq!(parse_effort("1.5 day").unwrap().days, 1.5);
        assert!(parse_effort("a while").is_none());
    }

    #[test]
    fn test_task_references() {
        assert_eq!(normalize_task_ref("Task 4").as_deref(), Some("task-4"));
        assert_eq!(normalize_task_ref("task-4").as_deref(), Some("task-4"));
        assert_eq!(normalize_task_ref("#4").as_deref(), Some("task-4"));
        assert_eq!(normalize_task_ref("4").as_deref(), Some("task-4"));
        assert!(normalize_task_ref("the login work").is_none());
    }

    #[test]
    fn test_none_dependency_marker() {
        let doc = "## Tasks\n### Task 1: A\n**Description:** a\n**Dependencies:** None\n";
        let spec = SpecParser::default().parse(doc).unwrap().specification;
        assert!(spec.tasks[0].dependencies.is_empty());
    }
}
