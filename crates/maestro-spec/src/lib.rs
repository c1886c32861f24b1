//! Mission specifications for Maestro: parsing, validation and compilation
//! into queue jobs.
//!
//! A specification is a markdown document with an optional metadata block,
//! a goal, optional context and numbered tasks with dependencies and
//! acceptance criteria. The [`SpecCompiler`] walks the tasks in dependency
//! order, asks a [`CapabilityMatcher`] for a worker per task and adds one
//! job per matched task to a [`maestro_orchestrator::JobQueue`].
//!
//! # Main types
//!
//! - [`SpecParser`]: Document to [`Specification`], with [`ParseWarning`]s for anything skipped.
//! - [`SpecValidator`]: Schema checks, cycle detection and acceptance-criteria coverage.
//! - [`CapabilityMatcher`]: Seam for worker selection; [`KeywordMatcher`] is the built-in one.
//! - [`SpecCompiler`]: Produces jobs and a [`CompilationResult`].

/// Compilation of specifications into jobs.
pub mod compiler;
/// Worker selection.
pub mod matcher;
/// Document parsing.
pub mod parser;
/// Specification model.
pub mod types;
/// Structural and semantic validation.
pub mod validator;

pub use compiler::{CompilationResult, CompilerConfig, SpecCompiler, TaskAssignment};
pub use matcher::{CapabilityMatcher, KeywordMatcher, WorkerCandidate, WorkerMatch};
pub use parser::{normalize_task_ref, parse_effort, ParserOptions, SpecParser};
pub use types::{
    Effort, Goal, ParseOutcome, ParseWarning, SpecMetadata, SpecStatus, SpecTask, SpecTaskStatus,
    Specification,
};
pub use validator::{SpecValidator, ValidationError};
