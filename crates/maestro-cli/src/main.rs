//! `maestro` command line: validate, compile and run mission specifications
//! against a job queue of simulated workers.

mod config;
mod workers;

use clap::{Parser, Subcommand, ValueEnum};
use config::MaestroConfig;
use maestro_audit::{AuditLog, MetricsRecorder};
use maestro_orchestrator::{JobQueue, QueuePoller};
use maestro_spec::{KeywordMatcher, ParserOptions, SpecCompiler, SpecParser, SpecValidator};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro: specification-driven job orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// Reject malformed specifications instead of warning
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a specification
    Validate { spec: PathBuf },
    /// Compile a specification into jobs without running them
    Compile { spec: PathBuf },
    /// Compile a specification and run its jobs to completion
    Run { spec: PathBuf },
}

const DEFAULT_CONFIG: &str = "maestro.toml";

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn read_spec(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read specification '{}': {}",
            path.display(),
            e
        )
    })
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let (config_path, explicit) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let config = MaestroConfig::load(&config_path, explicit).await?;
    let parser = SpecParser::new(ParserOptions { strict: cli.strict });

    match cli.command {
        Commands::Validate { spec } => validate(&parser, &spec).await,
        Commands::Compile { spec } => {
            let text = read_spec(&spec).await?;
            let runtime = Runtime::build(&config, parser).await?;
            let result = runtime.compiler.compile_from_text(&text).await?;
            runtime.audit.flush().await?;
            print_json(&json!({
                "compilation": result,
                "jobs": runtime.queue.get_all_jobs().await,
            }))
        }
        Commands::Run { spec } => {
            let text = read_spec(&spec).await?;
            let runtime = Runtime::build(&config, parser).await?;
            runtime.run(&config, &text).await
        }
    }
}

async fn validate(parser: &SpecParser, path: &Path) -> anyhow::Result<()> {
    let text = read_spec(path).await?;
    let outcome = parser.parse(&text)?;
    let spec = &outcome.specification;
    let warnings: Vec<String> = outcome.warnings.iter().map(ToString::to_string).collect();
    let errors: Vec<String> = SpecValidator::new()
        .validate(spec)
        .iter()
        .map(ToString::to_string)
        .collect();
    print_json(&json!({
        "specId": spec.metadata.id,
        "tasks": spec.tasks.len(),
        "estimatedDurationDays": spec.estimated_duration_days(),
        "warnings": warnings,
        "errors": errors,
    }))?;
    if !errors.is_empty() {
        anyhow::bail!("specification has {} validation error(s)", errors.len());
    }
    Ok(())
}

/// Queue, compiler and sinks wired together for one invocation.
struct Runtime {
    queue: Arc<JobQueue>,
    compiler: SpecCompiler,
    audit: Arc<AuditLog>,
    recorder: Arc<MetricsRecorder>,
}

impl Runtime {
    async fn build(config: &MaestroConfig, parser: SpecParser) -> anyhow::Result<Self> {
        let audit = Arc::new(AuditLog::new(config.data_dir.join("audit")));
        let recorder = Arc::new(MetricsRecorder::new());

        let queue = Arc::new(
            JobQueue::new(config.queue.clone())?
                .with_audit_sink(audit.clone())
                .with_metrics_sink(recorder.clone()),
        );
        workers::register_all(&queue, &config.workers).await;
        info!(
            workers = config.workers.len(),
            max_concurrent = config.queue.max_concurrent,
            "Job queue ready"
        );

        let matcher = Arc::new(KeywordMatcher);
        let compiler = SpecCompiler::new(queue.clone(), matcher, config.candidates())
            .with_config(config.compiler.clone())
            .with_parser(parser)
            .with_audit_sink(audit.clone())
            .with_metrics_sink(recorder.clone());

        Ok(Self {
            queue,
            compiler,
            audit,
            recorder,
        })
    }

    async fn run(&self, config: &MaestroConfig, text: &str) -> anyhow::Result<()> {
        let mut events = self.queue.subscribe();
        let listener = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(
                    event = %event.event_type,
                    job_id = ?event.job_id,
                    executor = ?event.executor_id,
                    "queue event"
                );
            }
        });

        let result = self.compiler.compile_from_text(text).await?;
        if !result.is_success() {
            print_json(&json!({ "compilation": result }))?;
            anyhow::bail!("specification rejected; nothing to run");
        }

        info!(jobs = result.tasks_created, "Running compiled jobs");
        let report = QueuePoller::new(self.queue.clone())
            .with_config(config.poller.clone())
            .run_until_idle()
            .await;
        if !report.drained {
            warn!(passes = report.passes, "Queue did not drain within the pass limit");
        }
        self.audit.flush().await?;
        listener.abort();

        print_json(&json!({
            "compilation": result,
            "passes": report.passes,
            "drained": report.drained,
            "metrics": report.metrics,
            "telemetry": self.recorder.to_json(),
            "auditLog": self.audit.path().display().to_string(),
            "jobs": self.queue.get_all_jobs().await,
        }))?;
        if report.metrics.failed > 0 {
            anyhow::bail!("{} job(s) failed", report.metrics.failed);
        }
        Ok(())
    }
}
