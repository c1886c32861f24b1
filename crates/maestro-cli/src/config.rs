use maestro_orchestrator::{PollerConfig, QueueConfig};
use maestro_spec::{CompilerConfig, WorkerCandidate};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of `maestro.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct MaestroConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

/// A simulated worker: matched like any other candidate, executed locally.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Per-attempt deadline; the queue default applies when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Simulated work time per attempt.
    #[serde(default)]
    pub latency_ms: u64,
    /// Share of attempts that fail, in `0.0..=1.0`.
    #[serde(default)]
    pub fail_rate: f64,
}

impl WorkerConfig {
    pub fn candidate(&self) -> WorkerCandidate {
        WorkerCandidate::new(self.id.clone())
            .with_description(self.description.clone())
            .with_keywords(self.keywords.clone())
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl MaestroConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Load `path`. A missing file is only tolerated for the default path.
    pub async fn load(path: &Path, explicit: bool) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml(&text),
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self {
                    data_dir: default_data_dir(),
                    ..Self::default()
                })
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            )),
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        self.queue.validate()?;
        for worker in &self.workers {
            if worker.id.trim().is_empty() {
                anyhow::bail!("worker id must not be empty");
            }
            if !(0.0..=1.0).contains(&worker.fail_rate) {
                anyhow::bail!(
                    "worker '{}': fail_rate must be within 0.0..=1.0",
                    worker.id
                );
            }
        }
        Ok(())
    }

    pub fn candidates(&self) -> Vec<WorkerCandidate> {
        self.workers.iter().map(WorkerConfig::candidate).collect()
    }
}
