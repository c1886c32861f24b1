use async_trait::async_trait;
use maestro_core::{AuditRecord, AuditSink, MaestroError, MaestroResult};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum Command {
    Append(AuditRecord),
    Flush(oneshot::Sender<()>),
}

/// Append-only audit log that records queue and compiler activity.
///
/// Records are handed to a background task that appends one JSON object per
/// line to `<log_dir>/audit.jsonl`.
pub struct AuditLog {
    tx: mpsc::UnboundedSender<Command>,
    path: PathBuf,
}

impl AuditLog {
    /// Create a new AuditLog. Spawns a background task that writes entries to disk.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let log_file = log_dir.join("audit.jsonl");
        let path = log_file.clone();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "Failed to create audit directory");
            }

            let mut file = None;
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Append(record) => {
                        let line = match serde_json::to_string(&record) {
                            Ok(line) => format!("{line}\n"),
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize audit record");
                                continue;
                            }
                        };
                        if file.is_none() {
                            file = open_append(&log_file).await;
                        }
                        if let Some(f) = file.as_mut() {
                            if let Err(e) = f.write_all(line.as_bytes()).await {
                                warn!(path = %log_file.display(), error = %e, "Failed to append audit record");
                                file = None;
                            }
                        }
                    }
                    Command::Flush(done) => {
                        if let Some(f) = file.as_mut() {
                            let _ = f.flush().await;
                        }
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, path }
    }

    /// Path of the JSON-lines file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until every record submitted so far has been written.
    pub async fn flush(&self) -> MaestroResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .map_err(|_| MaestroError::Audit("audit writer stopped".to_string()))?;
        done_rx
            .await
            .map_err(|_| MaestroError::Audit("audit writer stopped".to_string()))
    }
}

async fn open_append(path: &Path) -> Option<tokio::fs::File> {
    match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to open audit log");
            None
        }
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn record(&self, record: AuditRecord) -> MaestroResult<()> {
        debug!(
            kind = %record.kind,
            subject = %record.subject,
            summary = %record.summary,
            "audit"
        );
        self.tx
            .send(Command::Append(record))
            .map_err(|_| MaestroError::Audit("audit writer stopped".to_string()))
    }
}
