use async_trait::async_trait;
use maestro_core::{AuditKind, AuditRecord, AuditSink, MaestroResult};
use tokio::sync::RwLock;

/// In-memory audit store.
///
/// Keeps every record in insertion order so a job's timeline can be
/// reconstructed with [`MemoryAuditStore::entries_for`].
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// All records, oldest first.
    pub async fn entries(&self) -> Vec<AuditRecord> {
        self.entries.read().await.clone()
    }

    /// Records with the given discriminator.
    pub async fn entries_of(&self, kind: AuditKind) -> Vec<AuditRecord> {
        let entries = self.entries.read().await;
        entries.iter().filter(|e| e.kind == kind).cloned().collect()
    }

    /// Records about one job or specification.
    pub async fn entries_for(&self, subject: &str) -> Vec<AuditRecord> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect()
    }

    /// Number of stored records.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Drop every stored record.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditStore {
    async fn record(&self, record: AuditRecord) -> MaestroResult<()> {
        let mut entries = self.entries.write().await;
        entries.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_query_by_kind_and_subject() {
        let store = MemoryAuditStore::new();
        store
            .record(AuditRecord::new(AuditKind::Task, "job-a", "added", Utc::now()))
            .await
            .ok();
        store
            .record(AuditRecord::new(AuditKind::Status, "job-a", "running", Utc::now()))
            .await
            .ok();
        store
            .record(AuditRecord::new(AuditKind::Task, "job-b", "added", Utc::now()))
            .await
            .ok();

        assert_eq!(store.count().await, 3);
        assert_eq!(store.entries_of(AuditKind::Task).await.len(), 2);

        let timeline = store.entries_for("job-a").await;
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].summary, "added");
        assert_eq!(timeline[1].summary, "running");
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryAuditStore::default();
        store
            .record(AuditRecord::new(AuditKind::Compilation, "spec-1", "ok", Utc::now()))
            .await
            .ok();
        store.clear().await;
        assert_eq!(store.count().await, 0);
    }
}
