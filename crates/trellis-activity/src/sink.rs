//! The append-only activity sink contract.

use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use trellis_core::{ActivityRecord, ActivitySeverity, Timestamp};

/// Sink failure. Swallowed (logged only) on the record path; surfaced
/// on explicit admin operations like prune.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink is unreachable.
    #[error("activity sink unavailable: {0}")]
    Unavailable(String),

    /// Anything else.
    #[error("activity sink error: {0}")]
    Internal(String),
}

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// External append-only record store.
///
/// Appends are idempotent on the record id: replaying a record the
/// sink has already seen must not duplicate it.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Append one record.
    async fn append(&self, record: ActivityRecord) -> SinkResult<()>;

    /// Remove records created before `cutoff` whose severity is at
    /// most `max_severity`. Returns how many were removed.
    async fn prune(&self, cutoff: Timestamp, max_severity: ActivitySeverity) -> SinkResult<u64>;
}

/// In-memory sink for tests and the dev server.
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
    records: RwLock<Vec<ActivityRecord>>,
}

impl MemoryActivitySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records.read().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ActivitySink for MemoryActivitySink {
    async fn append(&self, record: ActivityRecord) -> SinkResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|e| SinkError::Internal(e.to_string()))?;
        if !records.iter().any(|r| r.id == record.id) {
            records.push(record);
        }
        Ok(())
    }

    async fn prune(&self, cutoff: Timestamp, max_severity: ActivitySeverity) -> SinkResult<u64> {
        let mut records = self
            .records
            .write()
            .map_err(|e| SinkError::Internal(e.to_string()))?;
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff || r.severity > max_severity);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{ActivityAction, UserId};

    fn record() -> ActivityRecord {
        ActivityRecord::new(
            ActivityAction::TaskCreated {
                title: "x".to_string(),
            },
            UserId::new(),
        )
    }

    #[tokio::test]
    async fn append_is_idempotent_on_id() {
        let sink = MemoryActivitySink::new();
        let r = record();
        sink.append(r.clone()).await.unwrap();
        sink.append(r).await.unwrap();
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn prune_respects_cutoff_and_severity() {
        let sink = MemoryActivitySink::new();

        let mut old_low = record();
        old_low.created_at = Timestamp::days_ago(10);
        sink.append(old_low).await.unwrap();

        let mut old_high = record();
        old_high.created_at = Timestamp::days_ago(10);
        old_high.severity = ActivitySeverity::High;
        sink.append(old_high).await.unwrap();

        sink.append(record()).await.unwrap();

        let removed = sink
            .prune(Timestamp::days_ago(5), ActivitySeverity::Medium)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(sink.records().len(), 2);
    }
}
