//! The activity recorder: rolling window + fire-and-forget sink writes.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use tracing::warn;

use trellis_core::{ActivityRecord, ActivitySeverity, ConflictId, Timestamp};
use trellis_events::{BoardEvent, Fanout};

use crate::sink::{ActivitySink, SinkResult};

/// Records every mutation and auth event.
///
/// The recorder is the single producer of activity records. Each
/// record is pushed into the rolling window, published to the
/// `activity` room, and forwarded to the sink on a spawned task so
/// that sink latency or failure never touches the user request.
pub struct ActivityRecorder {
    sink: Arc<dyn ActivitySink>,
    fanout: Arc<dyn Fanout>,
    ring: RwLock<VecDeque<ActivityRecord>>,
    ring_size: usize,
}

impl ActivityRecorder {
    /// Create a recorder with a window of `ring_size` records.
    #[must_use]
    pub fn new(sink: Arc<dyn ActivitySink>, fanout: Arc<dyn Fanout>, ring_size: usize) -> Self {
        Self {
            sink,
            fanout,
            ring: RwLock::new(VecDeque::with_capacity(ring_size)),
            ring_size: ring_size.max(1),
        }
    }

    /// Record one activity.
    ///
    /// Must be called from within a tokio runtime; the sink write is
    /// spawned and its failure only logged.
    pub fn record(&self, record: ActivityRecord) {
        if let Ok(mut ring) = self.ring.write() {
            if ring.len() >= self.ring_size {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }

        self.fanout.publish(&BoardEvent::ActivityNew {
            record: record.clone(),
        });

        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let id = record.id;
            if let Err(e) = sink.append(record).await {
                warn!(activity_id = %id, error = %e, "Failed to persist activity record");
            }
        });
    }

    /// The newest records, newest first, capped at `limit` (defaults
    /// to the whole window).
    #[must_use]
    pub fn recent(&self, limit: Option<usize>) -> Vec<ActivityRecord> {
        let Ok(ring) = self.ring.read() else {
            return Vec::new();
        };
        let limit = limit.unwrap_or(self.ring_size).min(ring.len());
        ring.iter().rev().take(limit).cloned().collect()
    }

    /// Flip `is_resolved` on every windowed record of a conflict.
    ///
    /// The sink is append-only; resolution there is represented by the
    /// `conflict_resolved` record that follows.
    pub fn mark_conflict_resolved(&self, conflict_id: ConflictId) {
        if let Ok(mut ring) = self.ring.write() {
            for record in ring.iter_mut() {
                if record.conflict_id == Some(conflict_id) {
                    record.is_resolved = true;
                }
            }
        }
    }

    /// Remove low/medium records older than `days` from the sink and
    /// the window. Returns how many the sink removed.
    ///
    /// # Errors
    ///
    /// Propagates the sink failure; prune is an explicit admin
    /// operation, not a background write.
    pub async fn prune(&self, days: u32) -> SinkResult<u64> {
        let cutoff = Timestamp::days_ago(days);
        let removed = self.sink.prune(cutoff, ActivitySeverity::Medium).await?;
        if let Ok(mut ring) = self.ring.write() {
            ring.retain(|r| r.created_at >= cutoff || r.severity > ActivitySeverity::Medium);
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for ActivityRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRecorder")
            .field("ring_size", &self.ring_size)
            .finish_non_exhaustive()
    }
}
