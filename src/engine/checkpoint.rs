//! Checkpoint sink (§4.6.6): durable snapshots of [`ExecutionState`] keyed
//! by `execution_id`, offered to the sink after every node body. Enables
//! resume after `waiting_approval` and reconstruction of partial progress
//! on restart. Checkpoints are immutable; a sink only ever appends.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::state::Checkpoint;
use crate::Result;

#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn write(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Most recent checkpoint for an execution, if any.
    async fn latest(&self, execution_id: Uuid) -> Result<Option<Checkpoint>>;

    /// Full, time-ordered history for an execution (oldest first).
    async fn history(&self, execution_id: Uuid) -> Result<Vec<Checkpoint>>;
}

/// Default in-memory sink (§4.6.6: "the sink, in-memory by default").
#[derive(Default)]
pub struct InMemoryCheckpointSink {
    checkpoints: DashMap<Uuid, Vec<Checkpoint>>,
}

impl InMemoryCheckpointSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointSink for InMemoryCheckpointSink {
    async fn write(&self, checkpoint: Checkpoint) -> Result<()> {
        self.checkpoints
            .entry(checkpoint.execution_id)
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn latest(&self, execution_id: Uuid) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(&execution_id)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn history(&self, execution_id: Uuid) -> Result<Vec<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(&execution_id)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn checkpoint(execution_id: Uuid, step: Option<Uuid>) -> Checkpoint {
        Checkpoint {
            execution_id,
            last_completed_step_id: step,
            variables: serde_json::Map::new(),
            step_statuses: Default::default(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn latest_returns_the_most_recently_written_checkpoint() {
        let sink = InMemoryCheckpointSink::new();
        let exec = Uuid::new_v4();
        let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
        sink.write(checkpoint(exec, Some(s1))).await.unwrap();
        sink.write(checkpoint(exec, Some(s2))).await.unwrap();
        let latest = sink.latest(exec).await.unwrap().unwrap();
        assert_eq!(latest.last_completed_step_id, Some(s2));
        assert_eq!(sink.history(exec).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_execution_has_no_checkpoints() {
        let sink = InMemoryCheckpointSink::new();
        assert!(sink.latest(Uuid::new_v4()).await.unwrap().is_none());
    }
}
