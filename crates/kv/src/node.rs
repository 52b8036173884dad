//! One reefkv node: mutations go through the replicated log, reads are
//! served locally, watches attach to the bus.

use reef_raft::{Command, CommandError, LogError, ReplicatedLog};
use reef_storage::{Engine, EngineError};
use reef_watch::{Subscriber, WatchBus};
use std::sync::Arc;
use std::time::Duration;

/// Per-call bound on waiting for a mutation to commit and apply.
pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Storage(#[from] EngineError),
}

impl NodeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(EngineError::KeyNotFound))
    }

    pub fn is_not_leader(&self) -> bool {
        matches!(self, Self::Log(LogError::NotLeader))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Log(LogError::ApplyTimeout(_)))
    }

    /// Machine-readable error kind for user-facing envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log(LogError::NotLeader) => "not_leader",
            Self::Log(LogError::ApplyTimeout(_)) => "apply_timeout",
            Self::Log(LogError::Closed) => "shutting_down",
            Self::Log(LogError::Apply(_)) => "apply_failed",
            Self::Command(_) => "bad_command",
            Self::Storage(EngineError::KeyNotFound) => "key_not_found",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// The facade itself. Generic over the log runtime, same as every other
/// transport seam in the system, so tests can drive it in process.
pub struct Node<L: ReplicatedLog> {
    log: Arc<L>,
    engine: Arc<Engine>,
    bus: WatchBus,
    apply_timeout: Duration,
}

impl<L: ReplicatedLog> std::fmt::Debug for Node<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("engine", &self.engine)
            .field("apply_timeout", &self.apply_timeout)
            .finish_non_exhaustive()
    }
}

impl<L: ReplicatedLog> Node<L> {
    pub fn new(log: Arc<L>, engine: Arc<Engine>, bus: WatchBus, apply_timeout: Duration) -> Self {
        Self {
            log,
            engine,
            bus,
            apply_timeout,
        }
    }

    /// Replicate a put. Resolves once the entry applied locally, or fails
    /// `NotLeader` / `ApplyTimeout` / whatever apply returned.
    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), NodeError> {
        let entry = Command::put(key.to_vec(), value.to_vec()).encode()?;
        self.log.submit(entry, self.apply_timeout).await?;
        Ok(())
    }

    /// Replicate a delete.
    pub async fn delete(&self, key: &[u8]) -> Result<(), NodeError> {
        let entry = Command::delete(key.to_vec()).encode()?;
        self.log.submit(entry, self.apply_timeout).await?;
        Ok(())
    }

    /// Local read; served by any node, leader or not.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, NodeError> {
        Ok(self.engine.get(key)?)
    }

    /// Subscribe to committed mutations under `prefix`.
    pub fn watch(&self, prefix: impl Into<String>, capacity: usize) -> Subscriber {
        self.bus.subscribe(prefix, capacity)
    }

    pub fn is_leader(&self) -> bool {
        self.log.is_leader()
    }

    pub fn key_count(&self) -> usize {
        self.engine.key_count()
    }

    /// Tear down the watch registry and storage. The log runtime is shut
    /// down by whoever owns it, before this.
    pub fn close(&self) -> Result<(), NodeError> {
        self.bus.close();
        self.engine.close()?;
        tracing::info!("node closed");
        Ok(())
    }
}
