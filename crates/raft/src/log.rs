//! The replicated-log contract and its in-process runtime.

use crate::state_machine::{ApplyError, Snapshot, StateMachine};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Depth of the submission queue feeding the apply task.
const APPLY_QUEUE_DEPTH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Writes only go through the leader; retry against it.
    #[error("not the leader")]
    NotLeader,
    /// The entry was not applied within the deadline. It may still commit
    /// and apply later; the outcome is indeterminate but retry-safe.
    #[error("apply timed out after {0:?}")]
    ApplyTimeout(Duration),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("replicated log is shut down")]
    Closed,
}

/// What the rest of the system sees of the consensus runtime: ordered,
/// committed entries executing through the state machine.
#[async_trait::async_trait]
pub trait ReplicatedLog: Send + Sync + 'static {
    /// Submit one serialized command and wait (bounded) for it to apply.
    async fn submit(&self, entry: Vec<u8>, timeout: Duration) -> Result<(), LogError>;

    /// Whether this node currently accepts writes.
    fn is_leader(&self) -> bool;
}

struct Proposal {
    entry: Vec<u8>,
    ack: oneshot::Sender<Result<(), ApplyError>>,
}

/// Single-node log runtime: one apply task drains proposals in submission
/// order, which makes apply serializable exactly like a consensus log
/// would. Committed entries are retained in memory, mirroring the
/// original deployment's in-memory log stores.
pub struct LocalLog {
    tx: Mutex<Option<mpsc::Sender<Proposal>>>,
    leader: AtomicBool,
    entries: Arc<Mutex<Vec<Vec<u8>>>>,
    sm: Arc<dyn StateMachine>,
    apply_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LocalLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLog")
            .field("leader", &self.is_leader())
            .field("committed", &self.committed_len())
            .finish_non_exhaustive()
    }
}

impl LocalLog {
    /// Start the apply task over `sm`. The node starts as leader.
    pub fn spawn(sm: Arc<dyn StateMachine>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Proposal>(APPLY_QUEUE_DEPTH);
        let entries = Arc::new(Mutex::new(Vec::new()));

        let task_entries = entries.clone();
        let task_sm = sm.clone();
        let apply_task = tokio::spawn(async move {
            while let Some(proposal) = rx.recv().await {
                task_entries.lock().push(proposal.entry.clone());
                let result = task_sm.apply(&proposal.entry);
                if let Err(e) = &result {
                    tracing::error!(error = %e, "apply failed");
                }
                // The submitter may have timed out and gone away.
                let _ = proposal.ack.send(result);
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            leader: AtomicBool::new(true),
            entries,
            sm,
            apply_task: Mutex::new(Some(apply_task)),
        }
    }

    /// Toggle leadership. Followers refuse writes with `NotLeader`.
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::Release);
    }

    pub fn committed_len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn take_snapshot(&self) -> Snapshot {
        self.sm.snapshot()
    }

    pub fn restore(&self, snapshot: Snapshot) -> Result<(), ApplyError> {
        self.sm.restore(snapshot)
    }

    /// Re-run every committed entry against the state machine, as a
    /// runtime replaying its log after restore would.
    pub fn reapply(&self) -> Result<(), ApplyError> {
        let entries = self.entries.lock().clone();
        for entry in &entries {
            self.sm.apply(entry)?;
        }
        Ok(())
    }

    /// Stop accepting submissions and wait for the apply task to drain.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
        let task = self.apply_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[async_trait::async_trait]
impl ReplicatedLog for LocalLog {
    async fn submit(&self, entry: Vec<u8>, timeout: Duration) -> Result<(), LogError> {
        if !self.is_leader() {
            return Err(LogError::NotLeader);
        }
        let tx = self.tx.lock().clone().ok_or(LogError::Closed)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(Proposal { entry, ack: ack_tx })
            .await
            .map_err(|_| LogError::Closed)?;

        match tokio::time::timeout(timeout, ack_rx).await {
            // Expiry does not cancel the proposal; it may still apply.
            Err(_) => Err(LogError::ApplyTimeout(timeout)),
            Ok(Err(_)) => Err(LogError::Closed),
            Ok(Ok(result)) => Ok(result?),
        }
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::state_machine::KvStateMachine;
    use reef_storage::{Engine, EngineOptions};
    use reef_watch::WatchBus;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn kv_log(dir: &TempDir) -> (LocalLog, Arc<Engine>, WatchBus) {
        let engine = Arc::new(Engine::open(EngineOptions::new(dir.path())).unwrap());
        let bus = WatchBus::new();
        let sm = Arc::new(KvStateMachine::new(engine.clone(), bus.clone()));
        (LocalLog::spawn(sm), engine, bus)
    }

    fn put_entry(key: &[u8], value: &[u8]) -> Vec<u8> {
        Command::put(key.to_vec(), value.to_vec()).encode().unwrap()
    }

    #[tokio::test]
    async fn test_submit_applies_in_order() {
        let dir = TempDir::new().unwrap();
        let (log, engine, _bus) = kv_log(&dir);

        log.submit(put_entry(b"a", b"1"), TIMEOUT).await.unwrap();
        log.submit(put_entry(b"a", b"2"), TIMEOUT).await.unwrap();
        log.submit(put_entry(b"b", b"3"), TIMEOUT).await.unwrap();

        assert_eq!(engine.get(b"a").unwrap(), b"2");
        assert_eq!(engine.get(b"b").unwrap(), b"3");
        assert_eq!(log.committed_len(), 3);
    }

    #[tokio::test]
    async fn test_follower_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let (log, _engine, _bus) = kv_log(&dir);

        log.set_leader(false);
        assert!(matches!(
            log.submit(put_entry(b"a", b"1"), TIMEOUT).await,
            Err(LogError::NotLeader)
        ));

        log.set_leader(true);
        log.submit(put_entry(b"a", b"1"), TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_error_reaches_submitter() {
        let dir = TempDir::new().unwrap();
        let (log, _engine, _bus) = kv_log(&dir);

        let result = log.submit(vec![0xFF, 0xFF], TIMEOUT).await;
        assert!(matches!(
            result,
            Err(LogError::Apply(ApplyError::Command(_)))
        ));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_closed() {
        let dir = TempDir::new().unwrap();
        let (log, engine, _bus) = kv_log(&dir);

        log.submit(put_entry(b"a", b"1"), TIMEOUT).await.unwrap();
        log.shutdown().await;

        assert!(matches!(
            log.submit(put_entry(b"b", b"2"), TIMEOUT).await,
            Err(LogError::Closed)
        ));
        // Entries applied before shutdown stay applied.
        assert_eq!(engine.get(b"a").unwrap(), b"1");
    }

    // Multi-threaded so the timeout timer fires while apply blocks.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_apply_times_out_but_still_commits() {
        struct SlowSm(Arc<Mutex<Vec<Vec<u8>>>>);
        impl StateMachine for SlowSm {
            fn apply(&self, entry: &[u8]) -> Result<(), ApplyError> {
                std::thread::sleep(Duration::from_millis(100));
                self.0.lock().push(entry.to_vec());
                Ok(())
            }
            fn snapshot(&self) -> Snapshot {
                Snapshot
            }
            fn restore(&self, _snapshot: Snapshot) -> Result<(), ApplyError> {
                Ok(())
            }
        }

        let applied = Arc::new(Mutex::new(Vec::new()));
        let log = LocalLog::spawn(Arc::new(SlowSm(applied.clone())));

        let result = log
            .submit(b"entry".to_vec(), Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(LogError::ApplyTimeout(_))));

        // The proposal was not cancelled by the timeout.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(applied.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reapplying_the_log_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (log, engine, _bus) = kv_log(&dir);

        log.submit(put_entry(b"a", b"1"), TIMEOUT).await.unwrap();
        log.submit(put_entry(b"a", b"2"), TIMEOUT).await.unwrap();
        log.submit(
            Command::delete(b"zz".to_vec()).encode().unwrap(),
            TIMEOUT,
        )
        .await
        .unwrap();
        let keys_before = engine.key_count();

        log.reapply().unwrap();

        assert_eq!(engine.get(b"a").unwrap(), b"2");
        assert!(engine.get(b"zz").is_err());
        assert_eq!(engine.key_count(), keys_before);
    }

    #[tokio::test]
    async fn test_snapshot_cycle_preserves_reads() {
        let dir = TempDir::new().unwrap();
        let (log, engine, _bus) = kv_log(&dir);

        log.submit(put_entry(b"k", b"v"), TIMEOUT).await.unwrap();
        let snapshot = log.take_snapshot();
        log.restore(snapshot).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), b"v");
    }
}
