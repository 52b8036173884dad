//! The state machine the log drives: engine mutations plus watch fan-out.

use crate::command::{Command, CommandError};
use reef_storage::{Engine, EngineError};
use reef_watch::{Event, WatchBus};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Storage(#[from] EngineError),
}

/// A state machine snapshot. Carries no payload: the record log on disk is
/// the durable state, so there is nothing to capture beyond its existence.
#[derive(Debug, Default)]
pub struct Snapshot;

/// Contract the consensus runtime invokes. `apply` runs single-threaded
/// per node, in committed log order.
pub trait StateMachine: Send + Sync + 'static {
    fn apply(&self, entry: &[u8]) -> Result<(), ApplyError>;
    fn snapshot(&self) -> Snapshot;
    fn restore(&self, snapshot: Snapshot) -> Result<(), ApplyError>;
}

/// Applies committed commands to the storage engine and publishes the
/// resulting events. Publication happens after the state change, for puts
/// and deletes alike, so a watcher that sees an event can immediately read
/// the state it describes.
pub struct KvStateMachine {
    engine: Arc<Engine>,
    bus: WatchBus,
}

impl std::fmt::Debug for KvStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStateMachine")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl KvStateMachine {
    pub fn new(engine: Arc<Engine>, bus: WatchBus) -> Self {
        Self { engine, bus }
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&self, entry: &[u8]) -> Result<(), ApplyError> {
        match Command::decode(entry)? {
            Command::Put { key, value } => {
                self.engine.put(&key, &value)?;
                self.bus.publish(&Event::put(lossy(&key), lossy(&value)));
            }
            Command::Delete { key } => {
                // Resolve the old value before the index forgets it.
                let prev_value = self.engine.get(&key).ok().map(|v| lossy(&v));
                self.engine.delete(&key)?;
                self.bus.publish(&Event::delete(lossy(&key), prev_value));
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        tracing::debug!(keys = self.engine.key_count(), "zero-payload snapshot taken");
        Snapshot
    }

    fn restore(&self, _snapshot: Snapshot) -> Result<(), ApplyError> {
        // Nothing to do: the engine reopened from the segment files and the
        // runtime replays the committed log tail on top of that.
        tracing::info!("snapshot restore is a no-op; state recovered from segments");
        Ok(())
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_storage::EngineOptions;
    use reef_watch::EventKind;
    use tempfile::TempDir;

    fn machine(dir: &TempDir) -> (KvStateMachine, Arc<Engine>, WatchBus) {
        let engine = Arc::new(Engine::open(EngineOptions::new(dir.path())).unwrap());
        let bus = WatchBus::new();
        (
            KvStateMachine::new(engine.clone(), bus.clone()),
            engine,
            bus,
        )
    }

    #[test]
    fn test_apply_put_updates_engine_and_publishes() {
        let dir = TempDir::new().unwrap();
        let (sm, engine, bus) = machine(&dir);
        let mut sub = bus.subscribe("", 8);

        sm.apply(&Command::put(b"x".to_vec(), b"v".to_vec()).encode().unwrap())
            .unwrap();

        assert_eq!(engine.get(b"x").unwrap(), b"v");
        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Put);
        assert_eq!(event.key, "x");
        assert_eq!(event.value.as_deref(), Some("v"));
    }

    #[test]
    fn test_apply_delete_carries_previous_value() {
        let dir = TempDir::new().unwrap();
        let (sm, engine, bus) = machine(&dir);

        sm.apply(&Command::put(b"x".to_vec(), b"v".to_vec()).encode().unwrap())
            .unwrap();
        let mut sub = bus.subscribe("", 8);
        sm.apply(&Command::delete(b"x".to_vec()).encode().unwrap())
            .unwrap();

        assert!(engine.get(b"x").is_err());
        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Delete);
        assert_eq!(event.prev_value.as_deref(), Some("v"));
    }

    #[test]
    fn test_apply_delete_of_absent_key_has_no_prev_value() {
        let dir = TempDir::new().unwrap();
        let (sm, _engine, bus) = machine(&dir);
        let mut sub = bus.subscribe("", 8);

        sm.apply(&Command::delete(b"ghost".to_vec()).encode().unwrap())
            .unwrap();

        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Delete);
        assert_eq!(event.prev_value, None);
    }

    #[test]
    fn test_apply_rejects_malformed_entries() {
        let dir = TempDir::new().unwrap();
        let (sm, _engine, _bus) = machine(&dir);
        assert!(matches!(
            sm.apply(&[0xde, 0xad, 0xbe, 0xef]),
            Err(ApplyError::Command(_))
        ));
    }

    #[test]
    fn test_event_follows_state_update() {
        let dir = TempDir::new().unwrap();
        let (sm, engine, bus) = machine(&dir);
        let mut sub = bus.subscribe("", 8);

        sm.apply(&Command::put(b"k".to_vec(), b"v1".to_vec()).encode().unwrap())
            .unwrap();

        // An observer holding the event must find the engine at least as
        // new as what the event describes.
        let event = sub.try_recv().unwrap();
        assert_eq!(engine.get(b"k").unwrap(), event.value.unwrap().as_bytes());
    }

    #[test]
    fn test_snapshot_restore_are_empty() {
        let dir = TempDir::new().unwrap();
        let (sm, engine, _bus) = machine(&dir);
        sm.apply(&Command::put(b"k".to_vec(), b"v".to_vec()).encode().unwrap())
            .unwrap();

        let snapshot = sm.snapshot();
        sm.restore(snapshot).unwrap();
        // State is untouched by the snapshot cycle.
        assert_eq!(engine.get(b"k").unwrap(), b"v");
    }
}
