//! Replicated command log for reefkv.
//!
//! Mutations never touch the storage engine directly: they are encoded as
//! [`Command`] entries, ordered by a replicated log, and executed by the
//! state machine's `apply` hook once committed. The consensus runtime
//! itself (elections, quorum replication, wire transport) is an external
//! collaborator behind the [`ReplicatedLog`] trait; [`LocalLog`] is the
//! in-process runtime that drives the same contract for a single node and
//! for tests.
//!
//! Snapshots deliberately carry no payload. The segment files already hold
//! the durable state outside the log, so `snapshot` writes nothing and
//! `restore` does nothing; reopening the engine rebuilds index and filter
//! from disk, and replaying the committed log re-applies what the scan
//! alone cannot know (deletes).

pub mod command;
pub mod log;
pub mod state_machine;

pub use command::{Command, CommandError};
pub use log::{LocalLog, LogError, ReplicatedLog};
pub use state_machine::{ApplyError, KvStateMachine, Snapshot, StateMachine};
