//! Log-structured storage for reefkv: append-only segments + in-memory index.
//!
//! Records live in numbered `.data` segment files; an in-memory index maps
//! each live key to the `Location` of its newest record. A bloom filter
//! short-circuits lookups for keys that were never written. The whole crate
//! is synchronous blocking I/O; the async boundary is at the replication
//! layer above.

pub mod bloom;
pub mod engine;
pub mod index;
pub mod record;
pub mod segment;
pub mod store;

use serde::{Deserialize, Serialize};

pub use bloom::KeyFilter;
pub use engine::{Engine, EngineError, EngineOptions};
pub use index::{Index, IndexKind};
pub use record::Record;
pub use store::Store;

/// Identifies one record inside the segment directory: which file, where in
/// it, and how many bytes it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Segment file id.
    pub file_id: u32,
    /// Byte offset of the record header within the segment.
    pub offset: u64,
    /// Total encoded record size in bytes.
    pub size: u32,
}
