//! In-memory indexes mapping keys to record locations.
//!
//! Three implementations behind one trait: a flat hash map, a radix tree,
//! and the tiered hot/warm/cold engine. All are selected at open time via
//! [`IndexKind`].

pub mod radix;
pub mod tiered;

use crate::Location;
use parking_lot::RwLock;
use std::collections::HashMap;

pub use radix::{RadixIndex, RadixTree};
pub use tiered::{TieredIndex, TieredOptions};

/// The index contract every implementation satisfies. Exactly one location
/// is held per live key; `put` on an existing key replaces it.
pub trait Index: Send + Sync {
    fn put(&self, key: &[u8], location: Location);
    fn get(&self, key: &[u8]) -> Option<Location>;
    /// Remove the key, reporting whether it was present.
    fn delete(&self, key: &[u8]) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Release background resources. Further use is a no-op, not an error.
    fn close(&self);
}

/// Which index implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    Map,
    Radix,
    #[default]
    Tiered,
}

impl IndexKind {
    /// Parse the config-file spelling. `art` is the radix tree, `hybrid`
    /// the tiered engine.
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s {
            "map" => Some(Self::Map),
            "art" => Some(Self::Radix),
            "hybrid" => Some(Self::Tiered),
            _ => None,
        }
    }
}

/// Construct the index selected by `kind`.
pub fn build_index(kind: IndexKind, tiered: &TieredOptions) -> Box<dyn Index> {
    match kind {
        IndexKind::Map => Box::new(MapIndex::new()),
        IndexKind::Radix => Box::new(RadixIndex::new()),
        IndexKind::Tiered => Box::new(TieredIndex::new(tiered.clone())),
    }
}

/// Flat hash map index.
#[derive(Debug, Default)]
pub struct MapIndex {
    entries: RwLock<HashMap<Vec<u8>, Location>>,
}

impl MapIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Index for MapIndex {
    fn put(&self, key: &[u8], location: Location) {
        self.entries.write().insert(key.to_vec(), location);
    }

    fn get(&self, key: &[u8]) -> Option<Location> {
        self.entries.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.entries.write().remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn close(&self) {}
}
