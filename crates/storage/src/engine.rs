//! Single-node storage engine: store + index + bloom filter.
//!
//! This is what the replicated state machine drives. Writes land in the
//! append-only store and are mirrored into the index and filter; reads go
//! filter -> index -> store. Deletes only drop the index entry; their
//! durability rides on the replicated log being re-applied after restart.

use crate::bloom::KeyFilter;
use crate::index::{build_index, Index, IndexKind, TieredOptions};
use crate::store::{Store, StoreError, DEFAULT_SEGMENT_SIZE_LIMIT};
use crate::Location;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("key not found")]
    KeyNotFound,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::KeyNotFound => Self::KeyNotFound,
            other => Self::Store(other),
        }
    }
}

/// Everything tunable about a single node's storage.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dir: PathBuf,
    /// Active segment cap before rotation.
    pub segment_size_limit: u64,
    pub index: IndexKind,
    /// Bloom filter target false-positive rate.
    pub filter_fp: f64,
    /// Bloom filter expected key cardinality.
    pub filter_capacity: usize,
    pub tiered: TieredOptions,
}

impl EngineOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size_limit: DEFAULT_SEGMENT_SIZE_LIMIT,
            index: IndexKind::default(),
            filter_fp: 0.01,
            filter_capacity: 1_000_000,
            tiered: TieredOptions::default(),
        }
    }
}

/// The composed engine. All methods take `&self`; the store's write lock
/// serializes appends and the apply loop is the only writer anyway.
pub struct Engine {
    store: Store,
    index: Box<dyn Index>,
    filter: KeyFilter,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("keys", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the engine, replaying every on-disk record into the index and
    /// bloom filter. The newest record for a key wins because recovery
    /// reports records in (file id, offset) order.
    pub fn open(opts: EngineOptions) -> Result<Self, EngineError> {
        let index = build_index(opts.index, &opts.tiered);
        let filter = KeyFilter::new(opts.filter_capacity, opts.filter_fp);

        let store = Store::open(&opts.dir, opts.segment_size_limit, |key, location| {
            filter.add(&key);
            index.put(&key, location);
        })?;

        tracing::info!(
            dir = %opts.dir.display(),
            keys = index.len(),
            index = ?opts.index,
            "engine opened"
        );

        Ok(Self {
            store,
            index,
            filter,
        })
    }

    /// Append and index one key/value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Location, EngineError> {
        let location = self.store.append(key, value)?;
        self.index.put(key, location);
        self.filter.add(key);
        Ok(location)
    }

    /// Look the key up. The filter rejects never-written keys without
    /// touching the index; a filter pass still needs the index to agree.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, EngineError> {
        if !self.filter.probe(key) {
            return Err(EngineError::KeyNotFound);
        }
        let location = self.index.get(key).ok_or(EngineError::KeyNotFound)?;
        Ok(self.store.read(&location)?)
    }

    /// Drop the key from the index. The filter keeps its bits and the old
    /// record bytes become garbage in place.
    pub fn delete(&self, key: &[u8]) -> Result<bool, EngineError> {
        Ok(self.index.delete(key))
    }

    pub fn sync(&self) -> Result<(), EngineError> {
        Ok(self.store.sync()?)
    }

    /// Close index worker and segment files. Not an error to call twice.
    pub fn close(&self) -> Result<(), EngineError> {
        self.index.close();
        Ok(self.store.close()?)
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    pub fn segment_count(&self) -> usize {
        self.store.segment_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Engine {
        Engine::open(EngineOptions::new(dir.path())).unwrap()
    }

    #[test]
    fn test_put_get_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        engine.put(b"a", b"1").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"1");

        assert!(engine.delete(b"a").unwrap());
        assert!(matches!(engine.get(b"a"), Err(EngineError::KeyNotFound)));
        assert!(!engine.delete(b"a").unwrap());
    }

    #[test]
    fn test_get_missing_key() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        assert!(matches!(
            engine.get(b"never-written"),
            Err(EngineError::KeyNotFound)
        ));
    }

    #[test]
    fn test_overwrite_returns_latest() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine.put(b"a", b"1").unwrap();
        engine.put(b"a", b"2").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"2");
        assert_eq!(engine.key_count(), 1);
    }

    #[test]
    fn test_reopen_recovers_latest_values() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open(&dir);
            engine.put(b"a", b"1").unwrap();
            engine.put(b"a", b"2").unwrap();
            engine.put(b"b", b"3").unwrap();
            engine.close().unwrap();
        }

        let engine = open(&dir);
        assert_eq!(engine.get(b"a").unwrap(), b"2");
        assert_eq!(engine.get(b"b").unwrap(), b"3");
        assert_eq!(engine.key_count(), 2);
    }

    #[test]
    fn test_rotation_under_small_segment_limit() {
        let dir = TempDir::new().unwrap();
        let mut opts = EngineOptions::new(dir.path());
        opts.segment_size_limit = 1024;
        let engine = Engine::open(opts).unwrap();

        // 100 overwrites of one key; each record is 20 + 1 + 100 bytes.
        for i in 0..100u8 {
            let mut value = [0u8; 100];
            value.fill(i);
            engine.put(b"k", &value).unwrap();
        }

        let value = engine.get(b"k").unwrap();
        assert_eq!(value[0], 99);
        assert!(engine.segment_count() >= 2);
        assert_eq!(engine.key_count(), 1);
    }

    #[test]
    fn test_recovery_with_each_index_kind() {
        for kind in [IndexKind::Map, IndexKind::Radix, IndexKind::Tiered] {
            let dir = TempDir::new().unwrap();
            {
                let mut opts = EngineOptions::new(dir.path());
                opts.index = kind;
                let engine = Engine::open(opts).unwrap();
                for i in 0..50u32 {
                    engine
                        .put(format!("key-{}", i).as_bytes(), format!("v{}", i).as_bytes())
                        .unwrap();
                }
                engine.close().unwrap();
            }

            let mut opts = EngineOptions::new(dir.path());
            opts.index = kind;
            let engine = Engine::open(opts).unwrap();
            assert_eq!(engine.key_count(), 50, "index kind {:?}", kind);
            for i in 0..50u32 {
                assert_eq!(
                    engine.get(format!("key-{}", i).as_bytes()).unwrap(),
                    format!("v{}", i).as_bytes(),
                    "index kind {:?}",
                    kind
                );
            }
        }
    }

    #[test]
    fn test_filter_rejects_before_index() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);
        engine.put(b"present", b"v").unwrap();

        // Deleted keys may still pass the filter; the index settles it.
        engine.delete(b"present").unwrap();
        assert!(matches!(
            engine.get(b"present"),
            Err(EngineError::KeyNotFound)
        ));
    }
}
