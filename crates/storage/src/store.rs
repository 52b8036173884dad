//! The segment directory: one active (writable) segment plus a map of
//! sealed (read-only) ones.
//!
//! Opening runs a recovery scan over every segment in file-id order and
//! hands each decoded `(key, location)` pair to the caller, which is how
//! the index and bloom filter get rebuilt after a restart.

use crate::record::{Record, HEADER_SIZE};
use crate::segment::{SegmentError, SegmentFile};
use crate::Location;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Default cap on a segment before rotation: 64 MiB.
pub const DEFAULT_SEGMENT_SIZE_LIMIT: u64 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key not found")]
    KeyNotFound,
    #[error("failed to scan store directory {path}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

struct StoreInner {
    active: SegmentFile,
    sealed: HashMap<u32, SegmentFile>,
}

/// Directory of append-only segments. A write lock serializes appends and
/// rotation; reads take the read lock and go through positioned I/O.
pub struct Store {
    dir: PathBuf,
    segment_size_limit: u64,
    inner: RwLock<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("segment_size_limit", &self.segment_size_limit)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open the store at `dir`, creating it if needed. Every record found
    /// on disk is reported to `on_record` in (file id, offset) order, so
    /// the last call for a given key carries its newest location.
    pub fn open<F>(
        dir: &Path,
        segment_size_limit: u64,
        mut on_record: F,
    ) -> Result<Self, StoreError>
    where
        F: FnMut(Vec<u8>, Location),
    {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::ListDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut file_ids = list_segment_ids(dir)?;
        file_ids.sort_unstable();

        if file_ids.is_empty() {
            let active = SegmentFile::open(dir, 0)?;
            tracing::info!(dir = %dir.display(), "created empty store");
            return Ok(Self {
                dir: dir.to_path_buf(),
                segment_size_limit,
                inner: RwLock::new(StoreInner {
                    active,
                    sealed: HashMap::new(),
                }),
            });
        }

        let mut sealed = HashMap::new();
        let mut recovered = 0usize;
        let last = *file_ids.last().expect("non-empty id list");

        let mut active = None;
        for file_id in &file_ids {
            let segment = SegmentFile::open(dir, *file_id)?;
            recovered += scan_segment(&segment, &mut on_record)?;
            if *file_id == last {
                active = Some(segment);
            } else {
                sealed.insert(*file_id, segment);
            }
        }
        let mut active = active.expect("last file id was opened");

        // A freshly rotated store can leave an empty highest segment behind;
        // keep appends going into a new file past every recovered id.
        if active.write_offset() == 0 && !sealed.is_empty() {
            sealed.insert(active.file_id(), active);
            active = SegmentFile::open(dir, last + 1)?;
        }

        tracing::info!(
            dir = %dir.display(),
            segments = file_ids.len(),
            records = recovered,
            active = active.file_id(),
            "store opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            segment_size_limit,
            inner: RwLock::new(StoreInner { active, sealed }),
        })
    }

    /// Append one key/value record, rotating to a new segment first if the
    /// active one has reached the size limit.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<Location, StoreError> {
        let mut inner = self.inner.write();

        if inner.active.write_offset() >= self.segment_size_limit {
            self.rotate(&mut inner)?;
        }

        let record = Record::new(key, value);
        let data = record.encode();
        let offset = inner.active.append(&data)?;

        Ok(Location {
            file_id: inner.active.file_id(),
            offset,
            size: data.len() as u32,
        })
    }

    /// Read the value of the record at `location`.
    pub fn read(&self, location: &Location) -> Result<Vec<u8>, StoreError> {
        let inner = self.inner.read();
        let segment = if location.file_id == inner.active.file_id() {
            &inner.active
        } else {
            inner
                .sealed
                .get(&location.file_id)
                .ok_or(StoreError::KeyNotFound)?
        };

        match segment.read_record_at(location.offset) {
            Ok(record) => Ok(record.value),
            Err(e @ SegmentError::Record(_)) => {
                tracing::error!(
                    file_id = location.file_id,
                    offset = location.offset,
                    error = %e,
                    "corrupt record on read path"
                );
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fsync the active segment.
    pub fn sync(&self) -> Result<(), StoreError> {
        Ok(self.inner.read().active.sync()?)
    }

    /// Close every segment. Appends after this fail.
    pub fn close(&self) -> Result<(), StoreError> {
        let inner = self.inner.write();
        inner.active.close()?;
        for segment in inner.sealed.values() {
            segment.close()?;
        }
        Ok(())
    }

    pub fn active_file_id(&self) -> u32 {
        self.inner.read().active.file_id()
    }

    /// Active + sealed segment count.
    pub fn segment_count(&self) -> usize {
        let inner = self.inner.read();
        1 + inner.sealed.len()
    }

    fn rotate(&self, inner: &mut StoreInner) -> Result<(), StoreError> {
        let next_id = inner.active.file_id() + 1;
        let fresh = SegmentFile::open(&self.dir, next_id)?;

        inner.active.close()?;
        let sealed = std::mem::replace(&mut inner.active, fresh);
        tracing::debug!(
            sealed = sealed.file_id(),
            active = next_id,
            bytes = sealed.write_offset(),
            "rotated active segment"
        );
        inner.sealed.insert(sealed.file_id(), sealed);
        Ok(())
    }
}

/// Collect ids of files matching `<8 digits>.data`.
fn list_segment_ids(dir: &Path) -> Result<Vec<u32>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|source| StoreError::ListDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::ListDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".data") else {
            continue;
        };
        if stem.len() == 8 && stem.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = stem.parse::<u32>() {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

/// Walk one segment from offset 0, reporting each valid record. A record
/// that fails to decode skips the scan forward by one header size and
/// retries, salvaging whatever follows the damage.
fn scan_segment<F>(segment: &SegmentFile, on_record: &mut F) -> Result<usize, StoreError>
where
    F: FnMut(Vec<u8>, Location),
{
    let end = segment.write_offset();
    let mut offset = 0u64;
    let mut count = 0usize;

    while offset < end {
        match segment.read_record_at(offset) {
            Ok(record) => {
                let size = record.encoded_len() as u32;
                on_record(
                    record.key,
                    Location {
                        file_id: segment.file_id(),
                        offset,
                        size,
                    },
                );
                offset += size as u64;
                count += 1;
            }
            Err(SegmentError::Record(e)) => {
                tracing::warn!(
                    file_id = segment.file_id(),
                    offset,
                    error = %e,
                    "skipping corrupt record during recovery"
                );
                offset += HEADER_SIZE as u64;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(count)
}
