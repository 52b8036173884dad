//! A single append-only segment file.
//!
//! Appends are serialized by an internal write lock; reads are positioned
//! (`pread`) and may run concurrently with appends as long as they target
//! offsets below an observed write offset.

use crate::record::{self, Record, RecordError, HEADER_SIZE};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("failed to open segment {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("segment write failed: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("segment read failed at offset {offset}: {source}")]
    ReadFailed {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("segment sync failed: {0}")]
    SyncFailed(#[source] io::Error),
    #[error("segment file is closed")]
    Closed,
    #[error(transparent)]
    Record(#[from] RecordError),
}

struct Inner {
    /// `None` once the segment has been closed.
    file: Option<File>,
    write_off: u64,
}

/// An append-only data file identified by a numeric id.
pub struct SegmentFile {
    file_id: u32,
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// `<file_id>` zero-padded to 8 digits, `.data` suffix.
pub fn file_name(file_id: u32) -> String {
    format!("{:08}.data", file_id)
}

impl SegmentFile {
    /// Open or create `<dir>/<file_id:08>.data`. The write offset resumes at
    /// the current file length, so reopening a partially written segment
    /// continues where it left off.
    pub fn open(dir: &Path, file_id: u32) -> Result<Self, SegmentError> {
        let path = dir.join(file_name(file_id));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|source| SegmentError::Open {
                path: path.clone(),
                source,
            })?;
        let write_off = file
            .metadata()
            .map_err(|source| SegmentError::Open {
                path: path.clone(),
                source,
            })?
            .len();

        Ok(Self {
            file_id,
            path,
            inner: RwLock::new(Inner {
                file: Some(file),
                write_off,
            }),
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    pub fn write_offset(&self) -> u64 {
        self.inner.read().write_off
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().file.is_none()
    }

    /// Append `data` at the end of the file and return the offset it was
    /// written at. On failure the write offset is left unchanged.
    pub fn append(&self, data: &[u8]) -> Result<u64, SegmentError> {
        let mut inner = self.inner.write();
        let mut file = inner.file.as_ref().ok_or(SegmentError::Closed)?;

        // The file is opened in append mode, so this lands at the end, which
        // equals `write_off` while the write lock is held.
        io::Write::write_all(&mut file, data).map_err(SegmentError::WriteFailed)?;

        let offset = inner.write_off;
        inner.write_off += data.len() as u64;
        Ok(offset)
    }

    /// Read up to `len` bytes at `offset`. The result is shorter than `len`
    /// only when the read ran into end-of-file.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, SegmentError> {
        let inner = self.inner.read();
        let file = inner.file.as_ref().ok_or(SegmentError::Closed)?;

        let mut buf = vec![0u8; len];
        let mut filled = 0usize;
        while filled < len {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(SegmentError::ReadFailed { offset, source }),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Read and decode the complete record starting at `offset`: header
    /// first to learn the total size, then the full record.
    pub fn read_record_at(&self, offset: u64) -> Result<Record, SegmentError> {
        let header = self.read_at(offset, HEADER_SIZE)?;
        let total = record::encoded_len_from_header(&header)?;
        let data = self.read_at(offset, total)?;
        Ok(Record::decode(&data)?)
    }

    /// Flush OS buffers to stable storage.
    pub fn sync(&self) -> Result<(), SegmentError> {
        let inner = self.inner.read();
        let file = inner.file.as_ref().ok_or(SegmentError::Closed)?;
        file.sync_all().map_err(SegmentError::SyncFailed)
    }

    /// Sync and release the file handle. Idempotent; subsequent operations
    /// fail with `Closed`.
    pub fn close(&self) -> Result<(), SegmentError> {
        let mut inner = self.inner.write();
        if let Some(file) = inner.file.take() {
            file.sync_all().map_err(SegmentError::SyncFailed)?;
        }
        Ok(())
    }
}
