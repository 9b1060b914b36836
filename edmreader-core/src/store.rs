//! Random-access event stores.
//!
//! [`EventStore`] is the read-only capability the decoder needs: an event
//! count fixed at open time and access to any event by index. [`EdmFile`]
//! implements it over a memory-mapped store file.

use crate::format::{self, FormatError};
use crate::types::Event;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by event stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot open event store {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid event store {path:?}: {source}")]
    InvalidFormat {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("event index {index} is out of range for a store of {size} events")]
    OutOfRange { index: usize, size: usize },

    #[error("corrupt record for event {index}: {source}")]
    CorruptRecord {
        index: usize,
        #[source]
        source: FormatError,
    },
}

impl StoreError {
    /// Returns `true` for errors raised while opening a store.
    pub fn is_open_error(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::InvalidFormat { .. })
    }
}

/// Read-only random access to a fixed set of events.
pub trait EventStore {
    /// Number of events, fixed for the lifetime of the store.
    fn size(&self) -> usize;

    /// Returns the event at `index`.
    ///
    /// Fails with [`StoreError::OutOfRange`] if `index >= self.size()`.
    fn event_at(&self, index: usize) -> Result<Event, StoreError>;
}

/// Stores that can be opened from a file path.
pub trait OpenStore: EventStore + Sized {
    fn open(path: &Path) -> Result<Self, StoreError>;
}

impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn event_at(&self, index: usize) -> Result<Event, StoreError> {
        (**self).event_at(index)
    }
}

impl<S: OpenStore> OpenStore for Arc<S> {
    fn open(path: &Path) -> Result<Self, StoreError> {
        S::open(path).map(Arc::new)
    }
}

/// Event store backed by an EDM store file.
///
/// The file is mapped read-only and validated when opened; records are
/// decoded on demand. The mapping and the file handle are released when the
/// value is dropped.
#[derive(Debug)]
pub struct EdmFile {
    path: PathBuf,
    mmap: Mmap,
    offsets: Vec<usize>,
}

impl EdmFile {
    /// Opens and validates the store file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let open_err = |source: io::Error| StoreError::Open {
            path: path.to_path_buf(),
            source,
        };
        let format_err = |source: FormatError| StoreError::InvalidFormat {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(open_err)?;
        let len = file.metadata().map_err(open_err)?.len();
        if len < format::HEADER_SIZE as u64 {
            return Err(format_err(FormatError::TruncatedHeader(len as usize)));
        }

        // SAFETY: the mapping is read-only and store files are treated as
        // immutable while open.
        let mmap = unsafe { Mmap::map(&file) }.map_err(open_err)?;

        let header = format::read_header(&mmap).map_err(format_err)?;
        let offsets = format::read_index(&mmap, header.count).map_err(format_err)?;

        log::debug!("opened event store {:?} with {} events", path, offsets.len());
        if offsets.is_empty() {
            log::warn!("event store {:?} contains no events", path);
        }

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            offsets,
        })
    }

    /// Path the store was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events in the store.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn record(&self, index: usize) -> Option<&[u8]> {
        let start = *self.offsets.get(index)?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.mmap.len());
        self.mmap.get(start..end)
    }
}

impl EventStore for EdmFile {
    fn size(&self) -> usize {
        self.len()
    }

    fn event_at(&self, index: usize) -> Result<Event, StoreError> {
        let record = self.record(index).ok_or(StoreError::OutOfRange {
            index,
            size: self.len(),
        })?;
        format::decode_record(record).map_err(|source| StoreError::CorruptRecord { index, source })
    }
}

impl OpenStore for EdmFile {
    fn open(path: &Path) -> Result<Self, StoreError> {
        EdmFile::open(path)
    }
}
