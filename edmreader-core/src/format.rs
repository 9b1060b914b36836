//! On-disk layout of EDM event store files.
//!
//! ```text
//! header   magic "EDMSTOR\0" | version u32 | count u64
//! index    count x u64 absolute record offsets
//! records  flags u8 | [truth 6 x f64] | [detsim hits] | [calib hits]
//! hits     n u32 | n x (pmtID i64, charge f64, tofh f64)
//! ```
//!
//! Everything is little-endian.

use crate::types::{Event, Hit, Truth};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Magic number at the start of every store file.
pub const FILE_MAGIC: &[u8; 8] = b"EDMSTOR\0";

/// Current (and only) supported format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the fixed file header in bytes.
pub const HEADER_SIZE: usize = 8 + 4 + 8;

/// Size of one index table entry.
pub const INDEX_ENTRY_SIZE: usize = 8;

/// Size of a serialized hit.
pub const HIT_SIZE: usize = 8 + 8 + 8;

/// Size of a serialized truth record.
pub const TRUTH_SIZE: usize = 6 * 8;

/// Record flag: truth present.
pub const FLAG_TRUTH: u8 = 0x01;
/// Record flag: detector-simulation hits present.
pub const FLAG_DETSIM: u8 = 0x02;
/// Record flag: calibrated hits present.
pub const FLAG_CALIB: u8 = 0x04;

const KNOWN_FLAGS: u8 = FLAG_TRUTH | FLAG_DETSIM | FLAG_CALIB;

/// Structural problems found while reading a store file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("file is {0} bytes, shorter than the {}-byte header", HEADER_SIZE)]
    TruncatedHeader(usize),

    #[error("bad magic number")]
    BadMagic,

    #[error("unsupported format version {0} (expected {})", FORMAT_VERSION)]
    UnsupportedVersion(u32),

    #[error("index table of {count} entries does not fit in {len} bytes")]
    TruncatedIndex { count: u64, len: usize },

    #[error("record offset {offset} of event {index} is out of bounds")]
    BadOffset { index: usize, offset: u64 },

    #[error("unknown record flags {0:#04x}")]
    UnknownFlags(u8),

    #[error("record payload is truncated")]
    TruncatedRecord,
}

/// Errors that can occur while writing a store file.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("hit collection of {count} entries exceeds the format limit")]
    TooManyHits { count: usize },
}

/// Parsed fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub count: u64,
}

/// Reads and validates the fixed header at the start of `data`.
pub fn read_header(data: &[u8]) -> Result<FileHeader, FormatError> {
    if data.len() < HEADER_SIZE {
        return Err(FormatError::TruncatedHeader(data.len()));
    }
    if &data[..FILE_MAGIC.len()] != FILE_MAGIC {
        return Err(FormatError::BadMagic);
    }

    let mut rdr = &data[FILE_MAGIC.len()..HEADER_SIZE];
    let version = rdr
        .read_u32::<LittleEndian>()
        .map_err(|_| FormatError::TruncatedHeader(data.len()))?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let count = rdr
        .read_u64::<LittleEndian>()
        .map_err(|_| FormatError::TruncatedHeader(data.len()))?;

    Ok(FileHeader { version, count })
}

/// Reads the record index following the header.
///
/// Offsets must start at or after the end of the index table, stay inside
/// the file and be strictly increasing.
pub fn read_index(data: &[u8], count: u64) -> Result<Vec<usize>, FormatError> {
    let truncated = FormatError::TruncatedIndex {
        count,
        len: data.len(),
    };
    let index_end = usize::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(INDEX_ENTRY_SIZE))
        .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
        .ok_or_else(|| truncated.clone())?;
    if index_end > data.len() {
        return Err(truncated);
    }

    let mut rdr = &data[HEADER_SIZE..index_end];
    let mut offsets = Vec::with_capacity(count as usize);
    let mut lower_bound = index_end;
    for index in 0..count as usize {
        let offset = rdr
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated.clone())?;
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start >= lower_bound && start < data.len())
            .ok_or(FormatError::BadOffset { index, offset })?;
        offsets.push(start);
        lower_bound = start + 1;
    }

    Ok(offsets)
}

/// Decodes one record.
///
/// `record` must start at the record's flags byte; bytes past the end of the
/// record are ignored.
pub fn decode_record(record: &[u8]) -> Result<Event, FormatError> {
    let mut rdr = record;
    let flags = rdr.read_u8().map_err(|_| FormatError::TruncatedRecord)?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(FormatError::UnknownFlags(flags));
    }

    let truth = if flags & FLAG_TRUTH != 0 {
        Some(read_truth(&mut rdr).map_err(|_| FormatError::TruncatedRecord)?)
    } else {
        None
    };
    let detsim_hits = if flags & FLAG_DETSIM != 0 {
        Some(read_hits(&mut rdr)?)
    } else {
        None
    };
    let calib_hits = if flags & FLAG_CALIB != 0 {
        Some(read_hits(&mut rdr)?)
    } else {
        None
    };

    Ok(Event {
        truth,
        detsim_hits,
        calib_hits,
    })
}

fn read_truth(rdr: &mut &[u8]) -> io::Result<Truth> {
    Ok(Truth {
        edep: rdr.read_f64::<LittleEndian>()?,
        qedep: rdr.read_f64::<LittleEndian>()?,
        evis: rdr.read_f64::<LittleEndian>()?,
        edep_x: rdr.read_f64::<LittleEndian>()?,
        edep_y: rdr.read_f64::<LittleEndian>()?,
        edep_z: rdr.read_f64::<LittleEndian>()?,
    })
}

fn read_hits(rdr: &mut &[u8]) -> Result<Vec<Hit>, FormatError> {
    let n = rdr
        .read_u32::<LittleEndian>()
        .map_err(|_| FormatError::TruncatedRecord)? as usize;

    // Check before allocating so a corrupt count cannot request gigabytes.
    if n.checked_mul(HIT_SIZE).map_or(true, |bytes| bytes > rdr.len()) {
        return Err(FormatError::TruncatedRecord);
    }

    let mut hits = Vec::with_capacity(n);
    for _ in 0..n {
        let hit = read_hit(rdr).map_err(|_| FormatError::TruncatedRecord)?;
        hits.push(hit);
    }
    Ok(hits)
}

#[inline]
fn read_hit(rdr: &mut &[u8]) -> io::Result<Hit> {
    let pmt_id = rdr.read_i64::<LittleEndian>()?;
    let charge = rdr.read_f64::<LittleEndian>()?;
    let tofh = rdr.read_f64::<LittleEndian>()?;
    Ok(Hit::new(pmt_id, charge, tofh))
}

/// Appends the serialized form of `event` to `out`.
pub fn encode_record(event: &Event, out: &mut Vec<u8>) -> Result<(), WriteError> {
    let mut flags = 0u8;
    if event.truth.is_some() {
        flags |= FLAG_TRUTH;
    }
    if event.detsim_hits.is_some() {
        flags |= FLAG_DETSIM;
    }
    if event.calib_hits.is_some() {
        flags |= FLAG_CALIB;
    }
    out.write_u8(flags)?;

    if let Some(truth) = &event.truth {
        for value in [
            truth.edep,
            truth.qedep,
            truth.evis,
            truth.edep_x,
            truth.edep_y,
            truth.edep_z,
        ] {
            out.write_f64::<LittleEndian>(value)?;
        }
    }
    for hits in [&event.detsim_hits, &event.calib_hits].into_iter().flatten() {
        let count = u32::try_from(hits.len())
            .map_err(|_| WriteError::TooManyHits { count: hits.len() })?;
        out.write_u32::<LittleEndian>(count)?;
        for hit in hits {
            out.write_i64::<LittleEndian>(hit.pmt_id)?;
            out.write_f64::<LittleEndian>(hit.charge)?;
            out.write_f64::<LittleEndian>(hit.tofh)?;
        }
    }
    Ok(())
}

/// Writer producing EDM store files.
///
/// Records are buffered in memory until [`EdmWriter::finish`], because the
/// index table precedes them in the file.
pub struct EdmWriter<W: Write> {
    writer: BufWriter<W>,
    offsets: Vec<u64>,
    body: Vec<u8>,
}

impl<W: Write> EdmWriter<W> {
    /// Creates a new store writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            offsets: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends one event.
    pub fn push(&mut self, event: &Event) -> Result<(), WriteError> {
        let start = self.body.len();
        if let Err(err) = encode_record(event, &mut self.body) {
            self.body.truncate(start);
            return Err(err);
        }
        self.offsets.push(start as u64);
        Ok(())
    }

    /// Appends a batch of events.
    pub fn push_all<'a, I>(&mut self, events: I) -> Result<(), WriteError>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        for event in events {
            self.push(event)?;
        }
        Ok(())
    }

    /// Returns the number of events pushed so far.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if no event has been pushed.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Writes header, index and records, and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, WriteError> {
        let records_start = (HEADER_SIZE + self.offsets.len() * INDEX_ENTRY_SIZE) as u64;

        self.writer.write_all(FILE_MAGIC)?;
        self.writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        self.writer
            .write_u64::<LittleEndian>(self.offsets.len() as u64)?;
        for offset in &self.offsets {
            self.writer
                .write_u64::<LittleEndian>(records_start + offset)?;
        }
        self.writer.write_all(&self.body)?;
        self.writer.flush()?;

        self.writer
            .into_inner()
            .map_err(|e| WriteError::Io(e.into_error()))
    }
}

/// Writes `events` to a new store file at `path`.
pub fn write_store<P: AsRef<Path>>(path: P, events: &[Event]) -> Result<(), WriteError> {
    let file = File::create(path)?;
    let mut writer = EdmWriter::new(file);
    writer.push_all(events)?;
    writer.finish()?.sync_all()?;
    Ok(())
}
