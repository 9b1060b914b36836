//! Core types for EDM event records.
//!
//! These are the structural records held by an event store: an [`Event`]
//! with optional [`Truth`] and two optional hit collections, one per
//! reconstruction stage.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Number of columns in a decoded signal matrix: `pmtID`, `charge`, `tofh`.
pub const HIT_COLUMNS: usize = 3;

/// Number of entries in a decoded truth vector: `edep`, `edepX`, `edepY`, `edepZ`.
pub const TRUTH_LEN: usize = 4;

/// A single PMT readout within an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Channel (PMT) identifier
    pub pmt_id: i64,
    /// Charge collected by the PMT [Npe]
    pub charge: f64,
    /// Time of first hit of the PMT [ns]
    pub tofh: f64,
}

impl Hit {
    /// Creates a new hit.
    #[inline]
    pub fn new(pmt_id: i64, charge: f64, tofh: f64) -> Self {
        Self {
            pmt_id,
            charge,
            tofh,
        }
    }

    /// Returns the hit as a decoded matrix row.
    #[inline]
    pub fn row(&self) -> [f64; HIT_COLUMNS] {
        [self.pmt_id as f64, self.charge, self.tofh]
    }
}

/// Ground-truth energy deposition of an event.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Truth {
    /// Deposited energy
    pub edep: f64,
    /// Quenched deposited energy
    pub qedep: f64,
    /// Visible deposited energy
    pub evis: f64,
    /// X coordinate of the energy deposit
    pub edep_x: f64,
    /// Y coordinate of the energy deposit
    pub edep_y: f64,
    /// Z coordinate of the energy deposit
    pub edep_z: f64,
}

impl Truth {
    /// Creates a truth record with only the deposit and its position set.
    pub fn new(edep: f64, edep_x: f64, edep_y: f64, edep_z: f64) -> Self {
        Self {
            edep,
            edep_x,
            edep_y,
            edep_z,
            ..Self::default()
        }
    }

    /// Returns `[edep, edepX, edepY, edepZ]`.
    #[inline]
    pub fn vector(&self) -> [f64; TRUTH_LEN] {
        [self.edep, self.edep_x, self.edep_y, self.edep_z]
    }
}

/// One detector readout.
///
/// Either hit collection may be absent when the producing job never ran that
/// stage. An absent collection is different from an empty one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    /// Truth of the event, if recorded
    pub truth: Option<Truth>,
    /// Hits at detector-simulation level
    pub detsim_hits: Option<Vec<Hit>>,
    /// Hits at calibration level
    pub calib_hits: Option<Vec<Hit>>,
}

impl Event {
    /// Returns the hit collection selected by `mode`, if present.
    #[inline]
    pub fn hits(&self, mode: ExtractionMode) -> Option<&[Hit]> {
        match mode {
            ExtractionMode::Detsim => self.detsim_hits.as_deref(),
            ExtractionMode::Calib => self.calib_hits.as_deref(),
        }
    }
}

/// Selects which hit collection of an event is surfaced as the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExtractionMode {
    /// Detector-simulation hits
    #[default]
    Detsim,
    /// Calibrated hits
    Calib,
}

impl ExtractionMode {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detsim => "DETSIM",
            Self::Calib => "CALIB",
        }
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMode {
    type Err = crate::decoder::DecodeError;

    /// Parses `"DETSIM"` or `"CALIB"`, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DETSIM" => Ok(Self::Detsim),
            "CALIB" => Ok(Self::Calib),
            _ => Err(crate::decoder::DecodeError::InvalidMode(s.to_string())),
        }
    }
}

/// Configuration bound to a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Path to the event store file
    pub filepath: PathBuf,
    /// Hit collection to decode
    pub mode: ExtractionMode,
}

impl DecoderConfig {
    /// Creates a new configuration.
    pub fn new<P: Into<PathBuf>>(filepath: P, mode: ExtractionMode) -> Self {
        Self {
            filepath: filepath.into(),
            mode,
        }
    }
}
