//! Reader and decoder for EDM event stores.
//!
//! An EDM store file holds a fixed number of detector events, each with an
//! optional truth record and up to two hit collections (detector simulation
//! and calibration). This crate provides random access to those events and a
//! decoder that turns them into numeric arrays, one event at a time.
//!
//! # Example
//!
//! ```no_run
//! use edmreader_core::{Decoder, DecoderConfig, EdmDecoder, ExtractionMode};
//!
//! let config = DecoderConfig::new("events.edm", ExtractionMode::Calib);
//! let mut decoder: EdmDecoder = EdmDecoder::with_config(config).unwrap();
//!
//! while let Some(sample) = decoder.next_item().unwrap() {
//!     println!("{} hits, truth: {:?}", sample.signal.nrows(), sample.truth);
//! }
//! ```
//!
//! # Features
//!
//! - Memory-mapped store files with an up-front validated record index
//! - Mode-selected signal extraction (`DETSIM` or `CALIB`) as `ndarray` matrices
//! - Explicit decoder state machine with transactional reinitialization
//! - Read-only stores shareable across decoders through `Arc`

pub mod decoder;
pub mod format;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use decoder::{DecodeError, Decoder, DecoderState, EdmDecoder, Sample};
pub use format::{write_store, EdmWriter, FormatError, WriteError};
pub use store::{EdmFile, EventStore, OpenStore, StoreError};
pub use types::{DecoderConfig, Event, ExtractionMode, Hit, Truth};
