//! Stateful event decoder.
//!
//! [`EdmDecoder`] walks an event store with a cursor and turns each event
//! into a [`Sample`]: the hits selected by the configured
//! [`ExtractionMode`] as an `n x 3` matrix plus the optional truth vector.

use crate::store::{EdmFile, EventStore, OpenStore, StoreError};
use crate::types::{DecoderConfig, Event, ExtractionMode, HIT_COLUMNS};
use ndarray::{Array1, Array2};
use thiserror::Error;

/// Errors that can occur while decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("decoder not initialized, call initialize() first")]
    NotInitialized,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown extraction mode {0:?}, expected DETSIM or CALIB")]
    InvalidMode(String),
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// One row per hit: `pmtID`, `charge`, `tofh`
    pub signal: Array2<f64>,
    /// `[edep, edepX, edepY, edepZ]`, or `None` if the event has no truth
    pub truth: Option<Array1<f64>>,
}

impl Sample {
    /// Builds a sample from `event`, or `None` if the collection selected by
    /// `mode` is absent.
    pub fn from_event(event: &Event, mode: ExtractionMode) -> Option<Self> {
        let hits = event.hits(mode)?;

        let signal = Array2::from_shape_fn((hits.len(), HIT_COLUMNS), |(row, col)| {
            hits[row].row()[col]
        });
        let truth = event.truth.map(|t| Array1::from_vec(t.vector().to_vec()));

        Some(Self { signal, truth })
    }

    /// Splits the sample into `(signal, truth)`.
    pub fn into_pair(self) -> (Array2<f64>, Option<Array1<f64>>) {
        (self.signal, self.truth)
    }
}

/// The decoding capability a host pipeline drives.
pub trait Decoder {
    type Config;
    type Item;

    /// Binds a configuration, (re)opening whatever it points to.
    fn initialize(&mut self, config: Self::Config) -> Result<(), DecodeError>;

    /// Produces the next item, or `Ok(None)` once the sequence is exhausted.
    fn next_item(&mut self) -> Result<Option<Self::Item>, DecodeError>;
}

/// Lifecycle state of an [`EdmDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No store bound
    Uninitialized,
    /// Store bound, events may remain
    Ready,
    /// End of sequence reached; only `initialize` leaves this state
    Exhausted,
}

/// Cursor-driven decoder over an event store.
///
/// The store type defaults to [`EdmFile`]; use `EdmDecoder<Arc<EdmFile>>`
/// to let several decoders share one mapped file.
#[derive(Debug)]
pub struct EdmDecoder<S = EdmFile> {
    store: Option<S>,
    config: Option<DecoderConfig>,
    cursor: usize,
    state: DecoderState,
    errored: bool,
}

impl<S> Default for EdmDecoder<S> {
    fn default() -> Self {
        Self {
            store: None,
            config: None,
            cursor: 0,
            state: DecoderState::Uninitialized,
            errored: false,
        }
    }
}

impl<S: EventStore> EdmDecoder<S> {
    /// Creates an uninitialized decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder bound to an already opened store.
    pub fn with_store(store: S, config: DecoderConfig) -> Self {
        let mut decoder = Self::default();
        decoder.bind(store, config);
        decoder
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Returns the number of events yielded since the last initialization.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns the bound configuration.
    pub fn config(&self) -> Option<&DecoderConfig> {
        self.config.as_ref()
    }

    /// Returns the bound store.
    pub fn store(&self) -> Option<&S> {
        self.store.as_ref()
    }

    /// Releases the bound store and returns to the uninitialized state.
    ///
    /// Safe to call repeatedly, and before any successful initialization.
    pub fn close(&mut self) {
        if self.store.take().is_some() {
            log::debug!("closed decoder after {} events", self.cursor);
        }
        self.config = None;
        self.cursor = 0;
        self.state = DecoderState::Uninitialized;
        self.errored = false;
    }

    fn bind(&mut self, store: S, config: DecoderConfig) {
        log::debug!(
            "decoder bound to {:?} in {} mode ({} events)",
            config.filepath,
            config.mode,
            store.size()
        );
        self.store = Some(store);
        self.config = Some(config);
        self.cursor = 0;
        self.state = DecoderState::Ready;
        self.errored = false;
    }

    /// Decodes the event under the cursor and advances.
    fn advance(&mut self) -> Result<Option<Sample>, DecodeError> {
        let (store, config) = match (self.state, &self.store, &self.config) {
            (DecoderState::Exhausted, _, _) => return Ok(None),
            (DecoderState::Ready, Some(store), Some(config)) => (store, config),
            _ => return Err(DecodeError::NotInitialized),
        };

        if self.cursor >= store.size() {
            self.state = DecoderState::Exhausted;
            return Ok(None);
        }

        let event = store.event_at(self.cursor)?;
        let Some(sample) = Sample::from_event(&event, config.mode) else {
            // An event without the requested stage ends the whole sequence.
            log::warn!(
                "event {} of {:?} has no {} hits, ending iteration ({} events left unread)",
                self.cursor,
                config.filepath,
                config.mode,
                unread_after(store.size(), self.cursor)
            );
            self.state = DecoderState::Exhausted;
            return Ok(None);
        };

        log::trace!(
            "decoded event {}: {} hits, truth {}",
            self.cursor,
            sample.signal.nrows(),
            if sample.truth.is_some() { "present" } else { "absent" }
        );
        self.cursor += 1;
        Ok(Some(sample))
    }
}

/// Events after `index` in a store of `size` events.
fn unread_after(size: usize, index: usize) -> usize {
    size.saturating_sub(index + 1)
}

impl<S: OpenStore> EdmDecoder<S> {
    /// Creates a decoder and initializes it with `config`.
    pub fn with_config(config: DecoderConfig) -> Result<Self, DecodeError> {
        let mut decoder = Self::default();
        decoder.initialize(config)?;
        Ok(decoder)
    }
}

impl<S: OpenStore> Decoder for EdmDecoder<S> {
    type Config = DecoderConfig;
    type Item = Sample;

    /// Opens the store named by `config` and resets the cursor.
    ///
    /// On failure the decoder is left exactly as it was.
    fn initialize(&mut self, config: DecoderConfig) -> Result<(), DecodeError> {
        let store = S::open(&config.filepath)?;
        self.bind(store, config);
        Ok(())
    }

    fn next_item(&mut self) -> Result<Option<Sample>, DecodeError> {
        self.advance()
    }
}

/// Yields at most one error: after an `Err` item the iterator returns `None`
/// until the decoder is bound again. Use [`Decoder::next_item`] to retry a
/// failed event.
impl<S: EventStore> Iterator for EdmDecoder<S> {
    type Item = Result<Sample, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        let item = self.advance().transpose();
        self.errored = matches!(item, Some(Err(_)));
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatError;
    use crate::types::{Hit, Truth};
    use std::cell::Cell;
    use std::path::Path;

    /// In-memory store counting how many events were fetched.
    struct VecStore {
        events: Vec<Event>,
        fetched: Cell<usize>,
    }

    impl VecStore {
        fn new(events: Vec<Event>) -> Self {
            Self {
                events,
                fetched: Cell::new(0),
            }
        }
    }

    impl EventStore for VecStore {
        fn size(&self) -> usize {
            self.events.len()
        }

        fn event_at(&self, index: usize) -> Result<Event, StoreError> {
            self.fetched.set(self.fetched.get() + 1);
            self.events.get(index).cloned().ok_or(StoreError::OutOfRange {
                index,
                size: self.events.len(),
            })
        }
    }

    fn config(mode: ExtractionMode) -> DecoderConfig {
        DecoderConfig::new("memory", mode)
    }

    fn detsim_event(hits: Vec<Hit>) -> Event {
        Event {
            truth: None,
            detsim_hits: Some(hits),
            calib_hits: None,
        }
    }

    #[test]
    fn test_decoder_initial_state() {
        let mut decoder: EdmDecoder<VecStore> = EdmDecoder::new();
        assert_eq!(decoder.state(), DecoderState::Uninitialized);
        assert_eq!(decoder.cursor(), 0);
        assert!(decoder.config().is_none());
        assert!(decoder.store().is_none());
        assert!(matches!(decoder.advance(), Err(DecodeError::NotInitialized)));
        assert!(matches!(decoder.advance(), Err(DecodeError::NotInitialized)));
    }

    #[test]
    fn test_signal_matrix_rows_follow_hit_order() {
        let hits = vec![
            Hit::new(1, 0.5, 10.0),
            Hit::new(2, 1.5, 20.0),
            Hit::new(3, 2.5, 30.0),
        ];
        let store = VecStore::new(vec![detsim_event(hits)]);
        let mut decoder = EdmDecoder::with_store(store, config(ExtractionMode::Detsim));

        let sample = decoder.advance().unwrap().unwrap();
        assert_eq!(sample.signal.shape(), &[3, 3]);
        assert_eq!(
            sample.signal,
            ndarray::arr2(&[[1.0, 0.5, 10.0], [2.0, 1.5, 20.0], [3.0, 2.5, 30.0]])
        );
        assert!(sample.truth.is_none());
        assert_eq!(decoder.cursor(), 1);
    }

    #[test]
    fn test_truth_vector() {
        let mut event = detsim_event(Vec::new());
        event.truth = Some(Truth {
            qedep: 9.0,
            evis: 8.0,
            ..Truth::new(1.0, 2.0, 3.0, 4.0)
        });
        let sample = Sample::from_event(&event, ExtractionMode::Detsim).unwrap();
        assert_eq!(sample.truth.unwrap().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_truth_is_not_absent() {
        let mut event = detsim_event(Vec::new());
        event.truth = Some(Truth::default());
        let (_, truth) = Sample::from_event(&event, ExtractionMode::Detsim)
            .unwrap()
            .into_pair();
        assert_eq!(truth.unwrap().to_vec(), vec![0.0; 4]);
    }

    #[test]
    fn test_empty_collection_yields_zero_rows() {
        let store = VecStore::new(vec![detsim_event(Vec::new()), detsim_event(Vec::new())]);
        let mut decoder = EdmDecoder::with_store(store, config(ExtractionMode::Detsim));

        let sample = decoder.advance().unwrap().unwrap();
        assert_eq!(sample.signal.shape(), &[0, 3]);
        assert_eq!(decoder.state(), DecoderState::Ready);
        assert!(decoder.advance().unwrap().is_some());
    }

    #[test]
    fn test_missing_collection_ends_sequence() {
        let events = vec![
            Event {
                truth: None,
                detsim_hits: None,
                calib_hits: Some(vec![Hit::new(1, 1.0, 1.0)]),
            },
            Event {
                truth: None,
                detsim_hits: None,
                calib_hits: None,
            },
            Event {
                truth: None,
                detsim_hits: None,
                calib_hits: Some(vec![Hit::new(2, 2.0, 2.0)]),
            },
        ];
        let mut decoder =
            EdmDecoder::with_store(VecStore::new(events), config(ExtractionMode::Calib));

        assert!(decoder.advance().unwrap().is_some());
        assert!(decoder.advance().unwrap().is_none());
        assert_eq!(decoder.state(), DecoderState::Exhausted);
        assert_eq!(decoder.cursor(), 1);

        // Stays exhausted without touching the store again.
        assert!(decoder.advance().unwrap().is_none());
        assert_eq!(decoder.store().unwrap().fetched.get(), 2);
    }

    #[test]
    fn test_unread_count_excludes_rejected_event() {
        assert_eq!(unread_after(3, 1), 1);
        assert_eq!(unread_after(3, 2), 0);
        assert_eq!(unread_after(1, 0), 0);
    }

    #[test]
    fn test_exhaustion_after_last_event() {
        let store = VecStore::new(vec![detsim_event(Vec::new())]);
        let mut decoder = EdmDecoder::with_store(store, config(ExtractionMode::Detsim));

        assert!(decoder.advance().unwrap().is_some());
        assert!(decoder.advance().unwrap().is_none());
        assert!(decoder.advance().unwrap().is_none());
        assert_eq!(decoder.state(), DecoderState::Exhausted);
        assert_eq!(decoder.cursor(), 1);
    }

    #[test]
    fn test_iterator_collects_all_events() {
        let events = (0..5)
            .map(|i| detsim_event(vec![Hit::new(i, i as f64, 0.0)]))
            .collect();
        let decoder = EdmDecoder::with_store(VecStore::new(events), config(ExtractionMode::Detsim));

        let samples: Vec<Sample> = decoder.collect::<Result<_, _>>().unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[4].signal[[0, 0]], 4.0);
    }

    #[test]
    fn test_iterator_uninitialized_yields_one_error() {
        let decoder: EdmDecoder<VecStore> = EdmDecoder::new();
        let items: Vec<_> = decoder.collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(DecodeError::NotInitialized)));
    }

    /// Store whose record at `bad` cannot be decoded.
    struct CorruptAt {
        inner: VecStore,
        bad: usize,
    }

    impl EventStore for CorruptAt {
        fn size(&self) -> usize {
            self.inner.size()
        }

        fn event_at(&self, index: usize) -> Result<Event, StoreError> {
            if index == self.bad {
                return Err(StoreError::CorruptRecord {
                    index,
                    source: FormatError::UnknownFlags(0xFF),
                });
            }
            self.inner.event_at(index)
        }
    }

    #[test]
    fn test_iterator_stops_after_corrupt_record() {
        let store = CorruptAt {
            inner: VecStore::new(vec![detsim_event(Vec::new()), detsim_event(Vec::new())]),
            bad: 0,
        };
        let mut decoder = EdmDecoder::with_store(store, config(ExtractionMode::Detsim));

        assert_eq!(decoder.by_ref().filter_map(Result::ok).count(), 0);
        assert!(decoder.next().is_none());

        // The decoder itself still reports the error and holds the cursor.
        assert!(matches!(
            decoder.advance(),
            Err(DecodeError::Store(StoreError::CorruptRecord { index: 0, .. }))
        ));
        assert_eq!(decoder.cursor(), 0);
        assert_eq!(decoder.state(), DecoderState::Ready);
    }

    #[test]
    fn test_rebinding_resumes_iteration_after_error() {
        let store = CorruptAt {
            inner: VecStore::new(vec![detsim_event(Vec::new())]),
            bad: 0,
        };
        let mut decoder = EdmDecoder::with_store(store, config(ExtractionMode::Detsim));
        assert!(matches!(decoder.next(), Some(Err(_))));
        assert!(decoder.next().is_none());

        let healthy = CorruptAt {
            inner: VecStore::new(vec![detsim_event(Vec::new())]),
            bad: usize::MAX,
        };
        decoder.bind(healthy, config(ExtractionMode::Detsim));
        assert!(matches!(decoder.next(), Some(Ok(_))));
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = VecStore::new(vec![detsim_event(Vec::new())]);
        let mut decoder = EdmDecoder::with_store(store, config(ExtractionMode::Detsim));
        decoder.close();
        decoder.close();
        assert_eq!(decoder.state(), DecoderState::Uninitialized);
        assert!(matches!(decoder.advance(), Err(DecodeError::NotInitialized)));

        let mut never_opened: EdmDecoder<VecStore> = EdmDecoder::new();
        never_opened.close();
        assert_eq!(never_opened.state(), DecoderState::Uninitialized);
    }

    #[test]
    fn test_failed_initialize_from_uninitialized() {
        assert!(EdmFile::open(Path::new("/nonexistent/store.edm")).is_err());

        let mut decoder: EdmDecoder = EdmDecoder::new();
        let err = decoder
            .initialize(DecoderConfig::new(
                "/nonexistent/store.edm",
                ExtractionMode::Calib,
            ))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Store(ref e) if e.is_open_error()));
        assert_eq!(decoder.state(), DecoderState::Uninitialized);
    }
}
