//! Python bindings for the EDM reader with numpy output.
//!
//! Exposes random access to store files (`EDMReader`) and the mode-selecting
//! decoder (`JaEDMReader`), which iterates as `(signal, truth)` pairs of
//! numpy arrays.

use edmreader_core::{
    DecodeError, Decoder, DecoderConfig, EdmDecoder, EdmFile, Event, EventStore, ExtractionMode,
    Hit, StoreError, Truth,
};
use numpy::{IntoPyArray, PyArray1, PyArray2};
use pyo3::exceptions::{PyIOError, PyIndexError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn store_err(err: StoreError) -> PyErr {
    match err {
        StoreError::Open { .. } => PyIOError::new_err(err.to_string()),
        StoreError::OutOfRange { .. } => PyIndexError::new_err(err.to_string()),
        StoreError::InvalidFormat { .. } | StoreError::CorruptRecord { .. } => {
            PyValueError::new_err(err.to_string())
        }
    }
}

fn decode_err(err: DecodeError) -> PyErr {
    match err {
        DecodeError::NotInitialized => {
            PyRuntimeError::new_err("Reader not yet initialized. Please initialize it first")
        }
        DecodeError::Store(err) => store_err(err),
        DecodeError::InvalidMode(_) => PyValueError::new_err(err.to_string()),
    }
}

/// A single PMT hit.
#[pyclass(name = "Hit")]
#[derive(Clone)]
pub struct PyHit {
    /// PMT identifier
    #[pyo3(get, name = "pmtID")]
    pmt_id: i64,
    /// Collected charge [Npe]
    #[pyo3(get)]
    charge: f64,
    /// Time of first hit [ns]
    #[pyo3(get)]
    tofh: f64,
}

#[pymethods]
impl PyHit {
    fn __repr__(&self) -> String {
        format!(
            "Hit(pmtID={}, charge={}, tofh={})",
            self.pmt_id, self.charge, self.tofh
        )
    }
}

impl From<&Hit> for PyHit {
    fn from(hit: &Hit) -> Self {
        Self {
            pmt_id: hit.pmt_id,
            charge: hit.charge,
            tofh: hit.tofh,
        }
    }
}

/// Truth of an event.
#[pyclass(name = "Truth")]
#[derive(Clone)]
pub struct PyTruth {
    /// Deposited energy
    #[pyo3(get)]
    edep: f64,
    /// Quenched deposited energy
    #[pyo3(get, name = "Qedep")]
    qedep: f64,
    /// Visible deposited energy
    #[pyo3(get)]
    evis: f64,
    /// X coordinate of the energy deposit
    #[pyo3(get, name = "edepX")]
    edep_x: f64,
    /// Y coordinate of the energy deposit
    #[pyo3(get, name = "edepY")]
    edep_y: f64,
    /// Z coordinate of the energy deposit
    #[pyo3(get, name = "edepZ")]
    edep_z: f64,
}

#[pymethods]
impl PyTruth {
    fn __repr__(&self) -> String {
        format!(
            "Truth(edep={}, Qedep={}, evis={}, edepX={}, edepY={}, edepZ={})",
            self.edep, self.qedep, self.evis, self.edep_x, self.edep_y, self.edep_z
        )
    }
}

impl From<&Truth> for PyTruth {
    fn from(truth: &Truth) -> Self {
        Self {
            edep: truth.edep,
            qedep: truth.qedep,
            evis: truth.evis,
            edep_x: truth.edep_x,
            edep_y: truth.edep_y,
            edep_z: truth.edep_z,
        }
    }
}

/// One event as stored in the file.
///
/// `detsim_hits` and `calib_hits` are `None` when the stage was never
/// produced for this event, and an empty list when it produced no hits.
#[pyclass(name = "Event")]
pub struct PyEvent {
    /// Truth of the event, if recorded
    #[pyo3(get)]
    truth: Option<PyTruth>,
    /// Hits from the detector simulation
    #[pyo3(get)]
    detsim_hits: Option<Vec<PyHit>>,
    /// Hits after calibration
    #[pyo3(get)]
    calib_hits: Option<Vec<PyHit>>,
}

#[pymethods]
impl PyEvent {
    fn __repr__(&self) -> String {
        let count = |hits: &Option<Vec<PyHit>>| {
            hits.as_ref()
                .map_or_else(|| "None".to_string(), |h| h.len().to_string())
        };
        format!(
            "Event(truth={}, detsim_hits={}, calib_hits={})",
            if self.truth.is_some() { "present" } else { "None" },
            count(&self.detsim_hits),
            count(&self.calib_hits)
        )
    }
}

impl From<Event> for PyEvent {
    fn from(event: Event) -> Self {
        let hits = |hits: Option<Vec<Hit>>| -> Option<Vec<PyHit>> {
            hits.map(|h| h.iter().map(PyHit::from).collect())
        };
        Self {
            truth: event.truth.as_ref().map(PyTruth::from),
            detsim_hits: hits(event.detsim_hits),
            calib_hits: hits(event.calib_hits),
        }
    }
}

/// Random-access reader of an EDM store file.
///
/// Example:
///     >>> import edmreader
///     >>> reader = edmreader.EDMReader("events.edm")
///     >>> evt = reader.get_event(0)
///     >>> print(reader.size(), evt.truth)
#[pyclass(name = "EDMReader")]
pub struct PyEdmReader {
    inner: EdmFile,
}

#[pymethods]
impl PyEdmReader {
    #[new]
    fn new(filename: &str) -> PyResult<Self> {
        let inner = EdmFile::open(filename).map_err(store_err)?;
        Ok(Self { inner })
    }

    /// Get the event at the index.
    fn get_event(&self, idx: i64) -> PyResult<PyEvent> {
        let index = usize::try_from(idx)
            .map_err(|_| PyIndexError::new_err(format!("negative event index {}", idx)))?;
        let event = self.inner.event_at(index).map_err(store_err)?;
        Ok(event.into())
    }

    /// Return the length of the reader.
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn __len__(&self) -> usize {
        self.inner.size()
    }

    fn __repr__(&self) -> String {
        format!(
            "EDMReader(path={:?}, events={})",
            self.inner.path(),
            self.inner.size()
        )
    }
}

/// Hit collection decoded as the signal.
#[pyclass]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum EventMode {
    DETSIM,
    CALIB,
}

impl From<EventMode> for ExtractionMode {
    fn from(mode: EventMode) -> Self {
        match mode {
            EventMode::DETSIM => ExtractionMode::Detsim,
            EventMode::CALIB => ExtractionMode::Calib,
        }
    }
}

impl From<ExtractionMode> for EventMode {
    fn from(mode: ExtractionMode) -> Self {
        match mode {
            ExtractionMode::Detsim => EventMode::DETSIM,
            ExtractionMode::Calib => EventMode::CALIB,
        }
    }
}

/// Configuration of a `JaEDMReader`.
///
/// `mode` accepts an `EventMode` or its name as a string.
#[pyclass(name = "JaEDMReaderConfig")]
#[derive(Clone)]
pub struct PyReaderConfig {
    #[pyo3(get, set)]
    filepath: String,
    #[pyo3(get, set)]
    mode: EventMode,
}

#[pymethods]
impl PyReaderConfig {
    #[new]
    fn new(filepath: String, mode: &PyAny) -> PyResult<Self> {
        let mode = match mode.extract::<EventMode>() {
            Ok(mode) => mode,
            Err(_) => {
                let name: &str = mode.extract()?;
                name.parse::<ExtractionMode>().map_err(decode_err)?.into()
            }
        };
        Ok(Self { filepath, mode })
    }

    fn __repr__(&self) -> String {
        format!(
            "JaEDMReaderConfig(filepath={:?}, mode={})",
            self.filepath,
            ExtractionMode::from(self.mode)
        )
    }
}

impl From<&PyReaderConfig> for DecoderConfig {
    fn from(config: &PyReaderConfig) -> Self {
        DecoderConfig::new(&config.filepath, config.mode.into())
    }
}

/// Decoder yielding `(signal, truth)` for each event of a store file.
///
/// `signal` is a float64 array of shape `(n_hits, 3)` with columns
/// `pmtID, charge, tofh`; `truth` is a float64 array
/// `[edep, edepX, edepY, edepZ]` or `None`.
///
/// Example:
///     >>> from edmreader import EventMode, JaEDMReader, JaEDMReaderConfig
///     >>> reader = JaEDMReader(JaEDMReaderConfig("events.edm", EventMode.CALIB))
///     >>> for signal, truth in reader:
///     ...     print(signal.shape, truth)
#[pyclass(name = "JaEDMReader")]
pub struct PyJaEdmReader {
    decoder: EdmDecoder,
    config: Option<PyReaderConfig>,
}

#[pymethods]
impl PyJaEdmReader {
    #[new]
    #[pyo3(signature = (config=None))]
    fn new(config: Option<PyReaderConfig>) -> PyResult<Self> {
        let mut reader = Self {
            decoder: EdmDecoder::new(),
            config: None,
        };
        if let Some(config) = config {
            reader.initialize(config)?;
        }
        Ok(reader)
    }

    /// Open the configured file and restart from its first event.
    fn initialize(&mut self, config: PyReaderConfig) -> PyResult<()> {
        self.decoder
            .initialize(DecoderConfig::from(&config))
            .map_err(decode_err)?;
        self.config = Some(config);
        Ok(())
    }

    /// Return the bound configuration, if any.
    fn config(&self) -> Option<PyReaderConfig> {
        self.config.clone()
    }

    /// Release the underlying file. Safe to call more than once.
    fn close(&mut self) {
        self.decoder.close();
        self.config = None;
    }

    /// Number of events yielded since the last initialization.
    #[getter]
    fn cursor(&self) -> usize {
        self.decoder.cursor()
    }

    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__<'py>(
        &mut self,
        py: Python<'py>,
    ) -> PyResult<Option<(&'py PyArray2<f64>, Option<&'py PyArray1<f64>>)>> {
        let Some(sample) = self.decoder.next_item().map_err(decode_err)? else {
            return Ok(None);
        };
        let (signal, truth) = sample.into_pair();
        Ok(Some((
            signal.into_pyarray(py),
            truth.map(|t| t.into_pyarray(py)),
        )))
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __exit__(
        &mut self,
        _exc_type: &PyAny,
        _exc_value: &PyAny,
        _traceback: &PyAny,
    ) -> bool {
        self.close();
        false
    }
}

/// This is the EDMReader module.
#[pymodule]
fn edmreader(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_class::<PyEdmReader>()?;
    m.add_class::<PyEvent>()?;
    m.add_class::<PyHit>()?;
    m.add_class::<PyTruth>()?;
    m.add_class::<EventMode>()?;
    m.add_class::<PyReaderConfig>()?;
    m.add_class::<PyJaEdmReader>()?;
    Ok(())
}
