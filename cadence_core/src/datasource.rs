//! Data sources: owners of signal storage.
//!
//! A data source holds a [`SignalTable`] and one or two [`MemoryRegion`]s
//! (stateless or stateful). Configuration registers signals, assigns packed
//! offsets, then calls [`DataSource::allocate_memory`]. After that the source
//! is shared behind an `Arc` and only exposes memory locations to brokers and
//! the transition hook that initialises the inactive buffer.

pub mod gam_data_source;
pub mod memory;
pub mod registry;
pub mod shared_memory;

use std::sync::Arc;

use cadence_common::config::ConfigError;
use cadence_common::types::{ScalarKind, SignalScalar};
use thiserror::Error;

use crate::broker::BrokerKind;
use crate::signal::{SignalDirection, SignalTable, SignalTableError};

pub use gam_data_source::GamDataSource;
pub use memory::MemoryRegion;
pub use registry::{DataSourceFactory, DataSourceRegistry};
pub use shared_memory::SharedMemoryDataSource;

// ─── Errors ─────────────────────────────────────────────────────────

/// Data-source level failure.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("no data source class '{0}' is registered")]
    UnknownClass(String),

    #[error(transparent)]
    Signals(#[from] SignalTableError),

    #[error("memory is not allocated")]
    NotAllocated,

    #[error("memory is already allocated")]
    AlreadyAllocated,

    #[error("signal index {signal} out of range ({signals} signals)")]
    SignalOutOfRange { signal: usize, signals: usize },

    #[error("buffer index {buffer} out of range ({buffers} buffers)")]
    BufferOutOfRange { buffer: usize, buffers: usize },

    #[error("signal '{signal}' cannot be served: {reason}")]
    UnsupportedRequest { signal: String, reason: String },

    #[error("byte count mismatch for '{signal}': expected {expected}, got {actual}")]
    SizeMismatch {
        signal: String,
        expected: usize,
        actual: usize,
    },

    #[error("signal '{signal}' is not of element type {expected}")]
    TypeMismatch {
        signal: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Parameter(#[from] ConfigError),

    #[error("memory allocation failed: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Request types ──────────────────────────────────────────────────

/// Location of one signal inside one buffer.
#[derive(Debug, Clone)]
pub struct SignalMemory {
    pub region: Arc<MemoryRegion>,
    pub offset: usize,
    pub size: usize,
}

/// What a GAM asks of a data-source signal; used to pick a broker kind.
#[derive(Debug, Clone, Copy)]
pub struct BrokerRequest<'a> {
    pub gam: &'a str,
    /// Data-source signal index.
    pub signal: usize,
    /// GAM-side samples.
    pub samples: u32,
    /// GAM selects element ranges.
    pub ranged: bool,
}

/// Context handed to [`DataSource::prepare_next_state`].
#[derive(Debug, Clone, Copy)]
pub struct BufferTransition<'a> {
    pub current_state: Option<&'a str>,
    pub next_state: &'a str,
    /// Buffer read by the state currently executing.
    pub active_buffer: usize,
    /// Buffer the next state will use after the flip.
    pub next_buffer: usize,
    /// Per-signal usage by GAMs of the current state.
    pub used_in_current: &'a [bool],
    /// Per-signal usage by GAMs of the next state.
    pub used_in_next: &'a [bool],
}

// ─── Trait ──────────────────────────────────────────────────────────

/// Storage owner for a set of signals.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Registry class name.
    fn class(&self) -> &'static str;

    /// 1 for stateless sources, 2 for stateful (double-buffered) sources.
    fn number_of_buffers(&self) -> usize;

    fn is_stateful(&self) -> bool {
        self.number_of_buffers() > 1
    }

    fn signals(&self) -> &SignalTable;

    /// Signal table, mutable until memory is allocated.
    fn signals_mut(&mut self) -> &mut SignalTable;

    /// Assign offsets and allocate every buffer. Fails on a zero-sized
    /// signal.
    fn allocate_memory(&mut self) -> Result<(), DataSourceError>;

    /// Memory of `signal` in `buffer`.
    fn signal_memory(&self, signal: usize, buffer: usize) -> Result<SignalMemory, DataSourceError>;

    /// Broker kind this source serves for the request.
    fn broker_kind(
        &self,
        direction: SignalDirection,
        request: &BrokerRequest<'_>,
    ) -> Result<BrokerKind, DataSourceError>;

    /// Initialise the next buffer before the flip. Never touches the active
    /// buffer.
    fn prepare_next_state(&self, _transition: &BufferTransition<'_>) -> Result<(), DataSourceError> {
        Ok(())
    }

    /// Snapshot of a signal's bytes in `buffer`.
    fn read_signal(&self, signal: usize, buffer: usize) -> Result<Vec<u8>, DataSourceError> {
        let m = self.signal_memory(signal, buffer)?;
        let mut out = vec![0u8; m.size];
        if !m.region.read(m.offset, &mut out) {
            return Err(DataSourceError::NotAllocated);
        }
        Ok(out)
    }

    /// Overwrite a signal's bytes in `buffer`. `bytes` must cover the whole
    /// signal.
    fn write_signal(&self, signal: usize, buffer: usize, bytes: &[u8]) -> Result<(), DataSourceError> {
        let m = self.signal_memory(signal, buffer)?;
        if bytes.len() != m.size {
            return Err(DataSourceError::SizeMismatch {
                signal: signal_name(self.signals(), signal),
                expected: m.size,
                actual: bytes.len(),
            });
        }
        if !m.region.write(m.offset, bytes) {
            return Err(DataSourceError::NotAllocated);
        }
        Ok(())
    }
}

impl std::fmt::Debug for dyn DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name())
            .field("class", &self.class())
            .field("buffers", &self.number_of_buffers())
            .field("signals", &self.signals().len())
            .finish()
    }
}

// ─── Typed access ───────────────────────────────────────────────────

/// Read every element of a named signal as `T`.
pub fn read_values<T: SignalScalar>(
    ds: &dyn DataSource,
    name: &str,
    buffer: usize,
) -> Result<Vec<T>, DataSourceError> {
    let idx = lookup(ds, name)?;
    check_kind::<T>(ds, idx)?;
    let bytes = ds.read_signal(idx, buffer)?;
    Ok(bytes.chunks_exact(T::KIND.size()).map(T::read_ne).collect())
}

/// Overwrite every element of a named signal.
pub fn write_values<T: SignalScalar>(
    ds: &dyn DataSource,
    name: &str,
    buffer: usize,
    values: &[T],
) -> Result<(), DataSourceError> {
    let idx = lookup(ds, name)?;
    check_kind::<T>(ds, idx)?;
    let size = T::KIND.size();
    let mut bytes = vec![0u8; values.len() * size];
    for (v, chunk) in values.iter().zip(bytes.chunks_exact_mut(size)) {
        v.write_ne(chunk);
    }
    ds.write_signal(idx, buffer, &bytes)
}

fn lookup(ds: &dyn DataSource, name: &str) -> Result<usize, DataSourceError> {
    ds.signals()
        .find(name)
        .ok_or_else(|| DataSourceError::UnsupportedRequest {
            signal: name.to_string(),
            reason: format!("no such signal in '{}'", ds.name()),
        })
}

fn check_kind<T: SignalScalar>(ds: &dyn DataSource, idx: usize) -> Result<(), DataSourceError> {
    let sig = ds.signals().get(idx).ok_or(DataSourceError::SignalOutOfRange {
        signal: idx,
        signals: ds.signals().len(),
    })?;
    match sig.scalar {
        Some(k) if k == T::KIND || (k == ScalarKind::Char8 && T::KIND == ScalarKind::UInt8) => Ok(()),
        _ => Err(DataSourceError::TypeMismatch {
            signal: sig.name.clone(),
            expected: T::KIND.name(),
        }),
    }
}

pub(crate) fn signal_name(table: &SignalTable, signal: usize) -> String {
    table
        .get(signal)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| format!("#{signal}"))
}

/// Shared `signal_memory` lookup for sources that keep their buffers in a
/// vector of regions.
pub(crate) fn locate(
    table: &SignalTable,
    regions: &[Arc<MemoryRegion>],
    signal: usize,
    buffer: usize,
) -> Result<SignalMemory, DataSourceError> {
    if regions.is_empty() {
        return Err(DataSourceError::NotAllocated);
    }
    let region = regions.get(buffer).ok_or(DataSourceError::BufferOutOfRange {
        buffer,
        buffers: regions.len(),
    })?;
    let sig = table.get(signal).ok_or(DataSourceError::SignalOutOfRange {
        signal,
        signals: table.len(),
    })?;
    Ok(SignalMemory {
        region: Arc::clone(region),
        offset: sig.byte_offset,
        size: sig.byte_size(),
    })
}

/// Broker kind for a request against a signal that allows every kind.
pub(crate) fn select_broker_kind(
    table: &SignalTable,
    request: &BrokerRequest<'_>,
) -> Result<BrokerKind, DataSourceError> {
    let sig = table.get(request.signal).ok_or(DataSourceError::SignalOutOfRange {
        signal: request.signal,
        signals: table.len(),
    })?;
    if request.samples > sig.number_of_samples {
        return Err(DataSourceError::UnsupportedRequest {
            signal: sig.name.clone(),
            reason: format!(
                "'{}' asks for {} samples, the signal holds {}",
                request.gam, request.samples, sig.number_of_samples
            ),
        });
    }
    if request.samples > 1 || request.samples < sig.number_of_samples {
        return Ok(BrokerKind::Sampled);
    }
    if request.ranged {
        return Ok(BrokerKind::Ranged);
    }
    Ok(BrokerKind::Plain)
}
