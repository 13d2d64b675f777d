//! Brokers: precomputed copy tables between GAM blocks and data sources.
//!
//! A broker belongs to one GAM, one data source, one direction and one
//! [`BrokerKind`]. At configuration time every signal binding is expanded into
//! [`CopyEntry`] rows (one per sample and per element range); at run time the
//! broker only walks that table.
//!
//! Stateless brokers are bound to buffer 0 of their data source forever.
//! Stateful brokers hold both buffers and resolve the buffer through the
//! shared [`BufferIndex`] on every call, so a state switch never rebuilds
//! them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::datasource::memory::{load_bytes, store_bytes};
use crate::datasource::{BrokerRequest, DataSource, DataSourceError, MemoryRegion};
use crate::error::ConfigurationError;
use crate::signal::{ElementRange, SignalDirection};

// ─── Buffer index ───────────────────────────────────────────────────

/// Which of the two stateful buffers the executing state reads and writes.
///
/// Single writer (the application's transition path), many readers (every
/// stateful broker). The flip is a release store; cycle-time loads acquire,
/// so everything written into the next buffer during a transition is visible
/// to the first cycle that observes the new index.
#[derive(Debug, Default)]
pub struct BufferIndex(AtomicUsize);

impl BufferIndex {
    pub fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Currently active buffer (0 or 1).
    #[inline]
    pub fn load(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// The buffer not currently active.
    #[inline]
    pub fn inactive(&self) -> usize {
        1 - self.load()
    }

    /// Publish the inactive buffer as active. Returns the new index.
    pub(crate) fn flip(&self) -> usize {
        let next = 1 - self.0.load(Ordering::Relaxed);
        self.0.store(next, Ordering::Release);
        next
    }
}

// ─── Kinds and errors ───────────────────────────────────────────────

/// Broker variant chosen by the data source at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerKind {
    /// Whole signals, one sample.
    Plain,
    /// Element sub-ranges of array signals.
    Ranged,
    /// Several samples per cycle.
    Sampled,
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Ranged => f.write_str("ranged"),
            Self::Sampled => f.write_str("sampled"),
        }
    }
}

/// Cycle-time broker failure. Nothing is copied when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("GAM block of {len} bytes is smaller than the copy table end {needed}")]
    GamBlockTooSmall { needed: usize, len: usize },

    #[error("buffer index {buffer} out of range")]
    BufferOutOfRange { buffer: usize },
}

/// One contiguous copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyEntry {
    pub gam_offset: usize,
    pub ds_offset: usize,
    pub size: usize,
}

// ─── Broker ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Binding {
    Stateless(Arc<MemoryRegion>),
    Stateful {
        buffers: [Arc<MemoryRegion>; 2],
        index: Arc<BufferIndex>,
    },
}

/// Copy engine for one (GAM, data source, direction, kind).
#[derive(Debug, Clone)]
pub struct Broker {
    direction: SignalDirection,
    kind: BrokerKind,
    data_source: Arc<str>,
    entries: Box<[CopyEntry]>,
    binding: Binding,
    gam_end: usize,
    total_bytes: usize,
}

impl Broker {
    /// Build a broker over `buffers` (1 = stateless, 2 = stateful).
    ///
    /// Every entry is checked against every buffer here, so the cycle-time
    /// path only has to check the GAM block length.
    pub(crate) fn new(
        direction: SignalDirection,
        kind: BrokerKind,
        data_source: Arc<str>,
        buffers: Vec<Arc<MemoryRegion>>,
        index: Arc<BufferIndex>,
        entries: Vec<CopyEntry>,
    ) -> Result<Self, String> {
        let ds_end = entries
            .iter()
            .map(|e| e.ds_offset + e.size)
            .max()
            .unwrap_or(0);
        for (i, b) in buffers.iter().enumerate() {
            if b.len() < ds_end {
                return Err(format!(
                    "buffer {i} of '{data_source}' has {} bytes, copy table needs {ds_end}",
                    b.len()
                ));
            }
        }
        let binding = match <[Arc<MemoryRegion>; 2]>::try_from(buffers) {
            Ok(pair) => Binding::Stateful {
                buffers: pair,
                index,
            },
            Err(mut single) if single.len() == 1 => match single.pop() {
                Some(region) => Binding::Stateless(region),
                None => return Err("no buffer".to_string()),
            },
            Err(other) => {
                return Err(format!(
                    "'{data_source}' exposes {} buffers; brokers support 1 or 2",
                    other.len()
                ));
            }
        };
        let gam_end = entries
            .iter()
            .map(|e| e.gam_offset + e.size)
            .max()
            .unwrap_or(0);
        let total_bytes = entries.iter().map(|e| e.size).sum();
        Ok(Self {
            direction,
            kind,
            data_source,
            entries: entries.into_boxed_slice(),
            binding,
            gam_end,
            total_bytes,
        })
    }

    /// Copy using the buffer currently published by the application.
    #[inline]
    pub fn execute(&self, gam_block: &mut [u8]) -> Result<(), BrokerError> {
        let buffer = match &self.binding {
            Binding::Stateless(_) => 0,
            Binding::Stateful { index, .. } => index.load(),
        };
        self.execute_in(buffer, gam_block)
    }

    /// Copy using a buffer index latched by the caller at cycle start.
    /// Stateless brokers ignore `buffer`.
    #[inline]
    pub fn execute_in(&self, buffer: usize, gam_block: &mut [u8]) -> Result<(), BrokerError> {
        let region = match &self.binding {
            Binding::Stateless(region) => region,
            Binding::Stateful { buffers, .. } => buffers
                .get(buffer)
                .ok_or(BrokerError::BufferOutOfRange { buffer })?,
        };
        if gam_block.len() < self.gam_end {
            return Err(BrokerError::GamBlockTooSmall {
                needed: self.gam_end,
                len: gam_block.len(),
            });
        }
        let cells = region.cells();
        match self.direction {
            SignalDirection::Input => {
                for e in self.entries.iter() {
                    load_bytes(
                        &mut gam_block[e.gam_offset..e.gam_offset + e.size],
                        &cells[e.ds_offset..e.ds_offset + e.size],
                    );
                }
            }
            SignalDirection::Output => {
                for e in self.entries.iter() {
                    store_bytes(
                        &cells[e.ds_offset..e.ds_offset + e.size],
                        &gam_block[e.gam_offset..e.gam_offset + e.size],
                    );
                }
            }
        }
        Ok(())
    }

    pub fn direction(&self) -> SignalDirection {
        self.direction
    }

    pub fn kind(&self) -> BrokerKind {
        self.kind
    }

    pub fn is_stateful(&self) -> bool {
        matches!(self.binding, Binding::Stateful { .. })
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub(crate) fn shared_data_source(&self) -> &Arc<str> {
        &self.data_source
    }

    pub fn entries(&self) -> &[CopyEntry] {
        &self.entries
    }

    /// Bytes moved per call.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

// ─── Construction from signal bindings ──────────────────────────────

/// One GAM signal bound to one data-source signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalBinding {
    /// Offset of the GAM signal in the GAM block.
    pub gam_offset: usize,
    /// Data-source signal index.
    pub ds_signal: usize,
    /// GAM-side samples.
    pub samples: u32,
    /// Selected element ranges; empty means the whole signal.
    pub ranges: Vec<ElementRange>,
}

/// Expand a binding into copy entries. `ds_offset`, `element_size` and
/// `ds_elements` describe the data-source signal.
pub fn expand_binding(
    binding: &SignalBinding,
    ds_offset: usize,
    element_size: usize,
    ds_elements: u32,
) -> Vec<CopyEntry> {
    let sample_bytes = element_size * ds_elements as usize;
    let mut gam_offset = binding.gam_offset;
    let mut out = Vec::with_capacity(binding.samples as usize * binding.ranges.len().max(1));
    for s in 0..binding.samples as usize {
        let base = ds_offset + s * sample_bytes;
        if binding.ranges.is_empty() {
            out.push(CopyEntry {
                gam_offset,
                ds_offset: base,
                size: sample_bytes,
            });
            gam_offset += sample_bytes;
        } else {
            for r in &binding.ranges {
                let size = r.count() as usize * element_size;
                out.push(CopyEntry {
                    gam_offset,
                    ds_offset: base + r.first as usize * element_size,
                    size,
                });
                gam_offset += size;
            }
        }
    }
    out
}

/// Build the brokers of one GAM towards one data source in one direction.
///
/// Bindings are grouped by the kind the data source selects; one broker per
/// kind, in order of first appearance.
pub(crate) fn build_brokers(
    gam: &str,
    ds: &dyn DataSource,
    ds_name: &Arc<str>,
    direction: SignalDirection,
    bindings: &[SignalBinding],
    index: &Arc<BufferIndex>,
) -> Result<Vec<Broker>, ConfigurationError> {
    let ds_err = |source: DataSourceError| ConfigurationError::DataSource {
        data_source: ds_name.to_string(),
        source,
    };
    let mut groups: Vec<(BrokerKind, Vec<CopyEntry>)> = Vec::new();
    for b in bindings {
        let request = BrokerRequest {
            gam,
            signal: b.ds_signal,
            samples: b.samples,
            ranged: !b.ranges.is_empty(),
        };
        let kind = ds.broker_kind(direction, &request).map_err(ds_err)?;
        let sig = ds.signals().get(b.ds_signal).ok_or_else(|| {
            ds_err(DataSourceError::SignalOutOfRange {
                signal: b.ds_signal,
                signals: ds.signals().len(),
            })
        })?;
        let entries = expand_binding(b, sig.byte_offset, sig.element_size, sig.number_of_elements);
        match groups.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, list)) => list.extend(entries),
            None => groups.push((kind, entries)),
        }
    }

    let Some(first) = bindings.first() else {
        return Ok(Vec::new());
    };
    let mut buffers = Vec::with_capacity(ds.number_of_buffers());
    for buffer in 0..ds.number_of_buffers() {
        let mem = ds.signal_memory(first.ds_signal, buffer).map_err(ds_err)?;
        buffers.push(mem.region);
    }

    groups
        .into_iter()
        .map(|(kind, entries)| {
            Broker::new(
                direction,
                kind,
                Arc::clone(ds_name),
                buffers.clone(),
                Arc::clone(index),
                entries,
            )
            .map_err(|reason| ConfigurationError::UnsupportedBroker {
                gam: gam.to_string(),
                data_source: ds_name.to_string(),
                reason,
            })
        })
        .collect()
}
