//! Stateful in-process data source (two heap buffers).
//!
//! Signals exchanged between GAMs live here. The state that executes owns one
//! buffer; the transition path prepares the other one and the flip hands it
//! over. Signals used by both the current and the next state carry their value
//! across the switch, everything else starts from its default.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use cadence_common::consts::STATEFUL_BUFFER_COUNT;
use cadence_common::tree::ConfigNode;
use tracing::debug;

use super::memory::{copy_cells, store_bytes};
use super::{
    BrokerRequest, BufferTransition, DataSource, DataSourceError, MemoryRegion, SignalMemory,
    locate, select_broker_kind,
};
use crate::broker::BrokerKind;
use crate::signal::{SignalDirection, SignalTable};

pub const CLASS: &str = "GAMDataSource";

/// Double-buffered signal store.
#[derive(Debug)]
pub struct GamDataSource {
    name: String,
    signals: SignalTable,
    buffers: Vec<Arc<MemoryRegion>>,
}

impl GamDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signals: SignalTable::new(),
            buffers: Vec::new(),
        }
    }

    /// Registry factory. The class takes no parameters.
    pub fn create(name: &str, _params: &ConfigNode) -> Result<Box<dyn DataSource>, DataSourceError> {
        Ok(Box::new(Self::new(name)))
    }
}

impl DataSource for GamDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> &'static str {
        CLASS
    }

    fn number_of_buffers(&self) -> usize {
        STATEFUL_BUFFER_COUNT
    }

    fn signals(&self) -> &SignalTable {
        &self.signals
    }

    fn signals_mut(&mut self) -> &mut SignalTable {
        &mut self.signals
    }

    fn allocate_memory(&mut self) -> Result<(), DataSourceError> {
        if !self.buffers.is_empty() {
            return Err(DataSourceError::AlreadyAllocated);
        }
        let size = self.signals.assign_offsets()?;
        self.buffers = (0..STATEFUL_BUFFER_COUNT)
            .map(|_| Arc::new(MemoryRegion::heap(size)))
            .collect();
        debug!(data_source = %self.name, bytes = size, "allocated two buffers");
        Ok(())
    }

    fn signal_memory(&self, signal: usize, buffer: usize) -> Result<SignalMemory, DataSourceError> {
        locate(&self.signals, &self.buffers, signal, buffer)
    }

    fn broker_kind(
        &self,
        _direction: SignalDirection,
        request: &BrokerRequest<'_>,
    ) -> Result<BrokerKind, DataSourceError> {
        match select_broker_kind(&self.signals, request)? {
            BrokerKind::Sampled => Err(DataSourceError::UnsupportedRequest {
                signal: super::signal_name(&self.signals, request.signal),
                reason: format!("{CLASS} serves one sample per cycle"),
            }),
            kind => Ok(kind),
        }
    }

    fn prepare_next_state(&self, t: &BufferTransition<'_>) -> Result<(), DataSourceError> {
        let (Some(active), Some(next)) = (self.buffers.get(t.active_buffer), self.buffers.get(t.next_buffer))
        else {
            return Err(DataSourceError::BufferOutOfRange {
                buffer: t.active_buffer.max(t.next_buffer),
                buffers: self.buffers.len(),
            });
        };
        for (i, sig) in self.signals.iter().enumerate() {
            if !t.used_in_next.get(i).copied().unwrap_or(false) {
                continue;
            }
            let range = sig.byte_range();
            let (Some(dst), Some(src)) = (next.slice(range.start, range.len()), active.slice(range.start, range.len()))
            else {
                return Err(DataSourceError::NotAllocated);
            };
            if t.used_in_current.get(i).copied().unwrap_or(false) {
                copy_cells(dst, src);
            } else {
                match &sig.default {
                    Some(one_sample) => {
                        for chunk in dst.chunks(one_sample.len().max(1)) {
                            store_bytes(chunk, &one_sample[..chunk.len()]);
                        }
                    }
                    None => {
                        for c in dst {
                            c.store(0, Ordering::Relaxed);
                        }
                    }
                }
            }
        }
        debug!(
            data_source = %self.name,
            next_state = t.next_state,
            buffer = t.next_buffer,
            "next buffer prepared"
        );
        Ok(())
    }
}
