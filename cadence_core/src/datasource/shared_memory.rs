//! Stateless data source backed by a memory mapping.
//!
//! Without parameters the mapping is anonymous. With `path = "..."` the
//! buffer is a shared file mapping, so monitoring processes can map the same
//! file and observe signal values at their configured offsets.

use std::path::PathBuf;
use std::sync::Arc;

use cadence_common::tree::ConfigNode;
use tracing::{debug, info};

use super::{
    BrokerRequest, DataSource, DataSourceError, MemoryRegion, SignalMemory, locate,
    select_broker_kind,
};
use crate::broker::BrokerKind;
use crate::signal::{SignalDirection, SignalTable};

pub const CLASS: &str = "SharedMemoryDataSource";

/// Single-buffer store served by every broker kind.
#[derive(Debug)]
pub struct SharedMemoryDataSource {
    name: String,
    path: Option<PathBuf>,
    signals: SignalTable,
    buffer: Vec<Arc<MemoryRegion>>,
}

impl SharedMemoryDataSource {
    pub fn new(name: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path,
            signals: SignalTable::new(),
            buffer: Vec::new(),
        }
    }

    /// Registry factory. Reads the optional `path` parameter.
    pub fn create(name: &str, params: &ConfigNode) -> Result<Box<dyn DataSource>, DataSourceError> {
        let path = params.opt_str("path")?.map(PathBuf::from);
        Ok(Box::new(Self::new(name, path)))
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }
}

impl DataSource for SharedMemoryDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> &'static str {
        CLASS
    }

    fn number_of_buffers(&self) -> usize {
        1
    }

    fn signals(&self) -> &SignalTable {
        &self.signals
    }

    fn signals_mut(&mut self) -> &mut SignalTable {
        &mut self.signals
    }

    fn allocate_memory(&mut self) -> Result<(), DataSourceError> {
        if !self.buffer.is_empty() {
            return Err(DataSourceError::AlreadyAllocated);
        }
        let size = self.signals.assign_offsets()?;
        let region = match &self.path {
            Some(path) => {
                info!(data_source = %self.name, path = %path.display(), bytes = size, "mapping file");
                MemoryRegion::file(path, size)?
            }
            None => MemoryRegion::anonymous(size)?,
        };
        for sig in self.signals.iter() {
            let Some(default) = &sig.default else {
                continue;
            };
            let range = sig.byte_range();
            let mut offset = range.start;
            while offset < range.end {
                let len = default.len().min(range.end - offset);
                if len == 0 || !region.write(offset, &default[..len]) {
                    break;
                }
                offset += len;
            }
        }
        self.buffer = vec![Arc::new(region)];
        debug!(data_source = %self.name, bytes = size, "allocated mapping");
        Ok(())
    }

    fn signal_memory(&self, signal: usize, buffer: usize) -> Result<SignalMemory, DataSourceError> {
        locate(&self.signals, &self.buffer, signal, buffer)
    }

    fn broker_kind(
        &self,
        _direction: SignalDirection,
        request: &BrokerRequest<'_>,
    ) -> Result<BrokerKind, DataSourceError> {
        select_broker_kind(&self.signals, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::tests::scalar;
    use cadence_common::types::ScalarKind;

    #[test]
    fn defaults_written_at_allocation_for_every_sample() {
        let mut ds = SharedMemoryDataSource::new("SHM", None);
        let mut s = scalar("S", ScalarKind::Int16, 2);
        s.number_of_samples = 3;
        s.default = Some([(-1i16).to_ne_bytes(), 5i16.to_ne_bytes()].concat());
        ds.signals_mut().register(s).unwrap();
        ds.allocate_memory().unwrap();

        assert!(!ds.is_stateful());
        let bytes = ds.read_signal(0, 0).unwrap();
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![-1, 5, -1, 5, -1, 5]);
        assert!(ds.signal_memory(0, 1).is_err());
    }

    #[test]
    fn serves_sampled_requests() {
        let mut ds = SharedMemoryDataSource::new("SHM", None);
        let mut s = scalar("S", ScalarKind::Float64, 1);
        s.number_of_samples = 4;
        ds.signals_mut().register(s).unwrap();
        ds.allocate_memory().unwrap();

        let req = BrokerRequest {
            gam: "G",
            signal: 0,
            samples: 4,
            ranged: false,
        };
        assert_eq!(ds.broker_kind(SignalDirection::Input, &req).unwrap(), BrokerKind::Sampled);
        let req = BrokerRequest { samples: 5, ..req };
        assert!(ds.broker_kind(SignalDirection::Input, &req).is_err());
    }

    #[test]
    fn file_backed_mapping_from_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.bin");
        let params = ConfigNode::parse(
            "data_sources.SHM.parameters",
            &format!("path = \"{}\"", path.display()),
        )
        .unwrap();
        let mut ds = SharedMemoryDataSource::create("SHM", &params).unwrap();
        ds.signals_mut()
            .register(scalar("V", ScalarKind::UInt32, 1))
            .unwrap();
        ds.allocate_memory().unwrap();
        ds.write_signal(0, 0, &0xA5A5_0001u32.to_ne_bytes()).unwrap();
        drop(ds);
        assert_eq!(std::fs::read(&path).unwrap(), 0xA5A5_0001u32.to_ne_bytes().to_vec());
    }
}
