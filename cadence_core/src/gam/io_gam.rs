//! `IOGAM`: copies its input block into its output block.
//!
//! Used to route signals between data sources. Signal boundaries do not need
//! to line up, only the total byte counts.

use cadence_common::tree::ConfigNode;

use super::{Gam, GamError, GamMemory, GamSignals};

pub const CLASS: &str = "IOGAM";

#[derive(Debug, Default)]
pub struct IoGam {
    bytes: usize,
}

impl IoGam {
    pub fn create(_name: &str, _params: &ConfigNode) -> Result<Box<dyn Gam>, GamError> {
        Ok(Box::new(Self::default()))
    }
}

impl Gam for IoGam {
    fn setup(&mut self, signals: &GamSignals<'_>) -> Result<(), GamError> {
        signals.require_counts(1, 1)?;
        let (i, o) = (signals.input_bytes(), signals.output_bytes());
        if i != o {
            return Err(GamError::Signals(format!(
                "input block is {i} bytes, output block is {o} bytes"
            )));
        }
        self.bytes = i;
        Ok(())
    }

    fn execute(&mut self, memory: &mut GamMemory) -> Result<(), GamError> {
        let (inputs, outputs) = memory.split();
        match (inputs.get(..self.bytes), outputs.get_mut(..self.bytes)) {
            (Some(src), Some(dst)) => {
                dst.copy_from_slice(src);
                Ok(())
            }
            _ => Err(GamError::Execution("blocks smaller than configured".into())),
        }
    }
}
