//! `ConstantGAM`: writes each output's configured default every cycle.

use cadence_common::tree::ConfigNode;

use super::{Gam, GamError, GamMemory, GamSignals};

pub const CLASS: &str = "ConstantGAM";

#[derive(Debug, Default)]
pub struct ConstantGam {
    /// Output block image, built once in `setup`.
    image: Vec<u8>,
}

impl ConstantGam {
    pub fn create(_name: &str, _params: &ConfigNode) -> Result<Box<dyn Gam>, GamError> {
        Ok(Box::new(Self::default()))
    }
}

impl Gam for ConstantGam {
    fn setup(&mut self, signals: &GamSignals<'_>) -> Result<(), GamError> {
        signals.require_counts(0, 1)?;
        let len = signals
            .outputs
            .iter()
            .map(|s| s.byte_range().end)
            .max()
            .unwrap_or(0);
        let mut image = vec![0u8; len];
        for s in signals.outputs {
            let Some(default) = &s.default else {
                return Err(GamError::Signals(format!(
                    "output '{}' has no default value",
                    s.name
                )));
            };
            let sample = s.sample_size();
            let Some(one) = default.get(..sample) else {
                return Err(GamError::Signals(format!(
                    "default of '{}' covers {} of {sample} bytes",
                    s.name,
                    default.len()
                )));
            };
            for n in 0..s.number_of_samples as usize {
                let at = s.byte_offset + n * sample;
                image[at..at + sample].copy_from_slice(one);
            }
        }
        self.image = image;
        Ok(())
    }

    fn execute(&mut self, memory: &mut GamMemory) -> Result<(), GamError> {
        let out = memory.outputs_mut();
        if out.len() != self.image.len() {
            return Err(GamError::Execution("output block resized".into()));
        }
        out.copy_from_slice(&self.image);
        Ok(())
    }
}
