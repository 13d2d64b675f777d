//! `GainGAM`: `output[i] = k · input[i]` for float signals.
//!
//! Parameters:
//! * `gain`: fixed gain (default 1.0);
//! * `gain_parameter`: name of a [`ParameterContext`] entry; when set, the
//!   gain is taken from the group context installed on entering each state.

use std::sync::Arc;

use cadence_common::tree::ConfigNode;
use cadence_common::types::ScalarKind;

use super::{Gam, GamError, GamHooks, GamMemory, GamSignals, ParameterContext, SharedContext, downcast_context};

pub const CLASS: &str = "GainGAM";

#[derive(Debug)]
pub struct GainGam {
    gain: f64,
    gain_parameter: Option<String>,
    context_applied: bool,
    /// (kind, elements) per input/output pair.
    pairs: Vec<(ScalarKind, usize)>,
}

impl GainGam {
    pub fn new(gain: f64, gain_parameter: Option<String>) -> Self {
        Self {
            gain,
            gain_parameter,
            context_applied: false,
            pairs: Vec::new(),
        }
    }

    pub fn create(_name: &str, params: &ConfigNode) -> Result<Box<dyn Gam>, GamError> {
        let gain = params.get_f64_or("gain", 1.0)?;
        let gain_parameter = params.opt_str("gain_parameter")?.map(str::to_string);
        Ok(Box::new(Self::new(gain, gain_parameter)))
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

/// Gain lookup in a group context.
fn context_gain(key: &str, context: &SharedContext) -> Result<f64, GamError> {
    let params = downcast_context::<ParameterContext>(context).ok_or(GamError::ContextKind {
        expected: "ParameterContext",
    })?;
    params
        .get(key)
        .ok_or_else(|| GamError::ContextEntry(key.to_string()))
}

/// Validates contexts for a [`GainGam`] bound to `key`.
#[derive(Debug)]
struct GainHooks {
    key: String,
}

impl GamHooks for GainHooks {
    fn accept_context(&self, context: &SharedContext) -> Result<(), GamError> {
        context_gain(&self.key, context).map(|_| ())
    }
}

impl Gam for GainGam {
    fn setup(&mut self, signals: &GamSignals<'_>) -> Result<(), GamError> {
        signals.require_counts(1, 1)?;
        if signals.inputs.len() != signals.outputs.len() {
            return Err(GamError::Signals(format!(
                "{} inputs but {} outputs",
                signals.inputs.len(),
                signals.outputs.len()
            )));
        }
        self.pairs.clear();
        for (i, o) in signals.inputs.iter().zip(signals.outputs) {
            let kind = match i.scalar {
                Some(k) if k.is_float() => k,
                _ => {
                    return Err(GamError::Signals(format!(
                        "input '{}' must be float32 or float64, is {}",
                        i.name, i.type_name
                    )));
                }
            };
            let elements = i.number_of_elements as usize * i.number_of_samples as usize;
            let out_elements = o.number_of_elements as usize * o.number_of_samples as usize;
            if o.scalar != Some(kind) || out_elements != elements {
                return Err(GamError::Signals(format!(
                    "output '{}' does not match input '{}'",
                    o.name, i.name
                )));
            }
            self.pairs.push((kind, elements));
        }
        Ok(())
    }

    fn set_context(&mut self, context: &SharedContext) -> Result<(), GamError> {
        let Some(key) = &self.gain_parameter else {
            return Ok(());
        };
        self.gain = context_gain(key, context)?;
        self.context_applied = true;
        Ok(())
    }

    fn hooks(&self) -> Option<Arc<dyn GamHooks>> {
        let key = self.gain_parameter.clone()?;
        Some(Arc::new(GainHooks { key }))
    }

    fn execute(&mut self, memory: &mut GamMemory) -> Result<(), GamError> {
        if self.gain_parameter.is_some() && !self.context_applied {
            return Err(GamError::ContextMissing);
        }
        let k = self.gain;
        for (signal, &(kind, elements)) in self.pairs.iter().enumerate() {
            for e in 0..elements {
                match kind {
                    ScalarKind::Float32 => {
                        let x: f32 = memory.input(signal, e)?;
                        memory.set_output(signal, e, (k * f64::from(x)) as f32)?;
                    }
                    _ => {
                        let x: f64 = memory.input(signal, e)?;
                        memory.set_output(signal, e, k * x)?;
                    }
                }
            }
        }
        Ok(())
    }
}
