//! Generic Application Modules.
//!
//! A GAM is a user algorithm with a private input block and a private output
//! block. It never touches data sources: before `execute` its input brokers
//! fill the input block, after `execute` its output brokers drain the output
//! block. The lifecycle follows the HAL driver pattern:
//!
//! ```text
//! factory(parameters) → setup(signals) → hooks() → [set_context → execute*]*
//! ```
//!
//! `execute` runs on a real-time thread: it must not block and must not
//! allocate. While a state runs, the worker thread owns the GAM outright.
//! Transition-time work never reaches the GAM itself: it goes through the
//! [`GamHooks`] object the GAM hands out after `setup`, and the group
//! context is installed by the GAM's own thread before its first cycle in
//! the new state.

pub mod constant_gam;
pub mod gain_gam;
pub mod group;
pub mod io_gam;
pub mod registry;

use std::any::Any;
use std::sync::Arc;

use cadence_common::config::ConfigError;
use cadence_common::types::{ScalarKind, SignalScalar};
use thiserror::Error;

use crate::signal::SignalDescriptor;

pub use constant_gam::ConstantGam;
pub use gain_gam::GainGam;
pub use group::{GamGroup, GroupRegistry, ParameterContext, ParameterGroup};
pub use io_gam::IoGam;
pub use registry::{GamFactory, GamRegistry};

// ─── Errors ─────────────────────────────────────────────────────────

/// GAM or group level failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GamError {
    #[error("no class '{0}' is registered")]
    UnknownClass(String),

    #[error("signal layout rejected: {0}")]
    Signals(String),

    #[error(transparent)]
    Parameter(#[from] ConfigError),

    #[error("no context was delivered")]
    ContextMissing,

    #[error("context is not a {expected}")]
    ContextKind { expected: &'static str },

    #[error("context has no entry '{0}'")]
    ContextEntry(String),

    #[error("signal {index} out of range ({count} {direction} signals)")]
    SignalIndex {
        index: usize,
        count: usize,
        direction: &'static str,
    },

    #[error("element {element} of signal {signal} is not a {expected}")]
    ElementAccess {
        signal: usize,
        element: usize,
        expected: &'static str,
    },

    #[error("state '{0}' rejected")]
    StateRejected(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

// ─── Status and context ─────────────────────────────────────────────

/// Lifecycle status of an instantiated GAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GamStatus {
    /// Created, `setup` not yet successful.
    #[default]
    Unconfigured,
    /// Signals resolved and brokers bound.
    Ready,
}

/// Read-only object a group shares with its members. Immutable once
/// published; members downcast it with [`downcast_context`].
pub type SharedContext = Arc<dyn Any + Send + Sync>;

/// Downcast a shared context to a concrete type.
pub fn downcast_context<C: Any + Send + Sync>(context: &SharedContext) -> Option<Arc<C>> {
    Arc::clone(context).downcast::<C>().ok()
}

// ─── Signals view ───────────────────────────────────────────────────

/// Resolved signals handed to [`Gam::setup`].
#[derive(Debug, Clone, Copy)]
pub struct GamSignals<'a> {
    pub name: &'a str,
    pub inputs: &'a [SignalDescriptor],
    pub outputs: &'a [SignalDescriptor],
}

impl GamSignals<'_> {
    /// Require at least `min_inputs` / `min_outputs` signals.
    pub fn require_counts(&self, min_inputs: usize, min_outputs: usize) -> Result<(), GamError> {
        if self.inputs.len() < min_inputs || self.outputs.len() < min_outputs {
            return Err(GamError::Signals(format!(
                "expected at least {min_inputs} inputs and {min_outputs} outputs, got {} and {}",
                self.inputs.len(),
                self.outputs.len()
            )));
        }
        Ok(())
    }

    pub fn input_bytes(&self) -> usize {
        self.inputs.iter().map(SignalDescriptor::byte_size).sum()
    }

    pub fn output_bytes(&self) -> usize {
        self.outputs.iter().map(SignalDescriptor::byte_size).sum()
    }
}

// ─── Private memory ─────────────────────────────────────────────────

/// The private input and output blocks of one GAM.
///
/// Both blocks are packed in signal order, exactly as described by the
/// signal tables passed to `setup`.
#[derive(Debug, Clone)]
pub struct GamMemory {
    inputs: Vec<u8>,
    outputs: Vec<u8>,
    input_signals: Arc<[SignalDescriptor]>,
    output_signals: Arc<[SignalDescriptor]>,
}

impl GamMemory {
    /// Zeroed blocks sized for the given (offset-assigned) signals.
    pub fn new(input_signals: Arc<[SignalDescriptor]>, output_signals: Arc<[SignalDescriptor]>) -> Self {
        let in_len = input_signals.iter().map(|s| s.byte_range().end).max().unwrap_or(0);
        let out_len = output_signals.iter().map(|s| s.byte_range().end).max().unwrap_or(0);
        Self {
            inputs: vec![0; in_len],
            outputs: vec![0; out_len],
            input_signals,
            output_signals,
        }
    }

    pub fn input_signals(&self) -> &[SignalDescriptor] {
        &self.input_signals
    }

    pub fn output_signals(&self) -> &[SignalDescriptor] {
        &self.output_signals
    }

    /// Whole input block.
    pub fn inputs(&self) -> &[u8] {
        &self.inputs
    }

    /// Whole output block.
    pub fn outputs(&self) -> &[u8] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut [u8] {
        &mut self.outputs
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut [u8] {
        &mut self.inputs
    }

    /// Input block and output block at once.
    pub fn split(&mut self) -> (&[u8], &mut [u8]) {
        (&self.inputs, &mut self.outputs)
    }

    /// Bytes of input signal `signal`.
    pub fn input_bytes(&self, signal: usize) -> Result<&[u8], GamError> {
        let range = signal_range(&self.input_signals, signal, "input")?;
        Ok(&self.inputs[range])
    }

    /// Bytes of output signal `signal`.
    pub fn output_bytes_mut(&mut self, signal: usize) -> Result<&mut [u8], GamError> {
        let range = signal_range(&self.output_signals, signal, "output")?;
        Ok(&mut self.outputs[range])
    }

    /// Element `element` (flattened across samples) of input `signal`.
    #[inline]
    pub fn input<T: SignalScalar>(&self, signal: usize, element: usize) -> Result<T, GamError> {
        let at = element_at::<T>(&self.input_signals, signal, element, "input")?;
        Ok(T::read_ne(&self.inputs[at..at + T::KIND.size()]))
    }

    /// Write element `element` of output `signal`.
    #[inline]
    pub fn set_output<T: SignalScalar>(
        &mut self,
        signal: usize,
        element: usize,
        value: T,
    ) -> Result<(), GamError> {
        let at = element_at::<T>(&self.output_signals, signal, element, "output")?;
        value.write_ne(&mut self.outputs[at..at + T::KIND.size()]);
        Ok(())
    }

    /// Element `element` of output `signal` as last written.
    pub fn output<T: SignalScalar>(&self, signal: usize, element: usize) -> Result<T, GamError> {
        let at = element_at::<T>(&self.output_signals, signal, element, "output")?;
        Ok(T::read_ne(&self.outputs[at..at + T::KIND.size()]))
    }
}

fn signal_range(
    signals: &[SignalDescriptor],
    signal: usize,
    direction: &'static str,
) -> Result<std::ops::Range<usize>, GamError> {
    signals
        .get(signal)
        .map(SignalDescriptor::byte_range)
        .ok_or(GamError::SignalIndex {
            index: signal,
            count: signals.len(),
            direction,
        })
}

#[inline]
fn element_at<T: SignalScalar>(
    signals: &[SignalDescriptor],
    signal: usize,
    element: usize,
    direction: &'static str,
) -> Result<usize, GamError> {
    let s = signals.get(signal).ok_or(GamError::SignalIndex {
        index: signal,
        count: signals.len(),
        direction,
    })?;
    let compatible = match s.scalar {
        Some(k) => k == T::KIND || (k == ScalarKind::Char8 && T::KIND == ScalarKind::UInt8),
        None => false,
    };
    let elements = s.number_of_elements as usize * s.number_of_samples as usize;
    if !compatible || element >= elements {
        return Err(GamError::ElementAccess {
            signal,
            element,
            expected: T::KIND.name(),
        });
    }
    Ok(s.byte_offset + element * s.element_size)
}

// ─── Trait ──────────────────────────────────────────────────────────

/// User algorithm executed by the scheduler.
pub trait Gam: Send {
    /// Validate the resolved signals. Called once, after memory is allocated
    /// and before any broker runs.
    fn setup(&mut self, signals: &GamSignals<'_>) -> Result<(), GamError>;

    /// One cycle of work on the private blocks.
    fn execute(&mut self, memory: &mut GamMemory) -> Result<(), GamError>;

    /// Install the group context staged for the state being entered. Runs
    /// on the executing thread, once per activation, before the first
    /// `execute` of that state. [`GamHooks::accept_context`] has already
    /// accepted the same object.
    fn set_context(&mut self, _context: &SharedContext) -> Result<(), GamError> {
        Ok(())
    }

    /// Transition-time half of this GAM. Queried once, after `setup`.
    fn hooks(&self) -> Option<Arc<dyn GamHooks>> {
        None
    }
}

/// Transition callbacks of a GAM, run on the thread that prepares the next
/// state while the running state may still be executing the GAM.
pub trait GamHooks: Send + Sync {
    /// Notification that `next` is about to become active. An error refuses
    /// the transition.
    fn prepare_next_state(&self, _current: Option<&str>, _next: &str) -> Result<(), GamError> {
        Ok(())
    }

    /// Check that `context` would be accepted by [`Gam::set_context`].
    /// Must not change anything the running GAM observes.
    fn accept_context(&self, _context: &SharedContext) -> Result<(), GamError> {
        Ok(())
    }
}
