//! One pass over a thread's executables.
//!
//! Records of the same GAM are adjacent (one per data source the GAM
//! touches). They form one *step*: every record's input brokers run, the
//! GAM executes once, then every record's output brokers run. Step `k`
//! works on the `k`-th unit the thread checked out. No lock and no
//! allocation on the success path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::arena::GamUnit;
use crate::error::CycleError;
use crate::gam::{GamError, SharedContext};

use super::{ErrorPolicy, Executable, ThreadSchedule};

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Executable records whose step completed.
    pub executed: usize,
    /// Steps that failed this cycle.
    pub failures: usize,
    /// First failure.
    pub error: Option<CycleError>,
    /// The policy asked the worker to terminate.
    pub stop_thread: bool,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Install the contexts staged for generation `generation` on every unit
/// that has not seen it yet. Runs before the first cycle of an activation.
pub(crate) fn activate(
    units: &mut [GamUnit],
    thread: &ThreadSchedule,
    contexts: &[Option<SharedContext>],
    generation: u64,
) -> Result<(), CycleError> {
    for (unit, (gam, name)) in units.iter_mut().zip(thread.gams()) {
        if unit.activation == generation {
            continue;
        }
        if let Some(context) = contexts.get(gam.index()).and_then(Option::as_ref) {
            unit.gam.set_context(context).map_err(|source| CycleError::Context {
                gam: Arc::clone(name),
                source,
            })?;
        }
        unit.activation = generation;
    }
    Ok(())
}

/// Execute every step of `thread` once against stateful buffer `buffer`.
pub(crate) fn run_cycle(
    units: &mut [GamUnit],
    thread: &ThreadSchedule,
    buffer: usize,
    policy: ErrorPolicy,
) -> CycleReport {
    let start = Instant::now();
    let execs = thread.executables();
    let mut report = CycleReport::default();
    let mut i = 0;
    let mut k = 0;
    while i < execs.len() {
        let end = (i + execs[i].span.max(1)).min(execs.len());
        let step = &execs[i..end];
        let t0 = Instant::now();
        let result = match units.get_mut(k) {
            Some(unit) => run_step(unit, step, buffer),
            None => Err(CycleError::Execute {
                gam: Arc::clone(&execs[i].gam_name),
                source: GamError::Execution("not checked out".to_string()),
            }),
        };
        thread.timing.store(i, t0.elapsed());
        i = end;
        k += 1;
        match result {
            Ok(()) => report.executed += step.len(),
            Err(e) => {
                report.failures += 1;
                if report.error.is_none() {
                    report.error = Some(e);
                }
                match policy {
                    ErrorPolicy::Continue => {}
                    ErrorPolicy::AbortCycle => break,
                    ErrorPolicy::StopThread => {
                        report.stop_thread = true;
                        break;
                    }
                }
            }
        }
    }
    report.elapsed = start.elapsed();
    report
}

fn run_step(unit: &mut GamUnit, step: &[Executable], buffer: usize) -> Result<(), CycleError> {
    let Some(first) = step.first() else {
        return Ok(());
    };

    for record in step {
        for broker in &record.inputs {
            broker
                .execute_in(buffer, unit.memory.inputs_mut())
                .map_err(|source| CycleError::InputBroker {
                    gam: Arc::clone(&first.gam_name),
                    data_source: Arc::clone(broker.shared_data_source()),
                    source,
                })?;
        }
    }

    unit.gam
        .execute(&mut unit.memory)
        .map_err(|source| CycleError::Execute {
            gam: Arc::clone(&first.gam_name),
            source,
        })?;

    for record in step {
        for broker in &record.outputs {
            broker
                .execute_in(buffer, unit.memory.outputs_mut())
                .map_err(|source| CycleError::OutputBroker {
                    gam: Arc::clone(&first.gam_name),
                    data_source: Arc::clone(broker.shared_data_source()),
                    source,
                })?;
        }
    }
    Ok(())
}
