//! Scheduler: executable lists per (state, thread) and the worker threads
//! that loop over them.
//!
//! ## Activation
//! Every stateful buffer slot carries the *generation* of the state prepared
//! for it. `prepare_next_state` writes the inactive slot; the application
//! then flips the [`BufferIndex`]. A worker latches the index at the start of
//! each cycle and leaves as soon as the latched slot no longer carries its
//! own generation, so the outgoing state's threads stop at their next cycle
//! boundary without any message passing. Before it writes a slot,
//! `prepare_next_state` joins every worker whose generation is no longer
//! active: nothing may still be executing on the buffer being prepared.
//!
//! A worker checks its GAM units out of the arena when it starts, installs
//! the group contexts staged for its generation, and checks the units back
//! in when it leaves.
//!
//! ## Cycle path
//! `index.load()` → generation check → [`executor::run_cycle`] → counters →
//! pacing. No lock, no allocation, no logging on success.

pub mod executor;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::arena::{GamArena, GamHandle, GamUnit};
use crate::broker::{Broker, BufferIndex};
use crate::cycle::{CycleStats, Pacer, rt_setup};
use crate::error::{ConfigurationError, CycleError, SchedulerError};
use crate::gam::{GamStatus, SharedContext};
use crate::state::StateCatalogue;

pub use executor::CycleReport;

// ─── Policy ─────────────────────────────────────────────────────────

/// What a thread does when an executable fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the failure and run the remaining executables.
    Continue,
    /// End the cycle at the failing executable.
    #[default]
    AbortCycle,
    /// End the cycle and terminate the worker.
    StopThread,
}

impl std::fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => f.write_str("continue"),
            Self::AbortCycle => f.write_str("abort_cycle"),
            Self::StopThread => f.write_str("stop_thread"),
        }
    }
}

// ─── Executables ────────────────────────────────────────────────────

/// One (GAM, data source) pair of a thread.
#[derive(Debug, Clone)]
pub struct Executable {
    pub(crate) gam: GamHandle,
    pub(crate) gam_name: Arc<str>,
    pub(crate) data_source: Option<Arc<str>>,
    pub(crate) inputs: Vec<Broker>,
    pub(crate) outputs: Vec<Broker>,
    /// Records in this GAM's step; set on the first record only.
    pub(crate) span: usize,
}

impl Executable {
    pub fn gam(&self) -> GamHandle {
        self.gam
    }

    pub fn gam_name(&self) -> &str {
        &self.gam_name
    }

    /// `None` for a GAM without signals.
    pub fn data_source(&self) -> Option<&str> {
        self.data_source.as_deref()
    }

    pub fn inputs(&self) -> &[Broker] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Broker] {
        &self.outputs
    }
}

/// Last measured step time per executable [ns].
#[derive(Debug)]
pub(crate) struct TimingSlots(Box<[AtomicU64]>);

impl TimingSlots {
    fn new(len: usize) -> Self {
        Self((0..len).map(|_| AtomicU64::new(0)).collect())
    }

    #[inline]
    pub(crate) fn store(&self, slot: usize, elapsed: Duration) {
        if let Some(s) = self.0.get(slot) {
            s.store(elapsed.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    fn load(&self, slot: usize) -> Option<Duration> {
        self.0
            .get(slot)
            .map(|s| Duration::from_nanos(s.load(Ordering::Relaxed)))
    }
}

#[derive(Debug, Default)]
struct ThreadCounters {
    cycles: AtomicU64,
    errors: AtomicU64,
    overruns: AtomicU64,
    last_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl ThreadCounters {
    /// Returns whether the cycle overran `period`.
    fn record(&self, report: &CycleReport, period: Option<Duration>) -> bool {
        let ns = report.elapsed.as_nanos() as u64;
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_ns.store(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
        if report.failures > 0 {
            self.errors.fetch_add(report.failures as u64, Ordering::Relaxed);
        }
        let overrun = period.is_some_and(|p| report.elapsed > p);
        if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        overrun
    }

    fn snapshot(&self) -> ThreadCounterSnapshot {
        ThreadCounterSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            last_cycle_ns: self.last_ns.load(Ordering::Relaxed),
            max_cycle_ns: self.max_ns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a thread's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadCounterSnapshot {
    pub cycles: u64,
    pub errors: u64,
    pub overruns: u64,
    pub last_cycle_ns: u64,
    pub max_cycle_ns: u64,
}

/// Executables and live counters of one thread of one state.
#[derive(Debug)]
pub struct ThreadSchedule {
    name: String,
    /// One per step, in execution order.
    gams: Vec<GamHandle>,
    gam_names: Vec<Arc<str>>,
    executables: Vec<Executable>,
    pub(crate) timing: TimingSlots,
    counters: ThreadCounters,
    cycle_time: Option<Duration>,
    cpu: Option<usize>,
    priority: Option<i32>,
}

impl ThreadSchedule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executables(&self) -> &[Executable] {
        &self.executables
    }

    /// GAMs of the thread in step order.
    pub(crate) fn gams(&self) -> impl Iterator<Item = (GamHandle, &Arc<str>)> {
        self.gams.iter().copied().zip(&self.gam_names)
    }

    /// Last step time recorded for executable `slot`.
    pub fn timing(&self, slot: usize) -> Option<Duration> {
        self.timing.load(slot)
    }

    pub fn counters(&self) -> ThreadCounterSnapshot {
        self.counters.snapshot()
    }

    pub fn cycle_time(&self) -> Option<Duration> {
        self.cycle_time
    }
}

#[derive(Debug)]
struct StateSchedule {
    name: String,
    threads: Vec<Arc<ThreadSchedule>>,
}

// ─── Workers ────────────────────────────────────────────────────────

/// Why a worker ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    /// `stop_execution` was called.
    Stopped,
    /// Another state was activated.
    Superseded,
    /// [`ErrorPolicy::StopThread`] after this failure.
    Policy(CycleError),
    /// A unit could not be checked out or refused its context.
    Activation(CycleError),
    RtSetup(String),
    Panicked,
}

/// Statistics of a finished worker.
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub state: String,
    pub thread: String,
    pub stats: CycleStats,
    pub exit: WorkerExit,
}

struct Worker {
    state: String,
    thread: String,
    generation: u64,
    handle: JoinHandle<WorkerSummary>,
}

struct WorkerContext {
    state: String,
    thread: Arc<ThreadSchedule>,
    arena: Arc<GamArena>,
    index: Arc<BufferIndex>,
    slots: Arc<[AtomicU64; 2]>,
    contexts: Arc<[Option<SharedContext>]>,
    stop: Arc<AtomicBool>,
    generation: u64,
    policy: ErrorPolicy,
}

fn worker_loop(ctx: WorkerContext) -> WorkerSummary {
    let mut summary = WorkerSummary {
        state: ctx.state.clone(),
        thread: ctx.thread.name.clone(),
        stats: CycleStats::new(),
        exit: WorkerExit::Stopped,
    };
    if let Err(e) = rt_setup(ctx.thread.cpu, ctx.thread.priority) {
        error!(thread = %summary.thread, "RT setup failed: {e}");
        summary.exit = WorkerExit::RtSetup(e.to_string());
        return summary;
    }
    let mut units = match ctx.arena.checkout(&ctx.thread.gams) {
        Ok(units) => units,
        Err(h) => {
            let err = unavailable(&ctx.arena, h);
            error!(thread = %summary.thread, "{err}");
            summary.exit = WorkerExit::Activation(err);
            return summary;
        }
    };
    summary.exit = match executor::activate(&mut units, &ctx.thread, &ctx.contexts, ctx.generation) {
        Ok(()) => {
            debug!(state = %summary.state, thread = %summary.thread, "worker running");
            cycle_loop(&ctx, &mut units, &mut summary.stats)
        }
        Err(e) => {
            error!(thread = %summary.thread, "{e}");
            WorkerExit::Activation(e)
        }
    };
    ctx.arena.checkin(&ctx.thread.gams, units);
    summary
}

fn cycle_loop(ctx: &WorkerContext, units: &mut [GamUnit], stats: &mut CycleStats) -> WorkerExit {
    let mut pacer = ctx.thread.cycle_time.map(Pacer::new);
    let mut latency_ns = 0;
    loop {
        if ctx.stop.load(Ordering::Acquire) {
            return WorkerExit::Stopped;
        }
        let buffer = ctx.index.load();
        if ctx.slots[buffer].load(Ordering::Acquire) != ctx.generation {
            return WorkerExit::Superseded;
        }

        let report = executor::run_cycle(units, &ctx.thread, buffer, ctx.policy);
        let overrun = ctx.thread.counters.record(&report, ctx.thread.cycle_time);
        stats.record(report.elapsed.as_nanos() as i64, latency_ns);
        if overrun {
            stats.overruns += 1;
        }
        if let Some(err) = report.error {
            if report.stop_thread {
                return WorkerExit::Policy(err);
            }
            if ctx.thread.counters.errors.load(Ordering::Relaxed) == report.failures as u64 {
                warn!(thread = %ctx.thread.name, "first cycle error: {err}");
            }
        }

        latency_ns = match pacer.as_mut() {
            Some(p) => p.wait(),
            None => {
                std::thread::yield_now();
                0
            }
        };
    }
}

fn unavailable(arena: &GamArena, handle: GamHandle) -> CycleError {
    let gam = arena
        .get(handle)
        .map(|slot| Arc::clone(slot.shared_name()))
        .unwrap_or_else(|| Arc::from(format!("#{}", handle.index())));
    CycleError::Unavailable { gam }
}

fn join_worker(worker: Worker) -> WorkerSummary {
    match worker.handle.join() {
        Ok(summary) => summary,
        Err(_) => {
            error!(state = %worker.state, thread = %worker.thread, "worker panicked");
            WorkerSummary {
                state: worker.state,
                thread: worker.thread,
                stats: CycleStats::new(),
                exit: WorkerExit::Panicked,
            }
        }
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────

pub struct Scheduler {
    policy: ErrorPolicy,
    arena: Arc<GamArena>,
    index: Arc<BufferIndex>,
    states: Vec<StateSchedule>,
    by_name: HashMap<String, usize>,
    slots: Arc<[AtomicU64; 2]>,
    slot_state: [Option<usize>; 2],
    /// Group context per GAM handle, staged for each buffer.
    contexts: [Arc<[Option<SharedContext>]>; 2],
    generation: u64,
    stop: Arc<AtomicBool>,
    workers: Vec<Worker>,
    finished: Vec<WorkerSummary>,
}

impl Scheduler {
    /// Flatten every (state, thread) into its executable array.
    ///
    /// A GAM linked to K data sources contributes K records; a GAM with no
    /// signals contributes one. Every referenced GAM must be `Ready`.
    pub fn configure_scheduler(
        catalogue: &StateCatalogue,
        arena: Arc<GamArena>,
        index: Arc<BufferIndex>,
        policy: ErrorPolicy,
    ) -> Result<Self, ConfigurationError> {
        let mut states = Vec::with_capacity(catalogue.len());
        let mut by_name = HashMap::new();
        for state in catalogue.iter() {
            let mut threads = Vec::with_capacity(state.threads().len());
            for thread in state.threads() {
                let mut executables = Vec::new();
                let mut gam_names = Vec::with_capacity(thread.functions().len());
                for &handle in thread.functions() {
                    let slot = arena.get(handle).ok_or_else(|| ConfigurationError::MalformedState {
                        state: state.name().to_string(),
                        reason: format!("thread '{}' references a GAM outside the arena", thread.name()),
                    })?;
                    if slot.status() != GamStatus::Ready {
                        return Err(ConfigurationError::MalformedState {
                            state: state.name().to_string(),
                            reason: format!(
                                "thread '{}' references unconfigured GAM '{}'",
                                thread.name(),
                                slot.name()
                            ),
                        });
                    }
                    gam_names.push(Arc::clone(slot.shared_name()));
                    let links = slot.links();
                    if links.is_empty() {
                        executables.push(Executable {
                            gam: handle,
                            gam_name: Arc::clone(slot.shared_name()),
                            data_source: None,
                            inputs: Vec::new(),
                            outputs: Vec::new(),
                            span: 1,
                        });
                    }
                    for (k, link) in links.iter().enumerate() {
                        executables.push(Executable {
                            gam: handle,
                            gam_name: Arc::clone(slot.shared_name()),
                            data_source: Some(Arc::clone(&link.data_source)),
                            inputs: link.inputs.clone(),
                            outputs: link.outputs.clone(),
                            span: if k == 0 { links.len() } else { 0 },
                        });
                    }
                }
                debug!(
                    state = state.name(),
                    thread = thread.name(),
                    executables = executables.len(),
                    "thread scheduled"
                );
                threads.push(Arc::new(ThreadSchedule {
                    name: thread.name().to_string(),
                    gams: thread.functions().to_vec(),
                    gam_names,
                    timing: TimingSlots::new(executables.len()),
                    executables,
                    counters: ThreadCounters::default(),
                    cycle_time: thread.cycle_time(),
                    cpu: thread.cpu(),
                    priority: thread.priority(),
                }));
            }
            by_name.insert(state.name().to_string(), states.len());
            states.push(StateSchedule {
                name: state.name().to_string(),
                threads,
            });
        }
        Ok(Self {
            policy,
            arena,
            index,
            states,
            by_name,
            slots: Arc::new([AtomicU64::new(0), AtomicU64::new(0)]),
            slot_state: [None, None],
            contexts: [Arc::from(Vec::new()), Arc::from(Vec::new())],
            generation: 0,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            finished: Vec::new(),
        })
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn thread_schedule(&self, state: &str, thread: &str) -> Result<&ThreadSchedule, SchedulerError> {
        let s = self
            .by_name
            .get(state)
            .and_then(|&i| self.states.get(i))
            .ok_or_else(|| SchedulerError::UnknownState(state.to_string()))?;
        s.threads
            .iter()
            .find(|t| t.name == thread)
            .map(|t| t.as_ref())
            .ok_or_else(|| SchedulerError::UnknownThread {
                state: state.to_string(),
                thread: thread.to_string(),
            })
    }

    pub fn number_of_executables(&self, state: &str, thread: &str) -> Result<usize, SchedulerError> {
        self.thread_schedule(state, thread).map(|t| t.executables.len())
    }

    /// Mark `next` as the state of the inactive buffer. Takes effect when the
    /// buffer index flips; until then the running state is untouched.
    ///
    /// Blocks until every superseded worker has left its last cycle.
    pub fn prepare_next_state(&mut self, current: Option<&str>, next: &str) -> Result<(), SchedulerError> {
        let id = self
            .by_name
            .get(next)
            .copied()
            .ok_or_else(|| SchedulerError::UnknownState(next.to_string()))?;
        self.retire_superseded();
        self.reap();
        self.generation += 1;
        let slot = self.index.inactive();
        self.slot_state[slot] = Some(id);
        self.contexts[slot] = Arc::from(Vec::new());
        self.slots[slot].store(self.generation, Ordering::Release);
        debug!(from = ?current, to = next, buffer = slot, generation = self.generation, "scheduler prepared");
        Ok(())
    }

    /// Group contexts for the state prepared in the inactive buffer, indexed
    /// by GAM handle. Installed by each GAM's thread on activation.
    pub fn stage_contexts(&mut self, contexts: Vec<Option<SharedContext>>) {
        self.contexts[self.index.inactive()] = Arc::from(contexts);
    }

    /// State of the active buffer, once one has been prepared.
    pub fn active_state(&self) -> Option<&str> {
        let buffer = self.index.load();
        if self.slots[buffer].load(Ordering::Acquire) == 0 {
            return None;
        }
        self.slot_state[buffer]
            .and_then(|i| self.states.get(i))
            .map(|s| s.name.as_str())
    }

    /// Spawn one worker per thread of the active state.
    pub fn start_execution(&mut self) -> Result<(), SchedulerError> {
        let buffer = self.index.load();
        let generation = self.slots[buffer].load(Ordering::Acquire);
        let state_idx = match self.slot_state[buffer] {
            Some(i) if generation != 0 => i,
            _ => return Err(SchedulerError::NoActiveState),
        };
        let Some(state) = self.states.get(state_idx) else {
            return Err(SchedulerError::NoActiveState);
        };
        let state_name = state.name.clone();
        let threads: Vec<Arc<ThreadSchedule>> = state.threads.iter().map(Arc::clone).collect();
        self.retire_superseded();
        self.reap();
        if self.workers.iter().any(|w| w.generation == generation) {
            return Err(SchedulerError::AlreadyRunning(state_name));
        }

        for thread in threads {
            let ctx = WorkerContext {
                state: state_name.clone(),
                thread: Arc::clone(&thread),
                arena: Arc::clone(&self.arena),
                index: Arc::clone(&self.index),
                slots: Arc::clone(&self.slots),
                contexts: Arc::clone(&self.contexts[buffer]),
                stop: Arc::clone(&self.stop),
                generation,
                policy: self.policy,
            };
            let spawned = std::thread::Builder::new()
                .name(thread.name.clone())
                .spawn(move || worker_loop(ctx));
            match spawned {
                Ok(handle) => self.workers.push(Worker {
                    state: state_name.clone(),
                    thread: thread.name.clone(),
                    generation,
                    handle,
                }),
                Err(source) => {
                    let summaries = self.stop_execution();
                    self.finished = summaries;
                    return Err(SchedulerError::Spawn {
                        thread: thread.name.clone(),
                        source,
                    });
                }
            }
        }
        info!(state = %state_name, threads = self.workers.len(), policy = %self.policy, "execution started");
        Ok(())
    }

    /// Stop every worker at its next cycle boundary and join it. Returns the
    /// summaries of all workers that ended since the last call.
    pub fn stop_execution(&mut self) -> Vec<WorkerSummary> {
        self.stop.store(true, Ordering::Release);
        let mut out = std::mem::take(&mut self.finished);
        out.extend(self.workers.drain(..).map(join_worker));
        self.stop.store(false, Ordering::Release);
        if !out.is_empty() {
            info!(workers = out.len(), "execution stopped");
        }
        out
    }

    /// Workers that have not returned yet.
    pub fn running_threads(&self) -> usize {
        self.workers.iter().filter(|w| !w.handle.is_finished()).count()
    }

    pub fn is_running(&self) -> bool {
        self.running_threads() > 0
    }

    /// Run one cycle of `thread` on the calling thread. Refused while
    /// workers are alive.
    pub fn execute_single_cycle(&self, state: &str, thread: &str) -> Result<CycleReport, SchedulerError> {
        if self.is_running() {
            return Err(SchedulerError::Busy(state.to_string()));
        }
        let schedule = self.thread_schedule(state, thread)?;
        let buffer = self.index.load();
        let generation = self.slots[buffer].load(Ordering::Acquire);
        let mut units = self
            .arena
            .checkout(&schedule.gams)
            .map_err(|h| SchedulerError::Activation(unavailable(&self.arena, h)))?;
        let result = executor::activate(&mut units, schedule, &self.contexts[buffer], generation).map(|()| {
            let report = executor::run_cycle(&mut units, schedule, buffer, self.policy);
            schedule.counters.record(&report, schedule.cycle_time);
            report
        });
        self.arena.checkin(&schedule.gams, units);
        result.map_err(SchedulerError::Activation)
    }

    /// Join every worker whose generation is no longer active. A worker in
    /// the middle of a cycle is waited for.
    fn retire_superseded(&mut self) {
        let active = self.slots[self.index.load()].load(Ordering::Acquire);
        let (stale, live): (Vec<Worker>, Vec<Worker>) =
            self.workers.drain(..).partition(|w| w.generation != active);
        self.workers = live;
        for w in stale {
            let summary = join_worker(w);
            debug!(state = %summary.state, thread = %summary.thread, exit = ?summary.exit, "worker retired");
            self.finished.push(summary);
        }
    }

    /// Join workers that already returned.
    fn reap(&mut self) {
        let (done, alive): (Vec<Worker>, Vec<Worker>) =
            self.workers.drain(..).partition(|w| w.handle.is_finished());
        self.workers = alive;
        for w in done {
            let summary = join_worker(w);
            debug!(state = %summary.state, thread = %summary.thread, exit = ?summary.exit, "worker reaped");
            self.finished.push(summary);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_execution();
        }
    }
}
