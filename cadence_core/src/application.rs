//! Real-time application: owns every component and drives the state
//! machine.
//!
//! ```text
//! Configuring → Configured → StateActive(S) → Transitioning(S→S') → StateActive(S') … → Terminated
//! ```
//!
//! A transition prepares everything against the *inactive* buffer and only
//! then flips the shared [`BufferIndex`]. If any participant refuses, the
//! index is not flipped and the application keeps its previous status.
//! Group contexts are checked by every member before any is staged, and
//! they reach the GAMs only through the flip, so a refused transition
//! leaves the running state exactly as it was.

mod builder;

use std::collections::HashMap;
use std::sync::Arc;

use cadence_common::types::TypeRegistry;
use tracing::{info, warn};

use crate::arena::{GamArena, GamHandle};
use crate::broker::BufferIndex;
use crate::config::ApplicationConfig;
use crate::datasource::{BufferTransition, DataSource, DataSourceRegistry};
use crate::error::{ConfigurationError, SchedulerError, TransitionError};
use crate::gam::{GamRegistry, GroupRegistry, SharedContext};
use crate::scheduler::{CycleReport, Scheduler, WorkerSummary};
use crate::state::StateCatalogue;

use builder::GroupEntry;

// ─── Status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationStatus {
    Configuring,
    Configured,
    StateActive(String),
    Transitioning { from: Option<String>, to: String },
    Terminated,
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuring => f.write_str("configuring"),
            Self::Configured => f.write_str("configured"),
            Self::StateActive(s) => write!(f, "active in '{s}'"),
            Self::Transitioning { from: Some(from), to } => write!(f, "transitioning '{from}' -> '{to}'"),
            Self::Transitioning { from: None, to } => write!(f, "transitioning to '{to}'"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

// ─── Registries ─────────────────────────────────────────────────────

/// Class and type registries consulted by [`RealTimeApplication::configure`].
pub struct Registries {
    pub types: TypeRegistry,
    pub gams: GamRegistry,
    pub data_sources: DataSourceRegistry,
    pub groups: GroupRegistry,
}

impl Registries {
    /// Built-in scalar types and built-in classes.
    pub fn with_builtin() -> Self {
        Self {
            types: TypeRegistry::with_builtin(),
            gams: GamRegistry::with_builtin(),
            data_sources: DataSourceRegistry::with_builtin(),
            groups: GroupRegistry::with_builtin(),
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::with_builtin()
    }
}

// ─── Application ────────────────────────────────────────────────────

pub struct RealTimeApplication {
    name: String,
    initial_state: Option<String>,
    status: ApplicationStatus,
    current: Option<String>,
    data_sources: Vec<Arc<dyn DataSource>>,
    ds_by_name: HashMap<String, usize>,
    arena: Arc<GamArena>,
    groups: Vec<GroupEntry>,
    states: StateCatalogue,
    usage: Vec<Vec<Vec<bool>>>,
    index: Arc<BufferIndex>,
    scheduler: Scheduler,
}

impl RealTimeApplication {
    /// Resolve signals, allocate data sources, set GAMs up, build brokers,
    /// groups, states and the scheduler.
    pub fn configure(config: &ApplicationConfig, registries: &Registries) -> Result<Self, ConfigurationError> {
        config.validate()?;
        info!(application = %config.application.name, "configuring");
        let built = builder::build(config, registries)?;
        let app = Self {
            name: config.application.name.clone(),
            initial_state: config.application.initial_state.clone(),
            status: ApplicationStatus::Configured,
            current: None,
            data_sources: built.data_sources,
            ds_by_name: built.ds_by_name,
            arena: built.arena,
            groups: built.groups,
            states: built.states,
            usage: built.usage,
            index: built.index,
            scheduler: built.scheduler,
        };
        info!(
            application = %app.name,
            data_sources = app.data_sources.len(),
            gams = app.arena.len(),
            groups = app.groups.len(),
            states = app.states.len(),
            "configured"
        );
        Ok(app)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_state(&self) -> Option<&str> {
        self.initial_state.as_deref()
    }

    pub fn status(&self) -> &ApplicationStatus {
        &self.status
    }

    /// State whose buffer is active.
    pub fn current_state(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn buffer_index(&self) -> usize {
        self.index.load()
    }

    /// Shared handle to the buffer index, for observers outside the cycle.
    pub fn buffer_index_handle(&self) -> Arc<BufferIndex> {
        Arc::clone(&self.index)
    }

    pub fn data_source(&self, name: &str) -> Option<&Arc<dyn DataSource>> {
        self.ds_by_name.get(name).and_then(|&i| self.data_sources.get(i))
    }

    pub fn data_sources(&self) -> &[Arc<dyn DataSource>] {
        &self.data_sources
    }

    pub fn gam_handle(&self, name: &str) -> Option<GamHandle> {
        self.arena.handle(name)
    }

    pub fn arena(&self) -> &GamArena {
        &self.arena
    }

    pub fn states(&self) -> &StateCatalogue {
        &self.states
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn number_of_executables(&self, state: &str, thread: &str) -> Result<usize, SchedulerError> {
        self.scheduler.number_of_executables(state, thread)
    }

    /// Prepare `next` and publish it by flipping the buffer index.
    ///
    /// Allowed from `Configured` and `StateActive`. Order: scheduler, data
    /// sources (inactive buffer only), hooks of the GAMs of `next`, group
    /// contexts accepted by every member, contexts staged, flip. The first
    /// refusal aborts with the status and buffer index unchanged.
    pub fn prepare_next_state(&mut self, next: &str) -> Result<(), TransitionError> {
        match &self.status {
            ApplicationStatus::Configured | ApplicationStatus::StateActive(_) => {}
            other => return Err(TransitionError::InvalidStatus(other.to_string())),
        }
        let next_idx = self
            .states
            .index_of(next)
            .ok_or_else(|| TransitionError::UnknownState(next.to_string()))?;

        let previous = self.status.clone();
        let current = self.current.clone();
        self.status = ApplicationStatus::Transitioning {
            from: current.clone(),
            to: next.to_string(),
        };

        match self.prepare_inactive(current.as_deref(), next, next_idx) {
            Ok(()) => {
                let buffer = self.index.flip();
                self.current = Some(next.to_string());
                self.status = ApplicationStatus::StateActive(next.to_string());
                info!(from = ?current, to = next, buffer, "state activated");
                Ok(())
            }
            Err(e) => {
                self.status = previous;
                warn!(from = ?current, to = next, "transition refused: {e}");
                Err(e)
            }
        }
    }

    fn prepare_inactive(&mut self, current: Option<&str>, next: &str, next_idx: usize) -> Result<(), TransitionError> {
        self.scheduler
            .prepare_next_state(current, next)
            .map_err(|source| TransitionError::Scheduler {
                next: next.to_string(),
                source,
            })?;

        let active_buffer = self.index.load();
        let next_buffer = self.index.inactive();
        let current_idx = current.and_then(|c| self.states.index_of(c));
        for (d, ds) in self.data_sources.iter().enumerate() {
            let used_in_current = current_idx
                .and_then(|c| self.usage.get(c))
                .and_then(|u| u.get(d))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let used_in_next = self
                .usage
                .get(next_idx)
                .and_then(|u| u.get(d))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let transition = BufferTransition {
                current_state: current,
                next_state: next,
                active_buffer,
                next_buffer,
                used_in_current,
                used_in_next,
            };
            ds.prepare_next_state(&transition)
                .map_err(|source| TransitionError::DataSource {
                    data_source: ds.name().to_string(),
                    next: next.to_string(),
                    source,
                })?;
        }

        if let Some(state) = self.states.by_index(next_idx) {
            for h in state.functions() {
                let Some(slot) = self.arena.get(h) else {
                    continue;
                };
                let Some(hooks) = slot.hooks() else {
                    continue;
                };
                hooks
                    .prepare_next_state(current, next)
                    .map_err(|source| TransitionError::Gam {
                        gam: slot.name().to_string(),
                        next: next.to_string(),
                        source,
                    })?;
            }
        }

        let contexts = self.group_contexts(current, next)?;
        self.scheduler.stage_contexts(contexts);
        Ok(())
    }

    /// Context of every group member for `next`, indexed by GAM handle.
    /// Every member accepts its context before this returns.
    fn group_contexts(
        &self,
        current: Option<&str>,
        next: &str,
    ) -> Result<Vec<Option<SharedContext>>, TransitionError> {
        let mut contexts = vec![None; self.arena.len()];
        for entry in &self.groups {
            let context = entry
                .group
                .prepare_next_state(current, next)
                .map_err(|source| TransitionError::Group {
                    group: entry.name.clone(),
                    next: next.to_string(),
                    source,
                })?;
            for &m in &entry.members {
                let Some(slot) = self.arena.get(m) else {
                    continue;
                };
                if let Some(hooks) = slot.hooks() {
                    hooks
                        .accept_context(&context)
                        .map_err(|source| TransitionError::ContextRejected {
                            group: entry.name.clone(),
                            gam: slot.name().to_string(),
                            source,
                        })?;
                }
                if let Some(c) = contexts.get_mut(m.index()) {
                    *c = Some(Arc::clone(&context));
                }
            }
        }
        Ok(contexts)
    }

    /// Spawn the threads of the active state.
    pub fn start_execution(&mut self) -> Result<(), SchedulerError> {
        if !matches!(self.status, ApplicationStatus::StateActive(_)) {
            return Err(SchedulerError::NoActiveState);
        }
        self.scheduler.start_execution()
    }

    /// Stop every thread between cycles and collect their statistics.
    pub fn stop_execution(&mut self) -> Vec<WorkerSummary> {
        self.scheduler.stop_execution()
    }

    /// Run one cycle of `thread` of the active state on the calling thread.
    pub fn execute_single_cycle(&self, thread: &str) -> Result<CycleReport, SchedulerError> {
        let state = self.current.as_deref().ok_or(SchedulerError::NoActiveState)?;
        self.scheduler.execute_single_cycle(state, thread)
    }

    /// Stop all threads and refuse further transitions.
    pub fn terminate(&mut self) -> Vec<WorkerSummary> {
        let summaries = self.scheduler.stop_execution();
        self.status = ApplicationStatus::Terminated;
        info!(application = %self.name, "terminated");
        summaries
    }
}

impl std::fmt::Debug for RealTimeApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealTimeApplication")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("buffer_index", &self.index.load())
            .field("data_sources", &self.data_sources.len())
            .field("gams", &self.arena.len())
            .field("states", &self.states.len())
            .finish()
    }
}
