//! Error families of the execution core.
//!
//! * [`ConfigurationError`]: fatal to configuration only; nothing runs.
//! * [`TransitionError`]: a state preparation was refused; the application
//!   keeps its previous state and buffer index.
//! * [`CycleError`]: one executable failed inside a cycle; handed to the
//!   scheduler's [`ErrorPolicy`](crate::scheduler::ErrorPolicy).
//!
//! Component errors ([`GamError`], [`DataSourceError`], [`BrokerError`],
//! [`TypeError`], [`ConfigError`]) are wrapped with the name of the component
//! that raised them.

use std::sync::Arc;

use cadence_common::config::ConfigError;
use cadence_common::types::TypeError;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::datasource::DataSourceError;
use crate::gam::GamError;

// ─── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("type of {context}: {source}")]
    Type {
        context: String,
        #[source]
        source: TypeError,
    },

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("'{owner}' references unknown {kind} '{name}'")]
    UnknownReference {
        owner: String,
        kind: &'static str,
        name: String,
    },

    #[error("signal '{signal}' of '{owner}': {reason}")]
    InvalidSignal {
        owner: String,
        signal: String,
        reason: String,
    },

    #[error("signal '{signal}' of '{gam}' does not match data source '{data_source}': {reason}")]
    SignalMismatch {
        gam: String,
        data_source: String,
        signal: String,
        reason: String,
    },

    #[error("GAM '{gam}': {source}")]
    Gam {
        gam: String,
        #[source]
        source: GamError,
    },

    #[error("data source '{data_source}': {source}")]
    DataSource {
        data_source: String,
        #[source]
        source: DataSourceError,
    },

    #[error("group '{group}': {source}")]
    Group {
        group: String,
        #[source]
        source: GamError,
    },

    #[error("no broker for '{gam}' on '{data_source}': {reason}")]
    UnsupportedBroker {
        gam: String,
        data_source: String,
        reason: String,
    },

    #[error("state '{state}': {reason}")]
    MalformedState { state: String, reason: String },

    #[error(
        "signal '{signal}' of '{data_source}' is produced by both '{first}' and '{second}' in state '{state}'"
    )]
    ProducerConflict {
        state: String,
        data_source: String,
        signal: String,
        first: String,
        second: String,
    },

    #[error(
        "signal '{signal}' of '{data_source}' is produced in thread '{producer}' and consumed in thread '{consumer}' of state '{state}'"
    )]
    CrossThreadSignal {
        state: String,
        data_source: String,
        signal: String,
        producer: String,
        consumer: String,
    },
}

// ─── Transition ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("unknown state '{0}'")]
    UnknownState(String),

    #[error("cannot prepare a state while the application is {0}")]
    InvalidStatus(String),

    #[error("scheduler cannot prepare '{next}': {source}")]
    Scheduler {
        next: String,
        #[source]
        source: SchedulerError,
    },

    #[error("data source '{data_source}' rejected '{next}': {source}")]
    DataSource {
        data_source: String,
        next: String,
        #[source]
        source: DataSourceError,
    },

    #[error("GAM '{gam}' rejected '{next}': {source}")]
    Gam {
        gam: String,
        next: String,
        #[source]
        source: GamError,
    },

    #[error("group '{group}' rejected '{next}': {source}")]
    Group {
        group: String,
        next: String,
        #[source]
        source: GamError,
    },

    #[error("member '{gam}' of group '{group}' rejected its context: {source}")]
    ContextRejected {
        group: String,
        gam: String,
        #[source]
        source: GamError,
    },
}

// ─── Cycle ──────────────────────────────────────────────────────────

/// Failure of one executable. Names are shared, so building one never
/// allocates beyond what the failing GAM itself produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error("input broker of '{gam}' on '{data_source}' failed: {source}")]
    InputBroker {
        gam: Arc<str>,
        data_source: Arc<str>,
        #[source]
        source: BrokerError,
    },

    #[error("output broker of '{gam}' on '{data_source}' failed: {source}")]
    OutputBroker {
        gam: Arc<str>,
        data_source: Arc<str>,
        #[source]
        source: BrokerError,
    },

    #[error("'{gam}' failed: {source}")]
    Execute {
        gam: Arc<str>,
        #[source]
        source: GamError,
    },

    #[error("'{gam}' rejected its context: {source}")]
    Context {
        gam: Arc<str>,
        #[source]
        source: GamError,
    },

    #[error("'{gam}' is held by another thread")]
    Unavailable { gam: Arc<str> },
}

impl CycleError {
    /// Name of the GAM whose executable failed.
    pub fn gam(&self) -> &str {
        match self {
            Self::InputBroker { gam, .. }
            | Self::OutputBroker { gam, .. }
            | Self::Execute { gam, .. }
            | Self::Context { gam, .. }
            | Self::Unavailable { gam } => gam,
        }
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown state '{0}'")]
    UnknownState(String),

    #[error("unknown thread '{thread}' in state '{state}'")]
    UnknownThread { state: String, thread: String },

    #[error("no state has been prepared")]
    NoActiveState,

    #[error("threads of state '{0}' are already running")]
    AlreadyRunning(String),

    #[error("threads of state '{0}' are running; stop execution first")]
    Busy(String),

    #[error("failed to spawn thread '{thread}': {source}")]
    Spawn {
        thread: String,
        #[source]
        source: std::io::Error,
    },

    #[error("RT setup error: {0}")]
    RtSetup(String),

    #[error("activation failed: {0}")]
    Activation(#[source] CycleError),
}
