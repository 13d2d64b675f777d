//! # Cadence Core
//!
//! Real-time execution core: cyclic, deterministic applications built from
//! independently developed function blocks (GAMs).
//!
//! GAMs read input signals, compute, and write output signals. Signal values
//! live in data sources; brokers copy them between data sources and each
//! GAM's private memory using copy tables computed once at configuration.
//!
//! ## Layers
//!
//! 1. **Signals**: resolved descriptors and packed signal tables
//! 2. **Data sources**: own the signal memory (one or two buffers)
//! 3. **Brokers**: immutable copy tables per (GAM, data source, direction, kind)
//! 4. **GAMs / groups**: computation blocks and their shared contexts
//! 5. **States / threads**: ordered GAM lists per OS thread
//! 6. **Application / scheduler**: configuration, transitions, execution
//!
//! ## Cycle path
//!
//! Per executable: input brokers → `Gam::execute` → output brokers. The only
//! shared mutable value read on the cycle path is the buffer index.

pub mod application;
pub mod arena;
pub mod broker;
pub mod config;
pub mod cycle;
pub mod datasource;
pub mod error;
pub mod gam;
pub mod scheduler;
pub mod signal;
pub mod state;

pub use application::{ApplicationStatus, RealTimeApplication, Registries};
pub use arena::{GamArena, GamHandle};
pub use broker::{Broker, BrokerKind, BufferIndex};
pub use error::{ConfigurationError, CycleError, SchedulerError, TransitionError};
pub use scheduler::{CycleReport, ErrorPolicy, Scheduler, WorkerExit, WorkerSummary};
