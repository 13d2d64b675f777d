//! Workspace-wide constants.
//!
//! Single source of truth for numeric limits shared by the core and hosts.

/// Number of memory images a stateful data source keeps (active + inactive).
pub const STATEFUL_BUFFER_COUNT: usize = 2;

/// Maximum number of dimensions a signal may declare (0 = scalar).
pub const MAX_DIMENSIONS: u8 = 3;

/// Maximum number of worker threads one state may declare.
pub const MAX_THREADS_PER_STATE: usize = 64;

/// Default application configuration path used by the host binary.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cadence/app.toml";
