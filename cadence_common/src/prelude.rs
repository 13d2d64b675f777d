//! Prelude module for common re-exports.
//!
//! ```rust
//! use cadence_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::tree::ConfigNode;

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{MAX_DIMENSIONS, STATEFUL_BUFFER_COUNT};

// ─── Types ──────────────────────────────────────────────────────────
pub use crate::types::{
    ScalarKind, SignalScalar, StructField, TypeDescriptor, TypeError, TypeId, TypeKind,
    TypeRegistry,
};
