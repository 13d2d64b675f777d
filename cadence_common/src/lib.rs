//! Cadence Common Library
//!
//! Shared building blocks consumed by the real-time core and by hosting
//! processes.
//!
//! # Module Structure
//!
//! - [`config`] - TOML configuration loading traits and types
//! - [`tree`] - Read-only hierarchical configuration tree handed to components
//! - [`types`] - Reflection (type) registry: scalar and structured signal types
//! - [`consts`] - Workspace-wide limits
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! cadence_common = { path = "../cadence_common" }
//! ```
//!
//! ```rust
//! use cadence_common::prelude::*;
//!
//! let registry = TypeRegistry::default();
//! assert_eq!(registry.element_size("float64").unwrap(), 8);
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod tree;
pub mod types;
