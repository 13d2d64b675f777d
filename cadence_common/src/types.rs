//! Reflection (type) registry.
//!
//! Maps textual type names used in configuration to binary layouts. Scalar
//! types are built in; composite types are added by a structure-registration
//! step before configuration and are only read afterwards.

pub mod registry;
pub mod scalar;

pub use registry::{FieldLayout, StructField, TypeDescriptor, TypeError, TypeId, TypeKind, TypeRegistry};
pub use scalar::{ScalarKind, SignalScalar};
