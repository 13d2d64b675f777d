//! Type registry: name → binary layout.
//!
//! Constructed once at start-up and passed by reference to configuration
//! resolution. Composite types are registered with [`TypeRegistry::register_struct`];
//! a field may only reference a type that is already registered, so layouts
//! are always acyclic and sizes are computed eagerly.

use std::collections::HashMap;

use thiserror::Error;

use super::scalar::ScalarKind;
use crate::consts::MAX_DIMENSIONS;

/// Errors raised while registering or resolving types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    /// Name not present in the registry.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// Name registered twice.
    #[error("type '{0}' is already registered")]
    DuplicateType(String),

    /// Structured type without fields.
    #[error("structured type '{0}' has no fields")]
    EmptyStruct(String),

    /// Field dimension modifier is malformed or zero.
    #[error("field '{field}' of '{type_name}': {reason}")]
    InvalidField {
        /// Owning structured type.
        type_name: String,
        /// Field name.
        field: String,
        /// What is wrong.
        reason: String,
    },

    /// Configuration literal cannot be encoded with the type.
    #[error("invalid literal for {type_name}: {reason}")]
    InvalidLiteral {
        /// Target type.
        type_name: String,
        /// What is wrong.
        reason: String,
    },
}

/// Stable identifier of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Field of a structured type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    /// Field name.
    pub name: String,
    /// Registered type of the field.
    pub type_name: String,
    /// Array dimensions; empty for a single element.
    pub dimensions: Vec<u32>,
}

impl StructField {
    /// Single-element field.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            dimensions: Vec::new(),
        }
    }

    /// Field with explicit array dimensions.
    pub fn with_dimensions(mut self, dimensions: &[u32]) -> Self {
        self.dimensions = dimensions.to_vec();
        self
    }

    /// Field with dimensions given as C-style modifiers, e.g. `"[2][3]"`.
    pub fn with_modifiers(mut self, modifiers: &str) -> Result<Self, TypeError> {
        let mut dims = Vec::new();
        let mut rest = modifiers.trim();
        while !rest.is_empty() {
            let inner = rest
                .strip_prefix('[')
                .and_then(|r| r.split_once(']'))
                .ok_or_else(|| self.invalid("", format!("malformed modifiers '{modifiers}'")))?;
            let n: u32 = inner
                .0
                .trim()
                .parse()
                .map_err(|_| self.invalid("", format!("malformed modifiers '{modifiers}'")))?;
            dims.push(n);
            rest = inner.1.trim_start();
        }
        self.dimensions = dims;
        Ok(self)
    }

    /// Number of elements the field holds.
    pub fn multiplicity(&self) -> usize {
        self.dimensions.iter().map(|d| *d as usize).product()
    }

    fn invalid(&self, type_name: &str, reason: String) -> TypeError {
        TypeError::InvalidField {
            type_name: type_name.to_string(),
            field: self.name.clone(),
            reason,
        }
    }
}

/// Kind of a registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Built-in scalar.
    Scalar(ScalarKind),
    /// Composite of ordered fields, packed without padding.
    Structured(Vec<StructField>),
}

/// Registered type with its resolved element size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Registry identifier.
    pub id: TypeId,
    /// Configuration name.
    pub name: String,
    /// Packed size of one element in bytes.
    pub element_size: usize,
    /// Scalar or structured layout.
    pub kind: TypeKind,
}

impl TypeDescriptor {
    /// True for composite types.
    pub fn is_structured(&self) -> bool {
        matches!(self.kind, TypeKind::Structured(_))
    }

    /// Scalar kind, if this is a built-in scalar.
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self.kind {
            TypeKind::Scalar(k) => Some(k),
            TypeKind::Structured(_) => None,
        }
    }
}

/// Leaf of a flattened structured layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Dotted path from the root type, e.g. `pose.position`.
    pub path: String,
    /// Leaf scalar type.
    pub scalar: ScalarKind,
    /// Byte offset from the start of one root element.
    pub offset: usize,
    /// Number of scalar elements in the leaf.
    pub elements: usize,
}

/// Registry of signal types.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
    by_name: HashMap<String, TypeId>,
}

impl TypeRegistry {
    /// Registry with no types at all.
    pub fn empty() -> Self {
        Self {
            types: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in scalars.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        for kind in ScalarKind::ALL {
            registry.insert(kind.name().to_string(), kind.size(), TypeKind::Scalar(kind));
        }
        registry
    }

    /// Register a structured type made of already-registered field types.
    pub fn register_struct(
        &mut self,
        name: &str,
        fields: Vec<StructField>,
    ) -> Result<TypeId, TypeError> {
        if self.by_name.contains_key(name) {
            return Err(TypeError::DuplicateType(name.to_string()));
        }
        if fields.is_empty() {
            return Err(TypeError::EmptyStruct(name.to_string()));
        }
        let mut size = 0usize;
        for field in &fields {
            if field.dimensions.len() > MAX_DIMENSIONS as usize {
                return Err(field.invalid(name, "too many dimensions".to_string()));
            }
            if field.dimensions.contains(&0) {
                return Err(field.invalid(name, "zero-length dimension".to_string()));
            }
            if fields.iter().filter(|f| f.name == field.name).count() > 1 {
                return Err(field.invalid(name, "duplicate field name".to_string()));
            }
            let field_type = self
                .lookup(&field.type_name)
                .ok_or_else(|| TypeError::UnknownType(field.type_name.clone()))?;
            size += field_type.element_size * field.multiplicity();
        }
        Ok(self.insert(name.to_string(), size, TypeKind::Structured(fields)))
    }

    /// Descriptor by name.
    pub fn lookup(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    /// Descriptor by identifier.
    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(id.0 as usize)
    }

    /// Packed element size of a type.
    pub fn element_size(&self, name: &str) -> Result<usize, TypeError> {
        self.lookup(name)
            .map(|t| t.element_size)
            .ok_or_else(|| TypeError::UnknownType(name.to_string()))
    }

    /// Flatten a type into its scalar leaves with nested byte offsets.
    pub fn field_offsets(&self, name: &str) -> Result<Vec<FieldLayout>, TypeError> {
        let mut leaves = Vec::new();
        self.flatten(name, String::new(), 0, &mut leaves)?;
        Ok(leaves)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn flatten(
        &self,
        name: &str,
        prefix: String,
        base: usize,
        out: &mut Vec<FieldLayout>,
    ) -> Result<(), TypeError> {
        let desc = self
            .lookup(name)
            .ok_or_else(|| TypeError::UnknownType(name.to_string()))?;
        match &desc.kind {
            TypeKind::Scalar(kind) => out.push(FieldLayout {
                path: prefix,
                scalar: *kind,
                offset: base,
                elements: 1,
            }),
            TypeKind::Structured(fields) => {
                let mut offset = base;
                for field in fields {
                    let path = if prefix.is_empty() {
                        field.name.clone()
                    } else {
                        format!("{prefix}.{}", field.name)
                    };
                    let field_type = self
                        .lookup(&field.type_name)
                        .ok_or_else(|| TypeError::UnknownType(field.type_name.clone()))?;
                    let count = field.multiplicity();
                    match field_type.kind {
                        TypeKind::Scalar(kind) => out.push(FieldLayout {
                            path,
                            scalar: kind,
                            offset,
                            elements: count,
                        }),
                        TypeKind::Structured(_) => {
                            for i in 0..count {
                                let element_path = if count == 1 {
                                    path.clone()
                                } else {
                                    format!("{path}[{i}]")
                                };
                                self.flatten(
                                    &field.type_name,
                                    element_path,
                                    offset + i * field_type.element_size,
                                    out,
                                )?;
                            }
                        }
                    }
                    offset += field_type.element_size * count;
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, name: String, element_size: usize, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.types.push(TypeDescriptor {
            id,
            name,
            element_size,
            kind,
        });
        id
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
