//! Built-in scalar element types and their byte encodings.
//!
//! Signals are stored packed in native byte order. [`SignalScalar`] converts
//! between Rust primitives and those bytes without requiring alignment, so
//! GAMs can read any signal regardless of where its owner placed it.

use super::registry::TypeError;

/// Built-in scalar element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float32,
    Float64,
    Char8,
}

impl ScalarKind {
    /// Every built-in scalar, in registry order.
    pub const ALL: [ScalarKind; 11] = [
        Self::UInt8,
        Self::Int8,
        Self::UInt16,
        Self::Int16,
        Self::UInt32,
        Self::Int32,
        Self::UInt64,
        Self::Int64,
        Self::Float32,
        Self::Float64,
        Self::Char8,
    ];

    /// Configuration name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::Int8 => "int8",
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::UInt32 => "uint32",
            Self::Int32 => "int32",
            Self::UInt64 => "uint64",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Char8 => "char8",
        }
    }

    /// Size of one element in bytes.
    pub const fn size(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 | Self::Char8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Look up a scalar by configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// True for `float32` / `float64`.
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Encode a configuration literal into `elements` packed values.
    ///
    /// A single literal is broadcast to every element; an array literal must
    /// provide exactly `elements` entries. `char8` also accepts a string,
    /// zero-padded to the element count.
    pub fn encode(&self, value: &toml::Value, elements: usize) -> Result<Vec<u8>, TypeError> {
        let mut out = Vec::with_capacity(self.size() * elements);
        match value {
            toml::Value::Array(items) => {
                if items.len() != elements {
                    return Err(self.invalid(format!(
                        "expected {elements} values, got {}",
                        items.len()
                    )));
                }
                for item in items {
                    self.encode_one(item, &mut out)?;
                }
            }
            toml::Value::String(s) if *self == Self::Char8 => {
                if s.len() > elements {
                    return Err(self.invalid(format!(
                        "string of {} bytes exceeds {elements} elements",
                        s.len()
                    )));
                }
                out.extend_from_slice(s.as_bytes());
                out.resize(elements, 0);
            }
            single => {
                self.encode_one(single, &mut out)?;
                let one = out.clone();
                for _ in 1..elements {
                    out.extend_from_slice(&one);
                }
            }
        }
        Ok(out)
    }

    fn encode_one(&self, value: &toml::Value, out: &mut Vec<u8>) -> Result<(), TypeError> {
        let number = match value {
            toml::Value::Integer(i) => Number::Int(*i),
            toml::Value::Float(f) => Number::Float(*f),
            toml::Value::Boolean(b) => Number::Int(i64::from(*b)),
            other => {
                return Err(self.invalid(format!("unsupported literal {other}")));
            }
        };
        match self {
            Self::UInt8 | Self::Char8 => out.extend_from_slice(&self.int::<u8>(number)?.to_ne_bytes()),
            Self::Int8 => out.extend_from_slice(&self.int::<i8>(number)?.to_ne_bytes()),
            Self::UInt16 => out.extend_from_slice(&self.int::<u16>(number)?.to_ne_bytes()),
            Self::Int16 => out.extend_from_slice(&self.int::<i16>(number)?.to_ne_bytes()),
            Self::UInt32 => out.extend_from_slice(&self.int::<u32>(number)?.to_ne_bytes()),
            Self::Int32 => out.extend_from_slice(&self.int::<i32>(number)?.to_ne_bytes()),
            Self::UInt64 => out.extend_from_slice(&self.int::<u64>(number)?.to_ne_bytes()),
            Self::Int64 => out.extend_from_slice(&self.int::<i64>(number)?.to_ne_bytes()),
            Self::Float32 => out.extend_from_slice(&(number.as_f64() as f32).to_ne_bytes()),
            Self::Float64 => out.extend_from_slice(&number.as_f64().to_ne_bytes()),
        }
        Ok(())
    }

    fn int<T: TryFrom<i64>>(&self, number: Number) -> Result<T, TypeError> {
        let Number::Int(i) = number else {
            return Err(self.invalid("floating-point literal for an integer type".to_string()));
        };
        T::try_from(i).map_err(|_| self.invalid(format!("{i} out of range")))
    }

    fn invalid(&self, reason: String) -> TypeError {
        TypeError::InvalidLiteral {
            type_name: self.name().to_string(),
            reason,
        }
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

/// Rust primitive that maps onto a built-in scalar.
pub trait SignalScalar: Copy + Send + 'static {
    /// Matching registry scalar.
    const KIND: ScalarKind;

    /// Decode from exactly `KIND.size()` native-endian bytes.
    fn read_ne(bytes: &[u8]) -> Self;

    /// Encode into exactly `KIND.size()` native-endian bytes.
    fn write_ne(self, bytes: &mut [u8]);
}

macro_rules! impl_signal_scalar {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl SignalScalar for $ty {
                const KIND: ScalarKind = ScalarKind::$kind;

                #[inline]
                fn read_ne(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }

                #[inline]
                fn write_ne(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_signal_scalar! {
    u8 => UInt8,
    i8 => Int8,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i32 => Int32,
    u64 => UInt64,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
}
