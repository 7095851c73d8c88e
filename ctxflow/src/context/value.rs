//! Values stored in a context.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value stored under a data key.
///
/// The primitive variants are the wire- and tag-eligible types. Anything
/// else is carried as [`DataValue::Opaque`] and never leaves the process.
#[derive(Clone)]
pub enum DataValue {
    /// A string.
    Str(String),
    /// A boolean.
    Bool(bool),
    /// An 8-bit signed integer.
    I8(i8),
    /// A 16-bit signed integer.
    I16(i16),
    /// A 32-bit signed integer.
    I32(i32),
    /// A 64-bit signed integer.
    I64(i64),
    /// A 32-bit float.
    F32(f32),
    /// A 64-bit float.
    F64(f64),
    /// Any other in-process value.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl DataValue {
    /// Wraps an arbitrary value as opaque data.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(Arc::new(value))
    }

    /// Returns the wire type character, or `None` for strings and opaque values.
    #[must_use]
    pub fn type_tag(&self) -> Option<char> {
        match self {
            Self::Str(_) | Self::Opaque(_) => None,
            Self::Bool(_) => Some('z'),
            Self::I8(_) => Some('b'),
            Self::I16(_) => Some('s'),
            Self::I32(_) => Some('i'),
            Self::I64(_) => Some('l'),
            Self::F32(_) => Some('f'),
            Self::F64(_) => Some('d'),
        }
    }

    /// Returns true for values that may be encoded into headers or tags.
    #[must_use]
    pub fn is_wire_eligible(&self) -> bool {
        !matches!(self, Self::Opaque(_))
    }

    /// Renders the value as the text used on the wire and in tags.
    ///
    /// Returns `None` for opaque values.
    #[must_use]
    pub fn to_wire_string(&self) -> Option<String> {
        Some(match self {
            Self::Str(s) => s.clone(),
            Self::Bool(v) => v.to_string(),
            Self::I8(v) => v.to_string(),
            Self::I16(v) => v.to_string(),
            Self::I32(v) => v.to_string(),
            Self::I64(v) => v.to_string(),
            Self::F32(v) => v.to_string(),
            Self::F64(v) => v.to_string(),
            Self::Opaque(_) => return None,
        })
    }

    /// Parses wire text given its type character (`None` for strings).
    ///
    /// Returns `None` for unknown type characters or unparsable text.
    #[must_use]
    pub fn parse_typed(text: &str, type_tag: Option<char>) -> Option<Self> {
        let value = match type_tag {
            None => Self::Str(text.to_string()),
            Some('z') => Self::Bool(text.parse().ok()?),
            Some('b') => Self::I8(text.parse().ok()?),
            Some('s') => Self::I16(text.parse().ok()?),
            Some('i') => Self::I32(text.parse().ok()?),
            Some('l') => Self::I64(text.parse().ok()?),
            Some('f') => Self::F32(text.parse().ok()?),
            Some('d') => Self::F64(text.parse().ok()?),
            Some(_) => return None,
        };
        Some(value)
    }

    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Downcasts an opaque value.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(inner) => inner.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for DataValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I8(a), Self::I8(b)) => a == b,
            (Self::I16(a), Self::I16(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F32(a), Self::F32(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}i8"),
            Self::I16(v) => write!(f, "{v}i16"),
            Self::I32(v) => write!(f, "{v}i32"),
            Self::I64(v) => write!(f, "{v}i64"),
            Self::F32(v) => write!(f, "{v}f32"),
            Self::F64(v) => write!(f, "{v}f64"),
            Self::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for DataValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_primitive!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);
