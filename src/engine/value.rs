//! Engine-side value representation

use crate::engine::arena::Handle;
use crate::kind::{Kind, Pointer};

/// Type-safe handle for strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringHandle(pub Handle);

/// Type-safe handle for objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub Handle);

/// A value as stored on the evaluation stack and inside heap objects.
///
/// Strings and objects live in the heap and are referenced by handle, so
/// the value itself is `Copy`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(StringHandle),
    Object(ObjectHandle),
    Pointer(Pointer),
}

impl Value {
    /// The kind this value reports to the host
    pub fn kind(&self) -> Kind {
        match self {
            Value::Undefined => Kind::Undefined,
            Value::Null => Kind::Null,
            Value::Boolean(_) => Kind::Boolean,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Object(_) => Kind::Object,
            Value::Pointer(_) => Kind::Pointer,
        }
    }

    /// The object handle, if this is an object
    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Value::Object(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}
