//! Host-side variant over script values
//!
//! A [`ScriptValue`] holds any value the engine can put on its stack.
//! Primitives are copied out of the engine; objects are pinned in the
//! engine's [`ReferenceTable`] and only the slot index is kept on the host
//! side, so the object stays alive for as long as some `ScriptValue` owns the
//! slot.
//!
//! Copies of an object value share one slot. The shared counter is only
//! allocated on the first copy; a value that is never copied owns its slot
//! outright. Capturing the same object from the stack twice gives two
//! independent slots: there is no object-to-slot lookup.

pub mod refs;
mod shared;

pub use refs::{ReferenceTable, REF_ARRAY_KEY};

use crate::engine::{balanced, Context, Engine, EngineId, StackIndex};
use crate::error::{Result, ValueError};
use crate::kind::{Kind, Pointer, TypeMask};
use log::{trace, warn};
use shared::RefCount;
use std::cell::OnceCell;
use std::fmt;

/// Fixed-size part of the variant. Strings keep their bytes in
/// [`ScriptValue::text`].
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String,

    /// Slot in the reference table
    Object(u32),

    Pointer(Pointer),
}

impl Scalar {
    fn kind(&self) -> Kind {
        match self {
            Scalar::Undefined => Kind::Undefined,
            Scalar::Null => Kind::Null,
            Scalar::Boolean(_) => Kind::Boolean,
            Scalar::Number(_) => Kind::Number,
            Scalar::String => Kind::String,
            Scalar::Object(_) => Kind::Object,
            Scalar::Pointer(_) => Kind::Pointer,
        }
    }
}

/// A value captured from an engine's evaluation stack
pub struct ScriptValue<E: Engine = Context> {
    /// Engine the value belongs to; `None` only for default-constructed values
    engine: Option<E>,

    scalar: Scalar,

    /// String bytes, empty unless the value is a string
    text: Vec<u8>,

    /// Owner count of the object slot, allocated on first copy
    shared: OnceCell<RefCount>,
}

impl<E: Engine> ScriptValue<E> {
    /// An undefined value that belongs to no engine
    pub fn new() -> Self {
        ScriptValue {
            engine: None,
            scalar: Scalar::Undefined,
            text: Vec::new(),
            shared: OnceCell::new(),
        }
    }

    /// Capture the value at `index`, leaving the stack unchanged.
    ///
    /// Fails with [`ValueError::TypeMismatch`] if the value's type is not in
    /// `accept`. Objects are pinned in a new reference table slot.
    pub fn copy_from_stack(engine: &E, index: StackIndex, accept: TypeMask) -> Result<Self> {
        let kind = engine.type_of(index)?;
        if !accept.contains(kind) {
            return Err(ValueError::TypeMismatch {
                index,
                accepted: accept,
                found: kind,
            });
        }

        let mut text = Vec::new();
        let scalar = match kind {
            Kind::Undefined => Scalar::Undefined,
            Kind::Null => Scalar::Null,
            Kind::Boolean => Scalar::Boolean(engine.get_boolean(index)?),
            Kind::Number => Scalar::Number(engine.get_number(index)?),
            Kind::String => {
                text = engine.get_lstring(index)?;
                Scalar::String
            }
            Kind::Object => Scalar::Object(ReferenceTable::new(engine).allocate(index)?),
            Kind::Pointer => Scalar::Pointer(engine.get_pointer(index)?),
        };

        trace!("engine {}: captured {} from stack[{}]", engine.id(), kind, index);
        Ok(ScriptValue {
            engine: Some(engine.clone()),
            scalar,
            text,
            shared: OnceCell::new(),
        })
    }

    /// Capture the value at `index` and remove it from the stack
    pub fn take_from_stack(engine: &E, index: StackIndex, accept: TypeMask) -> Result<Self> {
        let value = Self::copy_from_stack(engine, index, accept)?;
        engine.remove(index)?;
        Ok(value)
    }

    /// Push the held value onto the owning engine's stack.
    ///
    /// Objects are pushed from their slot; the slot stays pinned, so this can
    /// be repeated any number of times.
    pub fn push(&self) -> Result<()> {
        let engine = self.engine.as_ref().ok_or(ValueError::Detached)?;
        match self.scalar {
            Scalar::Undefined => engine.push_undefined()?,
            Scalar::Null => engine.push_null()?,
            Scalar::Boolean(b) => engine.push_boolean(b)?,
            Scalar::Number(n) => engine.push_number(n)?,
            Scalar::String => engine.push_lstring(&self.text)?,
            Scalar::Object(slot) => ReferenceTable::new(engine).push(slot)?,
            Scalar::Pointer(p) => engine.push_pointer(p)?,
        }
        Ok(())
    }

    /// Kind of the held value
    pub fn kind(&self) -> Kind {
        self.scalar.kind()
    }

    /// Owning engine
    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    /// Identity of the owning engine
    pub fn engine_id(&self) -> Option<EngineId> {
        self.engine.as_ref().map(Engine::id)
    }

    /// Reference table slot of an object value
    pub fn slot(&self) -> Option<u32> {
        match self.scalar {
            Scalar::Object(slot) => Some(slot),
            _ => None,
        }
    }

    /// Number of values sharing this object's slot, once it has been copied
    pub fn share_count(&self) -> Option<u32> {
        self.shared.get().map(RefCount::get)
    }

    pub fn is_undefined(&self) -> bool {
        self.kind() == Kind::Undefined
    }

    pub fn is_null(&self) -> bool {
        self.kind() == Kind::Null
    }

    pub fn is_object(&self) -> bool {
        self.kind() == Kind::Object
    }

    /// Move the value out, leaving this one undefined
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self.scalar {
            Scalar::Boolean(b) => Ok(b),
            _ => Err(self.wrong_kind(Kind::Boolean)),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self.scalar {
            Scalar::Number(n) => Ok(n),
            _ => Err(self.wrong_kind(Kind::Number)),
        }
    }

    pub fn as_f32(&self) -> Result<f32> {
        self.as_f64().map(|n| n as f32)
    }

    /// Number truncated toward zero, saturating at the `i32` bounds
    pub fn as_i32(&self) -> Result<i32> {
        self.as_f64().map(|n| n as i32)
    }

    /// Number truncated toward zero, saturating at the `u32` bounds
    pub fn as_u32(&self) -> Result<u32> {
        self.as_f64().map(|n| n as u32)
    }

    /// Pointer value; null values read as the null pointer
    pub fn as_pointer(&self) -> Result<Pointer> {
        match self.scalar {
            Scalar::Pointer(p) => Ok(p),
            Scalar::Null => Ok(Pointer::null()),
            _ => Err(self.wrong_kind(Kind::Pointer)),
        }
    }

    /// String bytes, exactly as the engine held them
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self.scalar {
            Scalar::String => Ok(&self.text),
            _ => Err(self.wrong_kind(Kind::String)),
        }
    }

    /// String as UTF-8
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(self.as_bytes()?).map_err(|_| ValueError::InvalidUtf8)
    }

    /// Compare with another value.
    ///
    /// Values of different engines or kinds are never equal. Objects are
    /// compared by the engine, which needs both pushed onto the stack
    /// temporarily.
    pub fn try_eq(&self, other: &Self) -> Result<bool> {
        if self.kind() != other.kind() || self.engine_id() != other.engine_id() {
            return Ok(false);
        }

        Ok(match (self.scalar, other.scalar) {
            (Scalar::Undefined, _) | (Scalar::Null, _) => true,
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a == b,
            (Scalar::Number(a), Scalar::Number(b)) => a == b,
            (Scalar::String, Scalar::String) => self.text == other.text,
            (Scalar::Pointer(a), Scalar::Pointer(b)) => a == b,
            (Scalar::Object(_), Scalar::Object(_)) => {
                let engine = self.engine.as_ref().ok_or(ValueError::Detached)?;
                balanced(engine, |e| {
                    self.push()?;
                    other.push()?;
                    let equal = e.equals(-1, -2)?;
                    e.pop_n(2)?;
                    Ok(equal)
                })?
            }
            _ => unreachable!("kinds already compared equal"),
        })
    }

    fn wrong_kind(&self, requested: Kind) -> ValueError {
        ValueError::WrongKind {
            requested,
            actual: self.kind(),
        }
    }

    /// Give up this value's claim on its object slot, freeing the slot if no
    /// other value shares it. Leaves the value undefined.
    fn release(&mut self) {
        let Scalar::Object(slot) = self.scalar else {
            return;
        };

        let last = match self.shared.take() {
            Some(count) => count.release(),
            None => true,
        };

        if last {
            if let Some(engine) = &self.engine {
                if let Err(err) = ReferenceTable::new(engine).free(slot) {
                    warn!("engine {}: failed to free slot {}: {}", engine.id(), slot, err);
                }
            }
        }

        self.scalar = Scalar::Undefined;
    }
}

impl<E: Engine> Default for ScriptValue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Clone for ScriptValue<E> {
    /// Copy the value. Object copies share the slot of the original.
    fn clone(&self) -> Self {
        let shared = OnceCell::new();
        if let Scalar::Object(_) = self.scalar {
            let count = self.shared.get_or_init(RefCount::sole);
            let _ = shared.set(count.share());
        }

        ScriptValue {
            engine: self.engine.clone(),
            scalar: self.scalar,
            text: self.text.clone(),
            shared,
        }
    }

    /// Assign a copy of `source`, releasing what this value held first
    fn clone_from(&mut self, source: &Self) {
        self.release();
        *self = source.clone();
    }
}

impl<E: Engine> Drop for ScriptValue<E> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<E: Engine> PartialEq for ScriptValue<E> {
    fn eq(&self, other: &Self) -> bool {
        self.try_eq(other).unwrap_or_else(|err| {
            warn!("comparing script values failed: {}", err);
            false
        })
    }
}

impl<E: Engine> fmt::Debug for ScriptValue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scalar {
            Scalar::Undefined => write!(f, "Undefined"),
            Scalar::Null => write!(f, "Null"),
            Scalar::Boolean(b) => write!(f, "Boolean({})", b),
            Scalar::Number(n) => write!(f, "Number({})", n),
            Scalar::String => write!(f, "String({:?})", String::from_utf8_lossy(&self.text)),
            Scalar::Object(slot) => match self.share_count() {
                Some(count) => write!(f, "Object(slot {}, shared by {})", slot, count),
                None => write!(f, "Object(slot {})", slot),
            },
            Scalar::Pointer(p) => write!(f, "{:?}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_detached_undefined() {
        let value: ScriptValue = ScriptValue::default();
        assert!(value.is_undefined());
        assert_eq!(value.engine_id(), None);
        assert_eq!(value.push(), Err(ValueError::Detached));
        assert_eq!(value, ScriptValue::new());
    }

    #[test]
    fn test_share_count_is_lazy() {
        let ctx = Context::new();
        ctx.push_object().unwrap();
        let a = ScriptValue::take_from_stack(&ctx, -1, TypeMask::ALL).unwrap();
        assert_eq!(a.share_count(), None);

        let b = a.clone();
        assert_eq!(a.share_count(), Some(2));
        assert_eq!(b.slot(), a.slot());

        drop(a);
        assert_eq!(b.share_count(), Some(1));
    }

    #[test]
    fn test_primitive_copies_have_no_counter() {
        let ctx = Context::new();
        ctx.push_string("text").unwrap();
        let a = ScriptValue::take_from_stack(&ctx, -1, TypeMask::ALL).unwrap();
        let b = a.clone();
        assert_eq!(a.share_count(), None);
        assert_eq!(b.share_count(), None);
        assert_eq!(b.as_str().unwrap(), "text");
    }

    #[test]
    fn test_debug_format() {
        let ctx = Context::new();
        ctx.push_number(1.5).unwrap();
        ctx.push_object().unwrap();
        let obj = ScriptValue::take_from_stack(&ctx, -1, TypeMask::ALL).unwrap();
        let num = ScriptValue::take_from_stack(&ctx, -1, TypeMask::ALL).unwrap();

        assert_eq!(format!("{:?}", num), "Number(1.5)");
        assert_eq!(format!("{:?}", obj), "Object(slot 1)");
        let _copy = obj.clone();
        assert_eq!(format!("{:?}", obj), "Object(slot 1, shared by 2)");
    }
}
