//! Value kinds shared by the engine and the host-side variant

use std::ffi::c_void;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// The discriminant of a script value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Undefined value
    Undefined,

    /// Null reference
    Null,

    /// Boolean value
    Boolean,

    /// Number value (always a double)
    Number,

    /// Byte string
    String,

    /// Heap object (arrays included)
    Object,

    /// Opaque host pointer
    Pointer,
}

impl Kind {
    /// All kinds, in tag order
    pub const ALL: [Kind; 7] = [
        Kind::Undefined,
        Kind::Null,
        Kind::Boolean,
        Kind::Number,
        Kind::String,
        Kind::Object,
        Kind::Pointer,
    ];

    /// Get the type name of this kind
    pub fn name(self) -> &'static str {
        match self {
            Kind::Undefined => "undefined",
            Kind::Null => "null",
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Object => "object",
            Kind::Pointer => "pointer",
        }
    }

    /// The single-kind mask for this kind
    pub fn mask(self) -> TypeMask {
        TypeMask(1 << self as u32)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of acceptable kinds, used when capturing values from the stack
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeMask(u32);

impl TypeMask {
    pub const NONE: TypeMask = TypeMask(0);
    pub const UNDEFINED: TypeMask = TypeMask(1 << Kind::Undefined as u32);
    pub const NULL: TypeMask = TypeMask(1 << Kind::Null as u32);
    pub const BOOLEAN: TypeMask = TypeMask(1 << Kind::Boolean as u32);
    pub const NUMBER: TypeMask = TypeMask(1 << Kind::Number as u32);
    pub const STRING: TypeMask = TypeMask(1 << Kind::String as u32);
    pub const OBJECT: TypeMask = TypeMask(1 << Kind::Object as u32);
    pub const POINTER: TypeMask = TypeMask(1 << Kind::Pointer as u32);
    pub const ALL: TypeMask = TypeMask((1 << Kind::ALL.len()) - 1);

    /// Check whether `kind` is accepted by this mask
    pub fn contains(self, kind: Kind) -> bool {
        self.0 & kind.mask().0 != 0
    }
}

impl Default for TypeMask {
    fn default() -> Self {
        TypeMask::ALL
    }
}

impl BitOr for TypeMask {
    type Output = TypeMask;

    fn bitor(self, rhs: TypeMask) -> TypeMask {
        TypeMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for TypeMask {
    fn bitor_assign(&mut self, rhs: TypeMask) {
        self.0 |= rhs.0;
    }
}

impl From<Kind> for TypeMask {
    fn from(kind: Kind) -> Self {
        kind.mask()
    }
}

impl fmt::Debug for TypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Kind::ALL
            .iter()
            .filter(|k| self.contains(**k))
            .map(|k| k.name())
            .collect();
        write!(f, "TypeMask({})", names.join("|"))
    }
}

impl fmt::Display for TypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An opaque host pointer carried through the engine.
///
/// The engine never dereferences it; only the address is stored and compared.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer(*mut c_void);

impl Pointer {
    /// The null pointer
    pub fn null() -> Self {
        Pointer(std::ptr::null_mut())
    }

    /// Wrap a raw pointer
    pub fn new<T>(ptr: *mut T) -> Self {
        Pointer(ptr.cast())
    }

    /// Check if null
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// The raw pointer
    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    /// The address as an integer
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

impl Default for Pointer {
    fn default() -> Self {
        Pointer::null()
    }
}

impl<T> From<*mut T> for Pointer {
    fn from(ptr: *mut T) -> Self {
        Pointer::new(ptr)
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({:p})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_contains() {
        let mask = TypeMask::NUMBER | TypeMask::STRING;
        assert!(mask.contains(Kind::Number));
        assert!(mask.contains(Kind::String));
        assert!(!mask.contains(Kind::Object));

        for kind in Kind::ALL {
            assert!(TypeMask::ALL.contains(kind));
            assert!(!TypeMask::NONE.contains(kind));
        }
    }

    #[test]
    fn test_mask_debug() {
        let mask = TypeMask::NULL | TypeMask::OBJECT;
        assert_eq!(format!("{:?}", mask), "TypeMask(null|object)");
    }

    #[test]
    fn test_pointer() {
        let mut x = 5u32;
        let p = Pointer::new(&mut x as *mut u32);
        assert!(!p.is_null());
        assert!(Pointer::null().is_null());
        assert_eq!(p, Pointer::from(&mut x as *mut u32));
    }
}
