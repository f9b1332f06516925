//! Script engine capability
//!
//! The variant layer talks to a scripting engine only through the [`Engine`]
//! trait: a duktape-style value stack plus a handful of property accessors.
//! A small reference engine, [`Context`], is bundled so the variant can be
//! used (and tested) without an external interpreter:
//! - Generational arena for heap cells
//! - Mark-and-sweep collection rooted at the stack, heap stash and globals
//! - Bounded evaluation stack

pub mod arena;
pub mod context;
pub mod dump;
pub mod heap;
pub mod value;

pub use context::{Context, ObjectRef};
pub use heap::{GcStats, MemoryStats};
pub use value::Value;

use crate::kind::{Kind, Pointer};
use std::fmt;
use uuid::Uuid;

/// Position on the evaluation stack.
///
/// Non-negative indices count from the bottom, negative ones from the top
/// (`-1` is the topmost value).
pub type StackIndex = i32;

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Identity of one engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(Uuid);

impl EngineId {
    /// Generate a fresh, unique id
    pub fn new() -> Self {
        EngineId(Uuid::new_v4())
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors reported by an engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Stack index does not name a live stack slot
    #[error("invalid stack index: {0}")]
    InvalidIndex(StackIndex),

    /// Value at the index is not an object
    #[error("value at stack index {0} is not an object")]
    NotAnObject(StackIndex),

    /// Value at the index has the wrong type for the read
    #[error("type error at stack index {index}: expected {expected}, found {found}")]
    TypeError {
        index: StackIndex,
        expected: Kind,
        found: Kind,
    },

    /// Evaluation stack limit reached
    #[error("stack overflow (limit {0})")]
    StackOverflow(usize),

    /// Popped more values than the stack holds
    #[error("stack underflow")]
    StackUnderflow,

    /// Heap handle is stale or was never allocated
    #[error("invalid heap handle")]
    InvalidHandle,

    /// Engine is already in use further up the call stack
    #[error("engine is busy (re-entrant access)")]
    Busy,
}

/// The stack and heap capability a hosting engine provides.
///
/// Implementors are cheap handles onto one engine instance; cloning a handle
/// must not clone the engine. All operations are synchronous and assume
/// exclusive access to the engine for their duration.
pub trait Engine: Clone {
    /// Identity of the engine instance behind this handle
    fn id(&self) -> EngineId;

    /// Number of values on the stack
    fn top(&self) -> EngineResult<usize>;

    /// Truncate the stack to `top` values (never grows it)
    fn set_top(&self, top: usize) -> EngineResult<()>;

    /// Convert a possibly relative index into an absolute one
    fn normalize_index(&self, index: StackIndex) -> EngineResult<StackIndex>;

    /// Reported type of the value at `index`
    fn type_of(&self, index: StackIndex) -> EngineResult<Kind>;

    /// Read a boolean
    fn get_boolean(&self, index: StackIndex) -> EngineResult<bool>;

    /// Read a number
    fn get_number(&self, index: StackIndex) -> EngineResult<f64>;

    /// Read an unsigned integer. Non-numbers read as 0.
    fn get_uint(&self, index: StackIndex) -> EngineResult<u32>;

    /// Read the full byte content of a string, embedded zero bytes included
    fn get_lstring(&self, index: StackIndex) -> EngineResult<Vec<u8>>;

    /// Read a pointer
    fn get_pointer(&self, index: StackIndex) -> EngineResult<Pointer>;

    fn push_undefined(&self) -> EngineResult<()>;
    fn push_null(&self) -> EngineResult<()>;
    fn push_boolean(&self, value: bool) -> EngineResult<()>;
    fn push_number(&self, value: f64) -> EngineResult<()>;
    fn push_lstring(&self, bytes: &[u8]) -> EngineResult<()>;
    fn push_pointer(&self, pointer: Pointer) -> EngineResult<()>;

    /// Push an unsigned integer as a number
    fn push_uint(&self, value: u32) -> EngineResult<()> {
        self.push_number(f64::from(value))
    }

    /// Push a new empty array, returning its absolute index
    fn push_array(&self) -> EngineResult<StackIndex>;

    /// Push a new empty object, returning its absolute index
    fn push_object(&self) -> EngineResult<StackIndex>;

    /// Push the heap stash: an engine-global object hidden from scripts
    fn push_heap_stash(&self) -> EngineResult<()>;

    /// Push a copy of the value at `index`
    fn dup(&self, index: StackIndex) -> EngineResult<()>;

    /// Remove the value at `index`, shifting the values above it down
    fn remove(&self, index: StackIndex) -> EngineResult<()>;

    /// Pop the top value and write it over the value at `index`
    fn replace(&self, index: StackIndex) -> EngineResult<()>;

    /// Pop the top value
    fn pop(&self) -> EngineResult<()> {
        self.pop_n(1)
    }

    /// Pop `count` values
    fn pop_n(&self, count: usize) -> EngineResult<()>;

    /// Check whether the object at `obj` has a property named `key`
    fn has_prop_string(&self, obj: StackIndex, key: &str) -> EngineResult<bool>;

    /// Push `obj[key]` (undefined when missing), returning whether it existed
    fn get_prop_string(&self, obj: StackIndex, key: &str) -> EngineResult<bool>;

    /// Pop the top value and store it as `obj[key]`
    fn put_prop_string(&self, obj: StackIndex, key: &str) -> EngineResult<()>;

    /// Push `obj[index]` (undefined when missing), returning whether it existed
    fn get_prop_index(&self, obj: StackIndex, index: u32) -> EngineResult<bool>;

    /// Pop the top value and store it as `obj[index]`
    fn put_prop_index(&self, obj: StackIndex, index: u32) -> EngineResult<()>;

    /// Length of the array or string at `index` (0 for other values)
    fn get_length(&self, index: StackIndex) -> EngineResult<usize>;

    /// Engine-level equality of two stack values
    fn equals(&self, a: StackIndex, b: StackIndex) -> EngineResult<bool>;

    /// Run `f` with the engine's internal stack reserve available.
    ///
    /// Temporaries pushed inside `f` may go past the host's stack limit by a
    /// small fixed margin, so bookkeeping such as releasing a slot still works
    /// when the host has filled the stack. Engines without a stack limit can
    /// keep the default.
    fn with_reserve<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        f(self)
    }
}

/// Run `f` inside the internal stack reserve, resetting the stack to its
/// original height if it fails.
///
/// Multi-step stack protocols use this so that an error in the middle never
/// leaves temporaries behind, and a full host stack never makes them fail.
pub(crate) fn balanced<E, T, F>(engine: &E, f: F) -> std::result::Result<T, crate::error::ValueError>
where
    E: Engine,
    F: FnOnce(&E) -> std::result::Result<T, crate::error::ValueError>,
{
    engine.with_reserve(|e| {
        let top = e.top()?;
        let result = f(e);
        if result.is_err() {
            // best effort; the original error is what the caller needs to see
            if matches!(e.top(), Ok(now) if now > top) {
                let _ = e.set_top(top);
            }
        }
        result
    })
}
