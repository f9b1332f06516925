//! Scriptvalue library
//!
//! Host-side variant values for an embedded scripting engine. A
//! [`ScriptValue`] can hold anything the engine's stack can (undefined,
//! null, boolean, number, string, object or an opaque pointer) and keeps
//! script objects alive for as long as the host holds on to them, by pinning
//! them in a slot table inside the engine heap.
//!
//! The engine is reached through the [`Engine`] trait; [`Context`] is a small
//! bundled implementation with its own stack, heap and collector.

pub mod config;
pub mod engine;
pub mod error;
pub mod kind;
pub mod value;

// Re-export commonly used types
pub use config::{Config, EngineConfig};
pub use engine::{Context, Engine, EngineError, EngineId, StackIndex};
pub use error::{Result, ValueError};
pub use kind::{Kind, Pointer, TypeMask};
pub use value::{ReferenceTable, ScriptValue, REF_ARRAY_KEY};
