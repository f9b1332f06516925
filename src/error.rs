//! Error types for the variant layer
//!
//! Contract violations (capturing a rejected type, reading the wrong kind)
//! are reported as errors rather than aborting, so a caller can always tell
//! a wrong-kind access apart from a real value.

use crate::engine::{EngineError, StackIndex};
use crate::kind::{Kind, TypeMask};

/// Result type for variant operations
pub type Result<T> = std::result::Result<T, ValueError>;

/// Errors raised by [`ScriptValue`](crate::ScriptValue) operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// Stack value rejected by the caller's acceptance mask
    #[error("type mismatch at stack index {index}: {found} not in {accepted}")]
    TypeMismatch {
        index: StackIndex,
        accepted: TypeMask,
        found: Kind,
    },

    /// Typed accessor called on a value of another kind
    #[error("wrong kind: requested {requested}, value is {actual}")]
    WrongKind { requested: Kind, actual: Kind },

    /// Value is not bound to any engine
    #[error("value is not attached to an engine")]
    Detached,

    /// Reference table slot that is reserved or was never allocated
    #[error("invalid reference slot: {0}")]
    InvalidSlot(u32),

    /// Slot array has grown past the largest addressable slot
    #[error("reference table is full ({0} slots)")]
    TableFull(usize),

    /// String bytes are not valid UTF-8
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Failure reported by the engine
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ValueError::WrongKind {
            requested: Kind::String,
            actual: Kind::Number,
        };
        assert_eq!(err.to_string(), "wrong kind: requested string, value is number");

        let err = ValueError::TypeMismatch {
            index: -1,
            accepted: TypeMask::NUMBER | TypeMask::STRING,
            found: Kind::Object,
        };
        assert_eq!(
            err.to_string(),
            "type mismatch at stack index -1: object not in TypeMask(number|string)"
        );

        let err: ValueError = EngineError::StackUnderflow.into();
        assert_eq!(err.to_string(), "stack underflow");
    }
}
