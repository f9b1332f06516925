//! Shared ownership counter for persisted object slots

use std::cell::Cell;
use std::rc::Rc;

/// Plain (non-atomic) counter shared by every [`ScriptValue`](super::ScriptValue)
/// that owns the same reference-table slot.
///
/// A value that was never duplicated has no counter at all; one is allocated
/// on the first copy.
#[derive(Debug, Clone)]
pub(crate) struct RefCount(Rc<Cell<u32>>);

impl RefCount {
    /// A counter for one owner, about to be shared
    pub(crate) fn sole() -> Self {
        RefCount(Rc::new(Cell::new(1)))
    }

    /// Register one more owner and hand out a handle for it
    pub(crate) fn share(&self) -> RefCount {
        self.0.set(self.0.get() + 1);
        self.clone()
    }

    /// Give up one ownership. Returns true if the caller was the last owner,
    /// in which case the slot must be freed.
    pub(crate) fn release(self) -> bool {
        let count = self.0.get();
        if count > 1 {
            self.0.set(count - 1);
            false
        } else {
            true
        }
    }

    /// Current number of owners
    pub(crate) fn get(&self) -> u32 {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_and_release() {
        let a = RefCount::sole();
        let b = a.share();
        let c = b.share();
        assert_eq!(a.get(), 3);

        assert!(!a.release());
        assert_eq!(c.get(), 2);
        assert!(!b.release());
        assert_eq!(c.get(), 1);
        assert!(c.release());
    }
}
