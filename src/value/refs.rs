//! Persisted reference table
//!
//! Script objects referenced from host code are pinned by storing a
//! reference to them in an array kept in the engine's heap stash. The
//! collector sees the array as reachable, so every object in it stays alive
//! until its slot is freed.
//!
//! Slot 0 is the head of a free list threaded through the array itself: it
//! holds the index of the first free slot, each free slot holds the index of
//! the next one, and 0 terminates the list. Allocation pops the head of the
//! list and only appends when the list is empty, so indices never move and
//! the array never shrinks.

use crate::engine::{balanced, Engine, StackIndex};
use crate::error::{Result, ValueError};
use log::trace;

/// Heap stash key of the slot array
pub const REF_ARRAY_KEY: &str = "scriptvalue_refs";

/// Slot allocator over the stash array of one engine
#[derive(Debug)]
pub struct ReferenceTable<'e, E: Engine> {
    engine: &'e E,
}

impl<'e, E: Engine> ReferenceTable<'e, E> {
    /// Table of the given engine. Nothing is created until first use.
    pub fn new(engine: &'e E) -> Self {
        ReferenceTable { engine }
    }

    /// Create the slot array if this engine does not have one yet
    pub fn ensure_exists(&self) -> Result<()> {
        balanced(self.engine, |e| {
            self.load_array()?;
            e.pop()?;
            Ok(())
        })
    }

    /// Push the slot array onto the stack, creating it on first use
    pub fn push_array(&self) -> Result<()> {
        self.push_result(|_| self.load_array())
    }

    /// Push the slot array inside the internal reserve
    fn load_array(&self) -> Result<()> {
        balanced(self.engine, |e| {
            e.push_heap_stash()?;

            if !e.has_prop_string(-1, REF_ARRAY_KEY)? {
                e.push_array()?;

                // refs[0] = 0: empty free list
                e.push_uint(0)?;
                e.put_prop_index(-2, 0)?;

                e.put_prop_string(-2, REF_ARRAY_KEY)?;
            }

            e.get_prop_string(-1, REF_ARRAY_KEY)?;
            e.remove(-2)?;
            Ok(())
        })
    }

    /// Pin the value at `index` and return its slot. The value on the stack is
    /// left in place.
    pub fn allocate(&self, index: StackIndex) -> Result<u32> {
        // absolute, so pushing the array does not shift it
        let index = self.engine.normalize_index(index)?;

        balanced(self.engine, |e| {
            self.load_array()?;

            e.get_prop_index(-1, 0)?;
            let head = e.get_uint(-1)?;
            e.pop()?;

            let slot = if head == 0 {
                appended_slot(e.get_length(-1)?)?
            } else {
                // refs[0] = refs[head]
                e.get_prop_index(-1, head)?;
                e.put_prop_index(-2, 0)?;
                head
            };

            e.dup(index)?;
            e.put_prop_index(-2, slot)?;
            e.pop()?;

            trace!("engine {}: pinned stack[{}] in slot {}", e.id(), index, slot);
            Ok(slot)
        })
    }

    /// Unpin the value in `slot` and put the slot on the free list
    pub fn free(&self, slot: u32) -> Result<()> {
        balanced(self.engine, |e| {
            self.load_array()?;
            check_slot(e, slot)?;

            // refs[slot] = refs[0], which also drops the table's reference
            e.get_prop_index(-1, 0)?;
            e.put_prop_index(-2, slot)?;

            // refs[0] = slot
            e.push_uint(slot)?;
            e.put_prop_index(-2, 0)?;

            e.pop()?;
            trace!("engine {}: freed slot {}", e.id(), slot);
            Ok(())
        })
    }

    /// Push the value pinned in `slot`. The slot keeps its own reference.
    pub fn push(&self, slot: u32) -> Result<()> {
        self.push_result(|e| {
            self.load_array()?;
            check_slot(e, slot)?;
            e.get_prop_index(-1, slot)?;
            e.remove(-2)?;
            Ok(())
        })
    }

    /// Push the one value `fetch` leaves on the stack. The result counts
    /// against the caller's stack limit, the temporaries `fetch` needs do not.
    fn push_result(&self, fetch: impl FnOnce(&E) -> Result<()>) -> Result<()> {
        self.engine.push_undefined()?;
        let target = self.engine.normalize_index(-1)?;

        balanced(self.engine, |e| {
            fetch(e)?;
            e.replace(target)?;
            Ok(())
        })
        .or_else(|err| {
            self.engine.pop()?;
            Err(err)
        })
    }

    /// First free slot, or 0 when the free list is empty
    pub fn free_list_head(&self) -> Result<u32> {
        balanced(self.engine, |e| {
            self.load_array()?;
            e.get_prop_index(-1, 0)?;
            let head = e.get_uint(-1)?;
            e.pop_n(2)?;
            Ok(head)
        })
    }

    /// Length of the slot array, including the reserved slot 0
    pub fn len(&self) -> Result<usize> {
        balanced(self.engine, |e| {
            self.load_array()?;
            let len = e.get_length(-1)?;
            e.pop()?;
            Ok(len)
        })
    }
}

/// Slot index for appending to an array of `len` slots
fn appended_slot(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| ValueError::TableFull(len))
}

/// Reject the reserved slot and slots past the end of the array on top of the stack
fn check_slot<E: Engine>(engine: &E, slot: u32) -> Result<()> {
    if slot == 0 || slot as usize >= engine.get_length(-1)? {
        return Err(ValueError::InvalidSlot(slot));
    }
    Ok(())
}
