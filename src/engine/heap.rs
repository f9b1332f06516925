//! Engine heap with mark-and-sweep collection

use crate::engine::arena::Arena;
use crate::engine::value::{ObjectHandle, StringHandle, Value};
use crate::engine::{EngineError, EngineResult};
use log::debug;
use std::collections::HashMap;

/// Garbage collection mark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMark {
    /// Not reachable (or not yet reached)
    White,

    /// Reachable, children not yet scanned
    Gray,

    /// Reachable and fully scanned
    Black,
}

/// String cell
#[derive(Debug)]
pub struct StringObject {
    /// String bytes; not required to be UTF-8
    pub bytes: Box<[u8]>,

    pub mark: GcMark,
}

/// Object cell. Arrays are objects whose indexed part is their content.
#[derive(Debug)]
pub struct ObjectData {
    /// Dense indexed part
    pub elements: Vec<Value>,

    /// Named properties
    pub props: HashMap<Box<[u8]>, Value>,

    /// Created as an array
    pub is_array: bool,

    pub mark: GcMark,
}

impl ObjectData {
    /// Create a new empty object
    pub fn new(is_array: bool) -> Self {
        ObjectData {
            elements: Vec::new(),
            props: HashMap::new(),
            is_array,
            mark: GcMark::White,
        }
    }

    /// Get an indexed element
    pub fn get_index(&self, index: u32) -> Option<Value> {
        self.elements.get(index as usize).copied()
    }

    /// Set an indexed element, padding with undefined when writing past the end
    pub fn set_index(&mut self, index: u32, value: Value) {
        let index = index as usize;
        if index >= self.elements.len() {
            self.elements.resize(index + 1, Value::Undefined);
        }
        self.elements[index] = value;
    }

    /// Length of the indexed part
    pub fn len(&self) -> usize {
        self.elements.len()
    }
}

/// Memory statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Live strings
    pub strings: usize,

    /// Live objects
    pub objects: usize,

    /// Allocations since the last collection
    pub allocations_since_gc: usize,

    /// Completed collection cycles
    pub collections: usize,
}

/// Outcome of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub strings_freed: usize,
    pub objects_freed: usize,
}

impl GcStats {
    /// Total cells freed
    pub fn freed(&self) -> usize {
        self.strings_freed + self.objects_freed
    }
}

/// Core heap implementation
#[derive(Debug, Default)]
pub struct Heap {
    strings: Arena<StringObject>,
    objects: Arena<ObjectData>,

    /// Objects marked but not yet scanned
    gray_stack: Vec<ObjectHandle>,

    allocations_since_gc: usize,
    collections: usize,
}

impl Heap {
    /// Create a new heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new string
    pub fn alloc_string(&mut self, bytes: &[u8]) -> StringHandle {
        self.allocations_since_gc += 1;
        StringHandle(self.strings.insert(StringObject {
            bytes: bytes.into(),
            mark: GcMark::White,
        }))
    }

    /// Get string bytes
    pub fn get_string(&self, handle: StringHandle) -> EngineResult<&[u8]> {
        self.strings
            .get(handle.0)
            .map(|s| s.bytes.as_ref())
            .ok_or(EngineError::InvalidHandle)
    }

    /// Allocate a new object
    pub fn alloc_object(&mut self, is_array: bool) -> ObjectHandle {
        self.allocations_since_gc += 1;
        ObjectHandle(self.objects.insert(ObjectData::new(is_array)))
    }

    /// Get an object
    pub fn get_object(&self, handle: ObjectHandle) -> EngineResult<&ObjectData> {
        self.objects.get(handle.0).ok_or(EngineError::InvalidHandle)
    }

    /// Get an object mutably
    pub fn get_object_mut(&mut self, handle: ObjectHandle) -> EngineResult<&mut ObjectData> {
        self.objects.get_mut(handle.0).ok_or(EngineError::InvalidHandle)
    }

    /// Check whether an object is still live
    pub fn contains_object(&self, handle: ObjectHandle) -> bool {
        self.objects.contains(handle.0)
    }

    /// Allocations since the last collection
    pub fn allocations_since_gc(&self) -> usize {
        self.allocations_since_gc
    }

    /// Forget allocations made so far when deciding on the next cycle
    pub fn reset_allocation_count(&mut self) {
        self.allocations_since_gc = 0;
    }

    /// Current memory statistics
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            strings: self.strings.len(),
            objects: self.objects.len(),
            allocations_since_gc: self.allocations_since_gc,
            collections: self.collections,
        }
    }

    /// Run a full collection cycle.
    ///
    /// Everything not reachable from `roots` is freed.
    pub fn collect_garbage<'a, I>(&mut self, roots: I) -> GcStats
    where
        I: IntoIterator<Item = &'a Value>,
    {
        for root in roots {
            self.mark_value(*root);
        }
        while let Some(handle) = self.gray_stack.pop() {
            self.scan_object(handle);
        }

        let stats = self.sweep();
        self.allocations_since_gc = 0;
        self.collections += 1;

        debug!(
            "gc cycle {}: freed {} cells ({} strings, {} objects), {} strings and {} objects live",
            self.collections,
            stats.freed(),
            stats.strings_freed,
            stats.objects_freed,
            self.strings.len(),
            self.objects.len()
        );
        stats
    }

    fn mark_value(&mut self, value: Value) {
        match value {
            Value::String(handle) => {
                // Strings hold no references
                if let Some(string) = self.strings.get_mut(handle.0) {
                    string.mark = GcMark::Black;
                }
            }
            Value::Object(handle) => {
                if let Some(object) = self.objects.get_mut(handle.0) {
                    if object.mark == GcMark::White {
                        object.mark = GcMark::Gray;
                        self.gray_stack.push(handle);
                    }
                }
            }
            _ => {}
        }
    }

    fn scan_object(&mut self, handle: ObjectHandle) {
        let children: Vec<Value> = match self.objects.get_mut(handle.0) {
            Some(object) => {
                object.mark = GcMark::Black;
                object
                    .elements
                    .iter()
                    .chain(object.props.values())
                    .copied()
                    .collect()
            }
            None => return,
        };

        for child in children {
            self.mark_value(child);
        }
    }

    fn sweep(&mut self) -> GcStats {
        let strings_freed = self.strings.retain(|s| {
            let live = s.mark != GcMark::White;
            s.mark = GcMark::White;
            live
        });
        let objects_freed = self.objects.retain(|o| {
            let live = o.mark != GcMark::White;
            o.mark = GcMark::White;
            live
        });

        GcStats {
            strings_freed,
            objects_freed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_cells_are_freed() {
        let mut heap = Heap::new();
        let kept = heap.alloc_object(false);
        let dropped = heap.alloc_object(true);
        let name = heap.alloc_string(b"name");
        heap.alloc_string(b"garbage");

        heap.get_object_mut(kept)
            .unwrap()
            .props
            .insert(b"name".to_vec().into_boxed_slice(), Value::String(name));

        let stats = heap.collect_garbage(&[Value::Object(kept)]);
        assert_eq!(stats.objects_freed, 1);
        assert_eq!(stats.strings_freed, 1);
        assert!(heap.contains_object(kept));
        assert!(!heap.contains_object(dropped));
        assert_eq!(heap.get_string(name).unwrap(), b"name");
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = Heap::new();
        let a = heap.alloc_object(false);
        let b = heap.alloc_object(false);
        heap.get_object_mut(a).unwrap().set_index(0, Value::Object(b));
        heap.get_object_mut(b).unwrap().set_index(0, Value::Object(a));

        let stats = heap.collect_garbage(std::iter::empty());
        assert_eq!(stats.objects_freed, 2);
        assert_eq!(stats.freed(), 2);
        assert_eq!(heap.stats().objects, 0);
    }

    #[test]
    fn test_marks_reset_between_cycles() {
        let mut heap = Heap::new();
        let root = heap.alloc_object(true);
        let child = heap.alloc_object(false);
        heap.get_object_mut(root).unwrap().set_index(2, Value::Object(child));
        assert_eq!(heap.get_object(root).unwrap().len(), 3);

        heap.collect_garbage(&[Value::Object(root)]);
        assert!(heap.contains_object(child));

        // Unlink the child; the next cycle must not trust stale black marks
        heap.get_object_mut(root).unwrap().set_index(2, Value::Undefined);
        let stats = heap.collect_garbage(&[Value::Object(root)]);
        assert_eq!(stats.objects_freed, 1);
        assert!(!heap.contains_object(child));
        assert_eq!(heap.stats().collections, 2);
    }
}
