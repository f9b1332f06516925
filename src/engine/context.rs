//! Bundled reference engine

use crate::config::EngineConfig;
use crate::engine::dump::render;
use crate::engine::heap::{GcStats, Heap, MemoryStats};
use crate::engine::value::{ObjectHandle, Value};
use crate::engine::{Engine, EngineError, EngineId, EngineResult, StackIndex};
use crate::kind::{Kind, Pointer};
use log::{debug, trace};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Stack values internal protocols may use beyond the configured limit
pub const INTERNAL_STACK_RESERVE: usize = 8;

/// An observable reference to a heap object, used to check whether the
/// collector has freed it. Holding one does not keep the object alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(ObjectHandle);

/// Engine state shared by all handles of one instance
pub(crate) struct State {
    pub(crate) config: EngineConfig,
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,

    /// Engine-global object invisible to scripts
    pub(crate) stash: ObjectHandle,

    /// Global object
    pub(crate) global: ObjectHandle,

    /// Nesting depth of `with_reserve` calls
    reserve_depth: usize,

    /// Stack dump of the last failed call, recorded in debug mode
    last_failure: Option<String>,
}

impl State {
    fn new(config: EngineConfig) -> Self {
        let mut heap = Heap::new();
        let stash = heap.alloc_object(false);
        let global = heap.alloc_object(false);
        // permanent roots do not count towards the first cycle
        heap.reset_allocation_count();
        State {
            config,
            heap,
            stack: Vec::new(),
            stash,
            global,
            reserve_depth: 0,
            last_failure: None,
        }
    }

    /// Absolute position of `index` in the stack
    fn slot(&self, index: StackIndex) -> EngineResult<usize> {
        let len = self.stack.len() as i64;
        let abs = if index < 0 { len + index as i64 } else { index as i64 };
        if abs < 0 || abs >= len {
            return Err(EngineError::InvalidIndex(index));
        }
        Ok(abs as usize)
    }

    fn get(&self, index: StackIndex) -> EngineResult<Value> {
        Ok(self.stack[self.slot(index)?])
    }

    fn push(&mut self, value: Value) -> EngineResult<()> {
        let limit = self.config.value_stack_limit;
        let reserve = if self.reserve_depth > 0 { INTERNAL_STACK_RESERVE } else { 0 };
        if self.stack.len() >= limit + reserve {
            return Err(EngineError::StackOverflow(limit));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> EngineResult<Value> {
        self.stack.pop().ok_or(EngineError::StackUnderflow)
    }

    fn object_at(&self, index: StackIndex) -> EngineResult<ObjectHandle> {
        self.get(index)?
            .as_object()
            .ok_or(EngineError::NotAnObject(index))
    }

    fn typed<T>(
        &self,
        index: StackIndex,
        expected: Kind,
        read: impl FnOnce(Value) -> Option<T>,
    ) -> EngineResult<T> {
        let value = self.get(index)?;
        read(value).ok_or(EngineError::TypeError {
            index,
            expected,
            found: value.kind(),
        })
    }

    /// Collect if the allocation threshold is reached. Called before allocating
    /// so the new cell cannot be swept before it is rooted on the stack.
    fn maybe_collect(&mut self) {
        let threshold = self.config.gc_threshold;
        if threshold > 0 && self.heap.allocations_since_gc() >= threshold {
            self.collect();
        }
    }

    fn collect(&mut self) -> GcStats {
        let roots = [Value::Object(self.stash), Value::Object(self.global)];
        let State { heap, stack, .. } = self;
        heap.collect_garbage(roots.iter().chain(stack.iter()))
    }

    fn values_equal(&self, a: Value, b: Value) -> EngineResult<bool> {
        Ok(match (a, b) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Boolean(x), Value::Boolean(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::String(x), Value::String(y)) => {
                x == y || self.heap.get_string(x)? == self.heap.get_string(y)?
            }
            (Value::Object(x), Value::Object(y)) => x == y,
            (Value::Pointer(x), Value::Pointer(y)) => x == y,
            _ => false,
        })
    }
}

/// A handle to one engine instance.
///
/// Cloning a `Context` yields another handle to the same engine. The engine
/// is single-threaded; every call borrows it for the duration of the call
/// only, and a call made while another is in progress fails with
/// [`EngineError::Busy`].
///
/// Pushes are bounded by `value_stack_limit`. Inside
/// [`Engine::with_reserve`] a further [`INTERNAL_STACK_RESERVE`] values are
/// allowed, so slot bookkeeping still runs when the host has filled the stack.
#[derive(Clone)]
pub struct Context {
    id: EngineId,
    inner: Rc<RefCell<State>>,
}

impl Context {
    /// Create an engine with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the given configuration
    pub fn with_config(config: EngineConfig) -> Self {
        let id = EngineId::new();
        trace!("creating engine {} ({:?})", id, config);
        Context {
            id,
            inner: Rc::new(RefCell::new(State::new(config))),
        }
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut State) -> EngineResult<T>) -> EngineResult<T> {
        let mut state = self.inner.try_borrow_mut().map_err(|_| EngineError::Busy)?;
        let result = f(&mut state);
        if let Err(err) = &result {
            if state.config.debug {
                let dump = format!("{}: {}", err, render(&state));
                debug!("engine {}: {}", self.id, dump);
                state.last_failure = Some(dump);
            }
        }
        result
    }

    /// Configuration this engine was created with
    pub fn config(&self) -> EngineConfig {
        self.inner.borrow().config.clone()
    }

    /// The error and stack of the most recent failed call. Only recorded
    /// when the engine runs with `debug` enabled.
    pub fn last_failure(&self) -> Option<String> {
        self.inner.try_borrow().ok()?.last_failure.clone()
    }

    /// Push a UTF-8 string
    pub fn push_string(&self, s: &str) -> EngineResult<()> {
        self.push_lstring(s.as_bytes())
    }

    /// Run a full collection cycle now
    pub fn collect_garbage(&self) -> EngineResult<GcStats> {
        self.with_state(|state| Ok(state.collect()))
    }

    /// Current heap statistics
    pub fn memory_stats(&self) -> MemoryStats {
        self.inner.borrow().heap.stats()
    }

    /// Observable reference to the object at `index`
    pub fn object_ref(&self, index: StackIndex) -> EngineResult<ObjectRef> {
        self.with_state(|state| state.object_at(index).map(ObjectRef))
    }

    /// Check whether the referenced object has not been collected
    pub fn is_alive(&self, object: ObjectRef) -> bool {
        self.inner.borrow().heap.contains_object(object.0)
    }

    /// Push the global object
    pub fn push_global_object(&self) -> EngineResult<()> {
        self.with_state(|state| {
            let global = state.global;
            state.push(Value::Object(global))
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("top", &self.top().ok())
            .finish()
    }
}

impl Engine for Context {
    fn id(&self) -> EngineId {
        self.id
    }

    fn top(&self) -> EngineResult<usize> {
        self.with_state(|state| Ok(state.stack.len()))
    }

    fn set_top(&self, top: usize) -> EngineResult<()> {
        self.with_state(|state| {
            if top > state.stack.len() {
                return Err(EngineError::InvalidIndex(top as StackIndex));
            }
            state.stack.truncate(top);
            Ok(())
        })
    }

    fn normalize_index(&self, index: StackIndex) -> EngineResult<StackIndex> {
        self.with_state(|state| state.slot(index).map(|abs| abs as StackIndex))
    }

    fn type_of(&self, index: StackIndex) -> EngineResult<Kind> {
        self.with_state(|state| state.get(index).map(|v| v.kind()))
    }

    fn get_boolean(&self, index: StackIndex) -> EngineResult<bool> {
        self.with_state(|state| {
            state.typed(index, Kind::Boolean, |v| match v {
                Value::Boolean(b) => Some(b),
                _ => None,
            })
        })
    }

    fn get_number(&self, index: StackIndex) -> EngineResult<f64> {
        self.with_state(|state| {
            state.typed(index, Kind::Number, |v| match v {
                Value::Number(n) => Some(n),
                _ => None,
            })
        })
    }

    fn get_uint(&self, index: StackIndex) -> EngineResult<u32> {
        self.with_state(|state| {
            Ok(match state.get(index)? {
                Value::Number(n) => n as u32,
                _ => 0,
            })
        })
    }

    fn get_lstring(&self, index: StackIndex) -> EngineResult<Vec<u8>> {
        self.with_state(|state| {
            let handle = state.typed(index, Kind::String, |v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })?;
            Ok(state.heap.get_string(handle)?.to_vec())
        })
    }

    fn get_pointer(&self, index: StackIndex) -> EngineResult<Pointer> {
        self.with_state(|state| {
            state.typed(index, Kind::Pointer, |v| match v {
                Value::Pointer(p) => Some(p),
                _ => None,
            })
        })
    }

    fn push_undefined(&self) -> EngineResult<()> {
        self.with_state(|state| state.push(Value::Undefined))
    }

    fn push_null(&self) -> EngineResult<()> {
        self.with_state(|state| state.push(Value::Null))
    }

    fn push_boolean(&self, value: bool) -> EngineResult<()> {
        self.with_state(|state| state.push(Value::Boolean(value)))
    }

    fn push_number(&self, value: f64) -> EngineResult<()> {
        self.with_state(|state| state.push(Value::Number(value)))
    }

    fn push_lstring(&self, bytes: &[u8]) -> EngineResult<()> {
        self.with_state(|state| {
            state.maybe_collect();
            let handle = state.heap.alloc_string(bytes);
            state.push(Value::String(handle))
        })
    }

    fn push_pointer(&self, pointer: Pointer) -> EngineResult<()> {
        self.with_state(|state| state.push(Value::Pointer(pointer)))
    }

    fn push_array(&self) -> EngineResult<StackIndex> {
        self.with_state(|state| {
            state.maybe_collect();
            let handle = state.heap.alloc_object(true);
            state.push(Value::Object(handle))?;
            Ok(state.stack.len() as StackIndex - 1)
        })
    }

    fn push_object(&self) -> EngineResult<StackIndex> {
        self.with_state(|state| {
            state.maybe_collect();
            let handle = state.heap.alloc_object(false);
            state.push(Value::Object(handle))?;
            Ok(state.stack.len() as StackIndex - 1)
        })
    }

    fn push_heap_stash(&self) -> EngineResult<()> {
        self.with_state(|state| {
            let stash = state.stash;
            state.push(Value::Object(stash))
        })
    }

    fn dup(&self, index: StackIndex) -> EngineResult<()> {
        self.with_state(|state| {
            let value = state.get(index)?;
            state.push(value)
        })
    }

    fn remove(&self, index: StackIndex) -> EngineResult<()> {
        self.with_state(|state| {
            let abs = state.slot(index)?;
            state.stack.remove(abs);
            Ok(())
        })
    }

    fn replace(&self, index: StackIndex) -> EngineResult<()> {
        self.with_state(|state| {
            let abs = state.slot(index)?;
            let value = state.pop()?;
            if abs < state.stack.len() {
                state.stack[abs] = value;
            }
            Ok(())
        })
    }

    fn pop_n(&self, count: usize) -> EngineResult<()> {
        self.with_state(|state| {
            let len = state.stack.len();
            if count > len {
                return Err(EngineError::StackUnderflow);
            }
            state.stack.truncate(len - count);
            Ok(())
        })
    }

    fn has_prop_string(&self, obj: StackIndex, key: &str) -> EngineResult<bool> {
        self.with_state(|state| {
            let handle = state.object_at(obj)?;
            Ok(state.heap.get_object(handle)?.props.contains_key(key.as_bytes()))
        })
    }

    fn get_prop_string(&self, obj: StackIndex, key: &str) -> EngineResult<bool> {
        self.with_state(|state| {
            let handle = state.object_at(obj)?;
            let found = state.heap.get_object(handle)?.props.get(key.as_bytes()).copied();
            state.push(found.unwrap_or(Value::Undefined))?;
            Ok(found.is_some())
        })
    }

    fn put_prop_string(&self, obj: StackIndex, key: &str) -> EngineResult<()> {
        self.with_state(|state| {
            let handle = state.object_at(obj)?;
            let value = state.pop()?;
            state
                .heap
                .get_object_mut(handle)?
                .props
                .insert(key.as_bytes().into(), value);
            Ok(())
        })
    }

    fn get_prop_index(&self, obj: StackIndex, index: u32) -> EngineResult<bool> {
        self.with_state(|state| {
            let handle = state.object_at(obj)?;
            let found = state.heap.get_object(handle)?.get_index(index);
            state.push(found.unwrap_or(Value::Undefined))?;
            Ok(found.is_some())
        })
    }

    fn put_prop_index(&self, obj: StackIndex, index: u32) -> EngineResult<()> {
        self.with_state(|state| {
            let handle = state.object_at(obj)?;
            let value = state.pop()?;
            state.heap.get_object_mut(handle)?.set_index(index, value);
            Ok(())
        })
    }

    fn get_length(&self, index: StackIndex) -> EngineResult<usize> {
        self.with_state(|state| match state.get(index)? {
            Value::Object(handle) => Ok(state.heap.get_object(handle)?.len()),
            Value::String(handle) => Ok(state.heap.get_string(handle)?.len()),
            _ => Ok(0),
        })
    }

    fn equals(&self, a: StackIndex, b: StackIndex) -> EngineResult<bool> {
        self.with_state(|state| {
            let (a, b) = (state.get(a)?, state.get(b)?);
            state.values_equal(a, b)
        })
    }

    fn with_reserve<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        let entered = self
            .with_state(|state| {
                state.reserve_depth += 1;
                Ok(())
            })
            .is_ok();
        let result = f(self);
        if entered {
            if let Ok(mut state) = self.inner.try_borrow_mut() {
                state.reserve_depth -= 1;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_indexing() {
        let ctx = Context::new();
        ctx.push_number(1.0).unwrap();
        ctx.push_boolean(true).unwrap();
        ctx.push_null().unwrap();

        assert_eq!(ctx.top().unwrap(), 3);
        assert_eq!(ctx.normalize_index(-1).unwrap(), 2);
        assert_eq!(ctx.normalize_index(0).unwrap(), 0);
        assert_eq!(ctx.type_of(-2).unwrap(), Kind::Boolean);
        assert_eq!(ctx.normalize_index(3), Err(EngineError::InvalidIndex(3)));
        assert_eq!(ctx.normalize_index(-4), Err(EngineError::InvalidIndex(-4)));

        ctx.remove(0).unwrap();
        assert_eq!(ctx.type_of(0).unwrap(), Kind::Boolean);
        assert_eq!(ctx.pop_n(3), Err(EngineError::StackUnderflow));
        ctx.pop_n(2).unwrap();
        assert_eq!(ctx.top().unwrap(), 0);
    }

    #[test]
    fn test_typed_reads() {
        let ctx = Context::new();
        ctx.push_lstring(b"a\0b").unwrap();
        ctx.push_number(7.9).unwrap();

        assert_eq!(ctx.get_lstring(-2).unwrap(), b"a\0b".to_vec());
        assert_eq!(ctx.get_number(-1).unwrap(), 7.9);
        assert_eq!(ctx.get_uint(-1).unwrap(), 7);
        assert_eq!(ctx.get_uint(-2).unwrap(), 0);
        assert_eq!(
            ctx.get_boolean(-1),
            Err(EngineError::TypeError {
                index: -1,
                expected: Kind::Boolean,
                found: Kind::Number
            })
        );
    }

    #[test]
    fn test_array_properties() {
        let ctx = Context::new();
        let arr = ctx.push_array().unwrap();
        ctx.push_number(10.0).unwrap();
        ctx.put_prop_index(arr, 0).unwrap();
        ctx.push_string("x").unwrap();
        ctx.put_prop_index(arr, 3).unwrap();

        assert_eq!(ctx.get_length(arr).unwrap(), 4);
        assert!(ctx.get_prop_index(arr, 1).unwrap());
        assert_eq!(ctx.type_of(-1).unwrap(), Kind::Undefined);
        ctx.pop().unwrap();
        assert!(!ctx.get_prop_index(arr, 9).unwrap());
        ctx.pop().unwrap();

        assert!(!ctx.has_prop_string(arr, "name").unwrap());
        ctx.push_string("list").unwrap();
        ctx.put_prop_string(arr, "name").unwrap();
        assert!(ctx.has_prop_string(arr, "name").unwrap());
        assert_eq!(ctx.top().unwrap(), 1);
    }

    #[test]
    fn test_stack_limit() {
        let ctx = Context::with_config(EngineConfig {
            value_stack_limit: 2,
            ..EngineConfig::default()
        });
        assert_eq!(ctx.config().value_stack_limit, 2);
        ctx.push_undefined().unwrap();
        ctx.push_undefined().unwrap();
        assert_eq!(ctx.push_undefined(), Err(EngineError::StackOverflow(2)));
    }

    #[test]
    fn test_stash_roots_objects() {
        let ctx = Context::new();
        ctx.push_heap_stash().unwrap();
        ctx.push_object().unwrap();
        let stashed = ctx.object_ref(-1).unwrap();
        ctx.put_prop_string(-2, "keep").unwrap();
        ctx.push_object().unwrap();
        let loose = ctx.object_ref(-1).unwrap();
        ctx.pop_n(2).unwrap();

        ctx.push_global_object().unwrap();
        let global = ctx.object_ref(-1).unwrap();
        ctx.pop().unwrap();

        let stats = ctx.collect_garbage().unwrap();
        assert_eq!(stats.objects_freed, 1);
        assert!(ctx.is_alive(stashed));
        assert!(ctx.is_alive(global));
        assert!(!ctx.is_alive(loose));
    }

    #[test]
    fn test_equality() {
        let ctx = Context::new();
        ctx.push_string("same").unwrap();
        ctx.push_string("same").unwrap();
        ctx.push_null().unwrap();
        ctx.push_undefined().unwrap();
        ctx.push_object().unwrap();
        ctx.push_object().unwrap();

        assert!(ctx.equals(0, 1).unwrap());
        assert!(ctx.equals(2, 3).unwrap());
        assert!(!ctx.equals(4, 5).unwrap());
        ctx.dup(4).unwrap();
        assert!(ctx.equals(4, -1).unwrap());
        assert!(!ctx.equals(0, 4).unwrap());
    }

    #[test]
    fn test_automatic_collection() {
        let ctx = Context::with_config(EngineConfig {
            gc_threshold: 4,
            ..EngineConfig::default()
        });
        for _ in 0..4 {
            ctx.push_object().unwrap();
            ctx.pop().unwrap();
        }
        // Next allocation triggers a cycle that frees the four dropped objects
        ctx.push_object().unwrap();
        let stats = ctx.memory_stats();
        assert_eq!(stats.collections, 1);
        // stash, global and the object on the stack
        assert_eq!(stats.objects, 3);
    }

    #[test]
    fn test_distinct_engines() {
        let a = Context::new();
        let b = a.clone();
        let c = Context::new();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());

        a.push_null().unwrap();
        assert_eq!(b.top().unwrap(), 1);
        assert_eq!(c.top().unwrap(), 0);
    }

    #[test]
    fn test_top_while_busy() {
        let ctx = Context::new();
        let nested = ctx.with_state(|_| Ok(ctx.top()));
        assert_eq!(nested, Ok(Err(EngineError::Busy)));
        assert_eq!(ctx.top().unwrap(), 0);
    }

    #[test]
    fn test_replace() {
        let ctx = Context::new();
        ctx.push_number(1.0).unwrap();
        ctx.push_number(2.0).unwrap();
        ctx.push_boolean(true).unwrap();
        ctx.replace(0).unwrap();

        assert_eq!(ctx.top().unwrap(), 2);
        assert_eq!(ctx.type_of(0).unwrap(), Kind::Boolean);
        assert_eq!(ctx.get_number(1).unwrap(), 2.0);
    }

    #[test]
    fn test_internal_reserve() {
        let ctx = Context::with_config(EngineConfig {
            value_stack_limit: 1,
            ..EngineConfig::default()
        });
        ctx.push_undefined().unwrap();

        let pushed = ctx.with_reserve(|c| {
            for _ in 0..INTERNAL_STACK_RESERVE {
                c.push_undefined()?;
            }
            c.push_undefined()
        });
        assert_eq!(pushed, Err(EngineError::StackOverflow(1)));
        assert_eq!(ctx.top().unwrap(), 1 + INTERNAL_STACK_RESERVE);

        // the reserve ends with the closure
        ctx.pop_n(INTERNAL_STACK_RESERVE).unwrap();
        assert_eq!(ctx.push_undefined(), Err(EngineError::StackOverflow(1)));
    }

    #[test]
    fn test_debug_records_failures() {
        let quiet = Context::with_config(EngineConfig {
            value_stack_limit: 1,
            ..EngineConfig::default()
        });
        quiet.push_null().unwrap();
        assert!(quiet.push_null().is_err());
        assert_eq!(quiet.last_failure(), None);

        let ctx = Context::with_config(EngineConfig {
            value_stack_limit: 1,
            debug: true,
            ..EngineConfig::default()
        });
        ctx.push_null().unwrap();
        assert!(ctx.push_null().is_err());
        assert_eq!(
            ctx.last_failure().as_deref(),
            Some("stack overflow (limit 1): ctx: top=1, stack=[null]")
        );
    }
}
