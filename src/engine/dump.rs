//! Stack dump for debugging

use crate::engine::context::{Context, State};
use crate::engine::value::Value;
use log::debug;
use std::fmt::Write;

impl Context {
    /// Render the evaluation stack, bottom first, e.g.
    /// `ctx: top=3, stack=[42, "abc", [array len=1]]`
    pub fn dump_stack(&self) -> String {
        self.with_state(|state| Ok(render(state)))
            .unwrap_or_else(|err| format!("ctx: <unavailable: {}>", err))
    }

    /// Write the stack dump to the debug log
    pub fn log_stack(&self) {
        debug!("--- {}", self.dump_stack());
    }
}

pub(crate) fn render(state: &State) -> String {
    let mut out = format!("ctx: top={}, stack=[", state.stack.len());
    for (i, value) in state.stack.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        render_value(state, *value, &mut out);
    }
    out.push(']');
    out
}

fn render_value(state: &State, value: Value, out: &mut String) {
    let _ = match value {
        Value::Undefined => write!(out, "undefined"),
        Value::Null => write!(out, "null"),
        Value::Boolean(b) => write!(out, "{}", b),
        Value::Number(n) => write!(out, "{}", n),
        Value::String(handle) => match state.heap.get_string(handle) {
            Ok(bytes) => write!(out, "{:?}", String::from_utf8_lossy(bytes)),
            Err(_) => write!(out, "<dead string>"),
        },
        Value::Object(handle) => match state.heap.get_object(handle) {
            Ok(object) if object.is_array => write!(out, "[array len={}]", object.len()),
            Ok(object) => write!(out, "[object props={}]", object.props.len()),
            Err(_) => write!(out, "<dead object>"),
        },
        Value::Pointer(p) => write!(out, "{:p}", p.as_ptr()),
    };
}
