//! Approximate in-memory size of a JSON value.
//!
//! Strings count two bytes per character, numbers eight, booleans four and
//! null zero. Object keys count like strings. The walk uses an explicit stack
//! so deeply nested payloads cannot overflow the call stack.

use serde_json::Value;

pub fn estimate_size(value: &Value) -> usize {
    let mut total = 0usize;
    let mut stack = vec![value];

    while let Some(v) = stack.pop() {
        match v {
            Value::Null => {}
            Value::Bool(_) => total = total.saturating_add(4),
            Value::Number(_) => total = total.saturating_add(8),
            Value::String(s) => total = total.saturating_add(string_size(s)),
            Value::Array(items) => stack.extend(items.iter()),
            Value::Object(map) => {
                for (key, item) in map {
                    total = total.saturating_add(string_size(key));
                    stack.push(item);
                }
            }
        }
    }

    total
}

fn string_size(s: &str) -> usize {
    s.chars().count().saturating_mul(2)
}
