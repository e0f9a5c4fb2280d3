//! Stack-safe helpers for arbitrarily deep `serde_json::Value`s
//!
//! Dropping or serializing a `Value` recurses once per nesting level.
//! These run off an explicit stack instead.

use serde_json::Value;

/// Drop a value without recursing into its children
pub fn dispose(value: Value) {
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        match value {
            Value::Array(items) => pending.extend(items),
            Value::Object(map) => pending.extend(map.into_iter().map(|(_, v)| v)),
            _ => {}
        }
    }
}

enum Emit<'a> {
    Value(&'a Value),
    Key(&'a str),
    Raw(&'static str),
}

/// Compact JSON text, identical to `Value::to_string`
pub fn to_json_text(value: &Value) -> String {
    let mut out = String::new();
    let mut stack = vec![Emit::Value(value)];

    while let Some(emit) = stack.pop() {
        match emit {
            Emit::Raw(text) => out.push_str(text),
            Emit::Key(key) => {
                out.push_str(&Value::from(key).to_string());
                out.push(':');
            }
            Emit::Value(Value::Array(items)) => {
                out.push('[');
                stack.push(Emit::Raw("]"));
                for (i, item) in items.iter().enumerate().rev() {
                    stack.push(Emit::Value(item));
                    if i > 0 {
                        stack.push(Emit::Raw(","));
                    }
                }
            }
            Emit::Value(Value::Object(map)) => {
                out.push('{');
                stack.push(Emit::Raw("}"));
                let entries: Vec<(&String, &Value)> = map.iter().collect();
                for (i, (key, value)) in entries.into_iter().enumerate().rev() {
                    stack.push(Emit::Value(value));
                    stack.push(Emit::Key(key));
                    if i > 0 {
                        stack.push(Emit::Raw(","));
                    }
                }
            }
            Emit::Value(scalar) => out.push_str(&scalar.to_string()),
        }
    }

    out
}
