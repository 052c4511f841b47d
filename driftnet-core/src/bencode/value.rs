use std::collections::BTreeMap;
use std::fmt::Write;

use bytes::Bytes;

/// A decoded bencode value.
///
/// Strings are raw bytes and may hold binary data such as compact peer lists.
/// Dictionary keys are unique byte strings kept in sorted order, which is also
/// the order the encoder writes them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Bytes),
    Integer(i64),
    List(Vec<Value>),
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Creates a byte string value from UTF-8 text.
    pub fn string(text: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the string as UTF-8 when it is a string holding valid text.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|entries| entries.get(key))
    }

    /// Renders an indented, human-readable dump of the value tree.
    ///
    /// Strings that are not printable UTF-8 are shown as hex so binary
    /// payloads like peer lists stay readable in logs.
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.write_pretty(&mut out, 0);
        out
    }

    fn write_pretty(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        match self {
            Value::Integer(value) => {
                let _ = writeln!(out, "{indent}{value}");
            }
            Value::Bytes(bytes) => {
                let _ = writeln!(out, "{indent}{}", display_bytes(bytes));
            }
            Value::List(items) => {
                let _ = writeln!(out, "{indent}[");
                for item in items {
                    item.write_pretty(out, depth + 1);
                }
                let _ = writeln!(out, "{indent}]");
            }
            Value::Dict(entries) => {
                let _ = writeln!(out, "{indent}{{");
                for (key, value) in entries {
                    let _ = writeln!(out, "{indent}  {}:", display_bytes(key));
                    value.write_pretty(out, depth + 2);
                }
                let _ = writeln!(out, "{indent}}}");
            }
        }
    }
}

fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if text.chars().all(|c| !c.is_control()) => format!("\"{text}\""),
        _ => format!("0x{} ({} bytes)", hex::encode(bytes), bytes.len()),
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::string(text)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(bytes))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
