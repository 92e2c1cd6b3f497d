// ABOUTME: Evaluated BFF values: the tagged union the evaluator computes and stores in scopes

use crate::range::UriRange;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The kind tag of a [`Value`], used by schema validation and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Boolean,
    Integer,
    String,
    Struct,
    ArrayOfStrings,
    ArrayOfStructs,
    Unknown,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Boolean => "Boolean",
            ValueKind::Integer => "Integer",
            ValueKind::String => "String",
            ValueKind::Struct => "Struct",
            ValueKind::ArrayOfStrings => "ArrayOfStrings",
            ValueKind::ArrayOfStructs => "ArrayOfStructs",
            ValueKind::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

/// One field of a struct value. The definition list is a set of ranges from
/// the start: `Using` inside `ForEach` can give a single field several
/// definition sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub value: Value,
    pub definitions: Vec<UriRange>,
}

/// A struct value: field name to field, in assignment order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructValue {
    pub fields: IndexMap<String, StructField>,
}

impl StructValue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    String(String),
    Struct(StructValue),
    ArrayOfStrings(Vec<String>),
    ArrayOfStructs(Vec<StructValue>),
    /// Best-effort result of a construct that already produced a diagnostic.
    /// Operations on it succeed silently so one error does not cascade.
    Unknown,
}

/// Kind mismatch from a binary value operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {op} {rhs} and {lhs}")]
pub struct ValueOpError {
    pub op: &'static str,
    pub lhs: ValueKind,
    pub rhs: ValueKind,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::String(_) => ValueKind::String,
            Value::Struct(_) => ValueKind::Struct,
            Value::ArrayOfStrings(_) => ValueKind::ArrayOfStrings,
            Value::ArrayOfStructs(_) => ValueKind::ArrayOfStructs,
            Value::Unknown => ValueKind::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }

    /// String form used when the value is interpolated into a `$…$`
    /// substitution. Arrays and structs have no string form.
    pub fn substitution_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Boolean(b) => Some(if *b { "true" } else { "false" }.to_string()),
            _ => None,
        }
    }

    /// `self + rhs`. Strings concatenate, arrays append, structs merge
    /// field-wise with the right side overriding. Field-level kind clashes
    /// during a struct merge are reported through `merge_notes` while the
    /// merge itself still completes.
    pub fn add(self, rhs: Value, merge_notes: &mut Vec<String>) -> Result<Value, ValueOpError> {
        use Value::*;
        match (self, rhs) {
            (Unknown, _) | (_, Unknown) => Ok(Unknown),
            (Integer(a), Integer(b)) => Ok(Integer(a.wrapping_add(b))),
            (String(mut a), String(b)) => {
                a.push_str(&b);
                Ok(String(a))
            }
            (ArrayOfStrings(mut a), String(b)) => {
                a.push(b);
                Ok(ArrayOfStrings(a))
            }
            (ArrayOfStrings(mut a), ArrayOfStrings(b)) => {
                a.extend(b);
                Ok(ArrayOfStrings(a))
            }
            // An empty array literal has no element kind yet; let it adopt
            // struct elements.
            (ArrayOfStrings(a), Struct(b)) if a.is_empty() => Ok(ArrayOfStructs(vec![b])),
            (ArrayOfStrings(a), ArrayOfStructs(b)) if a.is_empty() => Ok(ArrayOfStructs(b)),
            (ArrayOfStructs(mut a), Struct(b)) => {
                a.push(b);
                Ok(ArrayOfStructs(a))
            }
            (ArrayOfStructs(mut a), ArrayOfStructs(b)) => {
                a.extend(b);
                Ok(ArrayOfStructs(a))
            }
            (Struct(mut a), Struct(b)) => {
                for (name, field) in b.fields {
                    if let Some(existing) = a.fields.get(&name) {
                        let lk = existing.value.kind();
                        let rk = field.value.kind();
                        if lk != rk && lk != ValueKind::Unknown && rk != ValueKind::Unknown {
                            merge_notes.push(format!(
                                "field '{}' changes kind from {} to {} in struct merge",
                                name, lk, rk
                            ));
                        }
                    }
                    a.fields.insert(name, field);
                }
                Ok(Struct(a))
            }
            (lhs, rhs) => Err(ValueOpError {
                op: "add",
                lhs: lhs.kind(),
                rhs: rhs.kind(),
            }),
        }
    }

    /// `self - rhs`. Removes occurrences from a string, removes matching
    /// elements from an array of strings, or subtracts integers.
    pub fn subtract(self, rhs: Value) -> Result<Value, ValueOpError> {
        use Value::*;
        match (self, rhs) {
            (Unknown, _) | (_, Unknown) => Ok(Unknown),
            (Integer(a), Integer(b)) => Ok(Integer(a.wrapping_sub(b))),
            (String(a), String(b)) => {
                if b.is_empty() {
                    Ok(String(a))
                } else {
                    Ok(String(a.replace(&b, "")))
                }
            }
            (ArrayOfStrings(a), String(b)) => {
                Ok(ArrayOfStrings(a.into_iter().filter(|e| *e != b).collect()))
            }
            (ArrayOfStrings(a), ArrayOfStrings(b)) => Ok(ArrayOfStrings(
                a.into_iter().filter(|e| !b.contains(e)).collect(),
            )),
            (lhs, rhs) => Err(ValueOpError {
                op: "subtract",
                lhs: lhs.kind(),
                rhs: rhs.kind(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "'{}'", s),
            Value::ArrayOfStrings(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}'", item)?;
                }
                write!(f, "}}")
            }
            Value::ArrayOfStructs(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", Value::Struct(item.clone()))?;
                }
                write!(f, "}}")
            }
            Value::Struct(s) => {
                write!(f, "[")?;
                for (i, (name, field)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, ".{} = {}", name, field.value)?;
                }
                write!(f, "]")
            }
            Value::Unknown => write!(f, "<unknown>"),
        }
    }
}
