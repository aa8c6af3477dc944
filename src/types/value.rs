//! The value model hashed and reconstructed by the kernel.
//!
//! `Value` mirrors JSON but fixes a canonical numeric form so that two
//! semantically equal inputs always compare (and hash) equal. Object keys are
//! kept in a `BTreeMap`: key order is not part of a value's identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A JSON number in canonical form.
///
/// Integral floats that fit in `i64` collapse to [`Number::Int`], so `1.0`
/// and `1` are the same value. `-0.0` becomes `0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer above `i64::MAX`.
    UInt(u64),
    /// Finite, non-integral (or out of `i64` range) float.
    Float(f64),
}

impl Number {
    /// Canonicalize a float. Returns `None` for NaN and infinities, which
    /// JSON cannot carry.
    pub fn from_f64(f: f64) -> Option<Self> {
        if !f.is_finite() {
            return None;
        }
        // 2^63 is exactly representable; anything strictly inside fits i64.
        const LIMIT: f64 = 9_223_372_036_854_775_808.0;
        if f.fract() == 0.0 && f > -LIMIT && f < LIMIT {
            return Some(Self::Int(f as i64));
        }
        Some(Self::Float(f))
    }

    /// Canonicalize an unsigned integer.
    pub fn from_u64(u: u64) -> Self {
        match i64::try_from(u) {
            Ok(i) => Self::Int(i),
            Err(_) => Self::UInt(u),
        }
    }

    /// The single textual form used for hashing and literal storage.
    pub fn canonical_text(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::UInt(u) => u.to_string(),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(|n| n.to_string())
                .unwrap_or_else(|| f.to_string()),
        }
    }

    fn to_json(self) -> serde_json::Number {
        match self {
            Self::Int(i) => i.into(),
            Self::UInt(u) => u.into(),
            // from_f64 only fails on non-finite input, which Float never holds.
            Self::Float(f) => serde_json::Number::from_f64(f).unwrap_or_else(|| 0.into()),
        }
    }
}

impl From<i64> for Number {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&serde_json::Number> for Number {
    fn from(n: &serde_json::Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Int(i)
        } else if let Some(u) = n.as_u64() {
            Self::from_u64(u)
        } else {
            n.as_f64()
                .and_then(Self::from_f64)
                .unwrap_or(Self::Int(0))
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_text())
    }
}

/// Coarse classification of a value, as stored on fragment nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Null, bool, number or string.
    Scalar,
    /// Ordered sequence.
    Array,
    /// Keyed map.
    Object,
}

impl ValueKind {
    /// Parse from the stored lowercase name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scalar" => Some(Self::Scalar),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    /// Stored lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JSON-like value.
///
/// Cloning, parsing and the `serde_json` conversions use explicit work
/// stacks, so nesting depth is bounded by memory rather than by the call
/// stack. Use [`Value::teardown`] to drop a very deep value.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number in canonical form.
    Number(Number),
    /// JSON string.
    String(String),
    /// JSON array.
    Array(Vec<Value>),
    /// JSON object.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Classify this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Array(_) => ValueKind::Array,
            Self::Object(_) => ValueKind::Object,
            _ => ValueKind::Scalar,
        }
    }

    /// Parse JSON text. Nesting depth is not limited.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        super::parse::parse(text)
    }

    /// Drop a value one level at a time.
    ///
    /// The derived drop glue recurses once per nesting level; this does not.
    pub fn teardown(self) {
        let mut stack = vec![self];
        while let Some(value) = stack.pop() {
            match value {
                Self::Array(items) => stack.extend(items),
                Self::Object(map) => stack.extend(map.into_values()),
                _ => {}
            }
        }
    }

    /// Render as compact JSON text.
    pub fn to_json_string(&self) -> String {
        serde_json::Value::from(self.clone()).to_string()
    }

    /// Render as indented JSON text.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&serde_json::Value::from(self.clone()))
            .unwrap_or_else(|_| self.to_json_string())
    }
}

enum Rebuild<T> {
    Enter(T),
    Array(usize),
    Object(Vec<String>),
}

fn take_last<T>(out: &mut Vec<T>, n: usize) -> Vec<T> {
    out.split_off(out.len().saturating_sub(n))
}

impl Clone for Value {
    fn clone(&self) -> Self {
        let mut stack = vec![Rebuild::Enter(self)];
        let mut out: Vec<Value> = Vec::new();
        while let Some(step) = stack.pop() {
            match step {
                Rebuild::Enter(Self::Array(items)) => {
                    stack.push(Rebuild::Array(items.len()));
                    stack.extend(items.iter().rev().map(Rebuild::Enter));
                }
                Rebuild::Enter(Self::Object(map)) => {
                    stack.push(Rebuild::Object(map.keys().cloned().collect()));
                    stack.extend(map.values().rev().map(Rebuild::Enter));
                }
                Rebuild::Enter(Self::Null) => out.push(Self::Null),
                Rebuild::Enter(Self::Bool(b)) => out.push(Self::Bool(*b)),
                Rebuild::Enter(Self::Number(n)) => out.push(Self::Number(*n)),
                Rebuild::Enter(Self::String(s)) => out.push(Self::String(s.clone())),
                Rebuild::Array(n) => {
                    let items = take_last(&mut out, n);
                    out.push(Self::Array(items));
                }
                Rebuild::Object(keys) => {
                    let values = take_last(&mut out, keys.len());
                    out.push(Self::Object(keys.into_iter().zip(values).collect()));
                }
            }
        }
        out.pop().unwrap_or(Self::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        let mut stack = vec![Rebuild::Enter(json)];
        let mut out: Vec<Value> = Vec::new();
        while let Some(step) = stack.pop() {
            match step {
                Rebuild::Enter(serde_json::Value::Null) => out.push(Self::Null),
                Rebuild::Enter(serde_json::Value::Bool(b)) => out.push(Self::Bool(b)),
                Rebuild::Enter(serde_json::Value::Number(n)) => out.push(Self::Number(Number::from(&n))),
                Rebuild::Enter(serde_json::Value::String(s)) => out.push(Self::String(s)),
                Rebuild::Enter(serde_json::Value::Array(items)) => {
                    stack.push(Rebuild::Array(items.len()));
                    stack.extend(items.into_iter().rev().map(Rebuild::Enter));
                }
                Rebuild::Enter(serde_json::Value::Object(map)) => {
                    let (keys, values): (Vec<String>, Vec<serde_json::Value>) = map.into_iter().unzip();
                    stack.push(Rebuild::Object(keys));
                    stack.extend(values.into_iter().rev().map(Rebuild::Enter));
                }
                Rebuild::Array(n) => {
                    let items = take_last(&mut out, n);
                    out.push(Self::Array(items));
                }
                Rebuild::Object(keys) => {
                    let values = take_last(&mut out, keys.len());
                    out.push(Self::Object(keys.into_iter().zip(values).collect()));
                }
            }
        }
        out.pop().unwrap_or(Self::Null)
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        let mut stack = vec![Rebuild::Enter(value)];
        let mut out: Vec<serde_json::Value> = Vec::new();
        while let Some(step) = stack.pop() {
            match step {
                Rebuild::Enter(Value::Null) => out.push(Self::Null),
                Rebuild::Enter(Value::Bool(b)) => out.push(Self::Bool(b)),
                Rebuild::Enter(Value::Number(n)) => out.push(Self::Number(n.to_json())),
                Rebuild::Enter(Value::String(s)) => out.push(Self::String(s)),
                Rebuild::Enter(Value::Array(items)) => {
                    stack.push(Rebuild::Array(items.len()));
                    stack.extend(items.into_iter().rev().map(Rebuild::Enter));
                }
                Rebuild::Enter(Value::Object(map)) => {
                    let (keys, values): (Vec<String>, Vec<Value>) = map.into_iter().unzip();
                    stack.push(Rebuild::Object(keys));
                    stack.extend(values.into_iter().rev().map(Rebuild::Enter));
                }
                Rebuild::Array(n) => {
                    let items = take_last(&mut out, n);
                    out.push(Self::Array(items));
                }
                Rebuild::Object(keys) => {
                    let values = take_last(&mut out, keys.len());
                    out.push(Self::Object(keys.into_iter().zip(values).collect()));
                }
            }
        }
        out.pop().unwrap_or(Self::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Number(Number::Int(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
