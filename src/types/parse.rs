//! JSON text to [`Value`] without a nesting limit.
//!
//! Containers are tracked on an explicit stack, so a file nested thousands
//! of levels deep parses like a flat one. String and number tokens are
//! sliced out and decoded by `serde_json`, which keeps escape handling and
//! number syntax identical to the rest of the crate.

use std::collections::BTreeMap;

use serde::de::Error as _;

use super::value::{Number, Value};

enum Open {
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>, String),
}

struct Cursor<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, msg: &str) -> serde_json::Error {
        serde_json::Error::custom(format!("{msg} at byte {}", self.pos))
    }

    fn skip_ws(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.bytes.get(self.pos) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn literal(&mut self, word: &str, value: Value) -> Result<Value, serde_json::Error> {
        if self.bytes[self.pos..].starts_with(word.as_bytes()) {
            self.pos += word.len();
            Ok(value)
        } else {
            Err(self.error("expected value"))
        }
    }

    fn string(&mut self) -> Result<String, serde_json::Error> {
        if self.peek() != Some(b'"') {
            return Err(self.error("expected string"));
        }
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek() {
                Some(b'"') => break,
                Some(b'\\') => self.pos += 2,
                Some(_) => self.pos += 1,
                None => return Err(self.error("EOF while parsing a string")),
            }
        }
        self.pos += 1;
        // The token ends on an ASCII quote, so the slice is on char boundaries.
        let token = self.text.get(start..self.pos).ok_or_else(|| self.error("invalid string"))?;
        serde_json::from_str(token)
    }

    fn number(&mut self) -> Result<Value, serde_json::Error> {
        let start = self.pos;
        while let Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') = self.peek() {
            self.pos += 1;
        }
        let token = &self.text[start..self.pos];
        let number: serde_json::Number = serde_json::from_str(token)?;
        Ok(Value::Number(Number::from(&number)))
    }

    fn scalar(&mut self) -> Result<Value, serde_json::Error> {
        match self.peek() {
            Some(b'"') => self.string().map(Value::String),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(self.error("expected value")),
            None => Err(self.error("EOF while parsing a value")),
        }
    }

    /// An object key followed by its colon.
    fn key(&mut self) -> Result<String, serde_json::Error> {
        self.skip_ws();
        let key = self.string()?;
        self.skip_ws();
        if !self.eat(b':') {
            return Err(self.error("expected `:`"));
        }
        Ok(key)
    }
}

/// Parse one JSON document.
pub(crate) fn parse(text: &str) -> Result<Value, serde_json::Error> {
    let mut cur = Cursor::new(text);
    let mut stack: Vec<Open> = Vec::new();

    loop {
        cur.skip_ws();
        let mut value = match cur.peek() {
            Some(b'[') => {
                cur.pos += 1;
                cur.skip_ws();
                if cur.eat(b']') {
                    Value::Array(Vec::new())
                } else {
                    stack.push(Open::Array(Vec::new()));
                    continue;
                }
            }
            Some(b'{') => {
                cur.pos += 1;
                cur.skip_ws();
                if cur.eat(b'}') {
                    Value::Object(BTreeMap::new())
                } else {
                    let key = cur.key()?;
                    stack.push(Open::Object(BTreeMap::new(), key));
                    continue;
                }
            }
            _ => cur.scalar()?,
        };

        // Hand the finished value to its container, closing containers
        // until one expects another member.
        loop {
            let Some(top) = stack.last_mut() else {
                cur.skip_ws();
                if cur.pos != cur.bytes.len() {
                    return Err(cur.error("trailing characters"));
                }
                return Ok(value);
            };
            cur.skip_ws();
            let closed = match top {
                Open::Array(items) => {
                    items.push(value);
                    if cur.eat(b',') {
                        false
                    } else if cur.eat(b']') {
                        true
                    } else {
                        return Err(cur.error("expected `,` or `]`"));
                    }
                }
                Open::Object(map, key) => {
                    map.insert(std::mem::take(key), value);
                    if cur.eat(b',') {
                        *key = cur.key()?;
                        false
                    } else if cur.eat(b'}') {
                        true
                    } else {
                        return Err(cur.error("expected `,` or `}`"));
                    }
                }
            };
            if !closed {
                break;
            }
            value = match stack.pop() {
                Some(Open::Array(items)) => Value::Array(items),
                Some(Open::Object(map, _)) => Value::Object(map),
                None => return Err(cur.error("unbalanced container")),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_like_serde_json() {
        let text = r#" {"a": [1, -2.5e3, true, false, null, "x\"yé"], "b": {}, "c": [], "a2": {"k": [[]]}} "#;
        let ours = parse(text).unwrap();
        let reference = Value::from(serde_json::from_str::<serde_json::Value>(text).unwrap());
        assert_eq!(ours, reference);
    }

    #[test]
    fn test_duplicate_key_keeps_last() {
        assert_eq!(parse(r#"{"a": 1, "a": 2}"#).unwrap(), parse(r#"{"a": 2}"#).unwrap());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "[1,]", "[1 2]", "{\"a\" 1}", "{\"a\": 1", "[1]]", "tru", "\"open", "{1: 2}", "01", "[1] x"] {
            assert!(parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_deep_nesting() {
        let depth = 50_000;
        let text = format!("{}7{}", "[".repeat(depth), "]".repeat(depth));
        let mut current = parse(&text).unwrap();
        let mut levels = 0;
        loop {
            match current {
                Value::Array(mut items) => {
                    assert_eq!(items.len(), 1);
                    current = items.pop().unwrap();
                    levels += 1;
                }
                leaf => {
                    assert_eq!(leaf, Value::from(7i64));
                    break;
                }
            }
        }
        assert_eq!(levels, depth);
    }
}
