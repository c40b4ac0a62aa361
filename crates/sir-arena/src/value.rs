use crate::{BumpStr, BumpVec};
use std::fmt;

/// JsonValue is a single-line JSON tree, lazily parsed and arena-owned.
/// Numbers are integers only: the wire format carries no floats. Objects
/// preserve source insertion order and are looked up linearly rather than
/// through a hash index, since records rarely carry more than a handful
/// of fields.
#[derive(Clone, Copy, Debug)]
pub enum JsonValue<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Str(BumpStr<'a>),
    Array(BumpVec<'a, JsonValue<'a>>),
    Object(BumpVec<'a, ObjectEntry<'a>>),
}

/// ObjectEntry is a single key/value pair of a JsonValue::Object, retained
/// in the order it was parsed.
#[derive(Clone, Copy, Debug)]
pub struct ObjectEntry<'a> {
    pub key: BumpStr<'a>,
    pub value: JsonValue<'a>,
}

impl<'a> JsonValue<'a> {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            JsonValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&'a [JsonValue<'a>]> {
        match self {
            JsonValue::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&'a [ObjectEntry<'a>]> {
        match self {
            JsonValue::Object(o) => Some(o.as_slice()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }

    /// Linear, insertion-order-preserving lookup by object key. Returns
    /// an owned (Copy) value rather than a borrow, so callers can hold
    /// onto a looked-up field beyond the enclosing object's scope.
    pub fn get(&self, key: &str) -> Option<JsonValue<'a>> {
        self.as_object()?
            .iter()
            .find(|entry| entry.key.as_str() == key)
            .map(|entry| entry.value)
    }

    /// Iterates object keys, for strict allow-list checks against a
    /// record kind's known field set.
    pub fn object_keys(&self) -> impl Iterator<Item = &'a str> {
        self.as_object().unwrap_or(&[]).iter().map(|e| e.key.as_str())
    }
}

fn write_escaped_str(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            '\u{08}' => f.write_str("\\b")?,
            '\u{0c}' => f.write_str("\\f")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

/// `Display` unparses a `JsonValue` back to the single-line wire form the
/// parser accepts. Grounded on spec.md §8's round-trip property
/// (`json_parse(unparse(v)) == v`): every shape the parser can produce
/// (no floats, insertion-ordered objects) round-trips through this.
impl<'a> fmt::Display for JsonValue<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonValue::Null => f.write_str("null"),
            JsonValue::Bool(b) => write!(f, "{b}"),
            JsonValue::Int(i) => write!(f, "{i}"),
            JsonValue::Str(s) => write_escaped_str(s.as_str(), f),
            JsonValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.as_slice().iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            JsonValue::Object(entries) => {
                f.write_str("{")?;
                for (i, entry) in entries.as_slice().iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write_escaped_str(entry.key.as_str(), f)?;
                    f.write_str(":")?;
                    write!(f, "{}", entry.value)?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::parse_line;

    fn round_trip(src: &str) {
        let alloc = bumpalo::Bump::new();
        let v1 = parse_line(src, &alloc).unwrap();
        let unparsed = v1.to_string();
        let v2 = parse_line(&unparsed, &alloc).unwrap();
        assert_eq!(v1.to_string(), v2.to_string());
    }

    #[test]
    fn unparse_round_trips_scalars_and_containers() {
        round_trip(r#"{"a":1,"b":[true,false,null,"x\ty"],"c":{"":"empty"}}"#);
        round_trip("-9223372036854775808");
        round_trip(r#""quote\"and\\backslash""#);
        round_trip("[]");
        round_trip("{}");
    }

    #[test]
    fn unparse_preserves_object_key_order() {
        let alloc = bumpalo::Bump::new();
        let v = parse_line(r#"{"z":1,"a":2,"m":3}"#, &alloc).unwrap();
        assert_eq!(v.to_string(), r#"{"z":1,"a":2,"m":3}"#);
    }
}
