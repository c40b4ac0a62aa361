use crate::{BumpStr, BumpVec, JsonValue, ObjectEntry};

/// ParseError reports a byte offset and message for a malformed JSON line.
/// The record parser (sir-ir) wraps this with the enclosing line number.
#[derive(Debug, thiserror::Error)]
#[error("json parse error at byte {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    fn at(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Parses a single line of JSON text into an arena-owned JsonValue.
/// Recursive descent over null/bool/number/string/array/object.
/// Numbers are integers only; no floating point is accepted.
pub fn parse_line<'a>(input: &str, alloc: &'a bumpalo::Bump) -> Result<JsonValue<'a>, ParseError> {
    let bytes = input.as_bytes();
    let mut p = Parser { bytes, pos: 0, alloc };
    p.skip_ws();
    let v = p.parse_value()?;
    p.skip_ws();
    if p.pos != bytes.len() {
        return Err(ParseError::at(p.pos, "trailing data after JSON value"));
    }
    Ok(v)
}

struct Parser<'a, 'i> {
    bytes: &'i [u8],
    pos: usize,
    alloc: &'a bumpalo::Bump,
}

impl<'a, 'i> Parser<'a, 'i> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\t' || b == b'\r' || b == b'\n' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), ParseError> {
        match self.bump() {
            Some(c) if c == b => Ok(()),
            Some(c) => Err(ParseError::at(
                self.pos - 1,
                format!("expected '{}', found '{}'", b as char, c as char),
            )),
            None => Err(ParseError::at(self.pos, format!("expected '{}', found eof", b as char))),
        }
    }

    fn expect_literal(&mut self, lit: &str) -> Result<(), ParseError> {
        let start = self.pos;
        for want in lit.bytes() {
            match self.bump() {
                Some(c) if c == want => {}
                _ => return Err(ParseError::at(start, format!("expected literal '{lit}'"))),
            }
        }
        Ok(())
    }

    fn parse_value(&mut self) -> Result<JsonValue<'a>, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some(b'n') => {
                self.expect_literal("null")?;
                Ok(JsonValue::Null)
            }
            Some(b't') => {
                self.expect_literal("true")?;
                Ok(JsonValue::Bool(true))
            }
            Some(b'f') => {
                self.expect_literal("false")?;
                Ok(JsonValue::Bool(false))
            }
            Some(b'"') => Ok(JsonValue::Str(self.parse_string()?)),
            Some(b'[') => self.parse_array(),
            Some(b'{') => self.parse_object(),
            Some(b'-') | Some(b'0'..=b'9') => self.parse_number(),
            Some(c) => Err(ParseError::at(self.pos, format!("unexpected byte '{}'", c as char))),
            None => Err(ParseError::at(self.pos, "unexpected end of input")),
        }
    }

    fn parse_number(&mut self) -> Result<JsonValue<'a>, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let digits_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == digits_start {
            return Err(ParseError::at(start, "invalid number"));
        }
        if matches!(self.peek(), Some(b'.') | Some(b'e') | Some(b'E')) {
            return Err(ParseError::at(start, "floating point numbers are not supported"));
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
        let i: i64 = text
            .parse()
            .map_err(|_| ParseError::at(start, "integer out of range"))?;
        Ok(JsonValue::Int(i))
    }

    fn parse_string(&mut self) -> Result<BumpStr<'a>, ParseError> {
        self.expect(b'"')?;
        let mut buf: Vec<u8> = Vec::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::at(self.pos, "unterminated string")),
                Some(b'"') => break,
                Some(b'\\') => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| ParseError::at(self.pos, "unterminated escape"))?;
                    match esc {
                        b'"' => buf.push(b'"'),
                        b'\\' => buf.push(b'\\'),
                        b'/' => buf.push(b'/'),
                        b'b' => buf.push(0x08),
                        b'f' => buf.push(0x0c),
                        b'n' => buf.push(b'\n'),
                        b'r' => buf.push(b'\r'),
                        b't' => buf.push(b'\t'),
                        b'u' => {
                            // Non-ASCII replaced with '?', matching
                            // `json.c`'s `c = (v <= 0x7F) ? (char)v :
                            // '?'` — no UTF-16 surrogate-pair
                            // reassembly, so a `😀` pair
                            // decodes as two literal '?' characters,
                            // not the astral scalar they'd otherwise
                            // combine into.
                            let v = self.parse_hex4()?;
                            let c = if v <= 0x7F { v as u8 as char } else { '?' };
                            buf.push(c as u8);
                        }
                        other => {
                            return Err(ParseError::at(
                                self.pos - 1,
                                format!("invalid escape '\\{}'", other as char),
                            ))
                        }
                    }
                }
                Some(b) if b < 0x20 => {
                    return Err(ParseError::at(self.pos - 1, "control character in string"))
                }
                Some(b) => buf.push(b),
            }
        }
        Ok(BumpStr::from_str(
            std::str::from_utf8(&buf).unwrap_or("?"),
            self.alloc,
        ))
    }

    fn parse_hex4(&mut self) -> Result<u16, ParseError> {
        let start = self.pos;
        if self.pos + 4 > self.bytes.len() {
            return Err(ParseError::at(start, "truncated \\u escape"));
        }
        let text = std::str::from_utf8(&self.bytes[self.pos..self.pos + 4])
            .map_err(|_| ParseError::at(start, "invalid \\u escape"))?;
        let v = u16::from_str_radix(text, 16).map_err(|_| ParseError::at(start, "invalid \\u escape"))?;
        self.pos += 4;
        Ok(v)
    }

    fn parse_array(&mut self) -> Result<JsonValue<'a>, ParseError> {
        self.expect(b'[')?;
        let mut items: Vec<JsonValue<'a>> = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(JsonValue::Array(BumpVec::new()));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => break,
                _ => return Err(ParseError::at(self.pos, "expected ',' or ']'")),
            }
        }
        Ok(JsonValue::Array(BumpVec::with_contents(self.alloc, items.into_iter())))
    }

    fn parse_object(&mut self) -> Result<JsonValue<'a>, ParseError> {
        self.expect(b'{')?;
        let mut entries: Vec<ObjectEntry<'a>> = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(JsonValue::Object(BumpVec::new()));
        }
        loop {
            self.skip_ws();
            let key = self.parse_string()?;
            self.skip_ws();
            self.expect(b':')?;
            let value = self.parse_value()?;
            entries.push(ObjectEntry { key, value });
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => break,
                _ => return Err(ParseError::at(self.pos, "expected ',' or '}'")),
            }
        }
        Ok(JsonValue::Object(BumpVec::with_contents(
            self.alloc,
            entries.into_iter(),
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip_shapes() {
        let alloc = bumpalo::Bump::new();
        let v = parse_line(
            r#"{"a": 1, "b": [true, false, null, "x\ty"], "c": {"": "empty"}}"#,
            &alloc,
        )
        .unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj[0].key.as_str(), "a");
        assert_eq!(v.get("a").unwrap().as_i64(), Some(1));

        let arr = v.get("b").unwrap().as_array().unwrap();
        assert_eq!(arr.len(), 4);
        assert_eq!(arr[3].as_str(), Some("x\ty"));

        assert_eq!(v.get("c").unwrap().get("").unwrap().as_str(), Some("empty"));
    }

    #[test]
    fn test_negative_and_large_ints() {
        let alloc = bumpalo::Bump::new();
        let v = parse_line("-1234", &alloc).unwrap();
        assert_eq!(v.as_i64(), Some(-1234));

        let v = parse_line("9223372036854775807", &alloc).unwrap();
        assert_eq!(v.as_i64(), Some(i64::MAX));
    }

    #[test]
    fn test_rejects_floats() {
        let alloc = bumpalo::Bump::new();
        assert!(parse_line("1.5", &alloc).is_err());
        assert!(parse_line("1e10", &alloc).is_err());
    }

    #[test]
    fn test_utf8_passthrough() {
        let alloc = bumpalo::Bump::new();
        let v = parse_line(r#""😀""#, &alloc).unwrap();
        assert_eq!(v.as_str(), Some("😀"));
    }

    // spec.md §4.8: "non-ASCII replaced with '?'". A surrogate pair's
    // two halves are each an individual \u escape above 0x7F, so each
    // becomes its own '?' rather than recombining into the astral
    // scalar they'd otherwise decode to.
    #[test]
    fn test_escaped_surrogate_pair_becomes_two_question_marks() {
        let alloc = bumpalo::Bump::new();
        let input = "\"\\uD83D\\uDE00\"";
        let v = parse_line(input, &alloc).unwrap();
        assert_eq!(v.as_str(), Some("??"));
    }

    #[test]
    fn test_unpaired_surrogate_becomes_question_mark() {
        let alloc = bumpalo::Bump::new();
        let v = parse_line(r#""\ud83dX""#, &alloc).unwrap();
        assert_eq!(v.as_str(), Some("?X"));
    }

    #[test]
    fn test_escaped_bmp_non_ascii_becomes_question_mark() {
        let alloc = bumpalo::Bump::new();
        let v = parse_line("\"\\u00e9\"", &alloc).unwrap();
        assert_eq!(v.as_str(), Some("?"));
    }

    #[test]
    fn test_escaped_ascii_codepoint_decodes_literally() {
        let alloc = bumpalo::Bump::new();
        let v = parse_line("\"\\u0041\"", &alloc).unwrap();
        assert_eq!(v.as_str(), Some("A"));
    }

    #[test]
    fn test_trailing_data_rejected() {
        let alloc = bumpalo::Bump::new();
        assert!(parse_line("1 2", &alloc).is_err());
    }

    #[test]
    fn test_object_preserves_order() {
        let alloc = bumpalo::Bump::new();
        let v = parse_line(r#"{"z": 1, "a": 2, "m": 3}"#, &alloc).unwrap();
        let keys: Vec<&str> = v.object_keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
