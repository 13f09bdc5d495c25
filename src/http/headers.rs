//! Case-insensitive, insertion-ordered header table.
//!
//! Keys are stored lower-cased. A repeated field name is folded into the
//! existing entry as `existing,new` so the table never holds duplicate keys.

use indexmap::IndexMap;

use crate::http::parser::ParseError;

const CRLF: &[u8] = b"\r\n";

/// Punctuation allowed in a header field name besides letters and digits.
const TOKEN_PUNCTUATION: &[u8] = b"!#$%&'*+-.^_`|~";

/// Returns `true` if `byte` may appear in a header field name.
pub fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || TOKEN_PUNCTUATION.contains(&byte)
}

/// Position of the first CRLF in `buf`, if any.
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: IndexMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `key`. The key is lower-cased; an overwritten
    /// entry keeps its position.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Removes `key`, returning its value if it was present.
    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(&key.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Consumes at most one header line from `buf`.
    ///
    /// Returns `(consumed, is_terminator)`:
    ///
    /// - `(0, false)` when `buf` holds no complete line yet; nothing is consumed.
    /// - `(2, true)` for the blank line that ends the header section.
    /// - `(line_len + 2, false)` after storing one field.
    pub fn parse(&mut self, buf: &[u8]) -> Result<(usize, bool), ParseError> {
        let Some(idx) = find_crlf(buf) else {
            return Ok((0, false));
        };

        if idx == 0 {
            return Ok((CRLF.len(), true));
        }

        let line = std::str::from_utf8(&buf[..idx])
            .map_err(|_| ParseError::MalformedHeader("header line is not valid UTF-8".into()))?
            .trim();

        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedHeader(format!("missing colon: {line:?}")))?;

        if key.contains(' ') {
            return Err(ParseError::MalformedHeader(format!(
                "field name must not contain spaces: {key:?}"
            )));
        }

        let key = key.trim();
        let value = value.trim();

        if key.is_empty() || !key.bytes().all(is_token_byte) {
            return Err(ParseError::InvalidHeaderToken(key.to_string()));
        }

        self.fold(key, value);

        Ok((idx + CRLF.len(), false))
    }

    fn fold(&mut self, key: &str, value: &str) {
        self.entries
            .entry(key.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
}
