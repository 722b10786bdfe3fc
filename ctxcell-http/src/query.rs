//! Parsed URL query string.

use std::collections::BTreeMap;

use crate::error::QueryError;

/// Query parameters, each name mapped to its values in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlQuery(BTreeMap<String, Vec<String>>);

impl UrlQuery {
    /// Parse a raw `application/x-www-form-urlencoded` query string.
    ///
    /// Strict about malformed percent escapes, `;` separators and escapes
    /// that decode to invalid UTF-8, which are rejected rather than decoded
    /// lossily.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        if raw.contains(';') {
            return Err(QueryError::Semicolon);
        }
        check_escapes(raw)?;

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut offset = 0;
        for segment in raw.split('&') {
            let start = offset;
            offset += segment.len() + 1;
            if segment.is_empty() {
                continue;
            }
            let (name, value, value_start) = match segment.split_once('=') {
                Some((name, value)) => (name, value, start + name.len() + 1),
                None => (segment, "", start + segment.len()),
            };
            params
                .entry(decode_component(name, start)?)
                .or_default()
                .push(decode_component(value, value_start)?);
        }
        Ok(Self(params))
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// Every value for `name`, empty if absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of distinct parameter names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Decode one name or value. `offset` locates it in the raw query.
fn decode_component(component: &str, offset: usize) -> Result<String, QueryError> {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| QueryError::InvalidUtf8 { offset })
}

fn check_escapes(raw: &str) -> Result<(), QueryError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(QueryError::InvalidEscape {
                    escape: raw[i..].chars().take(3).collect(),
                    offset: i,
                });
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}
