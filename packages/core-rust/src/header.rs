//! MIME header multimap carried with an uploaded file.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Separator between a header key and its value in the flattened dump.
const SEPARATOR: &str = ": ";

/// Ordered multimap of MIME headers.
///
/// Keys are stored in canonical form (`content-type` becomes `Content-Type`),
/// so lookups are case-insensitive for well-formed keys. A key with several
/// values keeps them in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeHeader(BTreeMap<String, Vec<String>>);

impl MimeHeader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under the canonical form of `key`.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.0
            .entry(canonical_key(key))
            .or_default()
            .push(value.into());
    }

    /// Replaces all values of `key` with a single value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(canonical_key(key), vec![value.into()]);
    }

    /// Returns the first value of `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(&canonical_key(key))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value of `key`.
    #[must_use]
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0
            .get(&canonical_key(key))
            .map_or(&[][..], Vec::as_slice)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Flattens the header into `"key: value\n"` lines, one line per value.
    #[must_use]
    pub fn to_dump(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.iter() {
            // Writing to a String cannot fail.
            let _ = writeln!(out, "{key}{SEPARATOR}{value}");
        }
        out
    }

    /// Rebuilds a header from a `"key: value\n"` dump.
    ///
    /// Blank lines are skipped. A line without the `": "` separator is
    /// dropped rather than rejected, so malformed input decodes lossily.
    #[must_use]
    pub fn from_dump(dump: &str) -> Self {
        let mut header = Self::new();
        for line in dump.split('\n') {
            if line.is_empty() {
                continue;
            }
            match line.split_once(SEPARATOR) {
                Some((key, value)) => header.add(key, value),
                None => tracing::debug!(line, "dropping header line without separator"),
            }
        }
        header
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for MimeHeader {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut header = Self::new();
        for (k, v) in iter {
            header.add(k.as_ref(), v);
        }
        header
    }
}

/// Canonical MIME key: first letter and every letter after a hyphen upper
/// case, the rest lower case. Keys containing bytes outside the token
/// alphabet are returned unchanged.
#[must_use]
pub fn canonical_key(key: &str) -> String {
    if !key.bytes().all(is_token_byte) {
        return key.to_string();
    }
    let mut upper = true;
    key.chars()
        .map(|c| {
            let mapped = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            mapped
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
