//! BCP47 language tags attached to statuses, with a binary codec using the
//! same length-prefixed framing as the envelope.
//!
//! Binary layout: `tag`, `tag_str`, `display_str`, each as `i64` length +
//! UTF-8 bytes. `tag` is re-parsed on decode, so a record carrying an
//! invalid tag is rejected.

use crate::wire::{self, CodecError};

/// Errors from parsing a language tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LanguageError {
    #[error("empty language tag")]
    Empty,
    #[error("invalid subtag {subtag:?} in language tag {tag:?}")]
    InvalidSubtag { tag: String, subtag: String },
}

/// A parsed language tag with ready-to-use strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    /// Canonical BCP47 tag, e.g. `en-GB`, `zh-Hant-TW`.
    pub tag: String,
    /// Normalized tag string as stored on statuses.
    pub tag_str: String,
    /// Human-readable name. Defaults to the tag itself when no name is known.
    pub display_str: String,
}

impl Language {
    /// Parses and normalizes `input`.
    ///
    /// # Errors
    ///
    /// Returns [`LanguageError`] if the tag is empty or any subtag is not
    /// 1-8 ASCII alphanumerics (the primary subtag must be 2-8 letters).
    pub fn parse(input: &str) -> Result<Self, LanguageError> {
        let tag = normalize_tag(input)?;
        Ok(Self {
            tag_str: tag.clone(),
            display_str: tag.clone(),
            tag,
        })
    }

    /// Replaces the display string.
    #[must_use]
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display_str = display.into();
        self
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            3 * wire::PREFIX_LEN + self.tag.len() + self.tag_str.len() + self.display_str.len(),
        );
        wire::put_str(&mut buf, &self.tag);
        wire::put_str(&mut buf, &self.tag_str);
        wire::put_str(&mut buf, &self.display_str);
        buf
    }

    /// # Errors
    ///
    /// Returns [`CodecError`] on truncation or when `tag` does not parse.
    pub fn decode(mut data: &[u8]) -> Result<Self, CodecError> {
        let raw_tag = wire::get_string(&mut data, "tag")?;
        let tag = normalize_tag(&raw_tag).map_err(|e| CodecError::Malformed {
            field: "tag",
            reason: e.to_string(),
        })?;
        let tag_str = wire::get_string(&mut data, "tag_str")?;
        let display_str = wire::get_string(&mut data, "display_str")?;
        Ok(Self {
            tag,
            tag_str,
            display_str,
        })
    }
}

/// Normalizes subtag casing: primary language lower case, 4-letter script
/// title case, 2-letter or 3-digit region upper case, everything else lower.
/// `_` is accepted as a separator and rewritten to `-`.
///
/// # Errors
///
/// See [`Language::parse`].
pub fn normalize_tag(input: &str) -> Result<String, LanguageError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(LanguageError::Empty);
    }

    let mut out: Vec<String> = Vec::new();
    for (i, subtag) in input.split(['-', '_']).enumerate() {
        let invalid = || LanguageError::InvalidSubtag {
            tag: input.to_string(),
            subtag: subtag.to_string(),
        };
        if subtag.is_empty() || subtag.len() > 8 || !subtag.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        let normalized = if i == 0 {
            if subtag.len() < 2 || !subtag.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(invalid());
            }
            subtag.to_ascii_lowercase()
        } else if subtag.len() == 4 && subtag.bytes().all(|b| b.is_ascii_alphabetic()) {
            let mut script = subtag.to_ascii_lowercase();
            script[..1].make_ascii_uppercase();
            script
        } else if (subtag.len() == 2 && subtag.bytes().all(|b| b.is_ascii_alphabetic()))
            || (subtag.len() == 3 && subtag.bytes().all(|b| b.is_ascii_digit()))
        {
            subtag.to_ascii_uppercase()
        } else {
            subtag.to_ascii_lowercase()
        };
        out.push(normalized);
    }
    Ok(out.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_casing() {
        assert_eq!(normalize_tag("EN").unwrap(), "en");
        assert_eq!(normalize_tag("en_gb").unwrap(), "en-GB");
        assert_eq!(normalize_tag("zh-hant-tw").unwrap(), "zh-Hant-TW");
        assert_eq!(normalize_tag("es-419").unwrap(), "es-419");
    }

    #[test]
    fn rejects_bad_tags() {
        assert_eq!(normalize_tag("  "), Err(LanguageError::Empty));
        assert!(normalize_tag("e").is_err());
        assert!(normalize_tag("en--gb").is_err());
        assert!(normalize_tag("en-toolongsubtag").is_err());
        assert!(normalize_tag("1en").is_err());
    }

    #[test]
    fn binary_record_keeps_all_three_strings() {
        let lang = Language::parse("nl").unwrap().with_display("Dutch (Nederlands)");
        let decoded = Language::decode(&lang.encode()).unwrap();
        assert_eq!(decoded, lang);
    }

    #[test]
    fn decode_rejects_invalid_tag_and_truncation() {
        let mut buf = Vec::new();
        wire::put_str(&mut buf, "!!");
        wire::put_str(&mut buf, "");
        wire::put_str(&mut buf, "");
        assert!(matches!(
            Language::decode(&buf),
            Err(CodecError::Malformed { field: "tag", .. })
        ));

        let good = Language::parse("de").unwrap().encode();
        assert!(matches!(
            Language::decode(&good[..good.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
