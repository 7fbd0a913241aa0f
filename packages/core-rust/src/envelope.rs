//! Attachment-upload envelope and its binary codec.
//!
//! # Wire format
//!
//! All integers are little-endian `i64`:
//!
//! ```text
//! file_len            -1 when no file is attached
//! file sub-record     present only when file_len != -1, exactly file_len bytes:
//!     filename_len, filename
//!     header_len,   header dump ("Key: value\n" per value)
//!     content_len,  content            (optional; absent means empty)
//! description_len, description
//! focus_len,       focus
//! ```
//!
//! The content segment sits inside the length-prefixed file sub-record, so a
//! peer that stops reading after the header dump still finds the description
//! at the right offset.

use bytes::Buf;

use crate::header::MimeHeader;
use crate::wire::{self, CodecError, ABSENT};

/// An uploaded file: name, MIME headers and raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: String,
    pub header: MimeHeader,
    pub content: Vec<u8>,
}

impl FileRecord {
    #[must_use]
    pub fn new(filename: impl Into<String>, header: MimeHeader, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            header,
            content,
        }
    }

    /// The declared `Content-Type`, if the upload carried one.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header.get("Content-Type")
    }

    /// Size of the file contents in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Attachment-upload request as it crosses a process boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// The uploaded file. `None` is encoded as the `-1` length sentinel.
    pub file: Option<FileRecord>,
    /// Alt text for screen readers. May be empty.
    pub description: String,
    /// Focal point as two comma-separated floats, e.g. `"-0.5,0.565"`. May be empty.
    pub focus: String,
}

impl Envelope {
    /// Encodes the envelope into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        match &self.file {
            Some(file) => wire::put_bytes(&mut buf, &encode_file(file)),
            None => wire::put_len(&mut buf, ABSENT),
        }
        wire::put_str(&mut buf, &self.description);
        wire::put_str(&mut buf, &self.focus);

        buf
    }

    /// Decodes an envelope, rejecting truncated or trailing data.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] when any length prefix exceeds the
    /// remaining bytes and [`CodecError::Malformed`] for negative lengths,
    /// invalid UTF-8 or bytes left over after the last field.
    pub fn decode(mut data: &[u8]) -> Result<Self, CodecError> {
        let file_len = wire::get_len(&mut data, "file")?;
        let file = if file_len == ABSENT {
            None
        } else {
            let len = wire::checked_len(&data, file_len, "file")?;
            let (sub, rest) = data.split_at(len);
            data = rest;
            Some(decode_file(sub)?)
        };

        let description = wire::get_string(&mut data, "description")?;
        let focus = wire::get_string(&mut data, "focus")?;

        if data.has_remaining() {
            return Err(CodecError::malformed(
                "envelope",
                format!("{} trailing bytes", data.remaining()),
            ));
        }

        Ok(Self {
            file,
            description,
            focus,
        })
    }

    fn encoded_len(&self) -> usize {
        let file = self.file.as_ref().map_or(0, |f| {
            3 * wire::PREFIX_LEN + f.filename.len() + f.header.to_dump().len() + f.content.len()
        });
        3 * wire::PREFIX_LEN + file + self.description.len() + self.focus.len()
    }
}

fn encode_file(file: &FileRecord) -> Vec<u8> {
    let dump = file.header.to_dump();
    let mut sub = Vec::with_capacity(
        3 * wire::PREFIX_LEN + file.filename.len() + dump.len() + file.content.len(),
    );
    wire::put_str(&mut sub, &file.filename);
    wire::put_str(&mut sub, &dump);
    wire::put_bytes(&mut sub, &file.content);
    sub
}

fn decode_file(mut sub: &[u8]) -> Result<FileRecord, CodecError> {
    let filename = wire::get_string(&mut sub, "filename")?;
    let dump = wire::get_string(&mut sub, "header")?;
    let content = if sub.has_remaining() {
        wire::get_bytes(&mut sub, "content")?
    } else {
        Vec::new()
    };

    if sub.has_remaining() {
        return Err(CodecError::malformed(
            "file",
            format!("{} trailing bytes in file record", sub.remaining()),
        ));
    }

    Ok(FileRecord {
        filename,
        header: MimeHeader::from_dump(&dump),
        content,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn kitten() -> Envelope {
        let mut header = MimeHeader::new();
        header.add("Content-Disposition", "form-data; name=\"file\"; filename=\"kitten.jpg\"");
        header.add("Content-Type", "image/jpeg");
        Envelope {
            file: Some(FileRecord::new("kitten.jpg", header, vec![0xff, 0xd8, 0xff, 0xe0])),
            description: "This is an image of some kittens".to_string(),
            focus: "-0.5,0.565".to_string(),
        }
    }

    #[test]
    fn absent_file_is_minus_one_sentinel() {
        let env = Envelope {
            file: None,
            description: "d".to_string(),
            focus: String::new(),
        };
        let bytes = env.encode();
        assert_eq!(&bytes[..8], &(-1i64).to_le_bytes());
        assert_eq!(bytes.len(), 8 + 8 + 1 + 8);
        assert_eq!(Envelope::decode(&bytes).unwrap(), env);
    }

    #[test]
    fn file_record_layout_matches_wire_format() {
        let env = kitten();
        let bytes = env.encode();

        let file_len = i64::from_le_bytes(bytes[..8].try_into().unwrap());
        let filename_len = i64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(filename_len, 10);
        assert_eq!(&bytes[16..26], b"kitten.jpg");

        let header_len = i64::from_le_bytes(bytes[26..34].try_into().unwrap());
        let header_end = 34 + usize::try_from(header_len).unwrap();
        let dump = std::str::from_utf8(&bytes[34..header_end]).unwrap();
        assert!(dump.ends_with("Content-Type: image/jpeg\n"));

        let content_len = i64::from_le_bytes(bytes[header_end..header_end + 8].try_into().unwrap());
        assert_eq!(content_len, 4);
        assert_eq!(usize::try_from(file_len).unwrap(), header_end + 8 + 4 - 8);
    }

    #[test]
    fn file_record_without_content_segment_decodes_as_empty() {
        // Older peers write only filename and header dump.
        let mut sub = Vec::new();
        wire::put_str(&mut sub, "a.png");
        wire::put_str(&mut sub, "Content-Type: image/png\n");

        let mut buf = Vec::new();
        wire::put_bytes(&mut buf, &sub);
        wire::put_str(&mut buf, "alt");
        wire::put_str(&mut buf, "0,0");

        let env = Envelope::decode(&buf).unwrap();
        let file = env.file.unwrap();
        assert_eq!(file.filename, "a.png");
        assert_eq!(file.content_type(), Some("image/png"));
        assert!(file.content.is_empty());
        assert_eq!(env.description, "alt");
    }

    #[test]
    fn truncated_buffer_is_rejected_at_every_cut() {
        let bytes = kitten().encode();
        for cut in 0..bytes.len() {
            let err = Envelope::decode(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, CodecError::Truncated { .. } | CodecError::Malformed { .. }),
                "cut at {cut} produced {err:?}"
            );
        }
    }

    #[test]
    fn declared_length_past_end_is_truncation() {
        let mut buf = Vec::new();
        wire::put_len(&mut buf, -1);
        wire::put_len(&mut buf, 100);
        buf.extend_from_slice(b"short");
        assert!(matches!(
            Envelope::decode(&buf),
            Err(CodecError::Truncated { field: "description", needed: 100, remaining: 5 })
        ));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = kitten().encode();
        bytes.push(0);
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(CodecError::Malformed { field: "envelope", .. })
        ));
    }

    #[test]
    fn malformed_header_lines_are_dropped_not_rejected() {
        let mut sub = Vec::new();
        wire::put_str(&mut sub, "x.bin");
        wire::put_str(&mut sub, "garbage\nContent-Type: application/octet-stream\n");
        wire::put_bytes(&mut sub, b"\x00\x01");

        let mut buf = Vec::new();
        wire::put_bytes(&mut buf, &sub);
        wire::put_str(&mut buf, "");
        wire::put_str(&mut buf, "");

        let file = Envelope::decode(&buf).unwrap().file.unwrap();
        assert_eq!(file.header.len(), 1);
        assert_eq!(file.content, vec![0, 1]);
    }

    fn header_strategy() -> impl Strategy<Value = MimeHeader> {
        prop::collection::vec(("[A-Za-z][A-Za-z0-9-]{0,12}", "[ -~]{0,24}"), 0..5)
            .prop_map(|pairs| pairs.into_iter().collect())
    }

    fn envelope_strategy() -> impl Strategy<Value = Envelope> {
        let file = prop::option::of(
            ("\\PC{0,16}", header_strategy(), prop::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(name, header, content)| FileRecord::new(name, header, content)),
        );
        (file, "\\PC{0,32}", "\\PC{0,16}").prop_map(|(file, description, focus)| Envelope {
            file,
            description,
            focus,
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(env in envelope_strategy()) {
            prop_assert_eq!(Envelope::decode(&env.encode()).unwrap(), env);
        }

        #[test]
        fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = Envelope::decode(&data);
        }
    }
}
