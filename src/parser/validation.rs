//! PDF/A-1b conformance signal collection
//!
//! Validation mode records what the file actually looked like without ever
//! changing what is parsed: EOL discipline around keywords (ISO 19005-1
//! clauses 6.1.4, 6.1.7, 6.1.8), trailing data after `%%EOF` (6.1.3), header
//! comment bytes (6.1.2), and the byte positions of signature `/Contents`
//! strings so `/ByteRange` entries can be checked against reality.

use super::objects::{ObjectKey, PdfDictionary};

/// Offsets of a signature's `/Contents` value and its revision's `%%EOF`,
/// relative to the document start (header offset already subtracted).
///
/// A dictionary is treated as a signature when it carries both `/Contents`
/// and `/ByteRange` and its `/Type`, if present, is `/Sig`.
#[derive(Debug, Clone)]
pub struct ByteRangeStructure {
    pub dict: PdfDictionary,
    /// Offset of the first byte of the `/Contents` string token.
    pub contents_begin: i64,
    /// Offset one past the last byte of the `/Contents` string token.
    pub contents_end: i64,
    /// Offset of the `F` of the next `%%EOF` after the dictionary.
    pub first_eof: i64,
    /// Set when `/Contents` was an indirect reference; the offsets are then
    /// discovered by a post-parse pass.
    pub indirect: Option<ObjectKey>,
}

impl ByteRangeStructure {
    pub fn new(dict: PdfDictionary) -> Self {
        Self {
            dict,
            contents_begin: -1,
            contents_end: -1,
            first_eof: -1,
            indirect: None,
        }
    }

    pub fn offsets_known(&self) -> bool {
        self.contents_begin >= 0 && self.contents_end >= 0 && self.first_eof >= 0
    }

    /// Compare the dictionary's `/ByteRange` against the recorded offsets:
    /// `[0, contents_begin, contents_end, first_eof - contents_end + 1]`
    /// with `contents_end` exclusive. All four entries are checked.
    pub fn is_valid_byte_range(&self) -> bool {
        let range = match self.dict.get("ByteRange").and_then(|obj| obj.as_array()) {
            Some(array) => array,
            None => return false,
        };
        if range.len() != 4 {
            return false;
        }
        let mut values = [0i64; 4];
        for (i, slot) in values.iter_mut().enumerate() {
            match range.get(i).and_then(|obj| obj.as_integer()) {
                Some(v) => *slot = v,
                None => return false,
            }
        }
        values[0] == 0
            && values[1] == self.contents_begin
            && values[2] == self.contents_end
            && values[3] == self.first_eof - self.contents_end + 1
    }
}

/// Per-object conformance flags (ISO 19005-1 clause 6.1.8). Everything
/// defaults to compliant; a flag only flips when a violation is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectChecks {
    /// `N G obj` used exactly one space between each element.
    pub header_format_compliant: bool,
    /// An EOL marker preceded the object header and followed `obj`.
    pub header_of_object_eol_compliant: bool,
    /// An EOL marker preceded and followed `endobj`.
    pub end_of_object_eol_compliant: bool,
}

impl Default for ObjectChecks {
    fn default() -> Self {
        Self {
            header_format_compliant: true,
            header_of_object_eol_compliant: true,
            end_of_object_eol_compliant: true,
        }
    }
}

/// Accumulates conformance signals for the lifetime of one parse.
#[derive(Debug)]
pub struct ValidationSink {
    /// Bytes after `%%EOF` (a single trailing EOL excluded); `-1` when the
    /// marker is absent.
    pub post_eof_data_size: i64,
    /// A CR inside the xref table was followed by LF, or the marker was a
    /// bare LF followed by a digit (clause 6.1.4).
    pub xref_eol_markers_comply: bool,
    /// Subsection headers used exactly one space between start and count.
    pub subsection_header_space_separated: bool,
    /// The four bytes after `%` on the header's second line; `-1` each when
    /// the comment is missing or invalid.
    pub header_comment_bytes: [i32; 4],
    /// Signature structures discovered during dictionary parsing.
    pub byte_ranges: Vec<ByteRangeStructure>,
    /// Dictionaries whose `/ByteRange` matched the recorded offsets.
    pub good_byte_ranges: Vec<PdfDictionary>,
}

impl Default for ValidationSink {
    fn default() -> Self {
        Self {
            post_eof_data_size: -1,
            xref_eol_markers_comply: true,
            subsection_header_space_separated: true,
            header_comment_bytes: [-1; 4],
            byte_ranges: Vec::new(),
            good_byte_ranges: Vec::new(),
        }
    }
}

impl ValidationSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{PdfArray, PdfName, PdfObject};

    fn signature_dict(range: [i64; 4]) -> PdfDictionary {
        let mut dict = PdfDictionary::new();
        dict.insert(
            PdfName::new(b"ByteRange".to_vec()),
            PdfObject::Array(PdfArray(range.iter().map(|v| PdfObject::Integer(*v)).collect())),
        );
        dict
    }

    #[test]
    fn test_byte_range_match() {
        let mut s = ByteRangeStructure::new(signature_dict([0, 100, 200, 51]));
        s.contents_begin = 100;
        s.contents_end = 200;
        s.first_eof = 250;
        assert!(s.is_valid_byte_range());
    }

    #[test]
    fn test_byte_range_all_entries_checked() {
        // a wrong third entry must fail even when the second matches
        let mut s = ByteRangeStructure::new(signature_dict([0, 100, 199, 51]));
        s.contents_begin = 100;
        s.contents_end = 200;
        s.first_eof = 250;
        assert!(!s.is_valid_byte_range());

        // wrong first entry
        let mut s = ByteRangeStructure::new(signature_dict([1, 100, 200, 51]));
        s.contents_begin = 100;
        s.contents_end = 200;
        s.first_eof = 250;
        assert!(!s.is_valid_byte_range());

        // wrong trailing length
        let mut s = ByteRangeStructure::new(signature_dict([0, 100, 200, 50]));
        s.contents_begin = 100;
        s.contents_end = 200;
        s.first_eof = 250;
        assert!(!s.is_valid_byte_range());
    }

    #[test]
    fn test_byte_range_non_integer() {
        let mut dict = PdfDictionary::new();
        dict.insert(
            PdfName::new(b"ByteRange".to_vec()),
            PdfObject::Array(PdfArray(vec![
                PdfObject::Integer(0),
                PdfObject::Name(PdfName::new(b"x".to_vec())),
                PdfObject::Integer(200),
                PdfObject::Integer(51),
            ])),
        );
        let s = ByteRangeStructure::new(dict);
        assert!(!s.is_valid_byte_range());
    }

    #[test]
    fn test_defaults() {
        let sink = ValidationSink::new();
        assert_eq!(sink.post_eof_data_size, -1);
        assert!(sink.xref_eol_markers_comply);
        assert!(sink.subsection_header_space_separated);
        assert_eq!(sink.header_comment_bytes, [-1; 4]);
    }
}
