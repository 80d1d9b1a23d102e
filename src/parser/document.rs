//! Parsed document view
//!
//! `PdfDocument` wraps the reader after the initial parse and exposes the
//! stable surface: document facts (version, offsets, flags), the merged
//! trailer family, the final xref map, lazy object resolution, and the
//! validation outcomes.

use std::collections::HashMap;

use log::error;

use super::objects::{ObjectKey, PdfDictionary, PdfObject};
use super::reader::PdfReader;
use super::validation::{ByteRangeStructure, ObjectChecks, ValidationSink};
use super::xref::XrefEntry;
use super::ParseResult;
use crate::encryption::AccessPermissions;
use crate::io::RandomAccessRead;

/// Facts established by the initial parse.
#[derive(Debug, Clone)]
pub struct DocumentState {
    pub version: f32,
    /// Byte offset of `%PDF-`; added to every stored offset in the file.
    pub header_offset: u64,
    pub is_fdf: bool,
    pub is_encrypted: bool,
    pub is_linearized: bool,
    /// The section `startxref` referenced was an xref stream.
    pub is_xref_stream: bool,
    /// Absolute offset of the first xref section.
    pub start_xref: u64,
    /// Merged trailer over the whole `/Prev` chain, latest wins.
    pub trailer: PdfDictionary,
    /// Trailer of the section `startxref` referenced.
    pub first_page_trailer: Option<PdfDictionary>,
    /// Trailer at the end of the `/Prev` chain.
    pub last_trailer: Option<PdfDictionary>,
    pub permissions: AccessPermissions,
}

impl Default for DocumentState {
    fn default() -> Self {
        Self {
            version: 1.4,
            header_offset: 0,
            is_fdf: false,
            is_encrypted: false,
            is_linearized: false,
            is_xref_stream: false,
            start_xref: 0,
            trailer: PdfDictionary::new(),
            first_page_trailer: None,
            last_trailer: None,
            permissions: AccessPermissions::all(),
        }
    }
}

/// A parsed document. Object resolution is lazy, so most accessors that
/// touch objects need `&mut self`.
pub struct PdfDocument<R: RandomAccessRead> {
    reader: PdfReader<R>,
}

impl<R: RandomAccessRead> PdfDocument<R> {
    pub(crate) fn new(reader: PdfReader<R>) -> Self {
        Self { reader }
    }

    pub fn version(&self) -> f32 {
        self.reader.doc.version
    }

    pub fn header_offset(&self) -> u64 {
        self.reader.doc.header_offset
    }

    pub fn is_fdf(&self) -> bool {
        self.reader.doc.is_fdf
    }

    pub fn is_encrypted(&self) -> bool {
        self.reader.doc.is_encrypted
    }

    pub fn is_linearized(&self) -> bool {
        self.reader.doc.is_linearized
    }

    pub fn is_xref_stream(&self) -> bool {
        self.reader.doc.is_xref_stream
    }

    pub fn start_xref(&self) -> u64 {
        self.reader.doc.start_xref
    }

    /// Bytes after `%%EOF` (validation mode; `-1` when the marker or the
    /// measurement is absent).
    pub fn post_eof_data_size(&self) -> i64 {
        self.reader.sink.post_eof_data_size
    }

    pub fn trailer(&self) -> &PdfDictionary {
        &self.reader.doc.trailer
    }

    pub fn first_page_trailer(&self) -> Option<&PdfDictionary> {
        self.reader.doc.first_page_trailer.as_ref()
    }

    pub fn last_trailer(&self) -> Option<&PdfDictionary> {
        self.reader.doc.last_trailer.as_ref()
    }

    /// The final merged xref map. Offsets are header-relative.
    pub fn xref(&self) -> &HashMap<ObjectKey, XrefEntry> {
        &self.reader.xref
    }

    pub fn access_permissions(&self) -> AccessPermissions {
        self.reader.doc.permissions
    }

    /// Non-fatal recovery diagnostics collected during parsing.
    pub fn diagnostics(&self) -> &[String] {
        &self.reader.diagnostics
    }

    /// Resolve an indirect object; parse errors surface here.
    pub fn get_object(&mut self, key: ObjectKey) -> ParseResult<PdfObject> {
        self.reader.get_object(key)
    }

    /// Resolve an indirect object, mapping failures to `None`. A broken or
    /// missing object resolves to `Some(Null)`.
    pub fn resolve(&mut self, key: ObjectKey) -> Option<PdfObject> {
        match self.reader.get_object(key) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("failed to resolve {}: {}", key, e);
                None
            }
        }
    }

    /// Follow a `Reference` value to its target; other values pass
    /// through.
    pub fn resolve_value(&mut self, value: &PdfObject) -> PdfObject {
        match value.as_reference() {
            Some(key) => self.resolve(key).unwrap_or(PdfObject::Null),
            None => value.clone(),
        }
    }

    /// All objects whose dictionary `/Type` equals `type_name`, resolved
    /// through the final xref.
    pub fn objects_by_type(&mut self, type_name: &str) -> Vec<(ObjectKey, PdfObject)> {
        let mut keys: Vec<ObjectKey> = self.reader.xref.keys().copied().collect();
        keys.sort();
        let mut found = Vec::new();
        for key in keys {
            let Some(value) = self.resolve(key) else {
                continue;
            };
            let matches = value
                .as_dict()
                .and_then(|dict| dict.type_name())
                .map(|name| name.is(type_name))
                .unwrap_or(false);
            if matches {
                found.push((key, value));
            }
        }
        found
    }

    /// The conformance signal sink (validation mode).
    pub fn validation(&self) -> &ValidationSink {
        &self.reader.sink
    }

    /// Per-object conformance flags (validation mode).
    pub fn object_checks(&self, key: ObjectKey) -> Option<&ObjectChecks> {
        self.reader.pool.checks(&key)
    }

    /// Signature structures whose `/ByteRange` matched the measured
    /// offsets.
    pub fn good_byte_ranges(&self) -> &[PdfDictionary] {
        &self.reader.sink.good_byte_ranges
    }

    /// All signature byte-range structures that were discovered.
    pub fn byte_range_structures(&self) -> &[ByteRangeStructure] {
        &self.reader.sink.byte_ranges
    }
}
