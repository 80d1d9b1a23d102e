//! Parse driver
//!
//! `PdfReader` owns the cursor and every piece of per-parse state, and runs
//! the top-level sequence: header, xref chain (or brute-force rebuild),
//! decryption setup, pre-warming, and in validation mode the linearization
//! check and the signature byte-range pass. `parse()` consumes the reader
//! and hands back a [`PdfDocument`].

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{error, warn};

use super::cursor::ByteCursor;
use super::document::{DocumentState, PdfDocument};
use super::header;
use super::objects::{ObjectKey, PdfObject};
use super::scanner::BruteForceScanner;
use super::store::ObjectPool;
use super::validation::ValidationSink;
use super::xref::{XrefEntry, XrefResolver};
use super::{ParseError, ParseMode, ParseOptions, ParseResult};
use crate::encryption::{AccessPermissions, DecryptionMaterial, SecurityHandler};
use crate::io::{MemoryRead, RandomAccessRead};

/// Linearization dictionaries must start within the first kilobyte.
const LINEARIZATION_WINDOW: u64 = 1024;

pub struct PdfReader<R: RandomAccessRead> {
    pub(crate) cursor: ByteCursor<R>,
    pub(crate) options: ParseOptions,
    pub(crate) resolver: XrefResolver,
    pub(crate) pool: ObjectPool,
    pub(crate) scanner: BruteForceScanner,
    pub(crate) sink: ValidationSink,
    pub(crate) doc: DocumentState,
    /// Merged xref map; offsets are header-relative.
    pub(crate) xref: HashMap<ObjectKey, XrefEntry>,
    pub(crate) security: Option<Box<dyn SecurityHandler>>,
    pub(crate) material: DecryptionMaterial,
    /// Key of the encryption dictionary; never decrypted itself.
    pub(crate) encrypt_key: Option<ObjectKey>,
    /// Keys whose `/Length` is being resolved right now.
    pub(crate) in_flight_lengths: HashSet<ObjectKey>,
    pub(crate) diagnostics: Vec<String>,
    pub(crate) file_len: u64,
}

impl PdfReader<MemoryRead> {
    /// Read a file into memory and prepare a reader with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> ParseResult<Self> {
        Ok(Self::new(MemoryRead::open(path)?))
    }
}

impl<R: RandomAccessRead> PdfReader<R> {
    pub fn new(source: R) -> Self {
        Self::new_with_options(source, ParseOptions::default())
    }

    pub fn new_with_options(source: R, options: ParseOptions) -> Self {
        let file_len = source.len();
        Self {
            cursor: ByteCursor::new(source),
            options,
            resolver: XrefResolver::new(),
            pool: ObjectPool::new(),
            scanner: BruteForceScanner::new(),
            sink: ValidationSink::new(),
            doc: DocumentState::default(),
            xref: HashMap::new(),
            security: None,
            material: DecryptionMaterial::default(),
            encrypt_key: None,
            in_flight_lengths: HashSet::new(),
            diagnostics: Vec::new(),
            file_len,
        }
    }

    /// Install the collaborator that will decrypt objects and streams.
    pub fn with_security_handler(mut self, handler: Box<dyn SecurityHandler>) -> Self {
        self.security = Some(handler);
        self
    }

    /// Set the decryption material handed to the security handler.
    pub fn with_decryption_material(mut self, material: DecryptionMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn mode(&self) -> ParseMode {
        self.options.mode
    }

    pub(crate) fn push_diagnostic(&mut self, message: String) {
        warn!("{}", message);
        self.diagnostics.push(message);
    }

    /// Run the initial parse and return the document view.
    pub fn parse(mut self) -> ParseResult<PdfDocument<R>> {
        if self.file_len == 0 {
            return Err(ParseError::EmptyFile);
        }

        let header = header::parse_header(&mut self.cursor, self.options.mode)?;
        self.doc.version = header.version;
        self.doc.header_offset = header.offset;
        self.doc.is_fdf = header.is_fdf;
        self.sink.header_comment_bytes = header.comment_bytes;

        match self.find_startxref()? {
            Some(startxref_pos) => {
                self.parse_xref_chain(startxref_pos)?;
            }
            None => {
                if self.options.mode == ParseMode::Validation {
                    return Err(ParseError::MissingStartXref);
                } else if self.options.mode.is_lenient() {
                    self.rebuild_trailer()?;
                } else {
                    return Err(ParseError::MissingStartXref);
                }
            }
        }

        self.prepare_decryption()?;
        self.ensure_root()?;

        if self.options.mode.record_diagnostics() {
            self.parse_suspension_objects();
            self.check_linearization()?;
            self.process_byte_ranges();
        } else {
            self.parse_trailer_values()?;
        }

        Ok(PdfDocument::new(self))
    }

    /// Resolve the trailer's direct reference values (`/Root`, `/Info`, …)
    /// so the document is immediately navigable.
    fn parse_trailer_values(&mut self) -> ParseResult<()> {
        let refs: Vec<ObjectKey> = self
            .doc
            .trailer
            .iter()
            .filter_map(|(_, value)| value.as_reference())
            .collect();
        for key in refs {
            self.get_object(key)?;
        }
        Ok(())
    }

    /// Validation mode parses every object the final xref knows about, so
    /// all conformance signals get recorded. Individual failures are logged
    /// and do not abort the run.
    fn parse_suspension_objects(&mut self) {
        let mut keys: Vec<ObjectKey> = self.xref.keys().copied().collect();
        keys.sort();
        for key in keys {
            if let Err(e) = self.get_object(key) {
                error!("failed to parse object {}: {}", key, e);
            }
        }
    }

    /// The merged trailer must name a `/Root`. In lenient mode a missing
    /// root triggers the brute-force trailer rebuild once.
    fn ensure_root(&mut self) -> ParseResult<()> {
        if self.doc.trailer.get("Root").is_some() {
            return Ok(());
        }
        if self.options.mode == ParseMode::Lenient {
            warn!("missing /Root in trailer, rebuilding from brute force scan");
            self.rebuild_trailer()?;
            if self.doc.trailer.get("Root").is_some() {
                return Ok(());
            }
        }
        Err(ParseError::InvalidTrailer(
            "missing root object specification in trailer".to_string(),
        ))
    }

    /// Resolve `/Encrypt` and hand it to the security handler.
    fn prepare_decryption(&mut self) -> ParseResult<()> {
        let encrypt = match self.doc.trailer.get("Encrypt") {
            Some(PdfObject::Null) | None => return Ok(()),
            Some(obj) => obj.clone(),
        };
        self.doc.is_encrypted = true;

        let encrypt_dict = match encrypt {
            PdfObject::Reference(key) => {
                self.encrypt_key = Some(key);
                let resolved = self.get_object(key)?;
                // pull in nested references before decryption is active
                if let Some(dict) = resolved.as_dict() {
                    let nested: Vec<ObjectKey> = dict
                        .iter()
                        .filter_map(|(_, value)| value.as_reference())
                        .collect();
                    for nested_key in nested {
                        self.get_object(nested_key)?;
                    }
                }
                resolved
            }
            other => other,
        };
        let encrypt_dict = match encrypt_dict.as_dict() {
            Some(dict) => dict.clone(),
            None => {
                return Err(ParseError::Security(
                    "encryption dictionary is not a dictionary".to_string(),
                ))
            }
        };

        let document_id = self.doc.trailer.get("ID").cloned();
        match self.security.as_mut() {
            Some(handler) => {
                handler
                    .prepare_for_decryption(&encrypt_dict, document_id.as_ref(), &self.material)
                    .map_err(|e| ParseError::Security(e.to_string()))?;
                self.doc.permissions = handler.current_access_permissions();
                Ok(())
            }
            None => {
                if self.options.mode == ParseMode::Lenient {
                    warn!("document is encrypted but no security handler is installed");
                    self.doc.permissions = AccessPermissions::empty();
                    Ok(())
                } else {
                    Err(ParseError::Security(
                        "encrypted document requires a security handler".to_string(),
                    ))
                }
            }
        }
    }

    /// Detect linearized documents: the first dictionary in the first 1024
    /// bytes carrying `/Linearized` with `/L` equal to the file length.
    fn check_linearization(&mut self) -> ParseResult<()> {
        let origin = self.cursor.position();
        let result = self.find_linearization_dict();
        self.cursor.seek(origin)?;
        let Some(dict) = result? else {
            return Ok(());
        };
        if dict.get("Linearized").is_some() {
            let length = dict.get_integer("L");
            if length == Some(self.file_len as i64) {
                self.doc.is_linearized = true;
            }
        }
        Ok(())
    }

    fn find_linearization_dict(
        &mut self,
    ) -> ParseResult<Option<super::objects::PdfDictionary>> {
        use super::grammar::ObjectGrammar;
        use super::lexer;

        self.cursor.seek(0)?;
        self.cursor.skip_spaces()?;
        let bound = self.cursor.position() + self.cursor.available().min(LINEARIZATION_WINDOW);
        let mut offset = self.cursor.position();
        while offset < bound {
            self.cursor.seek(offset)?;
            let header_ok = lexer::read_object_number(&mut self.cursor)
                .and_then(|_| lexer::read_generation_number(&mut self.cursor))
                .and_then(|_| lexer::expect_keyword(&mut self.cursor, b"obj", true));
            if header_ok.is_ok() {
                let mut scratch = ValidationSink::new();
                let parsed = ObjectGrammar::new(
                    &mut self.cursor,
                    ParseMode::Lenient,
                    &mut scratch,
                    self.doc.header_offset,
                )
                .parse_direct_object();
                if self.cursor.position() >= LINEARIZATION_WINDOW + self.doc.header_offset {
                    return Ok(None);
                }
                return Ok(match parsed {
                    Ok(Some(PdfObject::Dictionary(dict))) => Some(dict),
                    _ => None,
                });
            }
            offset += 1;
        }
        Ok(None)
    }
}
