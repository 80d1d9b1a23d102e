//! PDF object/xref layer parser
//!
//! Implements the file-level grammar of ISO 32000-1: header location, the
//! cross-reference chain (classic tables, xref streams, hybrid files), lazy
//! indirect-object parsing, and brute-force recovery for damaged documents.
//! A validation mode additionally records the PDF/A-1b syntactic conformance
//! signals of ISO 19005-1 without altering what is parsed.

pub mod cursor;
pub mod document;
pub mod filters;
pub mod grammar;
pub mod header;
pub mod lexer;
pub mod object_stream;
pub mod objects;
pub mod reader;
pub mod scanner;
pub mod store;
pub mod stream;
pub mod validation;
pub mod xref;
pub mod xref_chain;
pub mod xref_stream;

use crate::parser::objects::ObjectKey;

pub use self::cursor::ByteCursor;
pub use self::document::PdfDocument;
pub use self::objects::{
    PdfArray, PdfDictionary, PdfName, PdfObject, PdfStream, PdfString, StringKind,
};
pub use self::reader::PdfReader;
pub use self::validation::ValidationSink;
pub use self::xref::{XrefEntry, XrefKind};

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// PDF parser errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("empty file")]
    EmptyFile,

    #[error("invalid PDF header")]
    InvalidHeader,

    #[error("missing 'startxref' marker")]
    MissingStartXref,

    #[error("invalid xref: {0}")]
    InvalidXRef(String),

    #[error("invalid trailer: {0}")]
    InvalidTrailer(String),

    #[error("object {key} cannot be resolved: {reason}")]
    UnresolvedObject { key: ObjectKey, reason: String },

    #[error("syntax error at offset {position}: {message}")]
    SyntaxError { position: u64, message: String },

    #[error("circular reference detected for object {0}")]
    CircularReference(ObjectKey),

    #[error("stream length error: {0}")]
    StreamLength(String),

    #[error("stream decode error: {0}")]
    StreamDecode(String),

    #[error("security handler error: {0}")]
    Security(String),

    #[error("nesting depth limit exceeded")]
    NestingLimit,
}

impl ParseError {
    pub(crate) fn syntax(position: u64, message: impl Into<String>) -> Self {
        ParseError::SyntaxError {
            position,
            message: message.into(),
        }
    }
}

/// How strictly the parser treats malformed input.
///
/// One parser serves all three modes; the mode only flips the recovery and
/// diagnostic knobs queried below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Apply every recovery heuristic. The default.
    #[default]
    Lenient,
    /// No recovery; the first malformed structure is fatal.
    Strict,
    /// Lenient recovery plus PDF/A-1b conformance signal recording. Xref
    /// entries with bad offsets are dropped rather than repaired.
    Validation,
}

impl ParseMode {
    /// Recovery heuristics are active (lenient and validation modes).
    pub fn is_lenient(self) -> bool {
        !matches!(self, ParseMode::Strict)
    }

    /// A failed xref offset check replaces the table with brute-force
    /// results.
    pub fn recover_on_bad_offsets(self) -> bool {
        matches!(self, ParseMode::Lenient)
    }

    /// Conformance signals and signature byte ranges are recorded.
    pub fn record_diagnostics(self) -> bool {
        matches!(self, ParseMode::Validation)
    }

    /// A failed xref offset check drops the entry instead of patching it.
    pub fn drop_instead_of_replace(self) -> bool {
        matches!(self, ParseMode::Validation)
    }
}

/// Default number of trailing bytes searched for `%%EOF` and `startxref`.
pub const DEFAULT_EOF_LOOKUP_RANGE: usize = 2048;

/// Environment variable seeding the EOF lookup range process-wide.
pub const EOF_LOOKUP_RANGE_VAR: &str = "PDF_COS_EOF_LOOKUP_RANGE";

/// Parser configuration
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub mode: ParseMode,
    /// Bytes scanned back from the end of file for `%%EOF`/`startxref`.
    /// Values below 16 are ignored. Trailing garbage after `%%EOF` (HTML
    /// snippets and the like) can require more than the default 2048.
    eof_lookup_range: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::lenient()
    }
}

impl ParseOptions {
    pub fn lenient() -> Self {
        Self::with_mode(ParseMode::Lenient)
    }

    pub fn strict() -> Self {
        Self::with_mode(ParseMode::Strict)
    }

    pub fn validation() -> Self {
        Self::with_mode(ParseMode::Validation)
    }

    fn with_mode(mode: ParseMode) -> Self {
        let mut options = Self {
            mode,
            eof_lookup_range: DEFAULT_EOF_LOOKUP_RANGE,
        };
        if let Ok(value) = std::env::var(EOF_LOOKUP_RANGE_VAR) {
            match value.parse::<usize>() {
                Ok(range) => options.set_eof_lookup_range(range),
                Err(_) => log::warn!(
                    "{} does not contain an integer value, but: '{}'",
                    EOF_LOOKUP_RANGE_VAR,
                    value
                ),
            }
        }
        options
    }

    /// Override the EOF lookup range. Values below 16 are ignored.
    pub fn set_eof_lookup_range(&mut self, byte_count: usize) {
        if byte_count > 15 {
            self.eof_lookup_range = byte_count;
        }
    }

    pub fn eof_lookup_range(&self) -> usize {
        self.eof_lookup_range
    }
}

/// Maximum recursion depth for nested containers and indirect resolution.
pub const MAX_NESTING_DEPTH: usize = 200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_knobs() {
        assert!(ParseMode::Lenient.is_lenient());
        assert!(ParseMode::Validation.is_lenient());
        assert!(!ParseMode::Strict.is_lenient());

        assert!(ParseMode::Lenient.recover_on_bad_offsets());
        assert!(!ParseMode::Validation.recover_on_bad_offsets());
        assert!(ParseMode::Validation.drop_instead_of_replace());
        assert!(ParseMode::Validation.record_diagnostics());
        assert!(!ParseMode::Lenient.record_diagnostics());
    }

    #[test]
    fn test_eof_lookup_range_minimum() {
        let mut options = ParseOptions::lenient();
        options.set_eof_lookup_range(10);
        assert_eq!(options.eof_lookup_range(), DEFAULT_EOF_LOOKUP_RANGE);
        options.set_eof_lookup_range(16);
        assert_eq!(options.eof_lookup_range(), 16);
        options.set_eof_lookup_range(4096);
        assert_eq!(options.eof_lookup_range(), 4096);
    }

    #[test]
    fn test_error_display() {
        let err = ParseError::syntax(42, "unexpected character");
        assert_eq!(
            err.to_string(),
            "syntax error at offset 42: unexpected character"
        );
        let err = ParseError::StreamLength("loop while reading length".to_string());
        assert!(err.to_string().contains("loop while reading length"));
    }
}
