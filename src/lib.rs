//! # pdf-cos
//!
//! A lenient, recovery-capable parser for the PDF object/xref layer with a
//! PDF/A-1b validation mode.
//!
//! The crate handles the file-level machinery of ISO 32000-1: locating the
//! header and the trailing `startxref` pointer, following the chain of
//! cross-reference tables and streams, and parsing indirect objects on
//! demand, including compressed objects inside object streams. Damaged
//! documents are repaired by a brute-force scan over the raw bytes. A
//! validation mode additionally records the PDF/A-1b syntactic conformance
//! signals of ISO 19005-1 and the byte positions of signature `/Contents`
//! strings, without ever inventing data that was not in the file.
//!
//! Page trees, content streams, fonts, and rendering live in other crates;
//! decryption is a collaborator behind the [`SecurityHandler`] trait.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pdf_cos::{ObjectKey, PdfReader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut document = PdfReader::open("document.pdf")?.parse()?;
//!
//! println!("PDF version {}", document.version());
//! let root = document.trailer().get("Root").unwrap().as_reference().unwrap();
//! let catalog = document.resolve(root).unwrap();
//! println!("catalog: {:?}", catalog);
//! # Ok(())
//! # }
//! ```
//!
//! ## Parsing modes
//!
//! * [`ParseMode::Lenient`] (default): every recovery heuristic is active.
//! * [`ParseMode::Strict`]: the first malformed structure is fatal.
//! * [`ParseMode::Validation`]: lenient recovery plus conformance signal
//!   recording; xref entries with bad offsets are dropped, not repaired.

pub mod encryption;
pub mod io;
pub mod parser;

pub use encryption::{AccessPermissions, DecryptionMaterial, SecurityHandler};
pub use io::{MemoryRead, RandomAccessRead};
pub use parser::objects::ObjectKey;
pub use parser::{
    ParseError, ParseMode, ParseOptions, ParseResult, PdfArray, PdfDictionary, PdfDocument,
    PdfName, PdfObject, PdfReader, PdfStream, PdfString, StringKind, XrefEntry, XrefKind,
};
