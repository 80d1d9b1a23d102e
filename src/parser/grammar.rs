//! Direct object grammar
//!
//! Recursive-descent parser for the value tree of ISO 32000-1 Section 7.3:
//! dictionaries, arrays, and the primitives from the token layer. Indirect
//! references (`N G R`) become `PdfObject::Reference` placeholders; nothing
//! here ever resolves one. Recovery paths mirror what battle-tested readers
//! accept: corrupt array entries are skipped, a dictionary missing a name
//! key scans ahead to the next recoverable boundary, and `endobj` or
//! `endstream` anywhere unexpected ends the enclosing container.

use log::warn;

use super::cursor::ByteCursor;
use super::lexer;
use super::objects::{ObjectKey, PdfDictionary, PdfObject};
use super::validation::{ByteRangeStructure, ValidationSink};
use super::{ParseError, ParseMode, ParseResult, MAX_NESTING_DEPTH};
use crate::io::RandomAccessRead;

/// Outcome of a single value parse inside a container.
enum Item {
    Object(PdfObject),
    /// A bare `R` keyword; the enclosing array folds it with the two
    /// preceding integers.
    BareRef,
    /// Garbage that was consumed and should be skipped by the caller.
    Skipped,
    /// End of input.
    Eof,
}

/// Parses direct objects from a cursor.
///
/// `header_offset` translates absolute file positions into the
/// document-relative offsets recorded for signature byte ranges.
pub struct ObjectGrammar<'a, R: RandomAccessRead> {
    cur: &'a mut ByteCursor<R>,
    mode: ParseMode,
    sink: &'a mut ValidationSink,
    header_offset: u64,
    depth: usize,
}

impl<'a, R: RandomAccessRead> ObjectGrammar<'a, R> {
    pub fn new(
        cur: &'a mut ByteCursor<R>,
        mode: ParseMode,
        sink: &'a mut ValidationSink,
        header_offset: u64,
    ) -> Self {
        Self {
            cur,
            mode,
            sink,
            header_offset,
            depth: 0,
        }
    }

    fn doc_offset(&self, position: u64) -> i64 {
        position as i64 - self.header_offset as i64
    }

    /// Parse one direct object. Returns `None` when the cursor is at end of
    /// input or only garbage was found (lenient callers skip it).
    pub fn parse_direct_object(&mut self) -> ParseResult<Option<PdfObject>> {
        match self.parse_value()? {
            Item::Object(obj) => Ok(Some(obj)),
            Item::BareRef => Err(ParseError::syntax(
                self.cur.position(),
                "lone 'R' keyword outside an array",
            )),
            Item::Skipped | Item::Eof => Ok(None),
        }
    }

    fn parse_value(&mut self) -> ParseResult<Item> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(ParseError::NestingLimit);
        }
        let result = self.parse_value_inner();
        self.depth -= 1;
        result
    }

    fn parse_value_inner(&mut self) -> ParseResult<Item> {
        self.cur.skip_spaces()?;
        let c = match self.cur.peek()? {
            Some(c) => c,
            None => return Ok(Item::Eof),
        };
        match c {
            b'<' => {
                if self.cur.matches_bytes(b"<<")? {
                    let dict = self.parse_dictionary()?;
                    self.cur.skip_spaces()?;
                    Ok(Item::Object(PdfObject::Dictionary(dict)))
                } else if self.mode.record_diagnostics() {
                    Ok(Item::Object(PdfObject::String(
                        lexer::read_hex_string_validating(self.cur)?,
                    )))
                } else {
                    Ok(Item::Object(PdfObject::String(lexer::read_hex_string(
                        self.cur,
                    )?)))
                }
            }
            b'[' => Ok(Item::Object(PdfObject::Array(self.parse_array()?))),
            b'(' => Ok(Item::Object(PdfObject::String(
                lexer::read_literal_string(self.cur)?,
            ))),
            b'/' => Ok(Item::Object(PdfObject::Name(lexer::read_name(self.cur)?))),
            b'n' => {
                lexer::expect_bytes(self.cur, b"null")?;
                Ok(Item::Object(PdfObject::Null))
            }
            b't' => {
                let word = self.cur.read_fully(4)?;
                if word == b"true" {
                    Ok(Item::Object(PdfObject::Boolean(true)))
                } else {
                    Err(ParseError::syntax(
                        self.cur.position(),
                        format!("expected 'true' actual '{}'", String::from_utf8_lossy(&word)),
                    ))
                }
            }
            b'f' => {
                let word = self.cur.read_fully(5)?;
                if word == b"false" {
                    Ok(Item::Object(PdfObject::Boolean(false)))
                } else {
                    Err(ParseError::syntax(
                        self.cur.position(),
                        format!("expected 'false' actual '{}'", String::from_utf8_lossy(&word)),
                    ))
                }
            }
            b'R' => {
                self.cur.read()?;
                Ok(Item::BareRef)
            }
            _ if c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.') => {
                Ok(Item::Object(lexer::read_number(self.cur)?))
            }
            _ => {
                // Tolerate garbage the way permissive writers require: eat
                // one token and let the caller decide what to do.
                let bad = lexer::read_token(self.cur)?;
                if bad.is_empty() {
                    return Err(ParseError::syntax(
                        self.cur.position(),
                        format!("unknown direct object starting with {:#04x}", c),
                    ));
                }
                if bad == b"endobj" || bad == b"endstream" {
                    self.cur.rewind(bad.len() as u64)?;
                }
                Ok(Item::Skipped)
            }
        }
    }

    /// Parse an array. Corrupt entries are dropped; `endobj`/`endstream`
    /// aborts the array early.
    pub fn parse_array(&mut self) -> ParseResult<super::objects::PdfArray> {
        lexer::expect_char(self.cur, b'[')?;
        let mut values: Vec<PdfObject> = Vec::new();
        self.cur.skip_spaces()?;
        loop {
            match self.cur.peek()? {
                None | Some(b']') => break,
                _ => {}
            }
            match self.parse_value()? {
                Item::Object(obj) => values.push(obj),
                Item::BareRef => match Self::fold_reference(&mut values) {
                    Some(key) => values.push(PdfObject::Reference(key)),
                    None => {
                        warn!(
                            "corrupt object reference in array at offset {}",
                            self.cur.position()
                        );
                    }
                },
                Item::Skipped => {
                    warn!("corrupt array entry at offset {}", self.cur.position());
                    let ahead = lexer::read_token(self.cur)?;
                    self.cur.rewind(ahead.len() as u64)?;
                    if ahead == b"endobj" || ahead == b"endstream" {
                        return Ok(super::objects::PdfArray(values));
                    }
                }
                Item::Eof => break,
            }
            self.cur.skip_spaces()?;
        }
        // consume ']' when present
        self.cur.read()?;
        self.cur.skip_spaces()?;
        Ok(super::objects::PdfArray(values))
    }

    /// Fold the two integers preceding a bare `R` into an object key.
    fn fold_reference(values: &mut Vec<PdfObject>) -> Option<ObjectKey> {
        let len = values.len();
        if len < 2 {
            return None;
        }
        let generation = values[len - 1].as_integer()?;
        let number = values[len - 2].as_integer()?;
        let key = object_key(number, generation)?;
        values.truncate(len - 2);
        Some(key)
    }

    /// Parse a dictionary; the cursor sits on `<<`. Signature dictionaries
    /// (`/Contents` + `/ByteRange`) register a byte-range structure on the
    /// sink together with the position of the next `%%EOF`.
    pub fn parse_dictionary(&mut self) -> ParseResult<PdfDictionary> {
        lexer::expect_char(self.cur, b'<')?;
        lexer::expect_char(self.cur, b'<')?;
        self.cur.skip_spaces()?;
        let mut dict = PdfDictionary::new();
        let mut tracker = SignatureTracker::default();
        loop {
            self.cur.skip_spaces()?;
            match self.cur.peek()? {
                Some(b'>') => break,
                Some(b'/') => self.parse_name_value_pair(&mut dict, &mut tracker)?,
                Some(c) => {
                    warn!(
                        "invalid dictionary, found '{}' but expected '/' at offset {}",
                        c as char,
                        self.cur.position()
                    );
                    if self.read_until_end_of_dictionary()? {
                        return Ok(dict);
                    }
                }
                None => return Ok(dict),
            }
        }
        lexer::expect_char(self.cur, b'>')?;
        lexer::expect_char(self.cur, b'>')?;
        if self.mode.record_diagnostics() && is_signature(&dict, &tracker) {
            let mut structure = ByteRangeStructure::new(dict.clone());
            structure.contents_begin = tracker.contents_begin;
            structure.contents_end = tracker.contents_end;
            structure.indirect = tracker.indirect;
            structure.first_eof = self.find_next_eof()?;
            self.sink.byte_ranges.push(structure);
        }
        Ok(dict)
    }

    fn parse_name_value_pair(
        &mut self,
        dict: &mut PdfDictionary,
        tracker: &mut SignatureTracker,
    ) -> ParseResult<()> {
        let key = lexer::read_name(self.cur)?;
        let value = if key.is("Contents") {
            self.parse_signature_value(tracker)?
        } else {
            self.parse_dictionary_value()?
        };

        self.cur.skip_spaces()?;
        if self.cur.peek()? == Some(b'd') {
            // a 'def' here means a content-stream cmap dictionary; swallow it
            let word = lexer::read_token(self.cur)?;
            if word == b"def" {
                self.cur.skip_spaces()?;
            } else {
                self.cur.rewind(word.len() as u64)?;
            }
        }

        match value {
            Some(value) => {
                if dict.insert(key.clone(), value).is_some() {
                    warn!(
                        "duplicate dictionary key {} at offset {}, last value wins",
                        key,
                        self.cur.position()
                    );
                }
            }
            None => {
                warn!(
                    "bad dictionary declaration for key {} at offset {}",
                    key,
                    self.cur.position()
                );
            }
        }
        Ok(())
    }

    /// Parse a dictionary value, folding a trailing `N G R` into a
    /// reference. The generation/`R` probe rewinds on the negative path.
    fn parse_dictionary_value(&mut self) -> ParseResult<Option<PdfObject>> {
        let value = match self.parse_value()? {
            Item::Object(obj) => obj,
            Item::BareRef => {
                warn!(
                    "stray 'R' keyword as dictionary value at offset {}",
                    self.cur.position()
                );
                return Ok(None);
            }
            Item::Skipped | Item::Eof => return Ok(None),
        };
        self.cur.skip_spaces()?;
        if !self.cur.peek_is_digit()? {
            return Ok(Some(value));
        }
        match self.probe_reference_tail()? {
            Some(generation) => {
                let number = value.as_integer().ok_or_else(|| {
                    ParseError::syntax(self.cur.position(), "expected number before 'R'")
                })?;
                let key = object_key(number, generation).ok_or_else(|| {
                    ParseError::syntax(self.cur.position(), "object reference out of range")
                })?;
                Ok(Some(PdfObject::Reference(key)))
            }
            None => Ok(Some(value)),
        }
    }

    /// Like [`Self::parse_dictionary_value`] but records where the value
    /// token started and ended, or the referenced key when indirect.
    fn parse_signature_value(
        &mut self,
        tracker: &mut SignatureTracker,
    ) -> ParseResult<Option<PdfObject>> {
        self.cur.skip_spaces()?;
        let begin = self.cur.position();
        let value = match self.parse_value()? {
            Item::Object(obj) => obj,
            Item::BareRef => {
                warn!(
                    "stray 'R' keyword as dictionary value at offset {}",
                    self.cur.position()
                );
                return Ok(None);
            }
            Item::Skipped | Item::Eof => return Ok(None),
        };
        let end = self.cur.position();
        tracker.has_contents = true;
        self.cur.skip_spaces()?;
        if !self.cur.peek_is_digit()? {
            tracker.contents_begin = self.doc_offset(begin);
            tracker.contents_end = self.doc_offset(end);
            return Ok(Some(value));
        }
        match self.probe_reference_tail()? {
            Some(generation) => {
                let number = value.as_integer().ok_or_else(|| {
                    ParseError::syntax(self.cur.position(), "expected number before 'R'")
                })?;
                let key = object_key(number, generation).ok_or_else(|| {
                    ParseError::syntax(self.cur.position(), "object reference out of range")
                })?;
                tracker.indirect = Some(key);
                Ok(Some(PdfObject::Reference(key)))
            }
            None => {
                tracker.contents_begin = self.doc_offset(begin);
                tracker.contents_end = self.doc_offset(end);
                Ok(Some(value))
            }
        }
    }

    /// After an integer value, try to read `G R`. Returns the generation on
    /// success; rewinds and returns `None` when this was not a reference.
    fn probe_reference_tail(&mut self) -> ParseResult<Option<i64>> {
        let origin = self.cur.position();
        let generation = match lexer::read_long(self.cur) {
            Ok(value) => value,
            Err(ParseError::Io(e)) => return Err(ParseError::Io(e)),
            Err(_) => {
                self.cur.seek(origin)?;
                return Ok(None);
            }
        };
        self.cur.skip_spaces()?;
        if self.cur.peek()? == Some(b'R') {
            self.cur.read()?;
            Ok(Some(generation))
        } else {
            self.cur.seek(origin)?;
            Ok(None)
        }
    }

    /// Scan forward to a point where dictionary parsing can resume: a `/`
    /// or `>` (resume), or `endstream`/`endobj`/end of input (give up).
    /// Returns true when the dictionary cannot be recovered.
    fn read_until_end_of_dictionary(&mut self) -> ParseResult<bool> {
        loop {
            let c = match self.cur.read()? {
                Some(c) => c,
                None => return Ok(true),
            };
            match c {
                b'/' | b'>' => {
                    self.cur.rewind(1)?;
                    return Ok(false);
                }
                b'e' => {
                    self.cur.rewind(1)?;
                    if self.cur.matches_bytes(b"endstream")? || self.cur.matches_bytes(b"endobj")? {
                        return Ok(true);
                    }
                    self.cur.read()?;
                }
                _ => {}
            }
        }
    }

    /// Find the next `%%EOF` after the current position; returns the
    /// document-relative offset of its `F`, or the document length when
    /// there is none. The cursor is preserved.
    fn find_next_eof(&mut self) -> ParseResult<i64> {
        const EOF_MARKER: &[u8] = b"%%EOF";
        let origin = self.cur.position();
        let mut result = self.doc_offset(self.cur.len());
        loop {
            if self.cur.matches_bytes(EOF_MARKER)? {
                result = self.doc_offset(self.cur.position() + EOF_MARKER.len() as u64 - 1);
                break;
            }
            if self.cur.read()?.is_none() {
                break;
            }
        }
        self.cur.seek(origin)?;
        Ok(result)
    }
}

struct SignatureTracker {
    has_contents: bool,
    contents_begin: i64,
    contents_end: i64,
    indirect: Option<ObjectKey>,
}

impl Default for SignatureTracker {
    fn default() -> Self {
        Self {
            has_contents: false,
            contents_begin: -1,
            contents_end: -1,
            indirect: None,
        }
    }
}

fn is_signature(dict: &PdfDictionary, tracker: &SignatureTracker) -> bool {
    if !tracker.has_contents || !dict.contains_key("ByteRange") {
        return false;
    }
    match dict.type_name() {
        Some(name) => name.is("Sig"),
        None => dict.get("Type").is_none(),
    }
}

fn object_key(number: i64, generation: i64) -> Option<ObjectKey> {
    let number = u32::try_from(number).ok()?;
    let generation = u16::try_from(generation).ok()?;
    Some(ObjectKey::new(number, generation))
}
