//! Object store
//!
//! Lazy pool of indirect objects. Every slot moves monotonically through
//! `Unparsed → Parsing → Parsed | Null | Broken` (unparsed slots are simply
//! absent); re-entering a `Parsing` slot is the cycle error. Callers never
//! observe `Broken` directly: it resolves as `Null` while keeping the
//! diagnostic trail in the log.

use std::collections::HashMap;

use log::{debug, error, warn};

use super::cursor::is_eol;
use super::grammar::ObjectGrammar;
use super::lexer;
use super::object_stream;
use super::objects::{ObjectKey, PdfObject};
use super::reader::PdfReader;
use super::validation::ObjectChecks;
use super::xref::XrefEntry;
use super::{ParseError, ParseResult};
use crate::io::RandomAccessRead;

#[derive(Debug)]
pub(crate) enum SlotState {
    Parsing,
    Parsed(PdfObject),
    Null,
    Broken,
}

#[derive(Debug)]
pub(crate) struct IndirectSlot {
    pub(crate) state: SlotState,
    pub(crate) checks: ObjectChecks,
}

/// Pool of indirect object slots keyed by `(number, generation)`.
#[derive(Debug, Default)]
pub struct ObjectPool {
    slots: HashMap<ObjectKey, IndirectSlot>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &ObjectKey) -> Option<&IndirectSlot> {
        self.slots.get(key)
    }

    fn slot_mut(&mut self, key: ObjectKey) -> &mut IndirectSlot {
        self.slots.entry(key).or_insert(IndirectSlot {
            state: SlotState::Parsing,
            checks: ObjectChecks::default(),
        })
    }

    fn begin(&mut self, key: ObjectKey) {
        self.slot_mut(key).state = SlotState::Parsing;
    }

    fn finish(&mut self, key: ObjectKey, value: PdfObject, checks: ObjectChecks) {
        let slot = self.slot_mut(key);
        slot.state = SlotState::Parsed(value);
        slot.checks = checks;
    }

    /// Store a value parsed out of an object stream, unless the slot
    /// already holds one.
    fn fill_from_stream(&mut self, key: ObjectKey, value: PdfObject) {
        let slot = self.slot_mut(key);
        if !matches!(slot.state, SlotState::Parsed(_)) {
            slot.state = SlotState::Parsed(value);
        }
    }

    fn set_null(&mut self, key: ObjectKey) {
        self.slot_mut(key).state = SlotState::Null;
    }

    fn set_broken(&mut self, key: ObjectKey) {
        self.slot_mut(key).state = SlotState::Broken;
    }

    /// Conformance flags recorded for an object (validation mode).
    pub fn checks(&self, key: &ObjectKey) -> Option<&ObjectChecks> {
        self.slots.get(key).map(|slot| &slot.checks)
    }

    pub fn parsed_keys(&self) -> impl Iterator<Item = (&ObjectKey, &PdfObject)> {
        self.slots.iter().filter_map(|(key, slot)| match &slot.state {
            SlotState::Parsed(value) => Some((key, value)),
            _ => None,
        })
    }
}

impl<R: RandomAccessRead> PdfReader<R> {
    /// Resolve an indirect object, parsing it on first use. Missing keys
    /// resolve to `Null` as ISO 32000-1 permits; broken slots behave
    /// the same for callers.
    pub fn get_object(&mut self, key: ObjectKey) -> ParseResult<PdfObject> {
        if let Some(slot) = self.pool.get(&key) {
            match &slot.state {
                SlotState::Parsed(value) => return Ok(value.clone()),
                SlotState::Null | SlotState::Broken => return Ok(PdfObject::Null),
                SlotState::Parsing => return Err(ParseError::CircularReference(key)),
            }
        }
        let entry = self.xref.get(&key).copied();
        match entry {
            None => {
                // undefined references are null (ISO 32000-1, 7.3.10)
                self.pool.set_null(key);
                Ok(PdfObject::Null)
            }
            Some(XrefEntry::InUse { offset }) => {
                self.pool.begin(key);
                let absolute = offset + self.doc.header_offset;
                match self.parse_file_object(absolute, key) {
                    Ok(Some((value, checks))) => {
                        self.pool.finish(key, value.clone(), checks);
                        Ok(value)
                    }
                    Ok(None) => {
                        // validation mode: xref pointed at the wrong object
                        self.pool.set_null(key);
                        Ok(PdfObject::Null)
                    }
                    Err(e) if matches!(e, ParseError::Io(_)) => {
                        self.pool.set_broken(key);
                        Err(e)
                    }
                    Err(e) if self.options.mode.is_lenient() => {
                        warn!("degrading object {} to null: {}", key, e);
                        self.pool.set_broken(key);
                        Ok(PdfObject::Null)
                    }
                    Err(e) => {
                        self.pool.set_broken(key);
                        Err(e)
                    }
                }
            }
            Some(XrefEntry::Compressed { container, .. }) => {
                match self.parse_object_stream(container) {
                    Ok(()) => {}
                    Err(e) if matches!(e, ParseError::Io(_)) => return Err(e),
                    Err(e) if self.options.mode.is_lenient() => {
                        warn!(
                            "degrading compressed object {} to null: failed to expand object stream {}: {}",
                            key, container, e
                        );
                        self.pool.set_broken(key);
                        return Ok(PdfObject::Null);
                    }
                    Err(e) => return Err(e),
                }
                match self.pool.get(&key).map(|slot| &slot.state) {
                    Some(SlotState::Parsed(value)) => Ok(value.clone()),
                    _ => {
                        debug!("object {} not found in object stream {}", key, container);
                        self.pool.set_null(key);
                        Ok(PdfObject::Null)
                    }
                }
            }
        }
    }

    /// Parse `N G obj … endobj` at an absolute file offset. Returns `None`
    /// when validation mode found the wrong object at the offset.
    fn parse_file_object(
        &mut self,
        offset: u64,
        key: ObjectKey,
    ) -> ParseResult<Option<(PdfObject, ObjectChecks)>> {
        let validation = self.options.mode.record_diagnostics();
        let lenient = self.options.mode.is_lenient();
        let mut checks = ObjectChecks::default();

        self.cursor.seek(offset)?;
        if validation {
            // an EOL must precede the object header (clause 6.1.8)
            self.cursor.skip_spaces()?;
            let pos = self.cursor.position();
            if pos > 0 {
                self.cursor.seek(pos - 1)?;
                if !matches!(self.cursor.read()?, Some(c) if is_eol(c)) {
                    checks.header_of_object_eol_compliant = false;
                }
            }
        }

        let read_number = lexer::read_object_number(&mut self.cursor)?;
        if validation
            && (self.cursor.read()? != Some(b' ') || self.cursor.skip_spaces()? > 0)
        {
            checks.header_format_compliant = false;
        }
        let read_generation = lexer::read_generation_number(&mut self.cursor)?;
        if validation {
            if self.cursor.read()? != Some(b' ') || self.cursor.skip_spaces()? > 0 {
                checks.header_format_compliant = false;
            }
            lexer::expect_bytes(&mut self.cursor, b"obj")?;
        } else {
            lexer::expect_keyword(&mut self.cursor, b"obj", true)?;
        }

        if read_number != key.number || read_generation != key.generation {
            let message = format!(
                "xref for {} points to wrong object: {} {}",
                key, read_number, read_generation
            );
            if validation {
                error!("{}", message);
                return Ok(None);
            }
            return Err(ParseError::UnresolvedObject {
                key,
                reason: message,
            });
        }

        if validation && !self.cursor.peek_is_eol()? {
            // an EOL shall follow the 'obj' keyword
            checks.header_of_object_eol_compliant = false;
        }

        let mut value = {
            let mut grammar = ObjectGrammar::new(
                &mut self.cursor,
                self.options.mode,
                &mut self.sink,
                self.doc.header_offset,
            );
            match grammar.parse_direct_object()? {
                Some(value) => value,
                None => {
                    warn!("object {} at offset {} has no parsable body", key, offset);
                    PdfObject::Null
                }
            }
        };

        let mut eol_before_end = None;
        if validation {
            self.cursor.skip_spaces()?;
            let pos = self.cursor.position();
            if pos > 0 {
                self.cursor.seek(pos - 1)?;
                eol_before_end = self.cursor.read()?;
            }
        }

        let end_token = lexer::read_token(&mut self.cursor)?;
        let final_token: Vec<u8>;
        if end_token == b"stream" {
            self.cursor.rewind(b"stream".len() as u64)?;
            if !matches!(value, PdfObject::Dictionary(_)) {
                return Err(ParseError::syntax(
                    offset,
                    "stream not preceded by dictionary",
                ));
            }
            let dict = match value {
                PdfObject::Dictionary(dict) => dict,
                _ => unreachable!(),
            };
            let mut stream = self.read_stream(&dict, key)?;
            if self.encrypt_key != Some(key) {
                if let Some(handler) = self.security.as_mut() {
                    handler
                        .decrypt_stream(&mut stream, key.number, key.generation)
                        .map_err(|e| ParseError::Security(e.to_string()))?;
                }
            }
            value = PdfObject::Stream(stream);

            self.cursor.skip_spaces()?;
            if validation {
                let pos = self.cursor.position();
                if pos > 0 {
                    self.cursor.seek(pos - 1)?;
                    eol_before_end = self.cursor.read()?;
                }
            }
            let mut end_line = if validation {
                self.cursor.read_line_no_eol_skip()?
            } else {
                self.cursor.read_line()?
            };
            // a second 'endstream' line before endobj occurs in the wild
            if !end_line.starts_with(b"endobj") && end_line.starts_with(b"endstream") {
                let rest: Vec<u8> = end_line[b"endstream".len()..]
                    .iter()
                    .copied()
                    .skip_while(|c| *c == b' ')
                    .collect();
                if rest.is_empty() {
                    self.cursor.skip_spaces()?;
                    if validation {
                        let pos = self.cursor.position();
                        if pos > 0 {
                            self.cursor.seek(pos - 1)?;
                            eol_before_end = self.cursor.read()?;
                        }
                        end_line = self.cursor.read_line_no_eol_skip()?;
                    } else {
                        end_line = self.cursor.read_line()?;
                    }
                } else {
                    end_line = rest;
                }
            }
            final_token = end_line;
        } else {
            if self.encrypt_key != Some(key) {
                if let Some(handler) = self.security.as_mut() {
                    handler
                        .decrypt(&mut value, key.number, key.generation)
                        .map_err(|e| ParseError::Security(e.to_string()))?;
                }
            }
            final_token = end_token;
        }

        if validation && !matches!(eol_before_end, Some(c) if is_eol(c)) {
            checks.end_of_object_eol_compliant = false;
        }

        if !final_token.starts_with(b"endobj") {
            let message = format!(
                "object {} at offset {} does not end with 'endobj' but with '{}'",
                key,
                offset,
                String::from_utf8_lossy(&final_token)
            );
            if lenient {
                debug!("{}", message);
            } else {
                return Err(ParseError::syntax(offset, message));
            }
        }

        // an EOL shall follow 'endobj' as well
        match self.cursor.read()? {
            Some(c) if is_eol(c) => {}
            Some(_) => {
                checks.end_of_object_eol_compliant = false;
                self.cursor.rewind(1)?;
            }
            None => checks.end_of_object_eol_compliant = false,
        }

        Ok(Some((value, checks)))
    }

    /// Expand an object stream and register the objects the xref assigns
    /// to it.
    fn parse_object_stream(&mut self, container: u32) -> ParseResult<()> {
        let container_key = ObjectKey::new(container, 0);
        match self.xref.get(&container_key) {
            Some(XrefEntry::InUse { .. }) => {}
            _ => {
                // a compressed or missing container would loop forever
                return Err(ParseError::UnresolvedObject {
                    key: container_key,
                    reason: "object stream must be defined and must not be compressed".to_string(),
                });
            }
        }
        let base = self.get_object(container_key)?;
        let stream = base.as_stream().ok_or_else(|| {
            ParseError::syntax(0, format!("object {} is not a stream", container))
        })?;

        let contained: Vec<u32> = self
            .xref
            .iter()
            .filter_map(|(key, entry)| match entry {
                XrefEntry::Compressed { container: c, .. } if *c == container => Some(key.number),
                _ => None,
            })
            .collect();

        let objects = object_stream::parse_object_stream(stream, self.options.mode)?;
        for (number, value) in objects {
            if contained.contains(&number) {
                self.pool.fill_from_stream(ObjectKey::new(number, 0), value);
            }
        }
        Ok(())
    }
}

impl<R: RandomAccessRead> PdfReader<R> {
    /// Post-parse pass over the signature structures collected during
    /// dictionary parsing: chase indirect `/Contents` values to their hex
    /// strings, then admit every dictionary whose `/ByteRange` matches the
    /// measured offsets into the good-byte-range set.
    pub(crate) fn process_byte_ranges(&mut self) {
        let mut structures = std::mem::take(&mut self.sink.byte_ranges);
        for structure in &mut structures {
            if !structure.offsets_known() {
                match structure.indirect {
                    Some(key) => {
                        if let Err(e) = self.chase_indirect_contents(key, structure) {
                            error!(
                                "failed to locate signature contents for {}: {}",
                                key, e
                            );
                            continue;
                        }
                    }
                    None => {
                        error!("byte range is not calculated and no indirect reference is present");
                        continue;
                    }
                }
            }
            if structure.offsets_known() && structure.is_valid_byte_range() {
                self.sink.good_byte_ranges.push(structure.dict.clone());
            }
        }
        self.sink.byte_ranges = structures;
    }

    /// Seek into the object `/Contents` referred to and measure its string
    /// token. Reference-to-reference chains are followed with a visited
    /// set.
    fn chase_indirect_contents(
        &mut self,
        start: ObjectKey,
        structure: &mut super::validation::ByteRangeStructure,
    ) -> ParseResult<()> {
        let mut key = start;
        let mut visited = std::collections::HashSet::new();
        loop {
            if !visited.insert(key) {
                return Err(ParseError::CircularReference(key));
            }
            let offset = match self.xref.get(&key) {
                Some(XrefEntry::InUse { offset }) => *offset,
                _ => {
                    return Err(ParseError::UnresolvedObject {
                        key,
                        reason: "signature contents object has no file offset".to_string(),
                    })
                }
            };
            self.cursor.seek(offset + self.doc.header_offset)?;
            self.cursor.skip_spaces()?;
            lexer::read_object_number(&mut self.cursor)?;
            lexer::read_generation_number(&mut self.cursor)?;
            lexer::expect_keyword(&mut self.cursor, b"obj", true)?;

            // the object body may itself be another `N G R`
            if self.cursor.peek_is_digit()? {
                let probe_start = self.cursor.position();
                let number = lexer::read_long(&mut self.cursor);
                if let Ok(number) = number {
                    self.cursor.skip_spaces()?;
                    if self.cursor.peek_is_digit()? {
                        if let Ok(generation) = lexer::read_long(&mut self.cursor) {
                            self.cursor.skip_spaces()?;
                            if self.cursor.peek()? == Some(b'R') {
                                let number = u32::try_from(number).map_err(|_| {
                                    ParseError::syntax(probe_start, "reference out of range")
                                })?;
                                let generation = u16::try_from(generation).map_err(|_| {
                                    ParseError::syntax(probe_start, "reference out of range")
                                })?;
                                key = ObjectKey::new(number, generation);
                                continue;
                            }
                        }
                    }
                }
                return Err(ParseError::syntax(
                    probe_start,
                    "expected a string or reference in signature contents object",
                ));
            }

            let begin = self.cursor.position();
            match self.cursor.peek()? {
                Some(b'(') => {
                    lexer::read_literal_string(&mut self.cursor)?;
                }
                Some(b'<') => {
                    lexer::read_hex_string_validating(&mut self.cursor)?;
                }
                other => {
                    return Err(ParseError::syntax(
                        begin,
                        format!(
                            "expected a string in signature contents object, found {:?}",
                            other.map(|c| c as char)
                        ),
                    ))
                }
            }
            let end = self.cursor.position();
            let header = self.doc.header_offset as i64;
            structure.contents_begin = begin as i64 - header;
            structure.contents_end = end as i64 - header;
            return Ok(());
        }
    }
}
