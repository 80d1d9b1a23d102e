//! Cross-reference chain parsing
//!
//! From the trailing `startxref` pointer, walk the `/Prev` chain of classic
//! tables and xref streams (hybrid `/XRefStm` sections included), verify
//! the offsets the chain claims, and repair or drop what does not hold up.
//! A visited-offset set breaks `/Prev` cycles.

use std::collections::HashSet;

use log::{debug, error, warn};

use super::cursor::is_end_of_name;
use super::grammar::ObjectGrammar;
use super::lexer;
use super::objects::ObjectKey;
use super::reader::PdfReader;
use super::scanner::MINIMUM_SEARCH_OFFSET;
use super::xref::{XrefEntry, XrefKind};
use super::xref_stream;
use super::{ParseError, ParseResult};
use crate::io::RandomAccessRead;

const EOF_MARKER: &[u8] = b"%%EOF";
const STARTXREF: &[u8] = b"startxref";

/// Last occurrence of `needle` in `haystack[..end]`.
fn rfind(haystack: &[u8], needle: &[u8], end: usize) -> Option<usize> {
    let end = end.min(haystack.len());
    haystack[..end]
        .windows(needle.len())
        .rposition(|window| window == needle)
}

impl<R: RandomAccessRead> PdfReader<R> {
    /// Locate the `startxref` keyword inside the EOF lookup window.
    /// Returns its absolute position, or `None` when a lenient parse should
    /// fall back to the brute-force rebuild.
    pub(crate) fn find_startxref(&mut self) -> ParseResult<Option<u64>> {
        let lenient = self.options.mode.is_lenient();
        let validation = self.options.mode.record_diagnostics();

        let trail = (self.options.eof_lookup_range() as u64).min(self.file_len) as usize;
        let skip = self.file_len - trail as u64;
        self.cursor.seek(skip)?;
        let buf = self.cursor.read_fully(trail)?;
        self.cursor.seek(0)?;

        let eof_end = match rfind(&buf, EOF_MARKER, buf.len()) {
            Some(eof_off) => {
                if validation {
                    self.record_post_eof_size(&buf, eof_off);
                }
                eof_off
            }
            None => {
                if validation {
                    // clause 6.1.3: the marker is required for PDF/A
                    self.sink.post_eof_data_size = -1;
                }
                if lenient {
                    debug!("missing end of file marker '%%EOF'");
                    buf.len()
                } else {
                    return Err(ParseError::MissingStartXref);
                }
            }
        };

        match rfind(&buf, STARTXREF, eof_end) {
            Some(off) => Ok(Some(skip + off as u64)),
            None => {
                if lenient && !validation {
                    debug!("can't find offset for startxref");
                    Ok(None)
                } else {
                    Err(ParseError::MissingStartXref)
                }
            }
        }
    }

    /// Bytes between the end of `%%EOF` and end of file, with one trailing
    /// EOL (CR LF, LF, or CR) excluded.
    fn record_post_eof_size(&mut self, buf: &[u8], eof_off: usize) {
        let end_of_eof = eof_off + EOF_MARKER.len();
        let mut size = (buf.len() - end_of_eof) as i64;
        if size > 0 {
            match buf[end_of_eof] {
                b'\r' => {
                    if buf.get(end_of_eof + 1) == Some(&b'\n') {
                        size -= 2;
                    } else {
                        size -= 1;
                    }
                }
                b'\n' => size -= 1,
                _ => {}
            }
        }
        self.sink.post_eof_data_size = size;
    }

    /// Walk the whole xref chain starting at the `startxref` keyword, then
    /// merge, verify, and publish the result on the document state.
    pub(crate) fn parse_xref_chain(&mut self, startxref_pos: u64) -> ParseResult<()> {
        self.cursor.seek(startxref_pos)?;
        let startxref_value = self.parse_startxref()?.max(0) as u64;
        let mut start = startxref_value + self.doc.header_offset;
        start = self.check_xref_offset(start)?;
        self.doc.start_xref = start;

        let mut prev = start;
        let mut visited: HashSet<u64> = HashSet::new();
        while prev > 0 {
            if !visited.insert(prev) {
                warn!("/Prev chain loops back to offset {}, stopping", prev);
                break;
            }
            self.cursor.seek(prev)?;
            self.cursor.skip_spaces()?;
            if self.cursor.peek()? == Some(b'x') {
                prev = self.parse_table_section(prev)?;
            } else {
                let next = self.parse_xref_obj_stream(prev, true)?;
                prev = if next > 0 {
                    self.check_xref_offset(next as u64 + self.doc.header_offset)?
                } else {
                    0
                };
            }
        }

        self.doc.is_xref_stream = self.resolver.startxref_kind() == Some(XrefKind::Stream);
        self.xref = self.resolver.merged_xref();
        self.doc.trailer = self.resolver.merged_trailer();
        self.doc.first_page_trailer = self.resolver.first_trailer().cloned();
        self.doc.last_trailer = self.resolver.last_trailer().cloned();

        if self.options.mode.drop_instead_of_replace() {
            self.strict_check_xref_offsets()?;
        } else if self.options.mode.recover_on_bad_offsets() {
            self.check_xref_offsets()?;
        }
        Ok(())
    }

    /// One classic table section plus its trailer; returns the absolute
    /// offset of the `/Prev` section or 0.
    fn parse_table_section(&mut self, section_offset: u64) -> ParseResult<u64> {
        let lenient = self.options.mode.is_lenient();
        self.parse_xref_table(section_offset)?;

        // skip extra garbage between the entries and the trailer keyword
        let trailer_offset = self.cursor.position();
        while lenient && self.cursor.peek()? != Some(b't') {
            if self.cursor.is_eof() {
                return Err(ParseError::InvalidXRef(format!(
                    "expected trailer object at position {}",
                    trailer_offset
                )));
            }
            if self.cursor.position() == trailer_offset {
                debug!(
                    "expected trailer object at position {}, keep trying",
                    trailer_offset
                );
            }
            self.cursor.read_line()?;
        }
        if !self.parse_trailer_dict()? {
            return Err(ParseError::InvalidXRef(format!(
                "expected trailer object at position {}",
                self.cursor.position()
            )));
        }
        let trailer = self
            .resolver
            .current_trailer()
            .cloned()
            .unwrap_or_default();

        // hybrid file: the trailer names an xref stream whose entries are
        // merged into this same section
        if let Some(stream_offset) = trailer.get_integer("XRefStm") {
            let absolute = stream_offset.max(0) as u64 + self.doc.header_offset;
            let fixed = self
                .check_xref_stream_offset(absolute, false)?
                .unwrap_or(absolute);
            if fixed > 0 && stream_offset > 0 {
                self.cursor.seek(fixed)?;
                self.cursor.skip_spaces()?;
                self.parse_xref_obj_stream(fixed, false)?;
            } else if lenient {
                error!("skipped XRef stream due to a corrupt offset: {}", stream_offset);
            } else {
                return Err(ParseError::InvalidXRef(format!(
                    "skipped XRef stream due to a corrupt offset: {}",
                    stream_offset
                )));
            }
        }

        let prev = trailer.get_integer("Prev").unwrap_or(0);
        if prev > 0 {
            self.check_xref_offset(prev as u64 + self.doc.header_offset)
        } else {
            Ok(0)
        }
    }

    /// Read the `startxref` keyword and its integer operand.
    fn parse_startxref(&mut self) -> ParseResult<i64> {
        if !self.cursor.matches_bytes(STARTXREF)? {
            return Ok(-1);
        }
        lexer::read_token(&mut self.cursor)?;
        self.cursor.skip_spaces()?;
        lexer::read_long(&mut self.cursor)
    }

    /// Verify that an xref table or stream starts at `offset`; in lenient
    /// mode try to repair the offset through the brute-force scan.
    fn check_xref_offset(&mut self, offset: u64) -> ParseResult<u64> {
        if !self.options.mode.is_lenient() {
            return Ok(offset);
        }
        self.cursor.seek(offset)?;
        if self.cursor.peek()? == Some(b'x') && self.cursor.matches_bytes(b"xref")? {
            return Ok(offset);
        }
        if offset > 0 {
            if let Some(fixed) = self.check_xref_stream_offset(offset, true)? {
                return Ok(fixed);
            }
        }
        self.calculate_fixed_offset(offset, false)
    }

    /// Verify that an xref *stream* object starts at `offset`. With
    /// `check_only` a failed probe returns `None`; otherwise the offset is
    /// repaired through the brute-force scan.
    fn check_xref_stream_offset(
        &mut self,
        offset: u64,
        check_only: bool,
    ) -> ParseResult<Option<u64>> {
        if !self.options.mode.is_lenient() || offset == 0 {
            return Ok(Some(offset));
        }
        if offset >= 1 {
            self.cursor.seek(offset - 1)?;
            let before = self.cursor.read()?;
            if matches!(before, Some(c) if super::cursor::is_whitespace(c))
                && self.cursor.peek_is_digit()?
            {
                if self.probe_object_header()? {
                    self.cursor.seek(offset)?;
                    return Ok(Some(offset));
                }
                self.cursor.seek(offset)?;
            }
        }
        if check_only {
            Ok(None)
        } else {
            self.calculate_fixed_offset(offset, true).map(Some)
        }
    }

    /// `N G obj` probe that does not raise on the negative path.
    fn probe_object_header(&mut self) -> ParseResult<bool> {
        let result = lexer::read_object_number(&mut self.cursor)
            .and_then(|_| lexer::read_generation_number(&mut self.cursor))
            .and_then(|_| lexer::expect_keyword(&mut self.cursor, b"obj", true));
        match result {
            Ok(()) => Ok(true),
            Err(ParseError::Io(e)) => Err(ParseError::Io(e)),
            Err(_) => Ok(false),
        }
    }

    /// Ask the brute-force scan for the xref candidate nearest the
    /// expected offset. Returns 0 when there is none.
    fn calculate_fixed_offset(&mut self, expected: u64, streams_only: bool) -> ParseResult<u64> {
        match self
            .scanner
            .nearest_xref(&mut self.cursor, expected, streams_only)?
        {
            Some(fixed) => {
                self.push_diagnostic(format!(
                    "Fixed reference for xref table/stream {} -> {}",
                    expected, fixed
                ));
                Ok(fixed)
            }
            None => {
                error!(
                    "can't find the xref table/stream at offset {}",
                    expected
                );
                Ok(0)
            }
        }
    }

    /// Parse a classic xref table at the cursor into a new resolver
    /// section.
    fn parse_xref_table(&mut self, section_offset: u64) -> ParseResult<()> {
        let validation = self.options.mode.record_diagnostics();
        let keyword = lexer::read_token(&mut self.cursor)?;
        if keyword != b"xref" {
            return Err(ParseError::InvalidXRef(format!(
                "expected 'xref' at offset {}",
                section_offset
            )));
        }

        if validation {
            // clause 6.1.4: CR alone is only valid when followed by LF
            match self.cursor.read()? {
                Some(b'\r') => {
                    if self.cursor.peek()? == Some(b'\n') {
                        self.cursor.read()?;
                    }
                    if !self.cursor.peek_is_digit()? {
                        self.sink.xref_eol_markers_comply = false;
                    }
                }
                Some(b'\n') => {
                    if !self.cursor.peek_is_digit()? {
                        self.sink.xref_eol_markers_comply = false;
                    }
                }
                _ => self.sink.xref_eol_markers_comply = false,
            }
        }

        self.resolver.next_section(section_offset, XrefKind::Table);

        let ahead = lexer::read_token(&mut self.cursor)?;
        self.cursor.rewind(ahead.len() as u64)?;
        if ahead.starts_with(b"trailer") {
            debug!("skipping empty xref table at offset {}", section_offset);
            return Ok(());
        }

        loop {
            let first = lexer::read_object_number(&mut self.cursor)?;
            if validation {
                // clause 6.1.4: exactly one space between start and count
                let sep = self.cursor.read()?;
                if sep != Some(b' ') || !self.cursor.peek_is_digit()? {
                    self.sink.subsection_header_space_separated = false;
                }
            }
            let count = lexer::read_long(&mut self.cursor)?;
            self.cursor.skip_spaces()?;

            for i in 0..count {
                if self.cursor.is_eof() || self.cursor.peek()? == Some(b't') {
                    break;
                }
                if self.cursor.peek_is(is_end_of_name)? {
                    break;
                }
                let line = self.cursor.read_line()?;
                let parts: Vec<&[u8]> = line
                    .split(|c| c.is_ascii_whitespace())
                    .filter(|part| !part.is_empty())
                    .collect();
                if parts.len() < 3 {
                    debug!("invalid xref line: {}", String::from_utf8_lossy(&line));
                    break;
                }
                if *parts.last().expect("len checked") == b"n" {
                    let offset = parse_number::<u64>(parts[0]).ok_or_else(|| {
                        ParseError::InvalidXRef(format!(
                            "corrupt xref entry offset: {}",
                            String::from_utf8_lossy(&line)
                        ))
                    })?;
                    let generation = parse_number::<u16>(parts[1]).ok_or_else(|| {
                        ParseError::InvalidXRef(format!(
                            "corrupt xref entry generation: {}",
                            String::from_utf8_lossy(&line)
                        ))
                    })?;
                    let key = ObjectKey::new(first + i as u32, generation);
                    self.resolver.set_xref(key, XrefEntry::InUse { offset });
                } else if parts[2] != b"f" {
                    return Err(ParseError::InvalidXRef(format!(
                        "corrupt xref table entry, object {}",
                        first + i as u32
                    )));
                }
                self.cursor.skip_spaces()?;
            }
            self.cursor.skip_spaces()?;
            if !self.cursor.peek_is_digit()? {
                break;
            }
        }
        Ok(())
    }

    /// Parse the `trailer` keyword and dictionary into the current
    /// section. Returns false when there is no trailer here.
    fn parse_trailer_dict(&mut self) -> ParseResult<bool> {
        if self.cursor.peek()? != Some(b't') {
            return Ok(false);
        }
        let start = self.cursor.position();
        let line = self.cursor.read_line()?;
        let trimmed: Vec<u8> = line
            .iter()
            .copied()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        if trimmed != b"trailer" {
            if line.starts_with(b"trailer") {
                // the EOL is missing and the dictionary follows directly
                self.cursor.seek(start + b"trailer".len() as u64)?;
            } else {
                return Ok(false);
            }
        }
        self.cursor.skip_spaces()?;
        let dict = {
            let mut grammar = ObjectGrammar::new(
                &mut self.cursor,
                self.options.mode,
                &mut self.sink,
                self.doc.header_offset,
            );
            grammar.parse_dictionary()?
        };
        self.resolver.set_trailer(dict);
        self.cursor.skip_spaces()?;
        Ok(true)
    }

    /// Parse an xref stream object at the cursor. For standalone sections
    /// (not `/XRefStm` hybrids) a new resolver section is opened and the
    /// stream dictionary becomes its trailer. Returns the `/Prev` value or
    /// -1.
    pub(crate) fn parse_xref_obj_stream(
        &mut self,
        section_offset: u64,
        standalone: bool,
    ) -> ParseResult<i64> {
        lexer::read_object_number(&mut self.cursor)?;
        let generation = lexer::read_generation_number(&mut self.cursor)?;
        lexer::expect_keyword(&mut self.cursor, b"obj", true)?;

        let dict = {
            let mut grammar = ObjectGrammar::new(
                &mut self.cursor,
                self.options.mode,
                &mut self.sink,
                self.doc.header_offset,
            );
            grammar.parse_dictionary()?
        };
        if !matches!(dict.type_name(), Some(name) if name.is("XRef")) {
            debug!(
                "xref stream at offset {} does not declare /Type /XRef",
                section_offset
            );
        }
        self.cursor.skip_spaces()?;
        let stream = self.read_stream(&dict, ObjectKey::new(0, generation))?;

        if standalone {
            self.resolver.next_section(section_offset, XrefKind::Stream);
            self.resolver.set_trailer(dict.clone());
        }
        xref_stream::decode_xref_stream(&stream, &mut self.resolver)?;
        Ok(dict.get_integer("Prev").unwrap_or(-1))
    }

    /// Lenient whole-map verification: if any in-use entry does not point
    /// at its `N G obj` header, replace the map with brute-force results.
    fn check_xref_offsets(&mut self) -> ParseResult<()> {
        let entries: Vec<(ObjectKey, u64)> = self
            .xref
            .iter()
            .filter_map(|(key, entry)| match entry {
                XrefEntry::InUse { offset } => Some((*key, *offset)),
                XrefEntry::Compressed { .. } => None,
            })
            .collect();
        let mut broken = false;
        for (key, offset) in entries {
            if !self.check_object_at(key, offset + self.doc.header_offset)? {
                debug!(
                    "stop checking xref offsets as object {} couldn't be dereferenced",
                    key
                );
                broken = true;
                break;
            }
        }
        if broken {
            let header_offset = self.doc.header_offset;
            let objects = self
                .scanner
                .objects(&mut self.cursor, header_offset)?
                .clone();
            if !objects.is_empty() {
                debug!("replaced read xref table with the results of a brute force search");
                for (key, offset) in objects {
                    self.xref.insert(key, XrefEntry::InUse { offset });
                }
            }
        }
        Ok(())
    }

    /// Validation-mode verification: entries whose offsets do not resolve
    /// to the expected header are dropped, never patched.
    fn strict_check_xref_offsets(&mut self) -> ParseResult<()> {
        let entries: Vec<(ObjectKey, u64)> = self
            .xref
            .iter()
            .filter_map(|(key, entry)| match entry {
                XrefEntry::InUse { offset } => Some((*key, *offset)),
                XrefEntry::Compressed { .. } => None,
            })
            .collect();
        for (key, offset) in entries {
            if !self.check_object_at(key, offset + self.doc.header_offset)? {
                debug!("object {} has invalid offset, dropping entry", key);
                self.xref.remove(&key);
            }
        }
        Ok(())
    }

    /// Does `N G obj` for this key start at the absolute offset?
    fn check_object_at(&mut self, key: ObjectKey, offset: u64) -> ParseResult<bool> {
        // there can't be any object at the very beginning of a pdf
        if offset < MINIMUM_SEARCH_OFFSET || offset >= self.file_len {
            return Ok(false);
        }
        let origin = self.cursor.position();
        let ok = if self.options.mode.record_diagnostics() {
            // tolerate extra whitespace between the header elements
            self.cursor.seek(offset)?;
            let number = lexer::read_object_number(&mut self.cursor);
            let generation = number
                .and_then(|n| lexer::read_generation_number(&mut self.cursor).map(|g| (n, g)));
            match generation {
                Ok((n, g)) => {
                    let obj =
                        lexer::expect_keyword(&mut self.cursor, b"obj", true).is_ok();
                    obj && n == key.number && g == key.generation
                }
                Err(ParseError::Io(e)) => return Err(ParseError::Io(e)),
                Err(_) => false,
            }
        } else {
            self.cursor.seek(offset)?;
            let expected = format!("{} {} obj", key.number, key.generation);
            self.cursor.matches_bytes(expected.as_bytes())?
        };
        self.cursor.seek(origin)?;
        Ok(ok)
    }

    /// Rebuild the xref and trailer from a brute-force scan when the chain
    /// is unusable: every found object becomes an in-use entry, and the
    /// catalog and info dictionaries are rediscovered by content.
    pub(crate) fn rebuild_trailer(&mut self) -> ParseResult<()> {
        let header_offset = self.doc.header_offset;
        let objects = self
            .scanner
            .objects(&mut self.cursor, header_offset)?
            .clone();

        self.resolver.next_section(0, XrefKind::Table);
        for (key, offset) in &objects {
            self.resolver
                .set_xref(*key, XrefEntry::InUse { offset: *offset });
        }
        self.doc.start_xref = 0;
        self.doc.is_xref_stream = false;
        self.xref = self.resolver.merged_xref();

        let mut trailer = super::objects::PdfDictionary::new();
        let mut keys: Vec<(ObjectKey, u64)> =
            objects.iter().map(|(k, o)| (*k, *o)).collect();
        keys.sort();
        for (key, stored) in keys {
            self.cursor.seek(stored + header_offset)?;
            let header_ok = lexer::read_object_number(&mut self.cursor)
                .and_then(|_| lexer::read_generation_number(&mut self.cursor))
                .and_then(|_| lexer::expect_keyword(&mut self.cursor, b"obj", true));
            if header_ok.is_err() {
                continue;
            }
            if !self.cursor.matches_bytes(b"<<")? {
                continue;
            }
            let parsed = {
                let mut grammar = ObjectGrammar::new(
                    &mut self.cursor,
                    self.options.mode,
                    &mut self.sink,
                    header_offset,
                );
                grammar.parse_dictionary()
            };
            let dict = match parsed {
                Ok(dict) => dict,
                Err(e) => {
                    debug!("skipped object {} during trailer rebuild: {}", key, e);
                    continue;
                }
            };
            use super::objects::{PdfName, PdfObject};
            if matches!(dict.type_name(), Some(name) if name.is("Catalog")) {
                trailer.insert(PdfName::new(b"Root".to_vec()), PdfObject::Reference(key));
            } else if [
                "Title", "Author", "Subject", "Keywords", "Creator", "Producer", "CreationDate",
            ]
            .iter()
            .any(|info_key| dict.contains_key(info_key))
            {
                trailer.insert(PdfName::new(b"Info".to_vec()), PdfObject::Reference(key));
            }
        }
        self.resolver.set_trailer(trailer);
        self.doc.trailer = self.resolver.merged_trailer();
        self.doc.first_page_trailer = self.resolver.first_trailer().cloned();
        self.doc.last_trailer = self.resolver.last_trailer().cloned();
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfind() {
        let data = b"a startxref b startxref c";
        assert_eq!(rfind(data, b"startxref", data.len()), Some(14));
        assert_eq!(rfind(data, b"startxref", 14), Some(2));
        assert_eq!(rfind(data, b"missing", data.len()), None);
    }
}
