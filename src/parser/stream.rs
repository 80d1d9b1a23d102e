//! Stream payload reading
//!
//! Two paths: when `/Length` resolves and actually lands on `endstream`,
//! the payload is copied verbatim; otherwise a scan looks for the literal
//! `endstream` (or `endobj`, which corrupt writers substitute). The scan is
//! the parser's inner loop on damaged files, so it short-cuts in the style
//! of Boyer-Moore: before comparing at a position, it tests the byte the
//! *last* keyword character would have to occupy, and when that byte cannot
//! belong to either keyword it jumps straight past it.

use log::{debug, warn};

use super::cursor::ByteCursor;
use super::lexer;
use super::objects::{ObjectKey, PdfDictionary, PdfObject, PdfStream, StreamChecks};
use super::reader::PdfReader;
use super::{ParseError, ParseResult};
use crate::io::RandomAccessRead;

const ENDSTREAM: &[u8] = b"endstream";
const ENDOBJ: &[u8] = b"endobj";
/// Last character position of the shortest keyword (`endobj`).
const QUICK_TEST_OFFSET: usize = 5;
const SCAN_BUF_LEN: usize = 2048;

/// Copy bytes into `out` until `endstream` or `endobj`. The cursor is left
/// at the start of the keyword. A trailing CR LF or LF before the keyword
/// belongs to the file structure and is dropped; a lonely CR is kept.
pub fn read_until_end_stream<R: RandomAccessRead>(
    cur: &mut ByteCursor<R>,
    out: &mut Vec<u8>,
) -> ParseResult<()> {
    let mut buf = [0u8; SCAN_BUF_LEN];
    let mut char_match_count = 0usize;
    let mut keyword: &[u8] = ENDSTREAM;

    loop {
        let read = cur.read_into(&mut buf[char_match_count..])?;
        if read == 0 {
            break;
        }
        let buf_size = read + char_match_count;
        let max_quick = buf_size.saturating_sub(QUICK_TEST_OFFSET);

        let mut b_idx = char_match_count;
        while b_idx < buf_size {
            if char_match_count == 0 {
                let quick_idx = b_idx + QUICK_TEST_OFFSET;
                if quick_idx < max_quick {
                    let ch = buf[quick_idx];
                    if !(b'a'..=b't').contains(&ch) {
                        // cannot be a keyword character, jump past it
                        b_idx = quick_idx + 1;
                        continue;
                    }
                }
            }
            let ch = buf[b_idx];
            if ch == keyword[char_match_count] {
                char_match_count += 1;
                if char_match_count == keyword.len() {
                    b_idx += 1;
                    break;
                }
            } else if char_match_count == 3 && ch == ENDOBJ[3] {
                // 'end' followed by 'o': maybe endstream is missing
                keyword = ENDOBJ;
                char_match_count += 1;
            } else {
                // the broken match may already hold the start of a new one:
                // 'e' restarts at 1; an 'n' after 'endstre' means 'en'
                char_match_count = if ch == b'e' {
                    1
                } else if ch == b'n' && char_match_count == 7 {
                    2
                } else {
                    0
                };
                keyword = ENDSTREAM;
            }
            b_idx += 1;
        }

        let content_bytes = b_idx.saturating_sub(char_match_count);
        out.extend_from_slice(&buf[..content_bytes]);
        if char_match_count == keyword.len() {
            // unread the keyword and whatever the buffer held after it
            cur.rewind((buf_size - content_bytes) as u64)?;
            break;
        }
        // carry the matched prefix into the next chunk
        buf[..char_match_count].copy_from_slice(&keyword[..char_match_count]);
    }

    if out.ends_with(b"\r\n") {
        out.truncate(out.len() - 2);
    } else if out.ends_with(b"\n") {
        out.truncate(out.len() - 1);
    }
    Ok(())
}

impl<R: RandomAccessRead> PdfReader<R> {
    /// Read a stream object. The cursor sits on the `stream` keyword; on
    /// return it sits just past `endstream` (or before `endobj` when the
    /// file omitted the keyword).
    pub(crate) fn read_stream(
        &mut self,
        dict: &PdfDictionary,
        key: ObjectKey,
    ) -> ParseResult<PdfStream> {
        let validation = self.options.mode.record_diagnostics();
        let lenient = self.options.mode.is_lenient();
        lexer::expect_bytes(&mut self.cursor, b"stream")?;

        let mut checks = StreamChecks::default();
        if validation {
            // ISO 19005-1 clause 6.1.7: 'stream' is followed by CR LF or LF
            match self.cursor.read()? {
                Some(b'\r') => {
                    if self.cursor.peek()? == Some(b'\n') {
                        self.cursor.read()?;
                    } else {
                        checks.stream_keyword_crlf_compliant = false;
                    }
                }
                Some(b'\n') => {}
                Some(_) => {
                    checks.stream_keyword_crlf_compliant = false;
                    self.cursor.rewind(1)?;
                }
                None => checks.stream_keyword_crlf_compliant = false,
            }
        } else {
            self.cursor.skip_stream_eol()?;
        }
        let origin = self.cursor.position();

        let length = match self.resolve_stream_length(dict, key) {
            Ok(length) => length,
            Err(e) => {
                if lenient {
                    warn!(
                        "failed to resolve stream length at offset {}: {}, using fallback scan",
                        origin, e
                    );
                    None
                } else {
                    return Err(e);
                }
            }
        };
        if length.is_none() && !lenient {
            return Err(ParseError::StreamLength(
                "missing length for stream".to_string(),
            ));
        }

        let data = match length {
            Some(length) if self.validate_stream_length(origin, length)? => {
                self.cursor.read_fully(length as usize)?
            }
            _ => {
                if length.is_some() {
                    debug!(
                        "stream length does not point at 'endstream', falling back to scan at offset {}",
                        origin
                    );
                } else {
                    debug!("stream provides no length, scanning for 'endstream' at offset {}", origin);
                }
                self.cursor.seek(origin)?;
                let mut out = Vec::new();
                read_until_end_stream(&mut self.cursor, &mut out)?;
                out
            }
        };

        if validation {
            self.check_end_stream_spacings(origin, length, &mut checks)?;
        }

        let token = lexer::read_token(&mut self.cursor)?;
        if token == ENDOBJ && lenient {
            debug!(
                "stream ends with 'endobj' instead of 'endstream' at offset {}",
                self.cursor.position()
            );
            if validation {
                checks.endstream_keyword_eol_compliant = false;
            }
            // leave 'endobj' for the object-level parser
            self.cursor.rewind(ENDOBJ.len() as u64)?;
        } else if token.len() > ENDSTREAM.len() && token.starts_with(ENDSTREAM) && lenient {
            debug!(
                "stream ends with '{}' instead of 'endstream' at offset {}",
                String::from_utf8_lossy(&token),
                self.cursor.position()
            );
            if validation {
                checks.endstream_keyword_eol_compliant = false;
            }
            self.cursor.rewind((token.len() - ENDSTREAM.len()) as u64)?;
        } else if token != ENDSTREAM {
            return Err(ParseError::StreamLength(format!(
                "expected 'endstream' actual '{}' at offset {}",
                String::from_utf8_lossy(&token),
                self.cursor.position()
            )));
        }

        let mut stream = PdfStream::new(dict.clone(), data);
        if validation {
            stream.checks = Some(checks);
        }
        Ok(stream)
    }

    /// Resolve `/Length`, guarding against reference cycles with the
    /// in-flight set; the cursor is saved and restored around the
    /// recursion.
    fn resolve_stream_length(
        &mut self,
        dict: &PdfDictionary,
        stream_key: ObjectKey,
    ) -> ParseResult<Option<i64>> {
        let length = match dict.get("Length") {
            None => return Ok(None),
            Some(obj) => obj.clone(),
        };
        match length {
            PdfObject::Integer(value) => Ok(Some(value)),
            PdfObject::Real(value) => Ok(Some(value as i64)),
            PdfObject::Reference(length_key) => {
                if self.in_flight_lengths.contains(&length_key)
                    || self.in_flight_lengths.contains(&stream_key)
                {
                    return Err(ParseError::StreamLength(format!(
                        "loop while reading length from {}",
                        length_key
                    )));
                }
                self.in_flight_lengths.insert(stream_key);
                let origin = self.cursor.position();
                let resolved = self.get_object(length_key);
                let seek_back = self.cursor.seek(origin);
                self.in_flight_lengths.remove(&stream_key);
                seek_back?;
                let resolved = resolved.map_err(|e| {
                    ParseError::StreamLength(format!(
                        "failed to read length from {}: {}",
                        length_key, e
                    ))
                })?;
                match resolved {
                    PdfObject::Integer(value) => Ok(Some(value)),
                    PdfObject::Real(value) => Ok(Some(value as i64)),
                    other => Err(ParseError::StreamLength(format!(
                        "wrong type of referenced length object {}: {:?}",
                        length_key, other
                    ))),
                }
            }
            other => Err(ParseError::StreamLength(format!(
                "wrong type of length object: {:?}",
                other
            ))),
        }
    }

    /// A length is only trusted when `endstream` actually follows the
    /// payload it describes.
    fn validate_stream_length(&mut self, origin: u64, length: i64) -> ParseResult<bool> {
        if length < 0 {
            return Ok(false);
        }
        let expected_end = origin + length as u64;
        if expected_end > self.file_len {
            debug!(
                "stream end {} is out of range (file length {})",
                expected_end, self.file_len
            );
            return Ok(false);
        }
        self.cursor.seek(expected_end)?;
        self.cursor.skip_spaces()?;
        let valid = self.cursor.matches_bytes(ENDSTREAM)?;
        self.cursor.seek(origin)?;
        Ok(valid)
    }

    /// Record the EOL discipline before `endstream` and the measured
    /// payload length (ISO 19005-1 clause 6.1.7).
    fn check_end_stream_spacings(
        &mut self,
        origin: u64,
        expected_length: Option<i64>,
        checks: &mut StreamChecks,
    ) -> ParseResult<()> {
        self.cursor.skip_spaces()?;
        let approximate = self.cursor.position().saturating_sub(origin);
        let expected = expected_length.unwrap_or(approximate as i64);
        let diff = approximate as i64 - expected;

        let mut eol_count = 0u64;
        if self.cursor.position() >= 2 {
            self.cursor.rewind(2)?;
            let first = self.cursor.read()?;
            let second = self.cursor.read()?;
            if second == Some(b'\n') {
                eol_count = if first == Some(b'\r') {
                    if diff == 1 {
                        1
                    } else {
                        2
                    }
                } else {
                    1
                };
            } else if second == Some(b'\r') {
                eol_count = 1;
            } else {
                debug!(
                    "end of stream at offset {} has no EOL marker",
                    self.cursor.position()
                );
                checks.endstream_keyword_eol_compliant = false;
            }
        }
        checks.origin_length = approximate.saturating_sub(eol_count);
        Ok(())
    }
}
