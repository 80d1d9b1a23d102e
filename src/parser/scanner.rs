//! Brute-force recovery scans
//!
//! When the xref machinery points into garbage, the only remaining source
//! of truth is the file itself. These scans walk the whole document once,
//! cache what they find, and are consulted by the xref parser and the
//! trailer rebuild. Every scan preserves the cursor.

use std::collections::HashMap;

use log::debug;

use super::cursor::{is_digit, is_space, is_whitespace, ByteCursor};
use super::objects::ObjectKey;
use super::ParseResult;
use crate::io::RandomAccessRead;

/// Nothing meaningful can start before this offset; it also keeps the
/// backward walks of the scans in bounds.
pub const MINIMUM_SEARCH_OFFSET: u64 = 6;

const OBJ_PATTERN: &[u8] = b" obj";
const XREF_PATTERN: &[u8] = b"xref";
const XREF_STREAM_PATTERN: &[u8] = b"/XRef";

/// Lazily computed, cached whole-file scans.
#[derive(Debug, Default)]
pub struct BruteForceScanner {
    objects: Option<HashMap<ObjectKey, u64>>,
    table_offsets: Option<Vec<u64>>,
    stream_offsets: Option<Vec<u64>>,
}

impl BruteForceScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `N G obj` headers in the file, keyed by object id. Offsets are
    /// header-relative so they can be stored in the xref map unchanged.
    pub fn objects<R: RandomAccessRead>(
        &mut self,
        cur: &mut ByteCursor<R>,
        header_offset: u64,
    ) -> ParseResult<&HashMap<ObjectKey, u64>> {
        if self.objects.is_none() {
            let origin = cur.position();
            let mut found = HashMap::new();
            let mut offset = MINIMUM_SEARCH_OFFSET;
            while offset < cur.len() {
                cur.seek(offset)?;
                if cur.matches_bytes(OBJ_PATTERN)? {
                    if let Some((key, start)) = Self::read_header_backwards(cur, offset)? {
                        let stored = start.saturating_sub(header_offset);
                        found.insert(key, stored);
                    }
                }
                offset += 1;
            }
            cur.seek(origin)?;
            debug!("brute force scan found {} object headers", found.len());
            self.objects = Some(found);
        }
        Ok(self.objects.as_ref().expect("scan cached above"))
    }

    /// Walk backwards from a ` obj` hit over `G`, a space, and the digits
    /// of `N`. Returns the key and the absolute offset of the first digit.
    fn read_header_backwards<R: RandomAccessRead>(
        cur: &mut ByteCursor<R>,
        obj_offset: u64,
    ) -> ParseResult<Option<(ObjectKey, u64)>> {
        if obj_offset < 3 {
            return Ok(None);
        }
        // single generation digit
        let mut pos = obj_offset - 1;
        cur.seek(pos)?;
        let generation = match cur.peek()? {
            Some(c) if is_digit(c) => (c - b'0') as u16,
            _ => return Ok(None),
        };
        pos -= 1;
        cur.seek(pos)?;
        if !cur.peek_is(is_space)? {
            return Ok(None);
        }
        while pos > MINIMUM_SEARCH_OFFSET && cur.peek_is(is_space)? {
            pos -= 1;
            cur.seek(pos)?;
        }
        let mut digits = 0usize;
        while pos > MINIMUM_SEARCH_OFFSET && cur.peek_is_digit()? {
            pos -= 1;
            cur.seek(pos)?;
            digits += 1;
        }
        if digits == 0 {
            return Ok(None);
        }
        cur.read()?;
        let start = cur.position();
        let number_bytes = cur.read_fully(digits)?;
        let number = match std::str::from_utf8(&number_bytes)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            Some(n) => n,
            None => return Ok(None),
        };
        Ok(Some((ObjectKey::new(number, generation), start)))
    }

    /// Absolute offsets of all classic `xref` table keywords. A preceding
    /// whitespace byte is required so `startxref` does not match.
    pub fn table_offsets<R: RandomAccessRead>(
        &mut self,
        cur: &mut ByteCursor<R>,
    ) -> ParseResult<&Vec<u64>> {
        if self.table_offsets.is_none() {
            let origin = cur.position();
            let mut found = Vec::new();
            cur.seek(MINIMUM_SEARCH_OFFSET)?;
            while !cur.is_eof() {
                if cur.matches_bytes(XREF_PATTERN)? {
                    let offset = cur.position();
                    cur.seek(offset - 1)?;
                    if cur.peek_is(is_whitespace)? {
                        found.push(offset);
                    }
                    cur.seek(offset + XREF_PATTERN.len() as u64)?;
                }
                cur.read()?;
            }
            cur.seek(origin)?;
            debug!("brute force scan found {} xref tables", found.len());
            self.table_offsets = Some(found);
        }
        Ok(self.table_offsets.as_ref().expect("scan cached above"))
    }

    /// Absolute offsets of the `N G obj` headers of xref streams, found by
    /// scanning for `/XRef` and walking back over a bounded window.
    pub fn stream_offsets<R: RandomAccessRead>(
        &mut self,
        cur: &mut ByteCursor<R>,
    ) -> ParseResult<&Vec<u64>> {
        if self.stream_offsets.is_none() {
            let origin = cur.position();
            let mut found = Vec::new();
            cur.seek(MINIMUM_SEARCH_OFFSET)?;
            while !cur.is_eof() {
                if cur.matches_bytes(XREF_STREAM_PATTERN)? {
                    let xref_offset = cur.position();
                    if let Some(header) = Self::find_stream_header(cur, xref_offset)? {
                        debug!(
                            "found xref stream header at {} for /XRef at {}",
                            header, xref_offset
                        );
                        found.push(header);
                    }
                    cur.seek(xref_offset + XREF_STREAM_PATTERN.len() as u64)?;
                }
                cur.read()?;
            }
            cur.seek(origin)?;
            self.stream_offsets = Some(found);
        }
        Ok(self.stream_offsets.as_ref().expect("scan cached above"))
    }

    /// Look for a ` obj` within 30 ten-byte steps before the `/XRef` name
    /// and recover the header start from it.
    fn find_stream_header<R: RandomAccessRead>(
        cur: &mut ByteCursor<R>,
        xref_offset: u64,
    ) -> ParseResult<Option<u64>> {
        for step in 1..30u64 {
            let Some(window) = xref_offset.checked_sub(step * 10) else {
                break;
            };
            if window == 0 {
                break;
            }
            let mut offset = window;
            cur.seek(offset)?;
            for _ in 0..10 {
                if cur.matches_bytes(OBJ_PATTERN)? {
                    if let Some((_, start)) = Self::read_header_backwards(cur, offset)? {
                        return Ok(Some(start));
                    }
                    return Ok(None);
                }
                offset += 1;
                cur.seek(offset)?;
            }
        }
        Ok(None)
    }

    /// Among the cached xref candidates, pick the one nearest `expected`.
    /// An exact tie prefers the classic table. The chosen candidate is
    /// removed from its list so repeated repairs do not loop on it.
    pub fn nearest_xref<R: RandomAccessRead>(
        &mut self,
        cur: &mut ByteCursor<R>,
        expected: u64,
        streams_only: bool,
    ) -> ParseResult<Option<u64>> {
        let table = if streams_only {
            None
        } else {
            nearest(self.table_offsets(cur)?, expected)
        };
        let stream = nearest(self.stream_offsets(cur)?, expected);
        let choice = match (table, stream) {
            (Some(t), Some(s)) => {
                let dt = (expected as i64 - t as i64).abs();
                let ds = (expected as i64 - s as i64).abs();
                if ds < dt {
                    Choice::Stream(s)
                } else {
                    Choice::Table(t)
                }
            }
            (Some(t), None) => Choice::Table(t),
            (None, Some(s)) => Choice::Stream(s),
            (None, None) => return Ok(None),
        };
        match choice {
            Choice::Table(offset) => {
                if let Some(list) = self.table_offsets.as_mut() {
                    list.retain(|&o| o != offset);
                }
                Ok(Some(offset))
            }
            Choice::Stream(offset) => {
                if let Some(list) = self.stream_offsets.as_mut() {
                    list.retain(|&o| o != offset);
                }
                Ok(Some(offset))
            }
        }
    }
}

enum Choice {
    Table(u64),
    Stream(u64),
}

fn nearest(values: &[u64], expected: u64) -> Option<u64> {
    values
        .iter()
        .copied()
        .min_by_key(|&v| (expected as i64 - v as i64).abs())
}
