//! PDF header parsing
//!
//! Locates `%PDF-x.y` (or `%FDF-x.y`), tolerating junk before it: scanners
//! and mail gateways routinely prepend bytes. The byte offset of the `%` is
//! the header offset; every xref offset in the document is interpreted
//! relative to it.

use log::{debug, warn};

use super::cursor::{is_eol, ByteCursor};
use super::{ParseError, ParseMode, ParseResult};
use crate::io::RandomAccessRead;

const PDF_MARKER: &[u8] = b"%PDF-";
const FDF_MARKER: &[u8] = b"%FDF-";
const PDF_DEFAULT_VERSION: f32 = 1.4;
const FDF_DEFAULT_VERSION: f32 = 1.0;

/// What the header scan found.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderInfo {
    pub version: f32,
    /// Byte offset of the `%` of the marker; added to every stored offset.
    pub offset: u64,
    pub is_fdf: bool,
    /// The four bytes after `%` on the second line, `-1` each when the
    /// binary comment is missing or invalid. Recorded in validation mode.
    pub comment_bytes: [i32; 4],
}

impl Default for HeaderInfo {
    fn default() -> Self {
        Self {
            version: PDF_DEFAULT_VERSION,
            offset: 0,
            is_fdf: false,
            comment_bytes: [-1; 4],
        }
    }
}

fn find_marker(line: &[u8]) -> Option<(usize, bool)> {
    let find = |marker: &[u8]| {
        line.windows(marker.len())
            .position(|window| window == marker)
    };
    if let Some(pos) = find(PDF_MARKER) {
        return Some((pos, false));
    }
    find(FDF_MARKER).map(|pos| (pos, true))
}

/// Parse the header. The cursor is left at offset 0.
pub fn parse_header<R: RandomAccessRead>(
    cur: &mut ByteCursor<R>,
    mode: ParseMode,
) -> ParseResult<HeaderInfo> {
    cur.seek(0)?;
    let mut line_start = cur.position();
    let mut line = cur.read_line()?;
    let mut found = find_marker(&line);

    // broken writers push the version line down; scan until a line that
    // starts with a digit, which has to be the first one carrying data
    while found.is_none() && !cur.is_eof() {
        if line.first().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            break;
        }
        line_start = cur.position();
        line = cur.read_line()?;
        found = find_marker(&line);
    }

    let (marker_pos, is_fdf) = match found {
        Some(found) => found,
        None => {
            if mode.record_diagnostics() {
                // validation records the violation and keeps going
                warn!("header marker not found, assuming version {}", PDF_DEFAULT_VERSION);
                cur.seek(0)?;
                return Ok(HeaderInfo::default());
            }
            return Err(ParseError::InvalidHeader);
        }
    };

    let offset = line_start + marker_pos as u64;
    let header = &line[marker_pos..];
    let marker_len = PDF_MARKER.len();

    let version = if header.len() < marker_len + 3 {
        let default = if is_fdf {
            FDF_DEFAULT_VERSION
        } else {
            PDF_DEFAULT_VERSION
        };
        debug!("no version found, set to {} as default", default);
        default
    } else {
        // tolerate garbage after the version on the same line
        let text = String::from_utf8_lossy(&header[marker_len..marker_len + 3]);
        match text.parse::<f32>() {
            Ok(version) => version,
            Err(_) => {
                debug!("can't parse the header version '{}'", text);
                if is_fdf {
                    FDF_DEFAULT_VERSION
                } else {
                    PDF_DEFAULT_VERSION
                }
            }
        }
    };

    let mut info = HeaderInfo {
        version,
        offset,
        is_fdf,
        comment_bytes: [-1; 4],
    };

    if mode.record_diagnostics() {
        info.comment_bytes = read_comment_bytes(cur)?;
    }

    cur.seek(0)?;
    Ok(info)
}

/// The file header line shall be immediately followed by a comment of at
/// least four bytes with values above 127 (ISO 19005-1 clause 6.1.2). The
/// four bytes are recorded as-is; rule evaluation happens elsewhere.
fn read_comment_bytes<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<[i32; 4]> {
    let comment = cur.read_line()?;
    if comment.is_empty() || comment[0] != b'%' || comment.len() < 5 {
        return Ok([-1; 4]);
    }
    if comment[1..5].iter().any(|&c| is_eol(c)) {
        return Ok([-1; 4]);
    }
    Ok([
        comment[1] as i32,
        comment[2] as i32,
        comment[3] as i32,
        comment[4] as i32,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRead;

    fn parse(data: &[u8], mode: ParseMode) -> ParseResult<HeaderInfo> {
        let mut cur = ByteCursor::new(MemoryRead::from(data));
        parse_header(&mut cur, mode)
    }

    #[test]
    fn test_plain_header() {
        let info = parse(b"%PDF-1.7\ncontent", ParseMode::Lenient).unwrap();
        assert_eq!(info.version, 1.7);
        assert_eq!(info.offset, 0);
        assert!(!info.is_fdf);
    }

    #[test]
    fn test_junk_prefix() {
        let info = parse(b"<html>\njunk\n%PDF-1.5\n", ParseMode::Lenient).unwrap();
        assert_eq!(info.version, 1.5);
        assert_eq!(info.offset, 12);
    }

    #[test]
    fn test_junk_on_same_line() {
        let info = parse(b"garbage%PDF-1.3\n", ParseMode::Lenient).unwrap();
        assert_eq!(info.version, 1.3);
        assert_eq!(info.offset, 7);
    }

    #[test]
    fn test_fdf_header() {
        let info = parse(b"%FDF-1.2\n", ParseMode::Lenient).unwrap();
        assert_eq!(info.version, 1.2);
        assert!(info.is_fdf);
    }

    #[test]
    fn test_missing_version_defaults() {
        let info = parse(b"%PDF-\n", ParseMode::Lenient).unwrap();
        assert_eq!(info.version, PDF_DEFAULT_VERSION);
    }

    #[test]
    fn test_no_marker_is_error() {
        assert!(matches!(
            parse(b"not a pdf at all", ParseMode::Lenient),
            Err(ParseError::InvalidHeader)
        ));
        assert!(matches!(
            parse(b"not a pdf at all", ParseMode::Strict),
            Err(ParseError::InvalidHeader)
        ));
    }

    #[test]
    fn test_no_marker_validation_records_and_continues() {
        let info = parse(b"not a pdf at all", ParseMode::Validation).unwrap();
        assert_eq!(info.version, PDF_DEFAULT_VERSION);
        assert_eq!(info.offset, 0);
    }

    #[test]
    fn test_comment_bytes_recorded_in_validation() {
        let info = parse(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n", ParseMode::Validation).unwrap();
        assert_eq!(info.comment_bytes, [0xE2, 0xE3, 0xCF, 0xD3]);
    }

    #[test]
    fn test_comment_bytes_missing() {
        let info = parse(b"%PDF-1.4\n1 0 obj\n", ParseMode::Validation).unwrap();
        assert_eq!(info.comment_bytes, [-1; 4]);

        let info = parse(b"%PDF-1.4\n%ab\n", ParseMode::Validation).unwrap();
        assert_eq!(info.comment_bytes, [-1; 4]);
    }

    #[test]
    fn test_comment_bytes_not_recorded_outside_validation() {
        let info = parse(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n", ParseMode::Lenient).unwrap();
        assert_eq!(info.comment_bytes, [-1; 4]);
    }

    #[test]
    fn test_digit_line_stops_scan() {
        // a line starting with a digit ends the junk-prefix search
        assert!(parse(b"junk\n1 0 obj\n%PDF-1.4\n", ParseMode::Lenient).is_err());
    }

    #[test]
    fn test_version_with_trailing_garbage() {
        let info = parse(b"%PDF-1.6extra\n", ParseMode::Lenient).unwrap();
        assert_eq!(info.version, 1.6);
    }
}
