//! Token-level readers
//!
//! Lexical layer of ISO 32000-1 Section 7.2/7.3: numbers, names with `#xx`
//! escapes, literal and hexadecimal strings, bare keywords, and the bounded
//! object/generation number readers. All functions operate on a borrowed
//! [`ByteCursor`] and leave the cursor just past what they consumed; probes
//! that fail rewind instead of raising on the expected negative path.

use log::warn;

use super::cursor::{is_end_of_name, is_eol, is_hex_digit, is_whitespace, ByteCursor};
use super::objects::{HexStringInfo, PdfName, PdfObject, PdfString};
use super::{ParseError, ParseResult};
use crate::io::RandomAccessRead;

/// Object numbers must be non-negative and below 10^10.
pub const OBJECT_NUMBER_THRESHOLD: i64 = 10_000_000_000;

/// Generation numbers are at most five digits.
pub const GENERATION_NUMBER_THRESHOLD: i64 = 65_535;

/// Read the next bare token: a run of bytes up to whitespace, `]`, or any
/// delimiter that can start another object. Leading spaces and comments are
/// skipped.
pub fn read_token<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<Vec<u8>> {
    cur.skip_spaces()?;
    let mut buffer = Vec::new();
    while let Some(c) = cur.read()? {
        if is_end_of_name(c) || c == b']' {
            cur.rewind(1)?;
            break;
        }
        buffer.push(c);
    }
    Ok(buffer)
}

/// Read the digit run of an integer token. Stops at whitespace, `<`, `[`,
/// `(`, NUL, or end of input.
fn read_number_token<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<Vec<u8>> {
    let mut buffer = Vec::new();
    while let Some(c) = cur.read()? {
        if matches!(c, b' ' | b'\n' | b'\r' | b'<' | b'[' | b'(' | 0) {
            cur.rewind(1)?;
            break;
        }
        buffer.push(c);
    }
    Ok(buffer)
}

/// Read a signed integer, skipping leading spaces.
pub fn read_long<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<i64> {
    cur.skip_spaces()?;
    let buffer = read_number_token(cur)?;
    match std::str::from_utf8(&buffer)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
    {
        Some(value) => Ok(value),
        None => {
            cur.rewind(buffer.len() as u64)?;
            Err(ParseError::syntax(
                cur.position(),
                format!(
                    "expected a number, got '{}'",
                    String::from_utf8_lossy(&buffer)
                ),
            ))
        }
    }
}

/// Read an object number and enforce its bounds.
pub fn read_object_number<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<u32> {
    let value = read_long(cur)?;
    if value < 0 || value >= OBJECT_NUMBER_THRESHOLD {
        return Err(ParseError::syntax(
            cur.position(),
            format!("object number '{}' has more than 10 digits or is negative", value),
        ));
    }
    u32::try_from(value).map_err(|_| {
        ParseError::syntax(
            cur.position(),
            format!("object number '{}' out of range", value),
        )
    })
}

/// Read a generation number and enforce its bounds.
pub fn read_generation_number<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<u16> {
    let value = read_long(cur)?;
    if !(0..=GENERATION_NUMBER_THRESHOLD).contains(&value) {
        return Err(ParseError::syntax(
            cur.position(),
            format!("generation number '{}' has more than 5 digits", value),
        ));
    }
    Ok(value as u16)
}

/// Read the exact byte sequence `expected` or fail.
pub fn expect_bytes<R: RandomAccessRead>(
    cur: &mut ByteCursor<R>,
    expected: &[u8],
) -> ParseResult<()> {
    for &e in expected {
        if cur.read()? != Some(e) {
            return Err(ParseError::syntax(
                cur.position(),
                format!("expected '{}'", String::from_utf8_lossy(expected)),
            ));
        }
    }
    Ok(())
}

/// Read `expected`, optionally skipping spaces before and after.
pub fn expect_keyword<R: RandomAccessRead>(
    cur: &mut ByteCursor<R>,
    expected: &[u8],
    skip_spaces: bool,
) -> ParseResult<()> {
    if skip_spaces {
        cur.skip_spaces()?;
    }
    expect_bytes(cur, expected)?;
    if skip_spaces {
        cur.skip_spaces()?;
    }
    Ok(())
}

pub fn expect_char<R: RandomAccessRead>(cur: &mut ByteCursor<R>, expected: u8) -> ParseResult<()> {
    match cur.read()? {
        Some(c) if c == expected => Ok(()),
        other => Err(ParseError::syntax(
            cur.position(),
            format!(
                "expected '{}' actual '{}'",
                expected as char,
                other.map(|c| c as char).unwrap_or('\u{0}')
            ),
        )),
    }
}

/// Parse a number token into an integer or real object. The sign, one
/// decimal point, and an `[eE][+-]?digits` exponent are accepted; anything
/// with a dot or exponent is a real.
pub fn read_number<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<PdfObject> {
    let start = cur.position();
    let mut buffer = Vec::new();
    while let Some(c) = cur.peek()? {
        if c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.' | b'e' | b'E') {
            cur.read()?;
            buffer.push(c);
        } else {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buffer).into_owned();
    let is_real = text.contains('.') || text.contains('e') || text.contains('E');
    if !is_real {
        if let Ok(value) = text.parse::<i64>() {
            return Ok(PdfObject::Integer(value));
        }
    }
    match text.parse::<f64>() {
        Ok(value) => Ok(PdfObject::Real(value)),
        Err(_) => Err(ParseError::syntax(
            start,
            format!("invalid number: '{}'", text),
        )),
    }
}

/// Parse a name object. The leading `/` is consumed here. `#HH` decodes to
/// the escaped byte only when both characters are hex digits; otherwise the
/// `#` is kept literally, tolerating pre-1.2 writers.
pub fn read_name<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<PdfName> {
    expect_char(cur, b'/')?;
    let mut buffer = Vec::new();
    while let Some(c) = cur.read()? {
        if c == b'#' {
            let h1 = cur.read()?;
            let h2 = cur.read()?;
            match (h1, h2) {
                (Some(a), Some(b)) if is_hex_digit(a) && is_hex_digit(b) => {
                    let hex = [a, b];
                    let text = std::str::from_utf8(&hex).expect("hex digits are ascii");
                    buffer.push(u8::from_str_radix(text, 16).expect("validated hex"));
                }
                (Some(_), Some(_)) => {
                    // not an escape; keep '#' and re-read the two bytes
                    cur.rewind(2)?;
                    buffer.push(b'#');
                }
                (Some(_), None) => {
                    cur.rewind(1)?;
                    buffer.push(b'#');
                }
                (None, _) => {
                    buffer.push(b'#');
                    break;
                }
            }
        } else if is_end_of_name(c) {
            cur.rewind(1)?;
            break;
        } else {
            buffer.push(c);
        }
    }
    Ok(PdfName(buffer))
}

/// After an unbalanced `)`, the sequences `CR LF /` and `CR /` mark a broken
/// writer that forgot the closing paren; treat the string as finished.
fn missing_close_paren<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<bool> {
    let origin = cur.position();
    let mut next = [0u8; 3];
    let n = cur.read_into(&mut next)?;
    let broken = (n == 3 && next[0] == b'\r' && next[1] == b'\n' && next[2] == b'/')
        || (n >= 2 && next[0] == b'\r' && next[1] == b'/');
    cur.seek(origin)?;
    Ok(broken)
}

/// Parse a literal string. The opening `(` is consumed here.
pub fn read_literal_string<R: RandomAccessRead>(
    cur: &mut ByteCursor<R>,
) -> ParseResult<PdfString> {
    expect_char(cur, b'(')?;
    let mut out = Vec::new();
    let mut braces: i32 = 1;
    'outer: while braces > 0 {
        let c = match cur.read()? {
            Some(c) => c,
            None => {
                return Err(ParseError::syntax(
                    cur.position(),
                    "unterminated literal string",
                ))
            }
        };
        match c {
            b')' => {
                braces -= 1;
                if braces > 0 && missing_close_paren(cur)? {
                    braces = 0;
                }
                if braces > 0 {
                    out.push(c);
                }
            }
            b'(' => {
                braces += 1;
                out.push(c);
            }
            b'\\' => {
                let next = match cur.read()? {
                    Some(n) => n,
                    None => break,
                };
                match next {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b')' => {
                        // an escaped close paren can still be the missing-paren bug
                        if missing_close_paren(cur)? {
                            braces = 0;
                            out.push(b'\\');
                        } else {
                            out.push(b')');
                        }
                    }
                    b'(' | b'\\' => out.push(next),
                    b'\r' | b'\n' => {
                        // line continuation; swallow the full EOL run
                        while let Some(c) = cur.peek()? {
                            if !is_eol(c) {
                                break;
                            }
                            cur.read()?;
                        }
                    }
                    b'0'..=b'7' => {
                        let mut value = (next - b'0') as u32;
                        for _ in 0..2 {
                            match cur.peek()? {
                                Some(d @ b'0'..=b'7') => {
                                    cur.read()?;
                                    value = value * 8 + (d - b'0') as u32;
                                }
                                _ => break,
                            }
                        }
                        out.push(value as u8);
                    }
                    _ => {
                        // unknown escape: drop the backslash, keep the byte
                        out.push(next);
                    }
                }
            }
            _ => out.push(c),
        }
        if braces == 0 {
            break 'outer;
        }
    }
    Ok(PdfString::literal(out))
}

fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

fn decode_hex_pairs(digits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(digits.len() / 2 + 1);
    let mut chunks = digits.chunks_exact(2);
    for pair in &mut chunks {
        out.push(hex_value(pair[0]) << 4 | hex_value(pair[1]));
    }
    if let [last] = chunks.remainder() {
        out.push(hex_value(*last) << 4);
    }
    out
}

/// Parse a hex string; the opening `<` is consumed here. Whitespace inside
/// the brackets is skipped. A non-hex byte aborts to a read-to-`>` recovery,
/// discarding an unpaired trailing digit first.
pub fn read_hex_string<R: RandomAccessRead>(cur: &mut ByteCursor<R>) -> ParseResult<PdfString> {
    expect_char(cur, b'<')?;
    let mut digits = Vec::new();
    loop {
        let c = match cur.read()? {
            Some(c) => c,
            None => {
                return Err(ParseError::syntax(
                    cur.position(),
                    "missing closing bracket for hex string",
                ))
            }
        };
        if is_hex_digit(c) {
            digits.push(c);
        } else if c == b'>' {
            break;
        } else if is_whitespace(c) {
            continue;
        } else {
            warn!(
                "invalid character {:#04x} in hex string at offset {}",
                c,
                cur.position()
            );
            if digits.len() % 2 != 0 {
                digits.pop();
            }
            loop {
                match cur.read()? {
                    Some(b'>') => break,
                    Some(_) => {}
                    None => {
                        return Err(ParseError::syntax(
                            cur.position(),
                            "missing closing bracket for hex string",
                        ))
                    }
                }
            }
            break;
        }
    }
    Ok(PdfString::hex(decode_hex_pairs(&digits)))
}

/// Validation-mode hex string parse: no recovery abort; counts every
/// character between the brackets and records whether all were hex digits.
pub fn read_hex_string_validating<R: RandomAccessRead>(
    cur: &mut ByteCursor<R>,
) -> ParseResult<PdfString> {
    expect_char(cur, b'<')?;
    let mut digits = Vec::new();
    let mut hex_count: u64 = 0;
    let mut hex_only = true;
    loop {
        let c = match cur.read()? {
            Some(c) => c,
            None => {
                return Err(ParseError::syntax(
                    cur.position(),
                    "missing closing bracket for hex string",
                ))
            }
        };
        if is_hex_digit(c) {
            digits.push(c);
            hex_count += 1;
        } else if c == b'>' {
            break;
        } else if is_whitespace(c) {
            continue;
        } else {
            hex_only = false;
            hex_count += 1;
        }
    }
    Ok(PdfString::hex_with_info(
        decode_hex_pairs(&digits),
        HexStringInfo {
            hex_count,
            hex_only,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRead;
    use crate::parser::objects::StringKind;

    fn cursor(data: &[u8]) -> ByteCursor<MemoryRead> {
        ByteCursor::new(MemoryRead::from(data))
    }

    #[test]
    fn test_read_numbers() {
        let mut c = cursor(b"42 -17 +5 3.14 -.002 6.02e23 1E-3 ");
        assert_eq!(read_number(&mut c).unwrap(), PdfObject::Integer(42));
        c.skip_spaces().unwrap();
        assert_eq!(read_number(&mut c).unwrap(), PdfObject::Integer(-17));
        c.skip_spaces().unwrap();
        assert_eq!(read_number(&mut c).unwrap(), PdfObject::Integer(5));
        c.skip_spaces().unwrap();
        assert_eq!(read_number(&mut c).unwrap(), PdfObject::Real(3.14));
        c.skip_spaces().unwrap();
        assert_eq!(read_number(&mut c).unwrap(), PdfObject::Real(-0.002));
        c.skip_spaces().unwrap();
        assert_eq!(read_number(&mut c).unwrap(), PdfObject::Real(6.02e23));
        c.skip_spaces().unwrap();
        assert_eq!(read_number(&mut c).unwrap(), PdfObject::Real(1e-3));
    }

    #[test]
    fn test_read_name_plain() {
        let mut c = cursor(b"/Type /Catalog");
        assert!(read_name(&mut c).unwrap().is("Type"));
        c.skip_spaces().unwrap();
        assert!(read_name(&mut c).unwrap().is("Catalog"));
    }

    #[test]
    fn test_read_name_hex_escape() {
        let mut c = cursor(b"/A#20B ");
        assert_eq!(read_name(&mut c).unwrap().as_bytes(), b"A B");
    }

    #[test]
    fn test_read_name_bad_hex_keeps_hash() {
        // '#' followed by non-hex is literal, pre-1.2 tolerance
        let mut c = cursor(b"/Foo#ZZ ");
        assert_eq!(read_name(&mut c).unwrap().as_bytes(), b"Foo#ZZ");
    }

    #[test]
    fn test_read_name_terminators() {
        let mut c = cursor(b"/Name(str)");
        assert!(read_name(&mut c).unwrap().is("Name"));
        assert_eq!(c.peek().unwrap(), Some(b'('));
    }

    #[test]
    fn test_literal_string_escapes() {
        let mut c = cursor(b"(a\\nb\\t\\(c\\)\\\\d)");
        let s = read_literal_string(&mut c).unwrap();
        assert_eq!(s.as_bytes(), b"a\nb\t(c)\\d");
        assert_eq!(s.kind(), StringKind::Literal);
    }

    #[test]
    fn test_literal_string_nested_parens() {
        let mut c = cursor(b"(a(b(c))d)");
        assert_eq!(read_literal_string(&mut c).unwrap().as_bytes(), b"a(b(c))d");
    }

    #[test]
    fn test_literal_string_octal() {
        let mut c = cursor(b"(\\101\\102\\7z)");
        assert_eq!(
            read_literal_string(&mut c).unwrap().as_bytes(),
            b"AB\x07z"
        );
    }

    #[test]
    fn test_literal_string_line_continuation() {
        let mut c = cursor(b"(ab\\\r\ncd)");
        assert_eq!(read_literal_string(&mut c).unwrap().as_bytes(), b"abcd");
    }

    #[test]
    fn test_literal_string_missing_close_paren_recovery() {
        // '/Title ( (5)' followed by CR LF and the next key
        let mut c = cursor(b"( (5)\r\n/Author");
        let s = read_literal_string(&mut c).unwrap();
        assert_eq!(s.as_bytes(), b" (5");
        c.skip_spaces().unwrap();
        assert_eq!(c.peek().unwrap(), Some(b'/'));
    }

    #[test]
    fn test_literal_string_unknown_escape() {
        let mut c = cursor(b"(a\\qb)");
        assert_eq!(read_literal_string(&mut c).unwrap().as_bytes(), b"aqb");
    }

    #[test]
    fn test_hex_string_basic() {
        let mut c = cursor(b"<48656C6C6F>");
        let s = read_hex_string(&mut c).unwrap();
        assert_eq!(s.as_bytes(), b"Hello");
        assert_eq!(s.kind(), StringKind::Hex);
    }

    #[test]
    fn test_hex_string_whitespace_and_odd_count() {
        let mut c = cursor(b"<48 65 6C 6C 6F 2>");
        assert_eq!(read_hex_string(&mut c).unwrap().as_bytes(), b"Hello ");
    }

    #[test]
    fn test_hex_string_recovery() {
        // 'X' aborts to the closing bracket; unpaired '6' is discarded
        let mut c = cursor(b"<48656X4141>rest");
        let s = read_hex_string(&mut c).unwrap();
        assert_eq!(s.as_bytes(), b"He");
        assert_eq!(c.peek().unwrap(), Some(b'r'));
    }

    #[test]
    fn test_hex_string_validating_records_info() {
        let mut c = cursor(b"<48X5>");
        let s = read_hex_string_validating(&mut c).unwrap();
        let info = s.hex_info().unwrap();
        assert_eq!(info.hex_count, 4);
        assert!(!info.hex_only);

        let mut c = cursor(b"<4865>");
        let info = read_hex_string_validating(&mut c).unwrap().hex_info().unwrap();
        assert_eq!(info.hex_count, 4);
        assert!(info.hex_only);
    }

    #[test]
    fn test_object_number_bounds() {
        let mut c = cursor(b"9999999999 ");
        let err = read_object_number(&mut c).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let mut c = cursor(b"10000000000 ");
        assert!(read_object_number(&mut c).is_err());

        let mut c = cursor(b"-1 ");
        assert!(read_object_number(&mut c).is_err());

        let mut c = cursor(b"123 ");
        assert_eq!(read_object_number(&mut c).unwrap(), 123);
    }

    #[test]
    fn test_generation_number_bounds() {
        let mut c = cursor(b"65535 ");
        assert_eq!(read_generation_number(&mut c).unwrap(), 65535);
        let mut c = cursor(b"65536 ");
        assert!(read_generation_number(&mut c).is_err());
    }

    #[test]
    fn test_read_token() {
        let mut c = cursor(b"  endobj\n");
        assert_eq!(read_token(&mut c).unwrap(), b"endobj");
    }

    #[test]
    fn test_read_long_rewinds_on_failure() {
        let mut c = cursor(b"abc ");
        assert!(read_long(&mut c).is_err());
        assert_eq!(c.position(), 0);
    }
}
