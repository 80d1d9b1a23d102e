//! Object streams
//!
//! An object stream (ISO 32000-1 Section 7.5.7) packs a sequence of small
//! objects into one compressed payload: `/N` pairs of `number offset`
//! integers, then the objects themselves starting at `/First`.

use log::warn;

use super::cursor::ByteCursor;
use super::grammar::ObjectGrammar;
use super::lexer;
use super::objects::{PdfObject, PdfStream};
use super::validation::ValidationSink;
use super::{ParseError, ParseMode, ParseResult};
use crate::io::MemoryRead;

/// Decode and parse every object in the stream, in pair-table order.
pub fn parse_object_stream(
    stream: &PdfStream,
    mode: ParseMode,
) -> ParseResult<Vec<(u32, PdfObject)>> {
    let n = stream
        .dict
        .get_integer("N")
        .ok_or_else(|| ParseError::syntax(0, "object stream is missing /N"))?;
    let first = stream
        .dict
        .get_integer("First")
        .ok_or_else(|| ParseError::syntax(0, "object stream is missing /First"))?;
    if n < 0 || first < 0 {
        return Err(ParseError::syntax(0, "object stream /N or /First is negative"));
    }

    let data = stream.decode()?;
    let mut cur = ByteCursor::new(MemoryRead::new(data));

    let mut pairs = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let number = lexer::read_object_number(&mut cur)?;
        let offset = lexer::read_long(&mut cur)?;
        if offset < 0 {
            return Err(ParseError::syntax(
                cur.position(),
                "negative offset in object stream pair table",
            ));
        }
        pairs.push((number, offset as u64));
    }

    // the containing stream was decrypted as a whole, so the objects inside
    // never go through the security handler again
    let mut scratch = ValidationSink::new();
    let mut objects = Vec::with_capacity(pairs.len());
    for (number, offset) in pairs {
        cur.seek(first as u64 + offset)?;
        let parsed = ObjectGrammar::new(&mut cur, mode, &mut scratch, 0).parse_direct_object();
        match parsed {
            Ok(Some(value)) => objects.push((number, value)),
            Ok(None) => {
                warn!("empty object {} in object stream", number);
                objects.push((number, PdfObject::Null));
            }
            Err(e) if mode.is_lenient() => {
                warn!("skipping corrupt object {} in object stream: {}", number, e);
                objects.push((number, PdfObject::Null));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{PdfDictionary, PdfName};

    fn object_stream(n: i64, first: i64, payload: &[u8]) -> PdfStream {
        let mut dict = PdfDictionary::new();
        dict.insert(
            PdfName::new(b"Type".to_vec()),
            PdfObject::Name(PdfName::new(b"ObjStm".to_vec())),
        );
        dict.insert(PdfName::new(b"N".to_vec()), PdfObject::Integer(n));
        dict.insert(PdfName::new(b"First".to_vec()), PdfObject::Integer(first));
        PdfStream::new(dict, payload.to_vec())
    }

    #[test]
    fn test_parse_two_objects() {
        // pair table "3 0 6 9 " is 8 bytes, objects follow at /First
        let payload = b"3 0 6 9 <</A 1>> <</B 2>>";
        let stream = object_stream(2, 8, payload);
        let objects = parse_object_stream(&stream, ParseMode::Lenient).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].0, 3);
        assert_eq!(
            objects[0].1.as_dict().unwrap().get_integer("A"),
            Some(1)
        );
        assert_eq!(objects[1].0, 6);
        assert_eq!(
            objects[1].1.as_dict().unwrap().get_integer("B"),
            Some(2)
        );
    }

    #[test]
    fn test_missing_n() {
        let mut dict = PdfDictionary::new();
        dict.insert(PdfName::new(b"First".to_vec()), PdfObject::Integer(0));
        let stream = PdfStream::new(dict, b"".to_vec());
        assert!(parse_object_stream(&stream, ParseMode::Lenient).is_err());
    }

    #[test]
    fn test_corrupt_object_degrades_in_lenient() {
        let payload = b"5 0 )bad";
        let stream = object_stream(1, 4, payload);
        let objects = parse_object_stream(&stream, ParseMode::Lenient).unwrap();
        assert_eq!(objects.len(), 1);
        assert!(objects[0].1.is_null());
    }

    #[test]
    fn test_primitive_members() {
        let payload = b"1 0 2 3 42 (text)";
        let stream = object_stream(2, 8, payload);
        let objects = parse_object_stream(&stream, ParseMode::Lenient).unwrap();
        assert_eq!(objects[0].1.as_integer(), Some(42));
        assert_eq!(
            objects[1].1.as_string().unwrap().as_bytes(),
            b"text"
        );
    }
}
