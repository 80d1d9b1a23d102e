//! Xref stream decoding
//!
//! PDF 1.5 replaced the classic table with a compressed stream of
//! fixed-width binary records (ISO 32000-1 Section 7.5.8): `/W` gives the
//! three field widths, `/Index` the subsection layout, and the type field
//! distinguishes free (0), in-use (1), and compressed (2) entries.

use log::warn;

use super::objects::{ObjectKey, PdfStream};
use super::xref::{XrefEntry, XrefResolver};
use super::{ParseError, ParseResult};

/// Decode an xref stream and feed its entries into the current resolver
/// section.
pub fn decode_xref_stream(stream: &PdfStream, resolver: &mut XrefResolver) -> ParseResult<()> {
    let dict = &stream.dict;

    let size = dict
        .get_integer("Size")
        .ok_or_else(|| ParseError::InvalidXRef("xref stream is missing /Size".to_string()))?;

    let index = match dict.get("Index") {
        Some(obj) => {
            let array = obj.as_array().ok_or_else(|| {
                ParseError::InvalidXRef("/Index must be an array".to_string())
            })?;
            if array.len() % 2 != 0 {
                return Err(ParseError::InvalidXRef(
                    "/Index array must have an even number of elements".to_string(),
                ));
            }
            let mut pairs = Vec::new();
            for chunk in array.0.chunks(2) {
                let first = chunk[0].as_integer().ok_or_else(|| {
                    ParseError::InvalidXRef("/Index values must be integers".to_string())
                })?;
                let count = chunk[1].as_integer().ok_or_else(|| {
                    ParseError::InvalidXRef("/Index values must be integers".to_string())
                })?;
                pairs.push((first as u32, count as u32));
            }
            pairs
        }
        None => vec![(0, size as u32)],
    };

    let w_array = dict
        .get("W")
        .and_then(|obj| obj.as_array())
        .ok_or_else(|| ParseError::InvalidXRef("xref stream is missing /W".to_string()))?;
    if w_array.len() != 3 {
        return Err(ParseError::InvalidXRef(
            "/W array must have exactly 3 elements".to_string(),
        ));
    }
    let mut w = [0usize; 3];
    for (i, slot) in w.iter_mut().enumerate() {
        *slot = w_array
            .get(i)
            .and_then(|obj| obj.as_integer())
            .filter(|v| (0..=8).contains(v))
            .ok_or_else(|| ParseError::InvalidXRef("/W values must be integers".to_string()))?
            as usize;
    }

    let data = stream.decode()?;
    let record_len = w[0] + w[1] + w[2];
    if record_len == 0 {
        return Err(ParseError::InvalidXRef("/W describes empty records".to_string()));
    }

    let mut offset = 0usize;
    for (first, count) in index {
        for i in 0..count {
            if offset + record_len > data.len() {
                return Err(ParseError::InvalidXRef(
                    "xref stream data truncated".to_string(),
                ));
            }
            // a zero-width type field defaults to type 1
            let entry_type = if w[0] == 0 {
                1
            } else {
                read_field(&data[offset..], w[0])
            };
            let field2 = read_field(&data[offset + w[0]..], w[1]);
            let field3 = read_field(&data[offset + w[0] + w[1]..], w[2]);
            offset += record_len;

            let number = first + i;
            match entry_type {
                0 => {
                    // free entry: represented by absence
                }
                1 => {
                    resolver.set_xref(
                        ObjectKey::new(number, field3 as u16),
                        XrefEntry::InUse { offset: field2 },
                    );
                }
                2 => {
                    resolver.set_xref(
                        ObjectKey::new(number, 0),
                        XrefEntry::Compressed {
                            container: field2 as u32,
                            index: field3 as u32,
                        },
                    );
                }
                other => {
                    warn!("unknown xref entry type {} for object {}", other, number);
                }
            }
        }
    }
    Ok(())
}

fn read_field(data: &[u8], width: usize) -> u64 {
    let mut value = 0u64;
    for &byte in data.iter().take(width) {
        value = (value << 8) | byte as u64;
    }
    value
}
