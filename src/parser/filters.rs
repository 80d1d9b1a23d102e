//! Stream filters
//!
//! Decoding for the filters the xref layer itself depends on: xref streams
//! and object streams are almost always `FlateDecode`, optionally behind a
//! PNG or TIFF predictor. Content-level filters (DCT, CCITT, JBIG2, ...) are
//! outside this crate's scope and report as unsupported.

use std::io::Read;

use flate2::read::ZlibDecoder;

use super::objects::{PdfObject, PdfStream};
use super::{ParseError, ParseResult};

/// Decode a stream's payload according to its `/Filter` entry.
pub fn decode_stream(stream: &PdfStream) -> ParseResult<Vec<u8>> {
    let filters = filter_names(&stream.dict.get("Filter"));
    let mut data = stream.data.clone();
    for (index, name) in filters.iter().enumerate() {
        data = match name.as_slice() {
            b"FlateDecode" | b"Fl" => {
                let decoded = flate_decode(&data)?;
                let parms = decode_parms(stream, index);
                apply_predictor(decoded, parms.as_ref())?
            }
            other => {
                return Err(ParseError::StreamDecode(format!(
                    "unsupported filter '{}'",
                    String::from_utf8_lossy(other)
                )))
            }
        };
    }
    Ok(data)
}

fn filter_names(filter: &Option<&PdfObject>) -> Vec<Vec<u8>> {
    match filter {
        Some(PdfObject::Name(name)) => vec![name.as_bytes().to_vec()],
        Some(PdfObject::Array(array)) => array
            .iter()
            .filter_map(|obj| obj.as_name())
            .map(|name| name.as_bytes().to_vec())
            .collect(),
        _ => Vec::new(),
    }
}

/// `/DecodeParms` may be a dictionary or an array parallel to `/Filter`.
fn decode_parms(stream: &PdfStream, index: usize) -> Option<PredictorParms> {
    let parms = stream
        .dict
        .get("DecodeParms")
        .or_else(|| stream.dict.get("DP"))?;
    let dict = match parms {
        PdfObject::Dictionary(dict) => Some(dict),
        PdfObject::Array(array) => array.get(index).and_then(|obj| obj.as_dict()),
        _ => None,
    }?;
    let predictor = dict.get_integer("Predictor").unwrap_or(1);
    if predictor <= 1 {
        return None;
    }
    Some(PredictorParms {
        predictor: predictor as u8,
        colors: dict.get_integer("Colors").unwrap_or(1).max(1) as usize,
        bits_per_component: dict.get_integer("BitsPerComponent").unwrap_or(8).max(1) as usize,
        columns: dict.get_integer("Columns").unwrap_or(1).max(1) as usize,
    })
}

struct PredictorParms {
    predictor: u8,
    colors: usize,
    bits_per_component: usize,
    columns: usize,
}

fn flate_decode(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ParseError::StreamDecode(format!("flate: {}", e)))?;
    Ok(out)
}

fn apply_predictor(data: Vec<u8>, parms: Option<&PredictorParms>) -> ParseResult<Vec<u8>> {
    let parms = match parms {
        Some(p) => p,
        None => return Ok(data),
    };
    let bytes_per_pixel = (parms.colors * parms.bits_per_component + 7) / 8;
    let row_len = (parms.columns * parms.colors * parms.bits_per_component + 7) / 8;
    match parms.predictor {
        2 => tiff_predictor(data, bytes_per_pixel, row_len),
        10..=15 => png_predictor(data, bytes_per_pixel, row_len),
        other => Err(ParseError::StreamDecode(format!(
            "unsupported predictor {}",
            other
        ))),
    }
}

fn tiff_predictor(
    mut data: Vec<u8>,
    bytes_per_pixel: usize,
    row_len: usize,
) -> ParseResult<Vec<u8>> {
    for row in data.chunks_mut(row_len) {
        for i in bytes_per_pixel..row.len() {
            row[i] = row[i].wrapping_add(row[i - bytes_per_pixel]);
        }
    }
    Ok(data)
}

/// PNG predictors: every row is prefixed with a filter-type byte.
fn png_predictor(data: Vec<u8>, bytes_per_pixel: usize, row_len: usize) -> ParseResult<Vec<u8>> {
    let stride = row_len + 1;
    let mut out: Vec<u8> = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_len];
    for chunk in data.chunks(stride) {
        if chunk.len() < 2 {
            break;
        }
        let filter = chunk[0];
        let mut row = chunk[1..].to_vec();
        match filter {
            0 => {}
            1 => {
                for i in bytes_per_pixel..row.len() {
                    row[i] = row[i].wrapping_add(row[i - bytes_per_pixel]);
                }
            }
            2 => {
                for i in 0..row.len() {
                    row[i] = row[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                for i in 0..row.len() {
                    let left = if i >= bytes_per_pixel {
                        row[i - bytes_per_pixel] as u16
                    } else {
                        0
                    };
                    let up = prev_row[i] as u16;
                    row[i] = row[i].wrapping_add(((left + up) / 2) as u8);
                }
            }
            4 => {
                for i in 0..row.len() {
                    let left = if i >= bytes_per_pixel {
                        row[i - bytes_per_pixel]
                    } else {
                        0
                    };
                    let up = prev_row[i];
                    let up_left = if i >= bytes_per_pixel {
                        prev_row[i - bytes_per_pixel]
                    } else {
                        0
                    };
                    row[i] = row[i].wrapping_add(paeth(left, up, up_left));
                }
            }
            other => {
                return Err(ParseError::StreamDecode(format!(
                    "unknown PNG filter type {}",
                    other
                )))
            }
        }
        out.extend_from_slice(&row);
        if row.len() < row_len {
            break;
        }
        prev_row.copy_from_slice(&row);
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{PdfDictionary, PdfName};
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn flate_stream(payload: &[u8]) -> PdfStream {
        let mut dict = PdfDictionary::new();
        dict.insert(
            PdfName::new(b"Filter".to_vec()),
            PdfObject::Name(PdfName::new(b"FlateDecode".to_vec())),
        );
        PdfStream::new(dict, deflate(payload))
    }

    #[test]
    fn test_no_filter_passthrough() {
        let stream = PdfStream::new(PdfDictionary::new(), b"raw bytes".to_vec());
        assert_eq!(decode_stream(&stream).unwrap(), b"raw bytes");
    }

    #[test]
    fn test_flate_roundtrip() {
        let stream = flate_stream(b"hello stream payload");
        assert_eq!(decode_stream(&stream).unwrap(), b"hello stream payload");
    }

    #[test]
    fn test_unsupported_filter() {
        let mut dict = PdfDictionary::new();
        dict.insert(
            PdfName::new(b"Filter".to_vec()),
            PdfObject::Name(PdfName::new(b"DCTDecode".to_vec())),
        );
        let stream = PdfStream::new(dict, vec![0xFF]);
        assert!(matches!(
            decode_stream(&stream),
            Err(ParseError::StreamDecode(_))
        ));
    }

    #[test]
    fn test_png_up_predictor() {
        // two rows of four bytes, all filtered with "Up"
        let raw = [
            2, 10, 20, 30, 40, // row 1: prev row is zero
            2, 1, 1, 1, 1, // row 2: deltas against row 1
        ];
        let mut dict = PdfDictionary::new();
        dict.insert(
            PdfName::new(b"Filter".to_vec()),
            PdfObject::Name(PdfName::new(b"FlateDecode".to_vec())),
        );
        let mut parms = PdfDictionary::new();
        parms.insert(PdfName::new(b"Predictor".to_vec()), PdfObject::Integer(12));
        parms.insert(PdfName::new(b"Columns".to_vec()), PdfObject::Integer(4));
        dict.insert(
            PdfName::new(b"DecodeParms".to_vec()),
            PdfObject::Dictionary(parms),
        );
        let stream = PdfStream::new(dict, deflate(&raw));
        assert_eq!(
            decode_stream(&stream).unwrap(),
            vec![10, 20, 30, 40, 11, 21, 31, 41]
        );
    }

    #[test]
    fn test_tiff_predictor() {
        let raw = [10u8, 5, 5, 5];
        let data = tiff_predictor(raw.to_vec(), 1, 4).unwrap();
        assert_eq!(data, vec![10, 15, 20, 25]);
    }
}
