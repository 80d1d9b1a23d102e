//! PDF object model
//!
//! The value tree produced by the grammar: ISO 32000-1 Section 7.3. Indirect
//! references stay unresolved (`PdfObject::Reference`); walking the object
//! graph always goes back through the object store, which is what keeps
//! cyclic documents safe.

use std::fmt;

/// Identifier of an indirect object: object number plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub number: u32,
    pub generation: u16,
}

impl ObjectKey {
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.generation)
    }
}

/// PDF name object. The payload is the raw byte sequence after `#xx`
/// decoding; comparison is bytewise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PdfName(pub Vec<u8>);

impl PdfName {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        PdfName(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn is(&self, name: &str) -> bool {
        self.0 == name.as_bytes()
    }
}

impl fmt::Display for PdfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", String::from_utf8_lossy(&self.0))
    }
}

/// How a string literal was written in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    Literal,
    Hex,
}

/// Validation-mode bookkeeping for hex strings: total character count
/// between the brackets and whether every one was a hex digit
/// (ISO 19005-1 clause 6.1.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexStringInfo {
    pub hex_count: u64,
    pub hex_only: bool,
}

/// PDF string object
#[derive(Debug, Clone, PartialEq)]
pub struct PdfString {
    data: Vec<u8>,
    kind: StringKind,
    hex_info: Option<HexStringInfo>,
}

impl PdfString {
    pub fn literal(data: Vec<u8>) -> Self {
        Self {
            data,
            kind: StringKind::Literal,
            hex_info: None,
        }
    }

    pub fn hex(data: Vec<u8>) -> Self {
        Self {
            data,
            kind: StringKind::Hex,
            hex_info: None,
        }
    }

    pub fn hex_with_info(data: Vec<u8>, info: HexStringInfo) -> Self {
        Self {
            data,
            kind: StringKind::Hex,
            hex_info: Some(info),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn kind(&self) -> StringKind {
        self.kind
    }

    pub fn hex_info(&self) -> Option<HexStringInfo> {
        self.hex_info
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// PDF array object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfArray(pub Vec<PdfObject>);

impl PdfArray {
    pub fn new() -> Self {
        PdfArray(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PdfObject> {
        self.0.get(index)
    }

    pub fn push(&mut self, obj: PdfObject) {
        self.0.push(obj);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PdfObject> {
        self.0.iter()
    }
}

/// PDF dictionary object.
///
/// Entries keep their insertion order, which matters for byte-faithful
/// diagnostics. Lookup is a linear scan; real-world dictionaries are small.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfDictionary {
    entries: Vec<(PdfName, PdfObject)>,
}

impl PdfDictionary {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PdfObject> {
        self.get_raw(key.as_bytes())
    }

    pub fn get_raw(&self, key: &[u8]) -> Option<&PdfObject> {
        self.entries
            .iter()
            .find(|(name, _)| name.as_bytes() == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a key/value pair. A duplicate key replaces the earlier value
    /// in place (last one wins) and returns the previous value.
    pub fn insert(&mut self, key: PdfName, value: PdfObject) -> Option<PdfObject> {
        for entry in &mut self.entries {
            if entry.0 == key {
                return Some(std::mem::replace(&mut entry.1, value));
            }
        }
        self.entries.push((key, value));
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<PdfObject> {
        let index = self
            .entries
            .iter()
            .position(|(name, _)| name.as_bytes() == key.as_bytes())?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (PdfName, PdfObject)> {
        self.entries.iter()
    }

    /// Value of the `/Type` key, if it is a name.
    pub fn type_name(&self) -> Option<&PdfName> {
        self.get("Type").and_then(|obj| obj.as_name())
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|obj| obj.as_integer())
    }
}

/// Per-stream conformance findings recorded in validation mode
/// (ISO 19005-1 clause 6.1.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamChecks {
    /// The `stream` keyword was followed by CR LF or a bare LF.
    pub stream_keyword_crlf_compliant: bool,
    /// An EOL marker directly preceded the `endstream` keyword.
    pub endstream_keyword_eol_compliant: bool,
    /// Actual payload length measured from file positions, EOL excluded.
    pub origin_length: u64,
}

impl Default for StreamChecks {
    fn default() -> Self {
        Self {
            stream_keyword_crlf_compliant: true,
            endstream_keyword_eol_compliant: true,
            origin_length: 0,
        }
    }
}

/// PDF stream object: dictionary plus raw (still filtered) payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfStream {
    pub dict: PdfDictionary,
    pub data: Vec<u8>,
    pub checks: Option<StreamChecks>,
}

impl PdfStream {
    pub fn new(dict: PdfDictionary, data: Vec<u8>) -> Self {
        Self {
            dict,
            data,
            checks: None,
        }
    }

    /// Raw payload, exactly as stored in the file.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// Payload after applying the stream filters.
    pub fn decode(&self) -> super::ParseResult<Vec<u8>> {
        super::filters::decode_stream(self)
    }
}

/// PDF object types
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(PdfString),
    Name(PdfName),
    Array(PdfArray),
    Dictionary(PdfDictionary),
    Stream(PdfStream),
    Reference(ObjectKey),
}

impl PdfObject {
    pub fn is_null(&self) -> bool {
        matches!(self, PdfObject::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PdfObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PdfObject::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            PdfObject::Real(r) => Some(*r),
            PdfObject::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            PdfObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&PdfName> {
        match self {
            PdfObject::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&PdfArray> {
        match self {
            PdfObject::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Dictionary view of either a plain dictionary or a stream.
    pub fn as_dict(&self) -> Option<&PdfDictionary> {
        match self {
            PdfObject::Dictionary(d) => Some(d),
            PdfObject::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&PdfStream> {
        match self {
            PdfObject::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectKey> {
        match self {
            PdfObject::Reference(key) => Some(*key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new(12, 3).to_string(), "12 3");
    }

    #[test]
    fn test_name_compare() {
        let a = PdfName::new(b"Type".to_vec());
        let b = PdfName::new(b"Type".to_vec());
        assert_eq!(a, b);
        assert!(a.is("Type"));
        assert!(!a.is("type"));
    }

    #[test]
    fn test_dictionary_insertion_order() {
        let mut dict = PdfDictionary::new();
        dict.insert(PdfName::new(b"B".to_vec()), PdfObject::Integer(1));
        dict.insert(PdfName::new(b"A".to_vec()), PdfObject::Integer(2));
        dict.insert(PdfName::new(b"C".to_vec()), PdfObject::Integer(3));
        let keys: Vec<_> = dict.iter().map(|(k, _)| k.as_bytes().to_vec()).collect();
        assert_eq!(keys, vec![b"B".to_vec(), b"A".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn test_dictionary_duplicate_last_wins() {
        let mut dict = PdfDictionary::new();
        dict.insert(PdfName::new(b"K".to_vec()), PdfObject::Integer(1));
        let old = dict.insert(PdfName::new(b"K".to_vec()), PdfObject::Integer(2));
        assert_eq!(old, Some(PdfObject::Integer(1)));
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get_integer("K"), Some(2));
    }

    #[test]
    fn test_accessors() {
        let obj = PdfObject::Integer(7);
        assert_eq!(obj.as_integer(), Some(7));
        assert_eq!(obj.as_real(), Some(7.0));
        assert!(obj.as_name().is_none());

        let stream = PdfObject::Stream(PdfStream::new(PdfDictionary::new(), vec![1, 2]));
        assert!(stream.as_dict().is_some());
        assert_eq!(stream.as_stream().unwrap().raw_data(), &[1, 2]);

        let r = PdfObject::Reference(ObjectKey::new(5, 0));
        assert_eq!(r.as_reference(), Some(ObjectKey::new(5, 0)));
    }

    #[test]
    fn test_type_name() {
        let mut dict = PdfDictionary::new();
        dict.insert(
            PdfName::new(b"Type".to_vec()),
            PdfObject::Name(PdfName::new(b"Catalog".to_vec())),
        );
        assert!(dict.type_name().unwrap().is("Catalog"));
    }
}
