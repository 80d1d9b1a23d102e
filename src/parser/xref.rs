//! Cross-reference accumulation
//!
//! A document revision contributes one xref section (classic table or xref
//! stream); incremental updates chain them through `/Prev`. The resolver
//! collects sections in discovery order (newest first) and folds them into
//! one map and one trailer with latest-wins semantics.

use std::collections::{HashMap, HashSet};

use super::objects::{ObjectKey, PdfDictionary};

/// Kind of a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefKind {
    Table,
    Stream,
}

/// Resolution of one live object key.
///
/// Free entries are not represented; a key that no section mentions (or
/// that is free) is simply absent from the merged map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// The object starts at this byte offset (relative to the header).
    InUse { offset: u64 },
    /// The object lives inside an object stream.
    Compressed { container: u32, index: u32 },
}

#[derive(Debug)]
struct XrefSection {
    start_offset: u64,
    kind: XrefKind,
    trailer: Option<PdfDictionary>,
    entries: HashMap<ObjectKey, XrefEntry>,
}

/// Accumulates xref sections and resolves them into a single view.
#[derive(Debug, Default)]
pub struct XrefResolver {
    /// Sections in discovery order: the one `startxref` names first, then
    /// each `/Prev` predecessor.
    sections: Vec<XrefSection>,
}

impl XrefResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new section. Subsequent `set_xref`/`set_trailer` calls
    /// populate it.
    pub fn next_section(&mut self, start_offset: u64, kind: XrefKind) {
        self.sections.push(XrefSection {
            start_offset,
            kind,
            trailer: None,
            entries: HashMap::new(),
        });
    }

    /// Record an entry in the current section. The first entry for a key
    /// wins within a section: in hybrid files the classic table's entries
    /// take precedence over the `/XRefStm` entries merged into the same
    /// section.
    pub fn set_xref(&mut self, key: ObjectKey, entry: XrefEntry) {
        if let Some(section) = self.sections.last_mut() {
            section.entries.entry(key).or_insert(entry);
        }
    }

    /// Attach the trailer dictionary to the current section.
    pub fn set_trailer(&mut self, trailer: PdfDictionary) {
        if let Some(section) = self.sections.last_mut() {
            section.trailer = Some(trailer);
        }
    }

    pub fn current_trailer(&self) -> Option<&PdfDictionary> {
        self.sections.last().and_then(|s| s.trailer.as_ref())
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Kind of the section `startxref` referenced (the first discovered).
    pub fn startxref_kind(&self) -> Option<XrefKind> {
        self.sections.first().map(|s| s.kind)
    }

    pub fn startxref_section_offset(&self) -> Option<u64> {
        self.sections.first().map(|s| s.start_offset)
    }

    /// Trailer of the section `startxref` referenced (the newest).
    pub fn first_trailer(&self) -> Option<&PdfDictionary> {
        self.sections.first().and_then(|s| s.trailer.as_ref())
    }

    /// Trailer at the end of the `/Prev` chain (the oldest).
    pub fn last_trailer(&self) -> Option<&PdfDictionary> {
        self.sections.last().and_then(|s| s.trailer.as_ref())
    }

    /// Fold all sections into one map, oldest first, so that the newest
    /// section's entry wins for every key.
    pub fn merged_xref(&self) -> HashMap<ObjectKey, XrefEntry> {
        let mut merged = HashMap::new();
        for section in self.sections.iter().rev() {
            for (key, entry) in &section.entries {
                merged.insert(*key, *entry);
            }
        }
        merged
    }

    /// Fold all trailers the same way: the newest section's value wins,
    /// older sections only contribute keys the newer ones are missing.
    pub fn merged_trailer(&self) -> PdfDictionary {
        let mut merged = PdfDictionary::new();
        for section in self.sections.iter().rev() {
            if let Some(trailer) = &section.trailer {
                for (key, value) in trailer.iter() {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }

    /// Object numbers the merged xref assigns to the given object stream.
    pub fn contained_object_numbers(&self, container: u32) -> HashSet<u32> {
        self.merged_xref()
            .iter()
            .filter_map(|(key, entry)| match entry {
                XrefEntry::Compressed { container: c, .. } if *c == container => Some(key.number),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{PdfName, PdfObject};

    fn key(n: u32) -> ObjectKey {
        ObjectKey::new(n, 0)
    }

    fn trailer_with(entries: &[(&str, i64)]) -> PdfDictionary {
        let mut dict = PdfDictionary::new();
        for (name, value) in entries {
            dict.insert(
                PdfName::new(name.as_bytes().to_vec()),
                PdfObject::Integer(*value),
            );
        }
        dict
    }

    #[test]
    fn test_latest_wins_across_sections() {
        let mut resolver = XrefResolver::new();
        // newest section discovered first
        resolver.next_section(500, XrefKind::Table);
        resolver.set_xref(key(1), XrefEntry::InUse { offset: 100 });
        resolver.next_section(200, XrefKind::Table);
        resolver.set_xref(key(1), XrefEntry::InUse { offset: 10 });
        resolver.set_xref(key(2), XrefEntry::InUse { offset: 20 });

        let merged = resolver.merged_xref();
        assert_eq!(merged[&key(1)], XrefEntry::InUse { offset: 100 });
        assert_eq!(merged[&key(2)], XrefEntry::InUse { offset: 20 });
    }

    #[test]
    fn test_first_wins_within_section() {
        let mut resolver = XrefResolver::new();
        resolver.next_section(500, XrefKind::Table);
        resolver.set_xref(key(1), XrefEntry::InUse { offset: 100 });
        // hybrid-file XRefStm entry for the same key must not override
        resolver.set_xref(
            key(1),
            XrefEntry::Compressed {
                container: 9,
                index: 0,
            },
        );
        let merged = resolver.merged_xref();
        assert_eq!(merged[&key(1)], XrefEntry::InUse { offset: 100 });
    }

    #[test]
    fn test_merged_trailer_prefers_newest() {
        let mut resolver = XrefResolver::new();
        resolver.next_section(500, XrefKind::Table);
        resolver.set_trailer(trailer_with(&[("Size", 10)]));
        resolver.next_section(200, XrefKind::Table);
        resolver.set_trailer(trailer_with(&[("Size", 5), ("Prev", 100)]));

        let merged = resolver.merged_trailer();
        assert_eq!(merged.get_integer("Size"), Some(10));
        assert_eq!(merged.get_integer("Prev"), Some(100));
    }

    #[test]
    fn test_first_and_last_trailer() {
        let mut resolver = XrefResolver::new();
        resolver.next_section(500, XrefKind::Stream);
        resolver.set_trailer(trailer_with(&[("Size", 10)]));
        resolver.next_section(200, XrefKind::Table);
        resolver.set_trailer(trailer_with(&[("Size", 5)]));

        assert_eq!(resolver.first_trailer().unwrap().get_integer("Size"), Some(10));
        assert_eq!(resolver.last_trailer().unwrap().get_integer("Size"), Some(5));
        assert_eq!(resolver.startxref_kind(), Some(XrefKind::Stream));
    }

    #[test]
    fn test_contained_object_numbers() {
        let mut resolver = XrefResolver::new();
        resolver.next_section(500, XrefKind::Stream);
        resolver.set_xref(
            key(3),
            XrefEntry::Compressed {
                container: 7,
                index: 0,
            },
        );
        resolver.set_xref(
            key(4),
            XrefEntry::Compressed {
                container: 7,
                index: 1,
            },
        );
        resolver.set_xref(key(7), XrefEntry::InUse { offset: 99 });

        let contained = resolver.contained_object_numbers(7);
        assert_eq!(contained.len(), 2);
        assert!(contained.contains(&3) && contained.contains(&4));
    }
}
