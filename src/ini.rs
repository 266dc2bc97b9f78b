//! Sectioned key/value text format.
//!
//! Both the normalized registry export and the BlueZ `info` file are
//! `[section]` headers followed by `name = value` lines. This module parses
//! and serializes that shape without quoting, escaping or interpolation.
//! Names keep their case; callers choose between exact lookups (BlueZ) and
//! case-insensitive ones (registry).
//!
//! ```text
//! [General]
//! Name=Keyboard K380
//!
//! [LinkKey]
//! Key=0F1E2D3C4B5A69788796A5B4C3D2E1F0
//! Type=4
//! ```

use crate::error::{Result, SyncError};
use std::fmt;

/// One `[name]` block and its entries, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    /// Creates an empty section.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Returns the section name as written.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a value by exact name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Looks up a value ignoring ASCII case.
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Sets a value, replacing an existing entry of the same exact name or
    /// appending a new one.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    /// Iterates entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the section has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An ordered list of sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    sections: Vec<Section>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses text, numbering lines from 1.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MalformedDump` for an entry before the first
    /// header, a line that is neither header nor `name = value`, or an
    /// empty name.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_lines(text.lines().enumerate().map(|(i, line)| (i + 1, line)))
    }

    /// Parses pre-numbered lines.
    ///
    /// Blank lines and lines starting with `#` or `;` are skipped. A header
    /// that repeats an earlier one continues that section. A repeated name
    /// within a section replaces the earlier value.
    pub fn parse_lines<'a, I>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, &'a str)>,
    {
        let mut doc = Document::new();
        let mut current: Option<usize> = None;

        for (number, line) in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header.strip_suffix(']').ok_or_else(|| {
                    SyncError::malformed_dump(number, format!("unterminated section header {line:?}"))
                })?;
                current = Some(doc.section_index_or_insert(name));
                continue;
            }

            let index = current.ok_or_else(|| {
                SyncError::malformed_dump(number, format!("entry {line:?} outside of any section"))
            })?;
            let (key, value) = line.split_once('=').ok_or_else(|| {
                SyncError::malformed_dump(number, format!("expected `name = value`, got {line:?}"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(SyncError::malformed_dump(number, "empty entry name"));
            }
            doc.sections[index].set(key, value.trim());
        }

        Ok(doc)
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        }
    }

    /// Returns the named section, matched exactly.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Returns the named section mutably, matched exactly.
    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    /// Returns true if the named section exists.
    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Returns the named section, appending an empty one if missing.
    pub fn section_or_insert(&mut self, name: &str) -> &mut Section {
        let index = self.section_index_or_insert(name);
        &mut self.sections[index]
    }

    /// Iterates sections in file order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Returns the number of sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns true if there are no sections.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Serializes in the BlueZ style: `Key=Value`, one blank line between
/// sections.
impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.name)?;
            for (key, value) in &section.entries {
                writeln!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = "[General]\nName=Keyboard K380\nTrusted=true\n\n[LinkKey]\nKey=112233\nType=4\nPINLength=0\n";

    #[test]
    fn test_parse_sections() {
        let doc = Document::parse(INFO).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.section("General").unwrap().get("Name"), Some("Keyboard K380"));
        assert_eq!(doc.section("LinkKey").unwrap().get("Key"), Some("112233"));
        assert!(doc.section("linkkey").is_none());
    }

    #[test]
    fn test_serialize_round_trip() {
        let doc = Document::parse(INFO).unwrap();
        assert_eq!(doc.to_string(), INFO);
    }

    #[test]
    fn test_case_handling() {
        let doc = Document::parse("[dev]\nIRK = hex:01\n").unwrap();
        let section = doc.section("dev").unwrap();
        assert_eq!(section.get("irk"), None);
        assert_eq!(section.get_ignore_case("irk"), Some("hex:01"));
    }

    #[test]
    fn test_value_keeps_later_equals() {
        let doc = Document::parse("[s]\nk = a=b\n").unwrap();
        assert_eq!(doc.section("s").unwrap().get("k"), Some("a=b"));
    }

    #[test]
    fn test_duplicate_section_merges() {
        let doc = Document::parse("[a]\nx=1\n[b]\ny=2\n[a]\nz=3\nx=4\n").unwrap();
        assert_eq!(doc.len(), 2);
        let a = doc.section("a").unwrap();
        assert_eq!(a.get("x"), Some("4"));
        assert_eq!(a.get("z"), Some("3"));
    }

    #[test]
    fn test_comments_skipped() {
        let doc = Document::parse("; header\n[a]\n# note\nx=1\n").unwrap();
        assert_eq!(doc.section("a").unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_lines() {
        let err = Document::parse("x=1\n").unwrap_err();
        assert!(matches!(err, SyncError::MalformedDump { line: 1, .. }));

        let err = Document::parse("[a]\n\njunk\n").unwrap_err();
        assert!(matches!(err, SyncError::MalformedDump { line: 3, .. }));

        assert!(Document::parse("[a\nx=1\n").is_err());
        assert!(Document::parse("[a]\n=1\n").is_err());
    }

    #[test]
    fn test_set_appends_and_replaces() {
        let mut doc = Document::new();
        doc.section_or_insert("LinkKey").set("Key", "AA");
        doc.section_or_insert("LinkKey").set("Key", "BB");
        doc.section_or_insert("LinkKey").set("Type", "4");
        assert_eq!(doc.to_string(), "[LinkKey]\nKey=BB\nType=4\n");
    }
}
