//! Case-insensitive header table
//!
//! Used for response headers captured line by line and for object metadata
//! handed in by the filesystem layer. Keys are stored lower-cased, so lookups
//! and iteration order do not depend on the case the provider used.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Header map with case-insensitive keys, iterated in sorted key order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderTable {
    entries: BTreeMap<String, String>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().trim().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Parse one raw `Key: Value` header line.
    ///
    /// Returns false for lines that carry no header (status line, blank line).
    pub fn parse_line(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() && !key.starts_with("HTTP/") => {
                self.insert(key, value.trim());
                true
            }
            _ => false,
        }
    }

    /// ETag with surrounding quotes removed
    pub fn etag(&self) -> Option<&str> {
        self.get("etag").map(|v| v.trim_matches('"'))
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.parse().ok())
    }

    /// Entries whose name starts with `x-amz-meta-`
    pub fn user_metadata(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| k.starts_with("x-amz-meta-"))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut table = HeaderTable::new();
        table.insert("Content-Type", "text/plain");
        assert_eq!(table.get("content-type"), Some("text/plain"));
        assert_eq!(table.get("CONTENT-TYPE"), Some("text/plain"));

        table.insert("content-TYPE", "image/png");
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("Content-Type"), Some("image/png"));
    }

    #[test]
    fn test_parse_line() {
        let mut table = HeaderTable::new();
        assert!(!table.parse_line("HTTP/1.1 200 OK\r\n"));
        assert!(table.parse_line("ETag: \"d41d8cd98f00b204e9800998ecf8427e\"\r\n"));
        assert!(table.parse_line("x-amz-meta-mode:33188"));
        assert!(!table.parse_line("\r\n"));

        assert_eq!(table.etag(), Some("d41d8cd98f00b204e9800998ecf8427e"));
        assert_eq!(table.get("X-Amz-Meta-Mode"), Some("33188"));
    }

    #[test]
    fn test_value_with_colon() {
        let mut table = HeaderTable::new();
        table.parse_line("Date: Tue, 27 Mar 2007 19:36:42 +0000");
        assert_eq!(table.get("date"), Some("Tue, 27 Mar 2007 19:36:42 +0000"));
    }

    #[test]
    fn test_user_metadata_filter() {
        let table: HeaderTable = [
            ("x-amz-meta-uid", "1000"),
            ("Content-Length", "12"),
            ("X-Amz-Meta-Gid", "1000"),
        ]
        .into_iter()
        .collect();

        let meta: Vec<_> = table.user_metadata().collect();
        assert_eq!(meta, vec![("x-amz-meta-gid", "1000"), ("x-amz-meta-uid", "1000")]);
        assert_eq!(table.content_length(), Some(12));
    }
}
