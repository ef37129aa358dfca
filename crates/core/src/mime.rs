//! Extension to content-type table
//!
//! Loaded once from a `mime.types` style file (`type/subtype ext ext ...`,
//! `#` starts a comment). Lookups fall back to `mime_guess` and finally to
//! `application/octet-stream`.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// Content type used when nothing matches
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// System location searched when no file is configured
pub const SYSTEM_MIME_FILE: &str = "/etc/mime.types";

/// Case-insensitive extension to content-type mapping
#[derive(Debug, Clone, Default)]
pub struct MimeTable {
    types: HashMap<String, String>,
}

impl MimeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`, or from the system file when `path` is `None`.
    ///
    /// A missing system file yields an empty table; a missing configured file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Ok(Self::parse(&std::fs::read_to_string(p)?)),
            None => match std::fs::read_to_string(SYSTEM_MIME_FILE) {
                Ok(content) => Ok(Self::parse(&content)),
                Err(e) => {
                    tracing::debug!(file = SYSTEM_MIME_FILE, error = %e, "No system mime table");
                    Ok(Self::new())
                }
            },
        }
    }

    /// Parse `mime.types` content
    pub fn parse(content: &str) -> Self {
        let mut types = HashMap::new();
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default();
            let mut fields = line.split_whitespace();
            let Some(content_type) = fields.next() else {
                continue;
            };
            for ext in fields {
                types.insert(ext.to_ascii_lowercase(), content_type.to_string());
            }
        }
        Self { types }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Content type for an object name.
    ///
    /// Tries the last extension, then the one before it (`a.txt.gz` checks
    /// `gz` then `txt`).
    pub fn lookup(&self, name: &str) -> String {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        let mut parts = file_name.rsplit('.');
        let last = parts.next();
        let previous = parts.next();

        // a name without any dot has no extension at all
        if previous.is_none() {
            return DEFAULT_CONTENT_TYPE.to_string();
        }

        let candidates = [last, previous.filter(|_| parts.next().is_some())];
        for ext in candidates.into_iter().flatten() {
            if let Some(found) = self.types.get(&ext.to_ascii_lowercase()) {
                return found.clone();
            }
        }

        for ext in candidates.into_iter().flatten() {
            if let Some(guess) = mime_guess::from_ext(ext).first() {
                return guess.essence_str().to_string();
            }
        }

        DEFAULT_CONTENT_TYPE.to_string()
    }
}
