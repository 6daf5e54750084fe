//! Scriptlet / redirect resource manifest
//!
//! Resources arrive as a JSON array of entries with base64-encoded bodies:
//!
//! ```json
//! [{
//!   "name": "noop.js",
//!   "aliases": ["noopjs"],
//!   "kind": { "mime": "application/javascript" },
//!   "content": "KGZ1bmN0aW9uKCkgey4uLn0pKCk7"
//! }]
//! ```
//!
//! Entries are addressable by name or any alias. Bodies with invalid base64
//! are dropped at parse time with a warning.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceKind {
    pub mime: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: ResourceKind,
    /// base64-encoded body
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("resource manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The loaded resource set, indexed by name and alias.
#[derive(Debug, Default)]
pub struct ResourceLibrary {
    entries: Vec<ResourceEntry>,
    index: HashMap<String, usize>,
}

impl ResourceLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a manifest blob.
    pub fn parse(json: &str) -> Result<Self, ResourceError> {
        let entries: Vec<ResourceEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<ResourceEntry>) -> Self {
        let mut library = Self::default();
        for entry in entries {
            if BASE64.decode(&entry.content).is_err() {
                log::warn!("dropping resource `{}`: body is not valid base64", entry.name);
                continue;
            }
            library.push(entry);
        }
        library
    }

    fn push(&mut self, entry: ResourceEntry) {
        let idx = self.entries.len();
        self.index.insert(entry.name.clone(), idx);
        for alias in &entry.aliases {
            self.index.insert(alias.clone(), idx);
        }
        self.entries.push(entry);
    }

    /// Look up an entry by name or alias.
    pub fn get(&self, name: &str) -> Option<&ResourceEntry> {
        self.index.get(name).map(|&idx| &self.entries[idx])
    }

    /// Render an entry as a `data:` URL suitable for a redirect response.
    pub fn data_url(&self, name: &str) -> Option<String> {
        let entry = self.get(name)?;
        Some(format!(
            "data:{};base64,{}",
            entry.kind.mime, entry.content
        ))
    }

    /// Decode an entry's body to text (scriptlet injection).
    pub fn body_text(&self, name: &str) -> Option<String> {
        let entry = self.get(name)?;
        let bytes = BASE64.decode(&entry.content).ok()?;
        String::from_utf8(bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
