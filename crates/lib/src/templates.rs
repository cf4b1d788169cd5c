//! Optional template table: trigger key → canned reply or system prompt.
//!
//! Read once at startup from a JSON object, e.g.
//!
//! ```json
//! {
//!   "default": { "system": "You are the brand voice..." },
//!   "pricing": "Membership is $29/month 👉 https://example.com/join"
//! }
//! ```
//!
//! String values are literal replies; objects with a `system` field are prompts.
//! Key order in the file is kept and is the match order.

use crate::policy::contains_any;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TemplateEntry {
    Reply(String),
    Prompt { system: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateTable {
    entries: Vec<(String, TemplateEntry)>,
}

impl TemplateTable {
    /// Load from `path`. Missing, unreadable or malformed files yield an empty table.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no template file at {}, using none", path.display());
                return Self::default();
            }
            Err(e) => {
                log::warn!("reading templates from {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match Self::parse(&raw) {
            Ok(table) => {
                log::info!(
                    "loaded {} template(s) from {}",
                    table.len(),
                    path.display()
                );
                table
            }
            Err(e) => {
                log::warn!("ignoring templates in {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse a JSON object. Entries that are neither a string nor `{ "system": ... }` are skipped.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        let serde_json::Value::Object(map) = value else {
            return Err("expected a JSON object of key → template".to_string());
        };
        let mut entries = Vec::with_capacity(map.len());
        for (key, v) in map {
            match serde_json::from_value::<TemplateEntry>(v) {
                Ok(entry) => entries.push((key, entry)),
                Err(_) => log::warn!("skipping template {:?}: unsupported shape", key),
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reply of the first key (file order) contained in `text`, ignoring case.
    /// Only literal-reply entries take part; prompt entries are not replies.
    pub fn find_reply(&self, text: &str) -> Option<&str> {
        self.entries.iter().find_map(|(key, entry)| match entry {
            TemplateEntry::Reply(reply) if contains_any(text, &[key]) => Some(reply.as_str()),
            _ => None,
        })
    }

    /// System prompt stored under `key`, if that entry is a prompt.
    pub fn system_prompt(&self, key: &str) -> Option<&str> {
        self.entries.iter().find_map(|(k, entry)| match entry {
            TemplateEntry::Prompt { system } if k == key && !system.trim().is_empty() => {
                Some(system.as_str())
            }
            _ => None,
        })
    }
}
