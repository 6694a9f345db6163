//! Recovered keys, one entry per content.

use std::collections::HashMap;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::key::Key;
use crate::pssh::ContentIdentifier;

/// Protocol that produced a [`LicenseResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeySource {
    Widevine,
    ClearKey,
}

/// Keys recovered for one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseResult {
    pub source: KeySource,
    pub content_id: ContentIdentifier,
    pub keys: Vec<Key>,
    pub source_url: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
}

impl LicenseResult {
    /// Textual content identifier, used as the de-duplication key.
    ///
    /// Widevine content is reported as a base64 PSSH box, ClearKey content as
    /// the base64 of its key id document.
    pub fn content_key(&self) -> String {
        content_key(self.source, &self.content_id)
    }

    pub fn content_keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter().filter(|key| key.is_content())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for LicenseResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("LicenseResult", 5)?;
        state.serialize_field("type", &self.source)?;
        state.serialize_field("pssh_data", &self.content_key())?;
        state.serialize_field("keys", &self.keys)?;
        state.serialize_field("url", &self.source_url)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.end()
    }
}

pub(crate) fn content_key(source: KeySource, content_id: &ContentIdentifier) -> String {
    match source {
        KeySource::Widevine => content_id.to_pssh_base64(),
        KeySource::ClearKey => content_id.to_base64(),
    }
}

/// Append-only log of recovered keys, in recovery order.
#[derive(Debug, Default)]
pub struct ResultLog {
    entries: Vec<LicenseResult>,
    index: HashMap<String, usize>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. Returns false and leaves the log untouched when the
    /// content was already recorded.
    pub fn record(&mut self, result: LicenseResult) -> bool {
        let content_key = result.content_key();
        if self.index.contains_key(&content_key) {
            debug!("keys already retrieved for {}", content_key);
            return false;
        }
        self.index.insert(content_key, self.entries.len());
        self.entries.push(result);
        true
    }

    pub fn contains(&self, source: KeySource, content_id: &ContentIdentifier) -> bool {
        self.index.contains_key(&content_key(source, content_id))
    }

    pub fn get(&self, source: KeySource, content_id: &ContentIdentifier) -> Option<&LicenseResult> {
        self.index
            .get(&content_key(source, content_id))
            .and_then(|&i| self.entries.get(i))
    }

    pub fn entries(&self) -> &[LicenseResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}
