//! Keyed state shared by the stages of one pipeline run.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Opaque identifiers scoping one run (application, user, session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionScope {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl Default for SessionScope {
    fn default() -> Self {
        Self {
            app_name: "story_app".to_string(),
            user_id: "user_1".to_string(),
            session_id: "session_001".to_string(),
        }
    }
}

/// Error raised when a stage writes a key that already holds a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("state key '{0}' was already written in this run")]
pub struct DuplicateKey(pub String);

/// Insertion-ordered map from stage output key to produced text.
///
/// Owned by exactly one run. Keys are never removed or overwritten, so a later
/// stage always sees exactly what an earlier stage produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    scope: SessionScope,
    entries: Vec<(String, String)>,
}

impl PipelineState {
    pub fn new(scope: SessionScope) -> Self {
        Self {
            scope,
            entries: Vec::new(),
        }
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    /// Store `value` under `key`. Fails if the key already exists.
    pub fn record(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DuplicateKey> {
        let key = key.into();
        if self.contains(&key) {
            return Err(DuplicateKey(key));
        }
        self.entries.push((key, value.into()));
        Ok(())
    }
}

impl Serialize for PipelineState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
