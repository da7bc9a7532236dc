//! Per-call identifiers used to name artifacts.

use std::cell::Cell;

use sha2::{Digest, Sha256};

use crate::core::state::SessionScope;

/// Issues a distinct short hex id for every model call of a run.
///
/// Ids hash the session scope, a run salt, a call counter, and a label, so
/// they are stable for a given salt and unique within a run.
#[derive(Debug)]
pub struct InvocationIds {
    scope: SessionScope,
    salt: String,
    issued: Cell<u64>,
}

impl InvocationIds {
    pub fn new(scope: SessionScope, salt: impl Into<String>) -> Self {
        Self {
            scope,
            salt: salt.into(),
            issued: Cell::new(0),
        }
    }

    /// Next id for a call described by `label` (stage or generator name).
    pub fn next(&self, label: &str) -> String {
        let counter = self.issued.get();
        self.issued.set(counter + 1);
        let mut hasher = Sha256::new();
        for field in [
            self.scope.app_name.as_str(),
            self.scope.user_id.as_str(),
            self.scope.session_id.as_str(),
            self.salt.as_str(),
            label,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }

    pub fn issued(&self) -> u64 {
        self.issued.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_short_hex_and_distinct() {
        let ids = InvocationIds::new(SessionScope::default(), "salt");
        let first = ids.next("setting");
        let second = ids.next("setting");
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn same_salt_replays_same_ids() {
        let one = InvocationIds::new(SessionScope::default(), "salt");
        let two = InvocationIds::new(SessionScope::default(), "salt");
        assert_eq!(one.next("story"), two.next("story"));
        let other = InvocationIds::new(SessionScope::default(), "other");
        assert_ne!(one.next("story"), other.next("story"));
    }
}
