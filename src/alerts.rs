//! Session-scoped alert deduplication.
//!
//! At most one alert per (person, violation) for the lifetime of a session.
//! Unknown identities never alert and never occupy a slot.

use serde::Serialize;
use std::collections::HashSet;

use crate::identity::Identity;

/// (person-id, violation-type) pair that has been reported.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InfractionKey {
    pub person_id: String,
    pub violation: String,
}

impl InfractionKey {
    pub fn new(person_id: &str, violation: &str) -> Self {
        Self {
            person_id: person_id.to_string(),
            violation: violation.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct AlertDeduplicator {
    reported: HashSet<InfractionKey>,
}

impl AlertDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once per known (identity, violation); marks the key reported.
    ///
    /// The key is marked before delivery is attempted, so a failed delivery is
    /// never retried for the same key.
    pub fn should_notify(&mut self, identity: &Identity, violation: &str) -> bool {
        match identity {
            Identity::Known(person_id) => {
                self.reported.insert(InfractionKey::new(person_id, violation))
            }
            Identity::Unknown => false,
        }
    }

    pub fn is_reported(&self, person_id: &str, violation: &str) -> bool {
        self.reported
            .contains(&InfractionKey::new(person_id, violation))
    }

    pub fn len(&self) -> usize {
        self.reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }

    /// Reported keys, sorted.
    pub fn reported(&self) -> Vec<InfractionKey> {
        let mut keys: Vec<_> = self.reported.iter().cloned().collect();
        keys.sort();
        keys
    }
}
