//! Identity resolution against the roster.
//!
//! Resolution is a 1-nearest-neighbour search over every roster entry with a
//! strict distance tolerance. Failure to identify is an expected outcome
//! (`Identity::Unknown`), not an error.

use std::fmt;
use std::sync::Arc;

use crate::face::{Embedding, FaceEmbedder};
use crate::frame::Frame;
use crate::roster::Roster;

/// Match tolerance; a match requires `distance < tolerance`.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

const UNKNOWN_LABEL: &str = "Unknown";

/// Result of resolving a region.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }

    /// Person id, or `"Unknown"` for display.
    pub fn as_str(&self) -> &str {
        match self {
            Identity::Known(id) => id,
            Identity::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nearest roster entry for one probe.
#[derive(Clone, Debug, PartialEq)]
pub struct Match<'a> {
    pub person_id: &'a str,
    pub distance: f32,
}

pub struct IdentityResolver {
    roster: Arc<Roster>,
    tolerance: f32,
}

impl IdentityResolver {
    pub fn new(roster: Arc<Roster>, tolerance: f32) -> Self {
        Self { roster, tolerance }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Closest roster entry. Ties go to the entry that comes first in roster order.
    pub fn nearest(&self, probe: &Embedding) -> Option<Match<'_>> {
        let mut best: Option<Match<'_>> = None;
        for entry in self.roster.entries() {
            let distance = entry.embedding.distance(probe);
            if distance.is_nan() {
                continue;
            }
            let closer = match &best {
                Some(current) => distance < current.distance,
                None => true,
            };
            if closer {
                best = Some(Match {
                    person_id: &entry.person_id,
                    distance,
                });
            }
        }
        best
    }

    /// Identity for a single embedding.
    pub fn identify(&self, probe: &Embedding) -> Identity {
        match self.nearest(probe) {
            Some(m) if m.distance < self.tolerance => Identity::Known(m.person_id.to_string()),
            _ => Identity::Unknown,
        }
    }

    /// Identity of the first face the extractor finds in `region`.
    ///
    /// No face, an empty roster, or an extractor failure all resolve to
    /// `Unknown`; extractor failures are logged.
    pub fn resolve(&self, region: &Frame, embedder: &mut dyn FaceEmbedder) -> Identity {
        if self.roster.is_empty() {
            return Identity::Unknown;
        }
        let faces = match embedder.embed(region.pixels(), region.width(), region.height()) {
            Ok(faces) => faces,
            Err(e) => {
                log::warn!(
                    "face extraction failed on frame {}: {:#}",
                    region.index,
                    e
                );
                return Identity::Unknown;
            }
        };
        match faces.first() {
            Some(probe) => {
                let identity = self.identify(probe);
                log::debug!("frame {}: resolved {}", region.index, identity);
                identity
            }
            None => Identity::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::StubEmbedder;
    use crate::roster::RosterEntry;

    fn roster(entries: &[(&str, [f32; 2])]) -> Arc<Roster> {
        Arc::new(Roster::from_entries(
            entries
                .iter()
                .map(|(id, v)| RosterEntry {
                    person_id: id.to_string(),
                    embedding: Embedding::new(v.to_vec()),
                })
                .collect(),
        ))
    }

    fn probe(x: f32, y: f32) -> Embedding {
        Embedding::new(vec![x, y])
    }

    #[test]
    fn matches_within_strict_tolerance() {
        let resolver = IdentityResolver::new(roster(&[("alice", [0.0, 0.0])]), 0.6);
        assert_eq!(resolver.identify(&probe(0.4, 0.0)), Identity::Known("alice".into()));
        assert_eq!(resolver.identify(&probe(0.6, 0.0)), Identity::Unknown);
        assert_eq!(resolver.identify(&probe(0.9, 0.0)), Identity::Unknown);
    }

    #[test]
    fn nearest_entry_wins_across_people() {
        let resolver = IdentityResolver::new(
            roster(&[("alice", [0.0, 0.0]), ("bob", [1.0, 0.0]), ("bob", [0.5, 0.0])]),
            0.6,
        );
        assert_eq!(resolver.identify(&probe(0.4, 0.0)), Identity::Known("bob".into()));
    }

    #[test]
    fn ties_resolve_to_first_entry() {
        let resolver =
            IdentityResolver::new(roster(&[("alice", [-0.2, 0.0]), ("bob", [0.2, 0.0])]), 0.6);
        let m = resolver.nearest(&probe(0.0, 0.0)).unwrap();
        assert_eq!(m.person_id, "alice");
    }

    #[test]
    fn empty_roster_is_unknown_without_extraction() {
        let resolver = IdentityResolver::new(Arc::new(Roster::default()), 0.6);
        let frame = Frame::from_rgb(vec![0; 12], 2, 2, 0).unwrap();
        let mut embedder = StubEmbedder::new(vec![probe(0.0, 0.0)]);
        assert_eq!(resolver.resolve(&frame, &mut embedder), Identity::Unknown);
        assert_eq!(embedder.calls(), 0);
    }

    #[test]
    fn faceless_region_is_unknown() {
        let resolver = IdentityResolver::new(roster(&[("alice", [0.0, 0.0])]), 0.6);
        let frame = Frame::from_rgb(vec![0; 12], 2, 2, 0).unwrap();
        let mut embedder = StubEmbedder::faceless();
        assert_eq!(resolver.resolve(&frame, &mut embedder), Identity::Unknown);
    }

    #[test]
    fn display_uses_person_id_or_unknown() {
        assert_eq!(Identity::Known("alice".into()).to_string(), "alice");
        assert_eq!(Identity::Unknown.to_string(), "Unknown");
    }
}
