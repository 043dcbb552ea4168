//! Roster builder.
//!
//! Walks `root/<person-id>/<image>.{jpg,jpeg,png}` and turns every image that
//! yields a face into a `RosterEntry`. People with several images get several
//! entries; nothing is averaged for matching.
//!
//! Entry order is part of the matching contract (ties resolve to the first
//! entry), so people are visited sorted by id and images sorted by file name.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::face::{Embedding, FaceEmbedder};

/// Image extensions accepted for enrollment (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// The roster root is missing or unreadable. Fatal to the session.
#[derive(Clone, Debug)]
pub struct EnrollmentError {
    pub root: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for EnrollmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "roster {}: {}", self.root.display(), self.reason)
    }
}

impl std::error::Error for EnrollmentError {}

/// One enrolled face.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub person_id: String,
    pub embedding: Embedding,
}

/// Per-person enrollment outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub person_id: String,
    /// Image files considered.
    pub images: usize,
    /// Images that produced an embedding.
    pub embeddings: usize,
    /// Images that failed to load or to run through the extractor.
    pub failures: usize,
}

impl Enrollment {
    pub fn is_usable(&self) -> bool {
        self.embeddings > 0
    }
}

/// Immutable set of enrolled faces.
#[derive(Clone, Debug, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
    enrollments: Vec<Enrollment>,
}

impl Roster {
    /// Roster from already computed entries, kept in the given order.
    pub fn from_entries(entries: Vec<RosterEntry>) -> Self {
        let mut enrollments: Vec<Enrollment> = Vec::new();
        for entry in &entries {
            match enrollments
                .iter_mut()
                .find(|e| e.person_id == entry.person_id)
            {
                Some(enrollment) => {
                    enrollment.images += 1;
                    enrollment.embeddings += 1;
                }
                None => enrollments.push(Enrollment {
                    person_id: entry.person_id.clone(),
                    images: 1,
                    embeddings: 1,
                    failures: 0,
                }),
            }
        }
        Self {
            entries,
            enrollments,
        }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enrollments(&self) -> &[Enrollment] {
        &self.enrollments
    }

    /// People with at least one usable embedding.
    pub fn enrolled(&self) -> impl Iterator<Item = &str> {
        self.enrollments
            .iter()
            .filter(|e| e.is_usable())
            .map(|e| e.person_id.as_str())
    }

    /// People whose folder yielded no embedding. They are never matched.
    pub fn unenrolled(&self) -> impl Iterator<Item = &str> {
        self.enrollments
            .iter()
            .filter(|e| !e.is_usable())
            .map(|e| e.person_id.as_str())
    }

    /// SHA-256 over the ordered (person-id, embedding) pairs, hex encoded.
    ///
    /// Two rosters with the same fingerprint resolve every query identically.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update((entry.person_id.len() as u64).to_le_bytes());
            hasher.update(entry.person_id.as_bytes());
            hasher.update((entry.embedding.len() as u64).to_le_bytes());
            for value in entry.embedding.as_slice() {
                hasher.update(value.to_le_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Mean embedding per enrolled person, in roster order.
    ///
    /// Export only: matching always uses every individual entry.
    pub fn mean_features(&self) -> Vec<(String, Embedding)> {
        self.enrolled()
            .filter_map(|person| {
                let mean = Embedding::mean(
                    self.entries
                        .iter()
                        .filter(|e| e.person_id == person)
                        .map(|e| &e.embedding),
                )?;
                Some((person.to_string(), mean))
            })
            .collect()
    }
}

/// Fail fast when the roster root is missing.
pub fn ensure_root(root: &Path) -> Result<(), EnrollmentError> {
    if root.is_dir() {
        return Ok(());
    }
    let reason = if root.exists() {
        "not a directory"
    } else {
        "directory does not exist"
    };
    Err(EnrollmentError {
        root: root.to_path_buf(),
        reason: reason.to_string(),
    })
}

/// Build a roster from `root`.
///
/// Only a missing or unreadable root is an error. Unreadable person folders,
/// undecodable images, and images without a face are logged and skipped.
pub fn build(root: &Path, embedder: &mut dyn FaceEmbedder) -> Result<Roster, EnrollmentError> {
    ensure_root(root)?;

    let people = sorted_children(root).map_err(|e| EnrollmentError {
        root: root.to_path_buf(),
        reason: format!("{:#}", e),
    })?;

    log::info!("building roster from {}", root.display());
    let mut entries = Vec::new();
    let mut enrollments = Vec::new();

    for person_dir in people.into_iter().filter(|p| p.is_dir()) {
        let person_id = match person_dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let mut enrollment = Enrollment {
            person_id: person_id.clone(),
            ..Enrollment::default()
        };

        let images = match sorted_children(&person_dir) {
            Ok(children) => children
                .into_iter()
                .filter(|p| p.is_file() && is_enrollment_image(p))
                .collect::<Vec<_>>(),
            Err(e) => {
                log::warn!("  - cannot read {}: {:#}", person_dir.display(), e);
                Vec::new()
            }
        };

        for image_path in images {
            enrollment.images += 1;
            match embed_image(&image_path, embedder) {
                Ok(Some(embedding)) => {
                    entries.push(RosterEntry {
                        person_id: person_id.clone(),
                        embedding,
                    });
                    enrollment.embeddings += 1;
                }
                Ok(None) => {
                    log::debug!("  - no face in {}", image_path.display());
                }
                Err(e) => {
                    enrollment.failures += 1;
                    log::warn!("  - error processing {}: {:#}", image_path.display(), e);
                }
            }
        }

        if enrollment.is_usable() {
            log::info!(
                "  - enrolled {} face(s) for {}",
                enrollment.embeddings,
                person_id
            );
        } else {
            log::warn!("  - no usable enrollment for {}", person_id);
        }
        enrollments.push(enrollment);
    }

    log::info!(
        "roster complete: {} entries, {} people",
        entries.len(),
        enrollments.iter().filter(|e| e.is_usable()).count()
    );
    Ok(Roster {
        entries,
        enrollments,
    })
}

fn embed_image(path: &Path, embedder: &mut dyn FaceEmbedder) -> Result<Option<Embedding>> {
    let image = image::open(path)
        .with_context(|| format!("decode {}", path.display()))?
        .to_rgb8();
    let faces = embedder.embed(image.as_raw(), image.width(), image.height())?;
    Ok(faces.into_iter().next())
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = std::fs::read_dir(dir)
        .with_context(|| format!("list {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("list {}", dir.display()))?;
    children.sort();
    Ok(children)
}

fn is_enrollment_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(person: &str, values: &[f32]) -> RosterEntry {
        RosterEntry {
            person_id: person.to_string(),
            embedding: Embedding::new(values.to_vec()),
        }
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(is_enrollment_image(Path::new("a/b/face.JPG")));
        assert!(is_enrollment_image(Path::new("face.Jpeg")));
        assert!(is_enrollment_image(Path::new("face.png")));
        assert!(!is_enrollment_image(Path::new("face.gif")));
        assert!(!is_enrollment_image(Path::new("notes")));
    }

    #[test]
    fn missing_root_is_enrollment_error() {
        let err = ensure_root(Path::new("/definitely/not/a/roster")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn fingerprint_depends_on_order_and_values() {
        let a = Roster::from_entries(vec![entry("alice", &[0.1, 0.2]), entry("bob", &[0.3, 0.4])]);
        let b = Roster::from_entries(vec![entry("alice", &[0.1, 0.2]), entry("bob", &[0.3, 0.4])]);
        let swapped =
            Roster::from_entries(vec![entry("bob", &[0.3, 0.4]), entry("alice", &[0.1, 0.2])]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), swapped.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn mean_features_per_person() {
        let roster = Roster::from_entries(vec![
            entry("alice", &[0.0, 2.0]),
            entry("alice", &[2.0, 4.0]),
            entry("bob", &[1.0, 1.0]),
        ]);
        let means = roster.mean_features();
        assert_eq!(means.len(), 2);
        assert_eq!(means[0], ("alice".to_string(), Embedding::new(vec![1.0, 3.0])));
        assert_eq!(means[1], ("bob".to_string(), Embedding::new(vec![1.0, 1.0])));
        assert_eq!(roster.enrollments()[0].embeddings, 2);
    }
}
