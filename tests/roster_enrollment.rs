use std::path::Path;

use anyhow::Result;
use image::{Rgb, RgbImage};

use exam_sentinel::roster::{self, EnrollmentError};
use exam_sentinel::{Embedding, FaceEmbedder, Identity, IdentityResolver};

/// Mean color as a 3-d embedding; an all-black image has no face.
struct MeanColorEmbedder;

impl FaceEmbedder for MeanColorEmbedder {
    fn name(&self) -> &'static str {
        "mean-color"
    }

    fn embed(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Embedding>> {
        if pixels.iter().all(|&p| p == 0) {
            return Ok(Vec::new());
        }
        let mut sums = [0f32; 3];
        for px in pixels.chunks_exact(3) {
            for (sum, value) in sums.iter_mut().zip(px) {
                *sum += *value as f32 / 255.0;
            }
        }
        let count = (pixels.len() / 3) as f32;
        Ok(vec![Embedding::new(sums.iter().map(|s| s / count).collect())])
    }
}

fn write_face(path: &Path, color: [u8; 3]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(8, 8, Rgb(color)).save(path).unwrap();
}

fn sample_roster(root: &Path) {
    write_face(&root.join("alice/1.png"), [255, 0, 0]);
    write_face(&root.join("alice/2.PNG"), [200, 0, 0]);
    write_face(&root.join("bob/front.png"), [0, 0, 255]);
    write_face(&root.join("carol/blank.png"), [0, 0, 0]);
    std::fs::write(root.join("bob/broken.jpg"), b"not a jpeg").unwrap();
    std::fs::write(root.join("bob/notes.txt"), b"ignored").unwrap();
    std::fs::write(root.join("README.md"), b"ignored").unwrap();
}

#[test]
fn builds_entries_per_image_in_sorted_order() {
    let dir = tempfile::tempdir().unwrap();
    sample_roster(dir.path());

    let roster = roster::build(dir.path(), &mut MeanColorEmbedder).unwrap();

    let ids: Vec<&str> = roster.entries().iter().map(|e| e.person_id.as_str()).collect();
    assert_eq!(ids, vec!["alice", "alice", "bob"]);
    assert_eq!(roster.entries()[0].embedding.as_slice(), &[1.0, 0.0, 0.0]);

    let enrolled: Vec<&str> = roster.enrolled().collect();
    assert_eq!(enrolled, vec!["alice", "bob"]);
    let unenrolled: Vec<&str> = roster.unenrolled().collect();
    assert_eq!(unenrolled, vec!["carol"]);

    let bob = &roster.enrollments()[1];
    assert_eq!(bob.person_id, "bob");
    assert_eq!(bob.images, 2);
    assert_eq!(bob.embeddings, 1);
    assert_eq!(bob.failures, 1);
}

#[test]
fn enrolled_faces_resolve_to_their_person() {
    let dir = tempfile::tempdir().unwrap();
    sample_roster(dir.path());
    let roster = roster::build(dir.path(), &mut MeanColorEmbedder).unwrap();
    let resolver = IdentityResolver::new(std::sync::Arc::new(roster), 0.6);

    assert_eq!(
        resolver.identify(&Embedding::new(vec![0.9, 0.0, 0.1])),
        Identity::Known("alice".to_string())
    );
    assert_eq!(
        resolver.identify(&Embedding::new(vec![0.0, 0.1, 0.9])),
        Identity::Known("bob".to_string())
    );
    assert_eq!(
        resolver.identify(&Embedding::new(vec![0.0, 1.0, 0.0])),
        Identity::Unknown
    );
}

#[test]
fn mean_features_cover_enrolled_people() {
    let dir = tempfile::tempdir().unwrap();
    sample_roster(dir.path());
    let roster = roster::build(dir.path(), &mut MeanColorEmbedder).unwrap();

    let means = roster.mean_features();
    assert_eq!(means.len(), 2);
    assert_eq!(means[0].0, "alice");
    let red = means[0].1.as_slice()[0];
    assert!((red - (1.0 + 200.0 / 255.0) / 2.0).abs() < 1e-5);
}

#[test]
fn missing_root_is_an_enrollment_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("Physics");

    let err: EnrollmentError = roster::build(&missing, &mut MeanColorEmbedder).unwrap_err();
    assert_eq!(err.root, missing);
    assert!(err.to_string().contains("does not exist"));

    let file = dir.path().join("file");
    std::fs::write(&file, b"x").unwrap();
    assert!(roster::ensure_root(&file)
        .unwrap_err()
        .to_string()
        .contains("not a directory"));
}

#[test]
fn empty_root_builds_an_empty_roster() {
    let dir = tempfile::tempdir().unwrap();
    let roster = roster::build(dir.path(), &mut MeanColorEmbedder).unwrap();
    assert!(roster.is_empty());
    assert!(roster.enrollments().is_empty());
}

#[test]
fn fingerprint_is_stable_across_builds() {
    let dir = tempfile::tempdir().unwrap();
    sample_roster(dir.path());

    let first = roster::build(dir.path(), &mut MeanColorEmbedder).unwrap();
    let second = roster::build(dir.path(), &mut MeanColorEmbedder).unwrap();
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(first.fingerprint().len(), 64);

    write_face(&dir.path().join("dave/1.png"), [0, 255, 0]);
    let third = roster::build(dir.path(), &mut MeanColorEmbedder).unwrap();
    assert_ne!(first.fingerprint(), third.fingerprint());
}
