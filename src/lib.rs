//! Exam Sentinel
//!
//! This crate watches an examination video feed, detects policy violations
//! (phone use, collaborative "cheating" postures), resolves who committed them
//! against a roster of enrolled face embeddings, and emits at most one alert per
//! person and violation type for the lifetime of a session.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> DetectorBackend -> confidence gate -> region refiner
//!             -> IdentityResolver -> AlertDeduplicator -> AlertDispatcher -> Notifier
//! ```
//!
//! Annotation consumes every gated detection in parallel with the alert path.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames, cropping, evidence encoding
//! - `ingest`: frame sources (synthetic, image sequences, video files, V4L2)
//! - `detect`: detector adapter trait and backends
//! - `policy`, `region`: confidence gate and region refiner
//! - `face`, `roster`, `identity`: embeddings, enrollment, identity resolution
//! - `alerts`, `notify`: deduplication and out-of-band delivery
//! - `annotate`, `session`: per-frame orchestration and recording

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub mod alerts;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod face;
pub mod frame;
pub mod identity;
pub mod ingest;
pub mod notify;
pub mod policy;
pub mod region;
pub mod roster;
pub mod session;
pub mod ui;

pub use alerts::{AlertDeduplicator, InfractionKey};
pub use annotate::{Annotation, FrameRecorder};
pub use detect::{Detection, DetectorBackend, ScriptedBackend};
pub use face::{Embedding, FaceEmbedder, StubEmbedder};
pub use frame::Frame;
pub use identity::{Identity, IdentityResolver, DEFAULT_TOLERANCE};
pub use ingest::{FrameSource, ImageSequenceSource, SourceStats, SyntheticSource};
pub use notify::{Alert, AlertDispatcher, AlertSink, DispatchStats, Notifier};
pub use policy::{ClassPolicy, ClassRole, PolicyTable, DEFAULT_THRESHOLD};
pub use region::{BoundingBox, FrameSize};
pub use roster::{EnrollmentError, Roster, RosterEntry};
pub use session::{Session, SessionEnd, SessionStats, SessionSummary, StopReason, StopSignal};

/// Exit status for a session that completed normally.
pub const EXIT_OK: u8 = 0;
/// Exit status for runtime failures and configuration errors.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status when the subject's roster directory does not exist.
pub const EXIT_ROSTER_NOT_FOUND: u8 = 2;

/// Exit status for a failed run: roster-not-found when an `EnrollmentError`
/// is anywhere in the chain, general failure otherwise.
pub fn exit_status(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<EnrollmentError>().is_some() {
        EXIT_ROSTER_NOT_FOUND
    } else {
        EXIT_FAILURE
    }
}

/// Normalize a subject name the way rosters are laid out on disk.
///
/// The name is trimmed, its first character upper-cased and the rest
/// lower-cased ("  physics " -> "Physics"). Names that could escape the
/// roster root are rejected.
pub fn normalize_subject(raw: &str) -> Result<String> {
    static SUBJECT_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SUBJECT_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

    let trimmed = raw.trim();
    if !re.is_match(trimmed) {
        return Err(anyhow!(
            "subject name must match [A-Za-z0-9_-]{{1,64}} (got {:?})",
            raw
        ));
    }
    let mut chars = trimmed.chars();
    let normalized = match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    };
    Ok(normalized)
}
