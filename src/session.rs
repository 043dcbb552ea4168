//! Exam session: per-frame orchestration and the run loop.
//!
//! A session owns the only mutable decision state in the pipeline (the
//! reported-infraction set) and borrows everything else: the immutable policy
//! table and roster, the face embedder, and the alert sink. Each detection in a
//! frame moves independently through
//!
//! ```text
//! gate -> annotate -> refine (held objects) -> crop -> resolve -> dedup -> submit
//! ```
//!
//! Rejected detections stop at the gate: no annotation, no crop, no face
//! extraction.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alerts::{AlertDeduplicator, InfractionKey};
use crate::annotate::{render, Annotation, FrameRecorder};
use crate::detect::{Detection, DetectorBackend};
use crate::face::FaceEmbedder;
use crate::frame::{encode_jpeg, Frame};
use crate::identity::{Identity, IdentityResolver};
use crate::ingest::FrameSource;
use crate::notify::{Alert, AlertSink, DispatchStats};
use crate::policy::PolicyTable;
use crate::region::refine;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Why a session stopped before its source ran out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Ctrl-C or a caller-issued stop.
    Requested,
    Deadline,
    FrameLimit,
}

/// Terminal state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    Exhausted,
    Stopped(StopReason),
}

/// Shared stop flag plus optional deadline and frame limit.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
    deadline: Option<Instant>,
    frame_limit: Option<u64>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop once `duration` has elapsed from now.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.deadline = Some(Instant::now() + duration);
        self
    }

    /// Stop after `frames` frames have been processed.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Request a stop. Safe to call from a signal handler thread.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Reason to stop before acquiring the next frame, if any.
    pub fn check(&self, frames_processed: u64) -> Option<StopReason> {
        if self.is_requested() {
            return Some(StopReason::Requested);
        }
        if self.frame_limit.is_some_and(|limit| frames_processed >= limit) {
            return Some(StopReason::FrameLimit);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(StopReason::Deadline);
        }
        None
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames: u64,
    pub detections: u64,
    pub rejected: u64,
    pub violations: u64,
    pub unknown_violations: u64,
    pub alerts: u64,
    pub detector_errors: u64,
}

/// Outcome of processing one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    /// One entry per gated detection, plus one per violation.
    pub annotations: Vec<Annotation>,
    /// Infraction keys submitted for notification on this frame.
    pub alerts: Vec<InfractionKey>,
    /// Detections rejected by the confidence gate.
    pub rejected: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub subject: String,
    pub stats: SessionStats,
    pub reported: Vec<InfractionKey>,
    pub dispatch: DispatchStats,
}

pub struct Session {
    subject: String,
    policy: Arc<PolicyTable>,
    resolver: IdentityResolver,
    embedder: Box<dyn FaceEmbedder>,
    sink: Box<dyn AlertSink>,
    dedup: AlertDeduplicator,
    stats: SessionStats,
}

impl Session {
    pub fn new(
        subject: &str,
        policy: Arc<PolicyTable>,
        resolver: IdentityResolver,
        embedder: Box<dyn FaceEmbedder>,
        sink: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            subject: subject.to_string(),
            policy,
            resolver,
            embedder,
            sink,
            dedup: AlertDeduplicator::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn deduplicator(&self) -> &AlertDeduplicator {
        &self.dedup
    }

    /// Run every detection of `frame` through the pipeline.
    pub fn process_frame(&mut self, frame: &Frame, detections: &[Detection]) -> FrameReport {
        let size = frame.size();
        let mut report = FrameReport {
            frame_index: frame.index,
            ..FrameReport::default()
        };
        self.stats.frames += 1;

        for detection in detections {
            self.stats.detections += 1;
            if !self.policy.accept(detection) {
                log::trace!(
                    "frame {}: class {} at {:.2} below threshold {:.2}",
                    frame.index,
                    detection.class_id,
                    detection.confidence,
                    self.policy.threshold_for(detection.class_id)
                );
                self.stats.rejected += 1;
                report.rejected += 1;
                continue;
            }

            let class = self.policy.class(detection.class_id);
            report.annotations.push(Annotation::detection(
                &class.name,
                detection.confidence,
                detection.bbox.clip(size),
            ));
            if !class.role.is_violation() {
                continue;
            }
            self.stats.violations += 1;

            let region = refine(detection.bbox, class.role, size);
            let identity = match frame.crop(region) {
                Some(crop) => self.resolver.resolve(&crop, self.embedder.as_mut()),
                None => Identity::Unknown,
            };
            log::warn!(
                "frame {}: {} by {} (confidence {:.2})",
                frame.index,
                class.name,
                identity,
                detection.confidence
            );
            report
                .annotations
                .push(Annotation::violation(identity.as_str(), &class.name, region));

            if !identity.is_known() {
                self.stats.unknown_violations += 1;
                continue;
            }
            if !self.dedup.should_notify(&identity, &class.name) {
                log::debug!(
                    "frame {}: {} / {} already reported",
                    frame.index,
                    identity,
                    class.name
                );
                continue;
            }

            let evidence = match encode_jpeg(&render(frame.image(), &report.annotations)) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    log::warn!("frame {}: evidence encoding failed: {:#}", frame.index, e);
                    Vec::new()
                }
            };
            self.sink.submit(Alert::new(
                &self.subject,
                identity.as_str(),
                &class.name,
                detection.confidence,
                frame.index,
                evidence,
            ));
            self.stats.alerts += 1;
            report
                .alerts
                .push(InfractionKey::new(identity.as_str(), &class.name));
        }
        report
    }

    /// Process frames until the source is exhausted or `stop` fires.
    ///
    /// A detector failure on one frame is logged and that frame skipped.
    /// Source and recorder errors end the session with an error.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn DetectorBackend,
        mut recorder: Option<&mut FrameRecorder>,
        stop: &StopSignal,
    ) -> Result<SessionEnd> {
        let mut last_health_log = Instant::now();
        let mut acquired = 0u64;

        let end = loop {
            if let Some(reason) = stop.check(acquired) {
                break SessionEnd::Stopped(reason);
            }
            let frame = match source.next_frame().context("acquire frame")? {
                Some(frame) => frame,
                None => break SessionEnd::Exhausted,
            };
            acquired += 1;

            let detections = match frame.run_detector(detector) {
                Ok(detections) => detections,
                Err(e) => {
                    self.stats.detector_errors += 1;
                    log::warn!(
                        "frame {}: detector {} failed: {:#}",
                        frame.index,
                        detector.name(),
                        e
                    );
                    continue;
                }
            };

            let report = self.process_frame(&frame, &detections);
            if let Some(recorder) = recorder.as_deref_mut() {
                recorder
                    .record(frame.index, frame.image(), &report.annotations)
                    .with_context(|| format!("record frame {}", frame.index))?;
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source_stats = source.stats();
                log::info!(
                    "{} ({}): healthy={} captured={} skipped={} alerts={}",
                    source.name(),
                    source_stats.uri,
                    source.is_healthy(),
                    source_stats.frames_captured,
                    source_stats.frames_skipped,
                    self.stats.alerts
                );
                last_health_log = Instant::now();
            }
        };

        match end {
            SessionEnd::Exhausted => log::info!("source exhausted after {} frames", acquired),
            SessionEnd::Stopped(reason) => {
                log::info!("session stopped ({:?}) after {} frames", reason, acquired)
            }
        }
        Ok(end)
    }

    /// Close the alert sink and summarize the session.
    pub fn finish(mut self) -> SessionSummary {
        let dispatch = self.sink.close();
        SessionSummary {
            subject: self.subject,
            reported: self.dedup.reported(),
            stats: self.stats,
            dispatch,
        }
    }
}

/// Flush the recorder, then settle the session result.
///
/// The recorder is always finished so its index is complete. A run failure
/// takes precedence over a recorder failure.
pub fn conclude(
    outcome: Result<SessionEnd>,
    recorder: Option<FrameRecorder>,
) -> Result<(SessionEnd, Option<u64>)> {
    let recorded = recorder.map(FrameRecorder::finish).transpose();
    let end = outcome?;
    let written = recorded.context("finish recording")?;
    Ok((end, written))
}
