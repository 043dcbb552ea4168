//! sentineld - exam session daemon
//!
//! This daemon:
//! 1. Resolves the subject's roster directory and fails fast when it is missing
//! 2. Loads the detector and face models
//! 3. Builds the roster and logs its fingerprint
//! 4. Runs the session until the source is exhausted, Ctrl-C, the deadline, or the frame limit
//! 5. Drains pending alerts and prints a summary

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use exam_sentinel::config::SentinelConfig;
use exam_sentinel::detect::open_backend;
use exam_sentinel::face::open_embedder;
use exam_sentinel::ingest::open_source;
use exam_sentinel::notify::open_notifier;
use exam_sentinel::session::conclude;
use exam_sentinel::ui::{Ui, UiMode};
use exam_sentinel::{
    exit_status, normalize_subject, roster, AlertDispatcher, FrameRecorder, IdentityResolver,
    Session, StopSignal, EXIT_OK,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Exam subject; selects `<roster_root>/<Subject>` as the roster.
    #[arg(long)]
    subject: String,
    /// Config file (.toml or .json).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Frame source: stub://name, /dev/videoN, a video file, or a directory of images.
    #[arg(long)]
    source: Option<String>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Stop after this many seconds.
    #[arg(long)]
    max_seconds: Option<u64>,
    /// Write annotated frames and annotations.jsonl to this directory.
    #[arg(long)]
    record: Option<PathBuf>,
    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::from(exit_status(&err))
        }
    }
}

fn run(args: Args) -> Result<()> {
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());
    let subject = normalize_subject(&args.subject)?;

    let mut cfg = SentinelConfig::load(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.uri = source;
    }
    if let Some(frames) = args.max_frames {
        cfg.max_frames = Some(frames);
    }
    if let Some(secs) = args.max_seconds {
        cfg.max_duration = Some(Duration::from_secs(secs));
    }
    if let Some(dir) = args.record {
        cfg.recorder_dir = Some(dir);
    }

    let roster_dir = cfg.subject_roster(&subject);
    roster::ensure_root(&roster_dir)?;
    let policy = Arc::new(cfg.policy_table()?);

    let (mut detector, mut embedder) = {
        let mut stage = ui.stage("Load models");
        let mut detector = stage.track(open_backend(&cfg.detector))?;
        stage.track(detector.warm_up().context("detector warm-up"))?;
        let embedder = stage.track(open_embedder(&cfg.embedder))?;
        stage.finish(format!("{} / {}", detector.name(), embedder.name()));
        (detector, embedder)
    };

    if let Some(class_count) = detector.class_count() {
        let uncovered = policy.uncovered(class_count);
        if !uncovered.is_empty() {
            if cfg.policy.strict_coverage {
                return Err(anyhow!(
                    "detector classes {:?} have no policy entry (strict_coverage)",
                    uncovered
                ));
            }
            log::warn!(
                "detector classes {:?} have no policy entry; using default threshold {:.2}",
                uncovered,
                policy.default_threshold()
            );
        }
    }

    let roster = {
        let mut stage = ui.stage("Build roster");
        let roster = stage.track(roster::build(&roster_dir, embedder.as_mut()))?;
        stage.finish(format!("{} entries", roster.len()));
        roster
    };
    log::info!("roster {} fingerprint {}", roster_dir.display(), roster.fingerprint());
    for person in roster.unenrolled() {
        log::warn!("{} has no usable enrollment and will never be matched", person);
    }
    if roster.is_empty() {
        log::warn!("roster is empty: every violation will resolve to Unknown");
    }

    let notifier = open_notifier(&cfg.notify, &subject)?;
    log::info!("alerts go to the {} notifier", notifier.name());
    let dispatcher = AlertDispatcher::spawn(notifier, cfg.notify.queue_capacity)?;

    let mut source = open_source(&cfg.source)?;
    source.connect()?;
    let mut recorder = cfg
        .recorder_dir
        .as_deref()
        .map(FrameRecorder::create)
        .transpose()?;

    let mut stop = StopSignal::new();
    if let Some(duration) = cfg.max_duration {
        stop = stop.with_timeout(duration);
    }
    if let Some(frames) = cfg.max_frames {
        stop = stop.with_frame_limit(frames);
    }
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.trigger()).context("install Ctrl-C handler")?;

    let resolver = IdentityResolver::new(Arc::new(roster), cfg.policy.tolerance);
    let mut session = Session::new(&subject, policy, resolver, embedder, Box::new(dispatcher));

    log::info!("{} session started on {}", subject, cfg.source.uri);
    let outcome = session.run(
        source.as_mut(),
        detector.as_mut(),
        recorder.as_mut(),
        &stop,
    );
    let summary = session.finish();
    let (end, recorded) = conclude(outcome, recorder)?;
    if let Some(written) = recorded {
        log::info!("recorded {} annotated frames", written);
    }

    log::info!(
        "{} session {:?}: {} frames, {} violations ({} unknown), {} alerts",
        summary.subject,
        end,
        summary.stats.frames,
        summary.stats.violations,
        summary.stats.unknown_violations,
        summary.stats.alerts
    );
    log::info!(
        "delivery: {} delivered, {} failed, {} dropped",
        summary.dispatch.delivered,
        summary.dispatch.failed,
        summary.dispatch.dropped
    );
    for key in &summary.reported {
        log::info!("  reported {} / {}", key.person_id, key.violation);
    }
    Ok(())
}
