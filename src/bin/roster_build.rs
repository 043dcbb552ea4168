//! roster_build - enroll a roster directory and export per-person mean features

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Parser};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use exam_sentinel::config::SentinelConfig;
use exam_sentinel::face::open_embedder;
use exam_sentinel::roster::{self, Enrollment};
use exam_sentinel::ui::{Ui, UiMode};
use exam_sentinel::{exit_status, normalize_subject, Embedding, EXIT_OK};

#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("target").required(true).args(["subject", "roster"])))]
struct Args {
    /// Exam subject; enrolls `<roster_root>/<Subject>`.
    #[arg(long)]
    subject: Option<String>,
    /// Roster directory to enroll directly.
    #[arg(long)]
    roster: Option<PathBuf>,
    /// Config file (.toml or .json).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Output file for the feature export.
    #[arg(long, default_value = "roster_features.json")]
    out: PathBuf,
    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
}

#[derive(Serialize)]
struct FeatureExport {
    roster: String,
    fingerprint: String,
    entries: usize,
    people: Vec<PersonFeatures>,
}

#[derive(Serialize)]
struct PersonFeatures {
    #[serde(flatten)]
    enrollment: Enrollment,
    mean: Option<Embedding>,
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
    let cfg = SentinelConfig::load(args.config.as_deref())?;
    let roster_dir = match (args.roster, args.subject) {
        (Some(dir), _) => dir,
        (None, Some(subject)) => cfg.subject_roster(&normalize_subject(&subject)?),
        (None, None) => return Err(anyhow!("either --subject or --roster is required")),
    };
    roster::ensure_root(&roster_dir)?;

    let mut embedder = {
        let mut stage = ui.stage("Load face model");
        stage.track(open_embedder(&cfg.embedder))?
    };

    let roster = {
        let mut stage = ui.stage("Enroll faces");
        let roster = stage.track(roster::build(&roster_dir, embedder.as_mut()))?;
        stage.finish(format!("{} entries", roster.len()));
        roster
    };

    let means = roster.mean_features();
    let people = roster
        .enrollments()
        .iter()
        .map(|enrollment| PersonFeatures {
            enrollment: enrollment.clone(),
            mean: means
                .iter()
                .find(|(person, _)| *person == enrollment.person_id)
                .map(|(_, mean)| mean.clone()),
        })
        .collect();
    let export = FeatureExport {
        roster: roster_dir.display().to_string(),
        fingerprint: roster.fingerprint(),
        entries: roster.len(),
        people,
    };

    let json = serde_json::to_vec_pretty(&export).context("serialize feature export")?;
    std::fs::write(&args.out, json).with_context(|| format!("write {}", args.out.display()))?;
    log::info!(
        "wrote features for {} people to {}",
        export.people.len(),
        args.out.display()
    );
    Ok(())
}
