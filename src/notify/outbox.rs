//! Directory outbox drained by an external mail relay.
//!
//! Each alert becomes `<stamp>_<alert-id>.jpg` (evidence) and
//! `<stamp>_<alert-id>.json` (envelope). The JSON file is renamed into place
//! after the JPEG is written, so a relay that picks up `*.json` always finds
//! the evidence next to it.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{Alert, Notifier};

#[derive(Serialize)]
struct Envelope<'a> {
    subject: String,
    body: String,
    attachment: String,
    evidence_file: String,
    alert: &'a Alert,
}

pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create outbox {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Notifier for OutboxNotifier {
    fn name(&self) -> &'static str {
        "outbox"
    }

    fn notify(&mut self, alert: &Alert) -> Result<()> {
        let stem = format!(
            "{}_{}",
            alert.timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
            alert.alert_id
        );
        let jpeg_name = format!("{}.jpg", stem);
        let jpeg_path = self.dir.join(&jpeg_name);
        std::fs::write(&jpeg_path, &alert.evidence_jpeg)
            .with_context(|| format!("write {}", jpeg_path.display()))?;

        let envelope = Envelope {
            subject: alert.subject(),
            body: alert.body(),
            attachment: alert.evidence_filename(),
            evidence_file: jpeg_name,
            alert,
        };
        let json = serde_json::to_vec_pretty(&envelope).context("serialize alert envelope")?;
        let partial = self.dir.join(format!("{}.json.partial", stem));
        let final_path = self.dir.join(format!("{}.json", stem));
        std::fs::write(&partial, json).with_context(|| format!("write {}", partial.display()))?;
        std::fs::rename(&partial, &final_path)
            .with_context(|| format!("publish {}", final_path.display()))?;
        Ok(())
    }
}
