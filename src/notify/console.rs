use anyhow::Result;

use super::{Alert, Notifier};

/// Writes alerts to the log. The evidence image is not written anywhere.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&mut self, alert: &Alert) -> Result<()> {
        log::warn!("{}", alert.subject());
        for line in alert.body().lines().filter(|line| !line.is_empty()) {
            log::info!("  {}", line);
        }
        Ok(())
    }
}
