//! Out-of-band alert delivery.
//!
//! A `Notifier` delivers one alert to one sink. Delivery runs on a worker
//! thread behind `AlertDispatcher` so a slow or unreachable sink never stalls
//! frame processing. A full queue drops the alert with a warning.

mod console;
mod mqtt;
mod outbox;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;

use crate::config::{NotifierKind, NotifySettings};

pub use console::LogNotifier;
pub use mqtt::MqttNotifier;
pub use outbox::OutboxNotifier;

/// One violation by one identified person.
#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    pub alert_id: String,
    /// Normalized subject of the exam session.
    pub session: String,
    pub identity: String,
    pub violation: String,
    pub confidence: f32,
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    /// Annotated frame, JPEG encoded.
    #[serde(skip)]
    pub evidence_jpeg: Vec<u8>,
}

impl Alert {
    pub fn new(
        session: &str,
        identity: &str,
        violation: &str,
        confidence: f32,
        frame_index: u64,
        evidence_jpeg: Vec<u8>,
    ) -> Self {
        Self {
            alert_id: hex::encode(rand::random::<[u8; 8]>()),
            session: session.to_string(),
            identity: identity.to_string(),
            violation: violation.to_string(),
            confidence,
            frame_index,
            timestamp: Utc::now(),
            evidence_jpeg,
        }
    }

    /// `"<Violation> Alert: <identity> Detected"`.
    pub fn subject(&self) -> String {
        format!(
            "{} Alert: {} Detected",
            capitalize(&self.violation),
            self.identity
        )
    }

    pub fn body(&self) -> String {
        format!(
            "Exam session: {}\nIdentity: {}\nInfraction: {}\nConfidence: {:.2}\nTime: {}\n\nEvidence attached: {}\n",
            self.session,
            self.identity,
            self.violation,
            self.confidence,
            self.timestamp.to_rfc3339(),
            self.evidence_filename()
        )
    }

    pub fn evidence_filename(&self) -> String {
        format!("{}_incident.jpg", self.identity)
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A delivery channel for alerts.
pub trait Notifier: Send {
    fn name(&self) -> &'static str;

    fn notify(&mut self, alert: &Alert) -> Result<()>;

    /// Flush and release the sink. Called once when the dispatcher shuts down.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Where the session hands alerts off.
pub trait AlertSink {
    /// Hand off an alert without blocking frame processing.
    fn submit(&mut self, alert: Alert);

    /// Stop accepting alerts and wait for in-flight deliveries.
    fn close(&mut self) -> DispatchStats;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Bounded queue in front of a `Notifier` running on its own thread.
pub struct AlertDispatcher {
    sender: Option<SyncSender<Alert>>,
    worker: Option<JoinHandle<(u64, u64)>>,
    dropped: u64,
}

impl AlertDispatcher {
    pub fn spawn(mut notifier: Box<dyn Notifier>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("alert queue capacity must be greater than zero"));
        }
        let (sender, receiver) = mpsc::sync_channel::<Alert>(capacity);
        let worker = std::thread::Builder::new()
            .name("alert-dispatch".to_string())
            .spawn(move || {
                let mut delivered = 0u64;
                let mut failed = 0u64;
                for alert in receiver {
                    match notifier.notify(&alert) {
                        Ok(()) => {
                            delivered += 1;
                            log::info!(
                                "alert {} delivered via {}: {}",
                                alert.alert_id,
                                notifier.name(),
                                alert.subject()
                            );
                        }
                        Err(e) => {
                            failed += 1;
                            log::error!(
                                "alert {} delivery via {} failed: {:#}",
                                alert.alert_id,
                                notifier.name(),
                                e
                            );
                        }
                    }
                }
                if let Err(e) = notifier.close() {
                    log::warn!("closing {} notifier: {:#}", notifier.name(), e);
                }
                (delivered, failed)
            })
            .context("spawn alert dispatch thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            dropped: 0,
        })
    }

    fn shutdown(&mut self) -> DispatchStats {
        self.sender.take();
        let (delivered, failed) = match self.worker.take() {
            Some(worker) => worker.join().unwrap_or_else(|_| {
                log::error!("alert dispatch thread panicked");
                (0, 0)
            }),
            None => (0, 0),
        };
        DispatchStats {
            delivered,
            failed,
            dropped: self.dropped,
        }
    }
}

impl AlertSink for AlertDispatcher {
    fn submit(&mut self, alert: Alert) {
        let Some(sender) = &self.sender else {
            self.dropped += 1;
            log::warn!("alert {} dropped: dispatcher closed", alert.alert_id);
            return;
        };
        match sender.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(alert)) => {
                self.dropped += 1;
                log::warn!(
                    "alert queue full, dropping {} ({})",
                    alert.alert_id,
                    alert.subject()
                );
            }
            Err(TrySendError::Disconnected(alert)) => {
                self.dropped += 1;
                log::error!(
                    "alert dispatch thread gone, dropping {} ({})",
                    alert.alert_id,
                    alert.subject()
                );
            }
        }
    }

    fn close(&mut self) -> DispatchStats {
        self.shutdown()
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

/// Build the configured notifier.
pub fn open_notifier(settings: &NotifySettings, session: &str) -> Result<Box<dyn Notifier>> {
    match settings.sink {
        NotifierKind::Log => Ok(Box::new(LogNotifier)),
        NotifierKind::Outbox => {
            let dir = settings
                .outbox_dir
                .as_ref()
                .ok_or_else(|| anyhow!("outbox notifier requires notify.outbox_dir"))?;
            Ok(Box::new(OutboxNotifier::create(dir)?))
        }
        NotifierKind::Mqtt => {
            let client_id = settings
                .mqtt_client_id
                .clone()
                .unwrap_or_else(|| format!("exam-sentinel-{}", session.to_lowercase()));
            Ok(Box::new(MqttNotifier::connect(
                &settings.mqtt_broker,
                &client_id,
                &settings.mqtt_topic_prefix,
            )?))
        }
    }
}
