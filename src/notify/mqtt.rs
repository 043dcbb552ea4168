//! MQTT alert publishing.
//!
//! Alert JSON goes to `<prefix>/alerts`; the evidence JPEG goes to
//! `<prefix>/evidence/<alert-id>`. Both are published with QoS 1.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, ConnectionError, Event, MqttOptions};
use rumqttc::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{Alert, Notifier};

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Parse `host`, `host:port`, `mqtt://host[:port]`, or `mqtts://host[:port]`.
pub(crate) fn parse_endpoint(raw: &str) -> Result<MqttEndpoint> {
    let raw = raw.trim();
    let (rest, use_tls) = if let Some(rest) = raw.strip_prefix("mqtts://") {
        (rest, true)
    } else if let Some(rest) = raw.strip_prefix("mqtt://") {
        (rest, false)
    } else {
        (raw, false)
    };
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(anyhow!("MQTT broker address is empty"));
    }
    let default_port = if use_tls {
        DEFAULT_MQTTS_PORT
    } else {
        DEFAULT_MQTT_PORT
    };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow!("invalid MQTT broker port in {:?}", raw))?;
            (host, port)
        }
        None => (rest, default_port),
    };
    if host.is_empty() {
        return Err(anyhow!("MQTT broker host is empty in {:?}", raw));
    }
    Ok(MqttEndpoint {
        host: host.to_string(),
        port,
        use_tls,
    })
}

pub struct MqttNotifier {
    client: Client,
    connection_handle: Option<JoinHandle<()>>,
    closing: Arc<AtomicBool>,
    topic_prefix: String,
}

impl MqttNotifier {
    pub fn connect(broker: &str, client_id: &str, topic_prefix: &str) -> Result<Self> {
        let endpoint = parse_endpoint(broker)?;
        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        let closing = Arc::new(AtomicBool::new(false));
        let thread_closing = closing.clone();
        let connection_handle = std::thread::Builder::new()
            .name("mqtt-connection".to_string())
            .spawn(move || drive_connection(connection, &thread_closing))
            .context("spawn MQTT connection thread")?;
        log::info!(
            "MQTT notifier for {}:{} (TLS: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls
        );
        Ok(Self {
            client,
            connection_handle: Some(connection_handle),
            closing,
            topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
        })
    }
}

/// Poll the event loop until the notifier closes. Connection errors are
/// retried with exponential backoff; rumqttc reconnects on the next poll.
fn drive_connection(mut connection: Connection, closing: &AtomicBool) {
    let mut backoff = RECONNECT_BACKOFF_MIN;
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => backoff = RECONNECT_BACKOFF_MIN,
            Err(ConnectionError::RequestsDone) => break,
            Err(_) if closing.load(Ordering::SeqCst) => break,
            Err(e) => {
                log::warn!("MQTT connection error, retrying in {:?}: {}", backoff, e);
                if !sleep_unless_closing(backoff, closing) {
                    break;
                }
                backoff = next_backoff(backoff);
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_BACKOFF_MAX)
}

/// Sleep for `duration`; returns false as soon as `closing` is set.
fn sleep_unless_closing(duration: Duration, closing: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if closing.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(Duration::from_millis(100).min(remaining));
    }
    !closing.load(Ordering::SeqCst)
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn notify(&mut self, alert: &Alert) -> Result<()> {
        let payload = serde_json::json!({
            "subject": alert.subject(),
            "alert": alert,
            "evidence_topic": format!("{}/evidence/{}", self.topic_prefix, alert.alert_id),
        });
        let json = serde_json::to_vec(&payload).context("serialize alert")?;
        self.client.publish(
            format!("{}/alerts", self.topic_prefix),
            QoS::AtLeastOnce,
            false,
            json,
        )?;
        if !alert.evidence_jpeg.is_empty() {
            self.client.publish(
                format!("{}/evidence/{}", self.topic_prefix, alert.alert_id),
                QoS::AtLeastOnce,
                false,
                alert.evidence_jpeg.clone(),
            )?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}
