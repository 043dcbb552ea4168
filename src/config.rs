use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::policy::{default_classes, ClassPolicy, ClassRole, PolicyTable, DEFAULT_THRESHOLD};

const DEFAULT_ROSTER_ROOT: &str = "Attendance/students";
const DEFAULT_SOURCE_URI: &str = "stub://exam_room";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.1;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_FACE_INPUT: u32 = 640;
const DEFAULT_EMBEDDING_INPUT: u32 = 150;
const DEFAULT_MIN_FACE_CONFIDENCE: f32 = 0.5;
const DEFAULT_MQTT_BROKER: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_TOPIC_PREFIX: &str = "exam_sentinel";
const DEFAULT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    roster_root: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    embedder: Option<EmbedderConfigFile>,
    policy: Option<PolicyConfigFile>,
    notify: Option<NotifyConfigFile>,
    recorder: Option<RecorderConfigFile>,
    session: Option<SessionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    synthetic_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    min_confidence: Option<f32>,
    nms_iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct EmbedderConfigFile {
    face_model_path: Option<PathBuf>,
    embedding_model_path: Option<PathBuf>,
    face_input_size: Option<u32>,
    embedding_input_size: Option<u32>,
    min_face_confidence: Option<f32>,
    normalize: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    classes: Option<Vec<ClassConfigFile>>,
    default_threshold: Option<f32>,
    tolerance: Option<f32>,
    strict_coverage: Option<bool>,
}

/// A class entry; `role` defaults from the class name when omitted.
#[derive(Debug, Deserialize)]
struct ClassConfigFile {
    id: u32,
    name: String,
    threshold: f32,
    role: Option<ClassRole>,
}

impl From<ClassConfigFile> for ClassPolicy {
    fn from(class: ClassConfigFile) -> Self {
        let role = class
            .role
            .unwrap_or_else(|| ClassRole::for_class_name(&class.name));
        ClassPolicy::new(class.id, &class.name, class.threshold, role)
    }
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    sink: Option<NotifierKind>,
    outbox_dir: Option<PathBuf>,
    mqtt_broker: Option<String>,
    mqtt_topic_prefix: Option<String>,
    mqtt_client_id: Option<String>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    max_frames: Option<u64>,
    max_duration_secs: Option<u64>,
}

/// Detector backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Replays detections from a JSON-lines script.
    Scripted,
    /// YOLO-style ONNX model run with tract.
    Tract,
}

/// Where alerts are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    Log,
    Outbox,
    Mqtt,
}

impl std::str::FromStr for NotifierKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "outbox" => Ok(Self::Outbox),
            "mqtt" => Ok(Self::Mqtt),
            other => Err(anyhow!(
                "unknown notifier sink {:?} (expected log, outbox, or mqtt)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub roster_root: PathBuf,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub embedder: EmbedderSettings,
    pub policy: PolicySettings,
    pub notify: NotifySettings,
    pub recorder_dir: Option<PathBuf>,
    pub max_frames: Option<u64>,
    pub max_duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Frames a `stub://` source yields before it is exhausted. Unbounded when unset.
    pub synthetic_frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub min_confidence: f32,
    pub nms_iou: f32,
}

#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    pub face_model_path: Option<PathBuf>,
    pub embedding_model_path: Option<PathBuf>,
    pub face_input_size: u32,
    pub embedding_input_size: u32,
    pub min_face_confidence: f32,
    pub normalize: bool,
}

#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub classes: Vec<ClassPolicy>,
    pub default_threshold: f32,
    pub tolerance: f32,
    pub strict_coverage: bool,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub sink: NotifierKind,
    pub outbox_dir: Option<PathBuf>,
    pub mqtt_broker: String,
    pub mqtt_topic_prefix: String,
    pub mqtt_client_id: Option<String>,
    pub queue_capacity: usize,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self::from_file(SentinelConfigFile::default())
    }
}

impl SentinelConfig {
    /// Defaults, then the config file (`path`, else `SENTINEL_CONFIG`), then
    /// `SENTINEL_*` environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SENTINEL_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let config_path = path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let embedder = file.embedder.unwrap_or_default();
        let policy = file.policy.unwrap_or_default();
        let notify = file.notify.unwrap_or_default();
        let session = file.session.unwrap_or_default();

        Self {
            roster_root: file
                .roster_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROSTER_ROOT)),
            source: SourceSettings {
                uri: source.uri.unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                synthetic_frames: source.synthetic_frames,
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(DetectorKind::Scripted),
                model_path: detector.model_path,
                script_path: detector.script_path,
                input_width: detector.input_width.unwrap_or(DEFAULT_DETECTOR_INPUT),
                input_height: detector.input_height.unwrap_or(DEFAULT_DETECTOR_INPUT),
                min_confidence: detector.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                nms_iou: detector.nms_iou.unwrap_or(DEFAULT_NMS_IOU),
            },
            embedder: EmbedderSettings {
                face_model_path: embedder.face_model_path,
                embedding_model_path: embedder.embedding_model_path,
                face_input_size: embedder.face_input_size.unwrap_or(DEFAULT_FACE_INPUT),
                embedding_input_size: embedder
                    .embedding_input_size
                    .unwrap_or(DEFAULT_EMBEDDING_INPUT),
                min_face_confidence: embedder
                    .min_face_confidence
                    .unwrap_or(DEFAULT_MIN_FACE_CONFIDENCE),
                normalize: embedder.normalize.unwrap_or(false),
            },
            policy: PolicySettings {
                classes: policy
                    .classes
                    .map(|classes| classes.into_iter().map(ClassPolicy::from).collect())
                    .unwrap_or_else(default_classes),
                default_threshold: policy.default_threshold.unwrap_or(DEFAULT_THRESHOLD),
                tolerance: policy.tolerance.unwrap_or(crate::DEFAULT_TOLERANCE),
                strict_coverage: policy.strict_coverage.unwrap_or(false),
            },
            notify: NotifySettings {
                sink: notify.sink.unwrap_or(NotifierKind::Log),
                outbox_dir: notify.outbox_dir,
                mqtt_broker: notify
                    .mqtt_broker
                    .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
                mqtt_topic_prefix: notify
                    .mqtt_topic_prefix
                    .unwrap_or_else(|| DEFAULT_MQTT_TOPIC_PREFIX.to_string()),
                mqtt_client_id: notify.mqtt_client_id,
                queue_capacity: notify.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            },
            recorder_dir: file.recorder.and_then(|recorder| recorder.dir),
            max_frames: session.max_frames,
            max_duration: session.max_duration_secs.map(Duration::from_secs),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(root) = env_value("SENTINEL_ROSTER_ROOT") {
            self.roster_root = PathBuf::from(root);
        }
        if let Some(uri) = env_value("SENTINEL_SOURCE_URI") {
            self.source.uri = uri;
        }
        if let Some(model) = env_value("SENTINEL_DETECTOR_MODEL") {
            self.detector.model_path = Some(PathBuf::from(model));
            self.detector.backend = DetectorKind::Tract;
        }
        if let Some(sink) = env_value("SENTINEL_NOTIFY_SINK") {
            self.notify.sink = sink.parse()?;
        }
        if let Some(dir) = env_value("SENTINEL_OUTBOX_DIR") {
            self.notify.outbox_dir = Some(PathBuf::from(dir));
        }
        if let Some(tolerance) = env_value("SENTINEL_TOLERANCE") {
            self.policy.tolerance = tolerance
                .parse()
                .map_err(|_| anyhow!("SENTINEL_TOLERANCE must be a number"))?;
        }
        if let Some(frames) = env_value("SENTINEL_MAX_FRAMES") {
            let frames: u64 = frames
                .parse()
                .map_err(|_| anyhow!("SENTINEL_MAX_FRAMES must be an integer"))?;
            self.max_frames = Some(frames);
        }
        if let Some(secs) = env_value("SENTINEL_MAX_DURATION_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("SENTINEL_MAX_DURATION_SECS must be an integer number of seconds")
            })?;
            self.max_duration = Some(Duration::from_secs(secs));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(self.policy.tolerance.is_finite() && self.policy.tolerance > 0.0) {
            return Err(anyhow!(
                "policy.tolerance must be a positive number (got {})",
                self.policy.tolerance
            ));
        }
        // Surface bad thresholds and duplicate class ids at load time.
        self.policy_table()?;

        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!("detector.min_confidence must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.nms_iou) {
            return Err(anyhow!("detector.nms_iou must be within [0, 1]"));
        }
        if self.detector.backend == DetectorKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("detector.backend = tract requires detector.model_path"));
        }
        if self.notify.queue_capacity == 0 {
            return Err(anyhow!("notify.queue_capacity must be greater than zero"));
        }
        if self.notify.sink == NotifierKind::Outbox && self.notify.outbox_dir.is_none() {
            return Err(anyhow!("notify.sink = outbox requires notify.outbox_dir"));
        }
        if self.notify.sink == NotifierKind::Mqtt && self.notify.mqtt_broker.trim().is_empty() {
            return Err(anyhow!("notify.sink = mqtt requires notify.mqtt_broker"));
        }
        if self.max_duration == Some(Duration::ZERO) {
            return Err(anyhow!("session.max_duration_secs must be greater than zero"));
        }
        Ok(())
    }

    /// Validated class policy table.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        PolicyTable::new(self.policy.classes.clone(), self.policy.default_threshold)
    }

    /// Roster directory for a normalized subject name.
    pub fn subject_roster(&self, subject: &str) -> PathBuf {
        self.roster_root.join(subject)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
