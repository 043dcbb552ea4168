use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::NamedTempFile;

use exam_sentinel::config::{DetectorKind, NotifierKind, SentinelConfig};
use exam_sentinel::{
    AlertSink, BoundingBox, ClassRole, Detection, DispatchStats, Embedding, Frame,
    IdentityResolver, Roster, RosterEntry, Session, StubEmbedder,
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_ROSTER_ROOT",
        "SENTINEL_SOURCE_URI",
        "SENTINEL_DETECTOR_MODEL",
        "SENTINEL_NOTIFY_SINK",
        "SENTINEL_OUTBOX_DIR",
        "SENTINEL_TOLERANCE",
        "SENTINEL_MAX_FRAMES",
        "SENTINEL_MAX_DURATION_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_match_the_exam_model() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentinelConfig::load(None).expect("load defaults");

    assert_eq!(cfg.roster_root, PathBuf::from("Attendance/students"));
    assert_eq!(
        cfg.subject_roster("Physics"),
        PathBuf::from("Attendance/students/Physics")
    );
    assert_eq!(cfg.source.uri, "stub://exam_room");
    assert_eq!(cfg.detector.backend, DetectorKind::Scripted);
    assert_eq!(cfg.notify.sink, NotifierKind::Log);
    assert_eq!(cfg.policy.tolerance, 0.6);

    let table = cfg.policy_table().unwrap();
    assert_eq!(table.threshold_for(2), 0.30);
    assert_eq!(table.threshold_for(3), 0.50);
    assert_eq!(table.threshold_for(42), 0.25);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let outbox = file.path().with_extension("outbox");
    let json = format!(
        r#"{{
            "roster_root": "/srv/rosters",
            "source": {{
                "uri": "/dev/video2",
                "target_fps": 5,
                "width": 1280,
                "height": 720
            }},
            "policy": {{
                "classes": [
                    {{"id": 0, "name": "person", "threshold": 0.8}},
                    {{"id": 5, "name": "phone", "threshold": 0.35, "role": "held_object"}}
                ],
                "default_threshold": 0.4,
                "tolerance": 0.5
            }},
            "notify": {{
                "sink": "outbox",
                "outbox_dir": "{}",
                "queue_capacity": 4
            }},
            "session": {{
                "max_duration_secs": 5400
            }}
        }}"#,
        outbox.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_ROSTER_ROOT", "/mnt/rosters");
    std::env::set_var("SENTINEL_TOLERANCE", "0.55");
    std::env::set_var("SENTINEL_MAX_FRAMES", "1000");

    let cfg = SentinelConfig::load(None).expect("load config");

    assert_eq!(cfg.roster_root, PathBuf::from("/mnt/rosters"));
    assert_eq!(cfg.source.uri, "/dev/video2");
    assert_eq!(cfg.source.target_fps, 5);
    assert_eq!(cfg.source.width, 1280);
    assert_eq!(cfg.source.height, 720);
    assert_eq!(cfg.policy.tolerance, 0.55);
    assert_eq!(cfg.notify.sink, NotifierKind::Outbox);
    assert_eq!(cfg.notify.outbox_dir.as_deref(), Some(outbox.as_path()));
    assert_eq!(cfg.notify.queue_capacity, 4);
    assert_eq!(cfg.max_frames, Some(1000));
    assert_eq!(cfg.max_duration, Some(Duration::from_secs(5400)));

    let table = cfg.policy_table().unwrap();
    assert_eq!(table.class(5).role, ClassRole::HeldObject);
    assert_eq!(table.class(0).role, ClassRole::Benign);
    assert_eq!(table.threshold_for(3), 0.4);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sentinel.toml");
    std::fs::write(
        &path,
        r#"
roster_root = "rosters"

[detector]
backend = "scripted"
script_path = "detections.jsonl"

[notify]
sink = "mqtt"
mqtt_broker = "mqtts://broker.example:8883"
mqtt_topic_prefix = "hall_b"

[recorder]
dir = "recordings"
"#,
    )
    .unwrap();

    let cfg = SentinelConfig::load(Some(&path)).expect("load toml");

    assert_eq!(cfg.roster_root, PathBuf::from("rosters"));
    assert_eq!(
        cfg.detector.script_path,
        Some(PathBuf::from("detections.jsonl"))
    );
    assert_eq!(cfg.notify.sink, NotifierKind::Mqtt);
    assert_eq!(cfg.notify.mqtt_broker, "mqtts://broker.example:8883");
    assert_eq!(cfg.notify.mqtt_topic_prefix, "hall_b");
    assert_eq!(cfg.recorder_dir, Some(PathBuf::from("recordings")));
}

#[test]
fn detector_model_env_selects_tract() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_DETECTOR_MODEL", "/models/exam.onnx");
    let cfg = SentinelConfig::load(None).expect("load config");
    assert_eq!(cfg.detector.backend, DetectorKind::Tract);
    assert_eq!(
        cfg.detector.model_path,
        Some(PathBuf::from("/models/exam.onnx"))
    );

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_TOLERANCE", "-1");
    assert!(SentinelConfig::load(None).is_err());
    clear_env();

    std::env::set_var("SENTINEL_NOTIFY_SINK", "outbox");
    let err = SentinelConfig::load(None).unwrap_err();
    assert!(err.to_string().contains("outbox_dir"));
    clear_env();

    std::env::set_var("SENTINEL_NOTIFY_SINK", "pager");
    assert!(SentinelConfig::load(None).is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(
        &mut file,
        br#"{"policy": {"classes": [{"id": 2, "name": "phone", "threshold": 1.5}]}}"#,
    )
    .unwrap();
    assert!(SentinelConfig::load(Some(file.path())).is_err());
    clear_env();
}

#[derive(Default)]
struct CountingSink {
    submitted: u64,
}

impl AlertSink for CountingSink {
    fn submit(&mut self, _alert: exam_sentinel::Alert) {
        self.submitted += 1;
    }

    fn close(&mut self) -> DispatchStats {
        DispatchStats {
            delivered: self.submitted,
            ..DispatchStats::default()
        }
    }
}

#[test]
fn class_list_without_roles_still_raises_alerts() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sentinel.toml");
    std::fs::write(
        &path,
        r#"
[policy]
classes = [
    { id = 2, name = "phone", threshold = 0.30 },
    { id = 3, name = "cheating", threshold = 0.50 },
]
"#,
    )
    .unwrap();

    let cfg = SentinelConfig::load(Some(&path)).expect("load toml");
    let table = cfg.policy_table().unwrap();
    assert_eq!(table.class(2).role, ClassRole::HeldObject);
    assert_eq!(table.class(3).role, ClassRole::Posture);

    let roster = Arc::new(Roster::from_entries(vec![RosterEntry {
        person_id: "alice".to_string(),
        embedding: Embedding::new(vec![0.0, 0.0]),
    }]));
    let mut session = Session::new(
        "Physics",
        Arc::new(table),
        IdentityResolver::new(roster, cfg.policy.tolerance),
        Box::new(StubEmbedder::new(vec![Embedding::new(vec![0.4, 0.0])])),
        Box::new(CountingSink::default()),
    );
    let frame = Frame::from_rgb(vec![0u8; 640 * 480 * 3], 640, 480, 0).unwrap();
    let report = session.process_frame(
        &frame,
        &[
            Detection::new(2, 0.35, BoundingBox::new(300, 300, 320, 340)),
            Detection::new(3, 0.90, BoundingBox::new(100, 100, 260, 400)),
        ],
    );
    assert_eq!(report.alerts.len(), 2);
    assert!(report
        .annotations
        .iter()
        .any(|a| a.label == "alice - CHEATING!"));

    let summary = session.finish();
    assert_eq!(summary.stats.violations, 2);
    assert_eq!(summary.dispatch.delivered, 2);
}

#[test]
fn class_list_with_no_violation_role_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sentinel.toml");
    std::fs::write(
        &path,
        r#"
[policy]
classes = [{ id = 0, name = "person", threshold = 0.5 }]
"#,
    )
    .unwrap();

    let err = SentinelConfig::load(Some(&path)).unwrap_err();
    assert!(format!("{:#}", err).contains("violation"));
}
