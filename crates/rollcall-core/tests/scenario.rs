//! End-to-end checks across the store, matcher, ledger and session.

use chrono::{Duration, Local, NaiveDate, TimeZone};
use rollcall_core::{
    AttendanceStatus, BoundingBox, CosineMatcher, DetectedFace, Detector, DetectorError, Ledger,
    Matcher, NullNotifier, PayloadDetector, SessionConfig, SessionController, SessionError,
    SessionState, TemplateStore, UNKNOWN_IDENTITY,
};
use std::sync::Arc;

fn store_with_alice_and_bob(dir: &tempfile::TempDir) -> TemplateStore {
    let store = TemplateStore::open_or_empty(dir.path().join("templates.json")).unwrap();
    store.upsert("alice", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
    store.upsert("bob", vec![0.0, 1.0, 0.0, 0.0]).unwrap();
    store
}

fn payload(embeddings: &[&[f32]]) -> Vec<u8> {
    let faces: Vec<DetectedFace> = embeddings
        .iter()
        .map(|e| DetectedFace {
            bbox: BoundingBox {
                x1: 10.0,
                y1: 10.0,
                x2: 90.0,
                y2: 110.0,
            },
            embedding: e.to_vec(),
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({ "faces": faces })).unwrap()
}

#[test]
fn test_matching_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_alice_and_bob(&dir);
    let templates = store.snapshot();

    let alice = templates.probe(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    let result = CosineMatcher.compare(&alice, &templates, 0.5);
    assert_eq!(result.identity, "alice");
    assert_eq!(result.score, 1.0);
    assert!(result.accepted);

    let stranger = templates.probe(&[0.0, 0.0, 1.0, 0.0]).unwrap();
    let result = CosineMatcher.compare(&stranger, &templates, 0.5);
    assert_eq!(result.identity, UNKNOWN_IDENTITY);
    assert!(!result.accepted);
}

#[test]
fn test_ledger_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(&dir.path().join("attendance.db")).unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();

    ledger
        .record_attendance("alice", date, AttendanceStatus::Present, Some(0.9), "")
        .unwrap();
    ledger
        .record_attendance("alice", date, AttendanceStatus::Late, Some(0.7), "")
        .unwrap();

    let records = ledger.query(Some("alice"), None).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AttendanceStatus::Late);
    assert_eq!(records[0].confidence, Some(0.7));
}

#[test]
fn test_session_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store_with_alice_and_bob(&dir));
    let ledger = Arc::new(Ledger::open(&dir.path().join("attendance.db")).unwrap());
    let controller = SessionController::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        Box::new(PayloadDetector),
        Arc::new(NullNotifier),
    );

    let config = SessionConfig {
        threshold: 0.5,
        cooldown: Duration::seconds(300),
        ..SessionConfig::default()
    };
    let first = controller.start(config.clone()).unwrap();
    assert_eq!(controller.start(config), Err(SessionError::AlreadyRunning));
    assert_eq!(controller.status(), first);

    let t0 = Local.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
    let frame = payload(&[&[1.0, 0.0, 0.0, 0.0], &[0.0, 0.6, 0.0, 0.8]]);

    let result = controller.process_input_at(&frame, true, t0).unwrap();
    assert_eq!(result.faces.len(), 2);
    assert!(result.faces[0].recorded);
    // 0.6 against bob is above the 0.5 threshold.
    assert_eq!(result.faces[1].identity, "bob");
    assert!(result.faces[1].recorded);

    let result = controller
        .process_input_at(&frame, true, t0 + Duration::seconds(299))
        .unwrap();
    assert!(result.faces.iter().all(|f| f.accepted && !f.recorded));

    let result = controller
        .process_input_at(&frame, true, t0 + Duration::seconds(301))
        .unwrap();
    assert!(result.faces.iter().all(|f| f.recorded));

    let records = ledger.query(None, None).unwrap();
    assert_eq!(records.len(), 2);

    let empty = controller
        .process_input_at(&payload(&[]), true, t0)
        .unwrap();
    assert!(empty.faces.is_empty());

    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.process_input(&frame, true).is_err());
}

struct BrokenDetector;

impl Detector for BrokenDetector {
    fn prepare(&mut self) -> Result<(), DetectorError> {
        Err(DetectorError::InitFailed("model file missing".to_string()))
    }

    fn detect(&mut self, _image: &[u8]) -> Result<Vec<DetectedFace>, DetectorError> {
        Ok(Vec::new())
    }
}

#[test]
fn test_detector_init_failure_requires_restart() {
    let dir = tempfile::tempdir().unwrap();
    let controller = SessionController::new(
        Arc::new(store_with_alice_and_bob(&dir)),
        Arc::new(Ledger::open_in_memory().unwrap()),
        Box::new(BrokenDetector),
        Arc::new(NullNotifier),
    );
    controller.start(SessionConfig::default()).unwrap();
    assert!(controller.process_input(b"frame", true).is_err());
    assert_eq!(controller.state(), SessionState::Error);

    assert_eq!(controller.stop().state, SessionState::Idle);
    assert!(controller.start(SessionConfig::default()).is_ok());
}
