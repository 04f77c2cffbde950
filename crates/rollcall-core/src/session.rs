//! Recognition session state machine.
//!
//! ```text
//!   Idle --start--> Running --stop--> Idle
//!                      |
//!          fatal detector failure
//!                      v
//!                    Error --stop--> Idle
//! ```
//!
//! At most one session runs per controller. The phase, the session's
//! template snapshot and its cooldown tracker live behind one mutex that
//! `process_input` holds for the whole frame, so a concurrent `stop` or
//! `reload_templates` waits for the frame to finish and never sees a
//! half-applied cooldown update.

use crate::checkin::{self, CheckInReport, SingleShotPolicy};
use crate::cooldown::CooldownTracker;
use crate::detector::{Detector, DetectorError};
use crate::error::Result;
use crate::ledger::Ledger;
use crate::matcher::{CosineMatcher, Matcher};
use crate::notify::{AttendanceEvent, Notifier};
use crate::store::{TemplateSet, TemplateStore};
use crate::types::{AttendanceStatus, BoundingBox, DetectedFace, InputError};
use chrono::{DateTime, Duration, Local, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_STREAM_THRESHOLD: f32 = 0.35;
pub const DEFAULT_COOLDOWN_SECS: i64 = 300;
pub const DEFAULT_STREAM_NOTE: &str = "live check-in";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Error => "error",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("a recognition session is already running")]
    AlreadyRunning,
    #[error("invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },
    #[error("collaborator initialization failed: {0}")]
    CollaboratorInitFailure(String),
}

/// Parameters fixed for the lifetime of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Minimum similarity for a face to count as recognized.
    pub threshold: f32,
    /// Minimum spacing between two recorded check-ins of one identity.
    pub cooldown: Duration,
    /// Note written with every streaming check-in.
    pub note: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_STREAM_THRESHOLD,
            cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECS),
            note: DEFAULT_STREAM_NOTE.to_string(),
        }
    }
}

/// Outcome for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceOutcome {
    pub identity: String,
    pub score: f32,
    pub accepted: bool,
    pub recorded: bool,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameResult {
    pub faces: Vec<FaceOutcome>,
}

impl FrameResult {
    /// Turn an empty result into [`InputError::NoFacesDetected`] for callers
    /// that want to report it.
    pub fn require_faces(self) -> std::result::Result<Self, InputError> {
        if self.faces.is_empty() {
            Err(InputError::NoFacesDetected)
        } else {
            Ok(self)
        }
    }

    pub fn recorded(&self) -> impl Iterator<Item = &FaceOutcome> {
        self.faces.iter().filter(|f| f.recorded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub template_version: Option<String>,
    pub template_count: usize,
    pub cooldown_entries: usize,
    pub last_error: Option<String>,
}

struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: SessionConfig,
    templates: Arc<TemplateSet>,
    cooldown: CooldownTracker,
}

enum Phase {
    Idle,
    Running(ActiveSession),
    Failed {
        session: ActiveSession,
        reason: String,
    },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Running(_) => SessionState::Running,
            Self::Failed { .. } => SessionState::Error,
        }
    }

    fn running_mut(&mut self) -> std::result::Result<&mut ActiveSession, SessionError> {
        match self {
            Self::Running(active) => Ok(active),
            other => Err(SessionError::InvalidState {
                expected: SessionState::Running,
                actual: other.state(),
            }),
        }
    }

    fn status(&self) -> SessionStatus {
        let (active, last_error) = match self {
            Self::Idle => (None, None),
            Self::Running(active) => (Some(active), None),
            Self::Failed { session, reason } => (Some(session), Some(reason.clone())),
        };
        SessionStatus {
            state: self.state(),
            session_id: active.map(|a| a.id),
            started_at: active.map(|a| a.started_at),
            template_version: active.map(|a| a.templates.version().to_string()),
            template_count: active.map_or(0, |a| a.templates.len()),
            cooldown_entries: active.map_or(0, |a| a.cooldown.len()),
            last_error,
        }
    }
}

struct DetectorSlot {
    detector: Box<dyn Detector>,
    ready: bool,
}

/// Owns the single recognition session and drives matching, cooldown and
/// ledger writes for each incoming frame.
pub struct SessionController {
    store: Arc<TemplateStore>,
    ledger: Arc<Ledger>,
    notifier: Arc<dyn Notifier>,
    matcher: CosineMatcher,
    phase: Mutex<Phase>,
    detector: Mutex<DetectorSlot>,
}

impl SessionController {
    pub fn new(
        store: Arc<TemplateStore>,
        ledger: Arc<Ledger>,
        detector: Box<dyn Detector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            matcher: CosineMatcher,
            phase: Mutex::new(Phase::Idle),
            detector: Mutex::new(DetectorSlot {
                detector,
                ready: false,
            }),
        }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock_phase().state()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_phase().status()
    }

    /// Start a session: snapshot the templates and begin with an empty
    /// cooldown tracker. Fails without side effects if one is running.
    pub fn start(&self, config: SessionConfig) -> std::result::Result<SessionStatus, SessionError> {
        let mut phase = self.lock_phase();
        match phase.state() {
            SessionState::Idle => {}
            SessionState::Running => {
                tracing::warn!("start rejected: session already running");
                return Err(SessionError::AlreadyRunning);
            }
            SessionState::Error => {
                return Err(SessionError::InvalidState {
                    expected: SessionState::Idle,
                    actual: SessionState::Error,
                });
            }
        }

        let templates = self.store.snapshot();
        let active = ActiveSession {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
            templates,
            cooldown: CooldownTracker::new(),
        };
        tracing::info!(
            session = %active.id,
            templates = active.templates.len(),
            version = %active.templates.version(),
            threshold = active.config.threshold,
            cooldown_secs = active.config.cooldown.num_seconds(),
            "recognition session started"
        );
        *phase = Phase::Running(active);
        Ok(phase.status())
    }

    /// Stop the session from Running or Error, dropping its snapshot and
    /// cooldown state. A no-op when already idle.
    pub fn stop(&self) -> SessionStatus {
        let mut phase = self.lock_phase();
        match std::mem::replace(&mut *phase, Phase::Idle) {
            Phase::Idle => tracing::debug!("stop: no session running"),
            Phase::Running(active) => {
                tracing::info!(
                    session = %active.id,
                    checked_in = active.cooldown.len(),
                    "recognition session stopped"
                );
            }
            Phase::Failed { session, reason } => {
                tracing::info!(session = %session.id, %reason, "failed session cleared");
            }
        }
        phase.status()
    }

    /// Re-read the template file; a running session switches to the new
    /// snapshot between frames.
    pub fn reload_templates(&self) -> Result<Arc<TemplateSet>> {
        let mut phase = self.lock_phase();
        let templates = self.store.reload()?;
        if let Phase::Running(active) = &mut *phase {
            active.templates = Arc::clone(&templates);
            tracing::info!(session = %active.id, version = %templates.version(), "session templates swapped");
        }
        Ok(templates)
    }

    /// Process one frame at the current local time.
    pub fn process_input(&self, frame: &[u8], record: bool) -> Result<FrameResult> {
        self.process_input_at(frame, record, Local::now())
    }

    /// Process one frame as if observed at `now`.
    ///
    /// Every face is matched against the session snapshot. When `record`
    /// is set, an accepted face outside its cooldown window is written to
    /// the ledger, then committed to the cooldown tracker, then announced.
    /// A ledger failure aborts the frame before the cooldown commit.
    pub fn process_input_at(
        &self,
        frame: &[u8],
        record: bool,
        now: DateTime<Local>,
    ) -> Result<FrameResult> {
        let mut phase = self.lock_phase();
        phase.running_mut()?;

        let faces = match self.detect(frame) {
            Ok(faces) => faces,
            Err(e) if e.is_fatal() => {
                let reason = e.to_string();
                if let Phase::Running(session) = std::mem::replace(&mut *phase, Phase::Idle) {
                    tracing::error!(session = %session.id, %reason, "detector failed; session in error");
                    *phase = Phase::Failed {
                        session,
                        reason: reason.clone(),
                    };
                }
                return Err(SessionError::CollaboratorInitFailure(reason).into());
            }
            Err(e) => return Err(e.into()),
        };

        let active = phase.running_mut()?;
        let templates = Arc::clone(&active.templates);
        let probes = faces
            .iter()
            .map(|face| templates.probe(&face.embedding))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let recorded_at = now.with_timezone(&Utc);
        let date = now.date_naive();
        let mut result = FrameResult::default();

        for (face, probe) in faces.iter().zip(&probes) {
            let matched = self.matcher.compare(probe, &templates, active.config.threshold);
            let mut recorded = false;

            if !matched.accepted {
                tracing::debug!(score = matched.score, "face not recognized");
            } else if record {
                let window = active.config.cooldown;
                if active.cooldown.should_record(&matched.identity, recorded_at, window) {
                    if let Err(e) = self.ledger.record_attendance_at(
                        &matched.identity,
                        date,
                        AttendanceStatus::Present,
                        Some(matched.score),
                        &active.config.note,
                        recorded_at,
                    ) {
                        tracing::warn!(identity = %matched.identity, error = %e, "ledger write failed; frame aborted");
                        return Err(e.into());
                    }
                    active.cooldown.record(&matched.identity, recorded_at);
                    recorded = true;
                    tracing::info!(
                        session = %active.id,
                        identity = %matched.identity,
                        score = matched.score,
                        %date,
                        "check-in recorded"
                    );

                    let event = AttendanceEvent::checked_in(&matched.identity, matched.score, recorded_at);
                    if let Err(e) = self.notifier.notify(&event) {
                        tracing::warn!(identity = %matched.identity, error = %e, "check-in notification not delivered");
                    }
                } else {
                    tracing::debug!(identity = %matched.identity, "check-in suppressed by cooldown");
                }
            }

            result.faces.push(FaceOutcome {
                identity: matched.identity,
                score: matched.score,
                accepted: matched.accepted,
                recorded,
                bbox: face.bbox,
            });
        }

        Ok(result)
    }

    /// Stateless "upload and check" flow against the store's current
    /// snapshot. Needs no running session.
    pub fn check_image(
        &self,
        image: &[u8],
        policy: &SingleShotPolicy,
        record: bool,
    ) -> Result<CheckInReport> {
        self.check_image_at(image, policy, record, Local::now())
    }

    pub fn check_image_at(
        &self,
        image: &[u8],
        policy: &SingleShotPolicy,
        record: bool,
        now: DateTime<Local>,
    ) -> Result<CheckInReport> {
        let faces = self.detect(image)?;
        let templates = self.store.snapshot();
        checkin::check_faces(
            &faces,
            &templates,
            &self.matcher,
            &self.ledger,
            policy,
            record,
            now,
        )
    }

    fn detect(&self, image: &[u8]) -> std::result::Result<Vec<DetectedFace>, DetectorError> {
        let mut slot = self.detector.lock().unwrap_or_else(PoisonError::into_inner);
        if !slot.ready {
            slot.detector.prepare()?;
            slot.ready = true;
            tracing::info!("detector ready");
        }
        slot.detector.detect(image)
    }
}
