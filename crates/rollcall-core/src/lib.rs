//! rollcall-core: attendance matching and ledger engine.
//!
//! Matches face embeddings from an external detector against enrolled
//! templates, suppresses repeat check-ins per session, and keeps one
//! attendance record per person per day in SQLite.

pub mod admin;
pub mod checkin;
pub mod cooldown;
pub mod detector;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod notify;
pub mod session;
pub mod store;
pub mod types;

pub use admin::{bulk_override, BulkOverrideReport, SkipReason};
pub use checkin::{CheckInReport, Disposition, SingleShotPolicy};
pub use cooldown::CooldownTracker;
pub use detector::{Detector, DetectorError, PayloadDetector};
pub use error::{Result, RollcallError};
pub use ledger::{
    AbsenceAlerts, AlertLevel, AttendanceRecord, AttendanceTrend, DateRange, Ledger, LedgerError,
    Subject, UpsertOutcome,
};
pub use matcher::{CosineMatcher, MatchResult, Matcher, UNKNOWN_IDENTITY};
pub use notify::{AttendanceEvent, BroadcastNotifier, Notifier, NullNotifier};
pub use session::{FrameResult, SessionConfig, SessionController, SessionError, SessionState, SessionStatus};
pub use store::{StoreError, TemplateSet, TemplateStore};
pub use types::{AttendanceStatus, BoundingBox, DetectedFace, Embedding, InputError};
