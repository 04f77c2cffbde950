//! Single-shot check-in: match the faces in one uploaded image and mark
//! registered subjects present, without a running session.
//!
//! Unlike the streaming path this never overwrites a record that already
//! exists for the day, and it only writes for identities registered as
//! subjects.

use crate::error::Result;
use crate::ledger::{Ledger, LedgerError};
use crate::matcher::Matcher;
use crate::store::TemplateSet;
use crate::types::{AttendanceStatus, BoundingBox, DetectedFace};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

pub const DEFAULT_SINGLE_SHOT_THRESHOLD: f32 = 0.45;
pub const DEFAULT_SINGLE_SHOT_NOTE: &str = "single-shot check-in";

#[derive(Debug, Clone, PartialEq)]
pub struct SingleShotPolicy {
    pub threshold: f32,
    pub note: String,
}

impl Default for SingleShotPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SINGLE_SHOT_THRESHOLD,
            note: DEFAULT_SINGLE_SHOT_NOTE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// No template cleared the threshold.
    Unrecognized,
    /// Recognized; recording was not requested.
    Matched,
    /// Recognized, but not a registered subject.
    UnregisteredSubject,
    /// Recognized; a record for today already exists and was kept.
    AlreadyRecorded,
    /// Recognized and written to the ledger.
    Recorded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckedFace {
    pub identity: String,
    pub score: f32,
    pub bbox: BoundingBox,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckInReport {
    pub faces: Vec<CheckedFace>,
}

impl CheckInReport {
    pub fn recognized(&self) -> impl Iterator<Item = &CheckedFace> {
        self.faces
            .iter()
            .filter(|f| f.disposition != Disposition::Unrecognized)
    }

    pub fn newly_recorded(&self) -> impl Iterator<Item = &CheckedFace> {
        self.faces
            .iter()
            .filter(|f| f.disposition == Disposition::Recorded)
    }

    pub fn unknown_count(&self) -> usize {
        self.faces.len() - self.recognized().count()
    }
}

/// Match `faces` against `templates` and, if `record` is set, mark each
/// recognized registered subject present for `now`'s local date.
///
/// All embeddings are validated before the first ledger write.
pub fn check_faces(
    faces: &[DetectedFace],
    templates: &TemplateSet,
    matcher: &impl Matcher,
    ledger: &Ledger,
    policy: &SingleShotPolicy,
    record: bool,
    now: DateTime<Local>,
) -> Result<CheckInReport> {
    let probes = faces
        .iter()
        .map(|face| templates.probe(&face.embedding))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let date = now.date_naive();
    let recorded_at = now.with_timezone(&Utc);
    let mut report = CheckInReport::default();

    for (face, probe) in faces.iter().zip(&probes) {
        let matched = matcher.compare(probe, templates, policy.threshold);
        let disposition = if !matched.accepted {
            Disposition::Unrecognized
        } else if !record {
            Disposition::Matched
        } else if !ledger.subject_exists(&matched.identity)? {
            tracing::warn!(identity = %matched.identity, "recognized face is not a registered subject");
            Disposition::UnregisteredSubject
        } else {
            match ledger.insert_attendance_at(
                &matched.identity,
                date,
                AttendanceStatus::Present,
                Some(matched.score),
                &policy.note,
                recorded_at,
            ) {
                Ok(()) => Disposition::Recorded,
                Err(LedgerError::AlreadyRecorded { .. }) => Disposition::AlreadyRecorded,
                Err(e) => return Err(e.into()),
            }
        };

        report.faces.push(CheckedFace {
            identity: matched.identity,
            score: matched.score,
            bbox: face.bbox,
            disposition,
        });
    }

    tracing::info!(
        faces = report.faces.len(),
        recognized = report.recognized().count(),
        recorded = report.newly_recorded().count(),
        "single-shot check-in"
    );
    Ok(report)
}
