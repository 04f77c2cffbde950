//! Administrative corrections applied without biometric evidence.

use crate::ledger::{Ledger, LedgerError};
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownSubject,
    AlreadyRecorded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedOverride {
    pub identity: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkOverrideReport {
    pub date: NaiveDate,
    pub succeeded: Vec<String>,
    pub skipped: Vec<SkippedOverride>,
}

/// Mark each registered identity present on `date`, leaving existing
/// records alone.
///
/// Identities are trimmed; blanks are ignored. Each override is its own
/// insert, so a ledger failure part way through keeps the ones already
/// applied and returns the error.
pub fn bulk_override(
    ledger: &Ledger,
    identities: &[String],
    date: NaiveDate,
    note: &str,
) -> Result<BulkOverrideReport, LedgerError> {
    let mut report = BulkOverrideReport {
        date,
        succeeded: Vec::new(),
        skipped: Vec::new(),
    };

    for identity in identities.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
        let reason = if !ledger.subject_exists(identity)? {
            Some(SkipReason::UnknownSubject)
        } else {
            match ledger.override_if_absent(identity, date, note) {
                Ok(()) => None,
                Err(LedgerError::AlreadyRecorded { .. }) => Some(SkipReason::AlreadyRecorded),
                Err(e) => return Err(e),
            }
        };

        match reason {
            Some(reason) => report.skipped.push(SkippedOverride {
                identity: identity.to_string(),
                reason,
            }),
            None => report.succeeded.push(identity.to_string()),
        }
    }

    tracing::info!(
        %date,
        succeeded = report.succeeded.len(),
        skipped = report.skipped.len(),
        "bulk override applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttendanceStatus;

    #[test]
    fn test_bulk_override_skips_unknown_and_recorded() {
        let ledger = Ledger::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        for id in ["alice", "bob", "carol"] {
            ledger.register_subject(id, None).unwrap();
        }
        ledger
            .record_attendance("bob", date, AttendanceStatus::Late, Some(0.7), "live")
            .unwrap();

        let ids: Vec<String> = [" alice", "bob", "mallory", "", "carol "]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = bulk_override(&ledger, &ids, date, "excused").unwrap();

        assert_eq!(report.succeeded, vec!["alice".to_string(), "carol".to_string()]);
        assert_eq!(
            report.skipped,
            vec![
                SkippedOverride {
                    identity: "bob".to_string(),
                    reason: SkipReason::AlreadyRecorded
                },
                SkippedOverride {
                    identity: "mallory".to_string(),
                    reason: SkipReason::UnknownSubject
                },
            ]
        );

        let bob = ledger.get("bob", date).unwrap().unwrap();
        assert_eq!(bob.status, AttendanceStatus::Late);
        let alice = ledger.get("alice", date).unwrap().unwrap();
        assert_eq!(alice.confidence, None);
        assert_eq!(alice.note, "excused");
    }

    #[test]
    fn test_repeated_identity_is_applied_once() {
        let ledger = Ledger::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        ledger.register_subject("alice", None).unwrap();

        let ids = vec!["alice".to_string(), "alice".to_string()];
        let report = bulk_override(&ledger, &ids, date, "excused").unwrap();
        assert_eq!(report.succeeded, vec!["alice".to_string()]);
        assert_eq!(report.skipped[0].reason, SkipReason::AlreadyRecorded);
        assert_eq!(ledger.query(Some("alice"), None).unwrap().len(), 1);
    }
}
