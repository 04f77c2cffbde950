//! Durable attendance ledger backed by SQLite.
//!
//! # Schema
//!
//! `subjects(identity UNIQUE, external_id UNIQUE NULL)` lists registered
//! people. `attendance(identity, date, status, confidence, note,
//! recorded_at, UNIQUE(identity, date))` holds at most one row per person
//! per day; the UNIQUE constraint is what enforces that, not the caller.
//!
//! Dates are stored as `YYYY-MM-DD` and timestamps as fixed-width RFC 3339
//! UTC strings, so text ordering matches chronological ordering.

use crate::types::AttendanceStatus;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest range [`Ledger::trend`] will expand day by day.
pub const MAX_TREND_DAYS: i64 = 366;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS subjects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identity TEXT NOT NULL UNIQUE,
        external_id TEXT UNIQUE,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS attendance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identity TEXT NOT NULL,
        date TEXT NOT NULL,
        status TEXT NOT NULL,
        confidence REAL,
        note TEXT NOT NULL DEFAULT '',
        recorded_at TEXT NOT NULL,
        UNIQUE(identity, date)
    );
    CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O failure: {0}")]
    IoFailure(String),
    #[error("ledger constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("no attendance record for {identity} on {date}")]
    RecordNotFound { identity: String, date: NaiveDate },
    #[error("{identity} already has a record on {date}")]
    AlreadyRecorded { identity: String, date: NaiveDate },
    #[error("invalid date range: {0}")]
    InvalidRange(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(e.to_string()),
            _ => Self::IoFailure(e.to_string()),
        }
    }
}

/// One row of the attendance relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub identity: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    /// Match similarity; `None` when recorded without biometric evidence.
    pub confidence: Option<f32>,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

/// A registered person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub identity: String,
    pub external_id: Option<String>,
}

/// Inclusive calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    /// Range with missing ends widened to the four-digit-year span the
    /// text encoding orders correctly.
    pub fn open(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start: start.unwrap_or_else(|| NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)),
            end: end.unwrap_or_else(|| NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)),
        }
    }
}

/// Whether an upsert created a row or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Per-subject counts over the dates that have any record in a range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectSummary {
    pub identity: String,
    pub external_id: Option<String>,
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub total_days: u32,
    /// Percentage of days present, rounded to two decimals.
    pub attendance_rate: f64,
    /// Mean match similarity of the present records that carry one,
    /// rounded to four decimals.
    pub avg_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSummary {
    pub range: DateRange,
    /// Dates with at least one record, newest first.
    pub dates: Vec<NaiveDate>,
    pub subjects: Vec<SubjectSummary>,
}

/// Present count for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub present: u32,
    /// Percentage of registered subjects present, rounded to two decimals.
    pub sign_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceTrend {
    pub range: DateRange,
    pub total_subjects: u32,
    /// Every day of the range, oldest first, including days nobody came.
    pub days: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    /// Absent on at least twice the threshold.
    Severe,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbsenceAlert {
    pub identity: String,
    pub external_id: Option<String>,
    pub absent_days: u32,
    pub attended_days: u32,
    pub total_days: u32,
    pub attendance_rate: f64,
    pub level: AlertLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbsenceAlerts {
    pub range: DateRange,
    pub threshold: u32,
    /// Dates in the range with at least one record.
    pub total_days: u32,
    /// Most absences first.
    pub alerts: Vec<AbsenceAlert>,
}

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (creating if needed) the ledger database at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::IoFailure(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let ledger = Self::init(conn)?;
        tracing::info!(path = %path.display(), "attendance ledger opened");
        Ok(ledger)
    }

    /// Private in-memory ledger, mainly for tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::IoFailure("connection lock poisoned".to_string()))
    }

    /// Upsert the record for (`identity`, `date`), stamped now.
    pub fn record_attendance(
        &self,
        identity: &str,
        date: NaiveDate,
        status: AttendanceStatus,
        confidence: Option<f32>,
        note: &str,
    ) -> Result<UpsertOutcome, LedgerError> {
        self.record_attendance_at(identity, date, status, confidence, note, Utc::now())
    }

    /// Upsert the record for (`identity`, `date`).
    ///
    /// Runs as one IMMEDIATE transaction: try the insert, and if the
    /// (identity, date) key already exists, overwrite status, confidence,
    /// note and timestamp. Concurrent writers to the same key serialize on
    /// the database write lock, so the last committed write wins and the
    /// table never holds two rows for one key.
    pub fn record_attendance_at(
        &self,
        identity: &str,
        date: NaiveDate,
        status: AttendanceStatus,
        confidence: Option<f32>,
        note: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, LedgerError> {
        let date_str = format_date(date);
        let ts = format_timestamp(recorded_at);
        let confidence = confidence.map(f64::from);

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO attendance (identity, date, status, confidence, note, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![identity, date_str, status.as_str(), confidence, note, ts],
        );

        let outcome = match inserted {
            Ok(_) => UpsertOutcome::Inserted,
            Err(e) if is_unique_violation(&e) => {
                let updated = tx.execute(
                    "UPDATE attendance
                     SET status = ?3, confidence = ?4, note = ?5, recorded_at = ?6
                     WHERE identity = ?1 AND date = ?2",
                    params![identity, date_str, status.as_str(), confidence, note, ts],
                )?;
                if updated != 1 {
                    return Err(LedgerError::ConstraintViolation(format!(
                        "expected one row for ({identity}, {date_str}), updated {updated}"
                    )));
                }
                UpsertOutcome::Updated
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit()?;
        tracing::debug!(identity, date = %date_str, %status, ?outcome, "attendance upserted");
        Ok(outcome)
    }

    /// Insert the record for (`identity`, `date`) unless one exists.
    ///
    /// A single INSERT, so the existence check and the write cannot be
    /// split by another writer. Fails with `AlreadyRecorded` when the key
    /// is taken; the existing row is left untouched.
    pub fn insert_attendance_at(
        &self,
        identity: &str,
        date: NaiveDate,
        status: AttendanceStatus,
        confidence: Option<f32>,
        note: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let date_str = format_date(date);
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO attendance (identity, date, status, confidence, note, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity,
                date_str,
                status.as_str(),
                confidence.map(f64::from),
                note,
                format_timestamp(recorded_at)
            ],
        );
        match inserted {
            Ok(_) => {
                tracing::debug!(identity, date = %date_str, %status, "attendance inserted");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(LedgerError::AlreadyRecorded {
                identity: identity.to_string(),
                date,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark `identity` present on `date` without biometric evidence.
    ///
    /// Always overwrites; see [`override_if_absent`](Self::override_if_absent)
    /// to leave existing records alone.
    pub fn manual_override(
        &self,
        identity: &str,
        date: NaiveDate,
        note: &str,
    ) -> Result<UpsertOutcome, LedgerError> {
        let outcome = self.record_attendance(identity, date, AttendanceStatus::Present, None, note)?;
        tracing::info!(identity, %date, note, ?outcome, "manual override");
        Ok(outcome)
    }

    /// Like [`manual_override`](Self::manual_override) but fails with
    /// `AlreadyRecorded` instead of replacing an existing record.
    pub fn override_if_absent(
        &self,
        identity: &str,
        date: NaiveDate,
        note: &str,
    ) -> Result<(), LedgerError> {
        self.insert_attendance_at(identity, date, AttendanceStatus::Present, None, note, Utc::now())?;
        tracing::info!(identity, %date, note, "manual override");
        Ok(())
    }

    pub fn already_recorded(&self, identity: &str, date: NaiveDate) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM attendance WHERE identity = ?1 AND date = ?2",
                params![identity, format_date(date)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get(&self, identity: &str, date: NaiveDate) -> Result<Option<AttendanceRecord>, LedgerError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT identity, date, status, confidence, note, recorded_at
                 FROM attendance WHERE identity = ?1 AND date = ?2",
                params![identity, format_date(date)],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Records matching the optional filters, newest date first, then
    /// newest timestamp first.
    pub fn query(
        &self,
        identity: Option<&str>,
        range: Option<DateRange>,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let start = range.map(|r| format_date(r.start));
        let end = range.map(|r| format_date(r.end));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT identity, date, status, confidence, note, recorded_at
             FROM attendance
             WHERE (?1 IS NULL OR identity = ?1)
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date DESC, recorded_at DESC",
        )?;
        let rows = stmt.query_map(params![identity, start, end], record_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Correct the status (and optionally the note) of an existing record.
    pub fn update_status(
        &self,
        identity: &str,
        date: NaiveDate,
        status: AttendanceStatus,
        note: Option<&str>,
    ) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE attendance SET status = ?3, note = COALESCE(?4, note)
             WHERE identity = ?1 AND date = ?2",
            params![identity, format_date(date), status.as_str(), note],
        )?;
        if updated == 0 {
            return Err(LedgerError::RecordNotFound {
                identity: identity.to_string(),
                date,
            });
        }
        tracing::info!(identity, %date, %status, "attendance status corrected");
        Ok(())
    }

    /// Register a subject. Returns `false` if `identity` already exists.
    pub fn register_subject(
        &self,
        identity: &str,
        external_id: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists = tx
            .query_row("SELECT 1 FROM subjects WHERE identity = ?1", [identity], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO subjects (identity, external_id, created_at) VALUES (?1, ?2, ?3)",
            params![identity, external_id, format_timestamp(Utc::now())],
        )?;
        tx.commit()?;
        tracing::info!(identity, external_id, "subject registered");
        Ok(true)
    }

    pub fn subject_exists(&self, identity: &str) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        let found = conn
            .query_row("SELECT 1 FROM subjects WHERE identity = ?1", [identity], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_subjects(&self) -> Result<Vec<Subject>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT identity, external_id FROM subjects ORDER BY identity")?;
        let rows = stmt.query_map([], subject_from_row)?;
        let subjects = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    /// Registered subjects with no present or late record on `date`.
    pub fn absent_on(&self, date: NaiveDate) -> Result<Vec<Subject>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.identity, s.external_id FROM subjects s
             WHERE NOT EXISTS (
                 SELECT 1 FROM attendance a
                 WHERE a.identity = s.identity AND a.date = ?1
                   AND a.status IN ('present', 'late')
             )
             ORDER BY s.identity",
        )?;
        let rows = stmt.query_map([format_date(date)], subject_from_row)?;
        let subjects = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    /// Per-subject attendance over the days in `range` that have any
    /// record. A subject with no record on such a day counts as absent.
    pub fn summary(&self, range: DateRange) -> Result<AttendanceSummary, LedgerError> {
        let start = format_date(range.start);
        let end = format_date(range.end);

        let (dates, statuses, confidences) = {
            let conn = self.lock()?;

            let mut stmt = conn.prepare(
                "SELECT DISTINCT date FROM attendance
                 WHERE date BETWEEN ?1 AND ?2 ORDER BY date DESC",
            )?;
            let dates = stmt
                .query_map(params![start, end], |row| date_at(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT identity, date, status FROM attendance WHERE date BETWEEN ?1 AND ?2",
            )?;
            let statuses = stmt
                .query_map(params![start, end], |row| {
                    Ok(((row.get::<_, String>(0)?, date_at(row, 1)?), status_at(row, 2)?))
                })?
                .collect::<Result<HashMap<_, _>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT identity, AVG(confidence) FROM attendance
                 WHERE date BETWEEN ?1 AND ?2 AND status = 'present' AND confidence IS NOT NULL
                 GROUP BY identity",
            )?;
            let confidences = stmt
                .query_map(params![start, end], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?
                .collect::<Result<HashMap<_, _>, _>>()?;
            (dates, statuses, confidences)
        };

        let subjects = self
            .list_subjects()?
            .into_iter()
            .map(|subject| {
                let mut s = SubjectSummary {
                    identity: subject.identity,
                    external_id: subject.external_id,
                    present: 0,
                    late: 0,
                    absent: 0,
                    total_days: dates.len() as u32,
                    attendance_rate: 0.0,
                    avg_confidence: None,
                };
                for date in &dates {
                    match statuses.get(&(s.identity.clone(), *date)) {
                        Some(AttendanceStatus::Present) => s.present += 1,
                        Some(AttendanceStatus::Late) => s.late += 1,
                        Some(AttendanceStatus::Absent) | None => s.absent += 1,
                    }
                }
                s.attendance_rate = percent(s.present, s.total_days);
                s.avg_confidence = confidences
                    .get(&s.identity)
                    .map(|avg| (avg * 10_000.0).round() / 10_000.0);
                s
            })
            .collect();

        Ok(AttendanceSummary {
            range,
            dates,
            subjects,
        })
    }

    /// Daily present counts over every day of `range`, oldest first.
    ///
    /// Fails with `InvalidRange` when the range is reversed or longer than
    /// [`MAX_TREND_DAYS`].
    pub fn trend(&self, range: DateRange) -> Result<AttendanceTrend, LedgerError> {
        let span = range.end.signed_duration_since(range.start).num_days();
        if span < 0 {
            return Err(LedgerError::InvalidRange(format!(
                "{} is after {}",
                range.start, range.end
            )));
        }
        if span >= MAX_TREND_DAYS {
            return Err(LedgerError::InvalidRange(format!(
                "trend covers at most {MAX_TREND_DAYS} days, got {}",
                span + 1
            )));
        }

        let (total_subjects, counts) = {
            let conn = self.lock()?;
            let total_subjects: u32 =
                conn.query_row("SELECT COUNT(*) FROM subjects", [], |row| row.get(0))?;
            let mut stmt = conn.prepare(
                "SELECT date, COUNT(*) FROM attendance
                 WHERE date BETWEEN ?1 AND ?2 AND status = 'present'
                 GROUP BY date",
            )?;
            let counts = stmt
                .query_map(
                    params![format_date(range.start), format_date(range.end)],
                    |row| Ok((date_at(row, 0)?, row.get::<_, u32>(1)?)),
                )?
                .collect::<Result<HashMap<_, _>, _>>()?;
            (total_subjects, counts)
        };

        let days = range
            .start
            .iter_days()
            .take(span as usize + 1)
            .map(|date| {
                let present = counts.get(&date).copied().unwrap_or(0);
                TrendPoint {
                    date,
                    present,
                    sign_rate: percent(present, total_subjects),
                }
            })
            .collect();

        Ok(AttendanceTrend {
            range,
            total_subjects,
            days,
        })
    }

    /// Registered subjects absent on at least `threshold` of the days in
    /// `range` that have any record.
    pub fn alerts(&self, range: DateRange, threshold: u32) -> Result<AbsenceAlerts, LedgerError> {
        let start = format_date(range.start);
        let end = format_date(range.end);

        let conn = self.lock()?;
        let total_days: u32 = conn.query_row(
            "SELECT COUNT(DISTINCT date) FROM attendance WHERE date BETWEEN ?1 AND ?2",
            params![start, end],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT s.identity, s.external_id, COUNT(DISTINCT a.date)
             FROM subjects s
             LEFT JOIN attendance a
                 ON a.identity = s.identity
                AND a.date BETWEEN ?1 AND ?2
                AND a.status = 'present'
             GROUP BY s.identity, s.external_id
             ORDER BY s.identity",
        )?;
        let attended = stmt
            .query_map(params![start, end], |row| {
                Ok((subject_from_row(row)?, row.get::<_, u32>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut alerts: Vec<AbsenceAlert> = attended
            .into_iter()
            .filter_map(|(subject, attended_days)| {
                let absent_days = total_days.saturating_sub(attended_days);
                (absent_days >= threshold).then(|| AbsenceAlert {
                    identity: subject.identity,
                    external_id: subject.external_id,
                    absent_days,
                    attended_days,
                    total_days,
                    attendance_rate: percent(attended_days, total_days),
                    level: if absent_days >= threshold.saturating_mul(2) {
                        AlertLevel::Severe
                    } else {
                        AlertLevel::Warning
                    },
                })
            })
            .collect();
        // Stable: ties stay in identity order.
        alerts.sort_by(|a, b| b.absent_days.cmp(&a.absent_days));

        Ok(AbsenceAlerts {
            range,
            threshold,
            total_days,
            alerts,
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), LedgerError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// `part / whole` as a percentage rounded to two decimals; 0 when `whole`
/// is 0.
fn percent(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let rate = f64::from(part) / f64::from(whole) * 100.0;
    (rate * 100.0).round() / 100.0
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<AttendanceStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let recorded_at: String = row.get(5)?;
    let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
        .map_err(|e| conversion_error(5, e))?
        .with_timezone(&Utc);
    Ok(AttendanceRecord {
        identity: row.get(0)?,
        date: date_at(row, 1)?,
        status: status_at(row, 2)?,
        confidence: row.get::<_, Option<f64>>(3)?.map(|c| c as f32),
        note: row.get(4)?,
        recorded_at,
    })
}

fn subject_from_row(row: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        identity: row.get(0)?,
        external_id: row.get(1)?,
    })
}
