use crate::engine::{EngineError, EngineHandle};
use chrono::{Days, Local, NaiveDate};
use rollcall_core::{
    AttendanceStatus, DateRange, InputError, LedgerError, RollcallError, SessionConfig,
    SessionError, StoreError,
};
use serde::Deserialize;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.freedesktop.Rollcall1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Rollcall1";

/// Days before `to` covered by `Trend` and `Alerts` when `from` is empty.
const DEFAULT_WINDOW_DAYS: u64 = 30;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.freedesktop.Rollcall1
/// Object path: /org/freedesktop/Rollcall1
///
/// Structured results are returned as JSON strings. Dates are
/// `YYYY-MM-DD`; an empty string means "today" for single dates and
/// "unbounded" for range ends.
pub struct RollcallService {
    engine: EngineHandle,
    session_defaults: SessionConfig,
}

impl RollcallService {
    pub fn new(engine: EngineHandle, session_defaults: SessionConfig) -> Self {
        Self {
            engine,
            session_defaults,
        }
    }
}

/// Per-session overrides accepted by `StartSession`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionOptions {
    threshold: Option<f32>,
    cooldown_secs: Option<u32>,
    note: Option<String>,
}

impl SessionOptions {
    fn parse(json: &str) -> zbus::fdo::Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("session options: {e}")))
    }

    fn apply(self, defaults: &SessionConfig) -> zbus::fdo::Result<SessionConfig> {
        let mut config = defaults.clone();
        if let Some(threshold) = self.threshold {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(zbus::fdo::Error::InvalidArgs(format!(
                    "threshold must be within [-1, 1], got {threshold}"
                )));
            }
            config.threshold = threshold;
        }
        if let Some(secs) = self.cooldown_secs {
            config.cooldown = chrono::Duration::seconds(i64::from(secs));
        }
        if let Some(note) = self.note {
            config.note = note;
        }
        Ok(config)
    }
}

#[interface(name = "org.freedesktop.Rollcall1")]
impl RollcallService {
    /// Start a recognition session. `options_json` may override
    /// `threshold`, `cooldown_secs` and `note`; pass "" for defaults.
    async fn start_session(&self, options_json: &str) -> zbus::fdo::Result<String> {
        let config = SessionOptions::parse(options_json)?.apply(&self.session_defaults)?;
        tracing::info!(threshold = config.threshold, "start_session requested");
        let status = self.engine.start(config).await.map_err(to_fdo)?;
        to_json(&status)
    }

    async fn stop_session(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop_session requested");
        let status = self.engine.stop().await.map_err(to_fdo)?;
        to_json(&status)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        let mut value = serde_json::to_value(&status)
            .map_err(|e| zbus::fdo::Error::Failed(format!("serialize status: {e}")))?;
        value["version"] = serde_json::Value::from(env!("CARGO_PKG_VERSION"));
        Ok(value.to_string())
    }

    /// Run one frame through the running session.
    async fn process_frame(&self, frame: Vec<u8>, record: bool) -> zbus::fdo::Result<String> {
        tracing::debug!(bytes = frame.len(), record, "process_frame requested");
        let result = self.engine.process_frame(frame, record).await.map_err(to_fdo)?;
        to_json(&result)
    }

    /// Single-shot check-in; no session required.
    async fn check_image(&self, image: Vec<u8>, record: bool) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), record, "check_image requested");
        let report = self.engine.check_image(image, record).await.map_err(to_fdo)?;
        to_json(&report)
    }

    /// Reload templates from disk; returns the new template count.
    async fn reload_templates(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("reload_templates requested");
        let count = self.engine.reload().await.map_err(to_fdo)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn query_records(&self, identity: &str, from: &str, to: &str) -> zbus::fdo::Result<String> {
        let identity = (!identity.is_empty()).then(|| identity.to_string());
        let range = parse_range(from, to)?;
        let records = self.engine.query(identity, range).await.map_err(to_fdo)?;
        to_json(&records)
    }

    /// Mark `identity` present without biometric evidence. Overwrites any
    /// record already present for the date.
    async fn manual_override(&self, identity: &str, date: &str, note: &str) -> zbus::fdo::Result<String> {
        let date = parse_date_or_today(date)?;
        let outcome = self
            .engine
            .manual_override(identity.to_string(), date, note.to_string())
            .await
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Override each registered identity that has no record for the date.
    async fn bulk_override(
        &self,
        identities: Vec<String>,
        date: &str,
        note: &str,
    ) -> zbus::fdo::Result<String> {
        let date = parse_date_or_today(date)?;
        let report = self
            .engine
            .bulk_override(identities, date, note.to_string())
            .await
            .map_err(to_fdo)?;
        to_json(&report)
    }

    /// Correct the status of an existing record. An empty `note` keeps the
    /// stored one.
    async fn update_status(
        &self,
        identity: &str,
        date: &str,
        status: &str,
        note: &str,
    ) -> zbus::fdo::Result<()> {
        let date = parse_date(date)?;
        let status: AttendanceStatus = status
            .parse()
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("{e}")))?;
        let note = (!note.is_empty()).then(|| note.to_string());
        self.engine
            .update_status(identity.to_string(), date, status, note)
            .await
            .map_err(to_fdo)
    }

    /// Returns `false` if the subject was already registered.
    async fn register_subject(&self, identity: &str, external_id: &str) -> zbus::fdo::Result<bool> {
        if identity.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs("identity must not be empty".into()));
        }
        let external_id = (!external_id.is_empty()).then(|| external_id.to_string());
        self.engine
            .register_subject(identity.to_string(), external_id)
            .await
            .map_err(to_fdo)
    }

    async fn absent_list(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = parse_date_or_today(date)?;
        let subjects = self.engine.absent_on(date).await.map_err(to_fdo)?;
        to_json(&subjects)
    }

    async fn summary(&self, from: &str, to: &str) -> zbus::fdo::Result<String> {
        let range = DateRange::new(parse_date(from)?, parse_date(to)?);
        let summary = self.engine.summary(range).await.map_err(to_fdo)?;
        to_json(&summary)
    }

    /// Daily present counts for every day in the window. Empty `to` means
    /// today; empty `from` means 30 days before `to`.
    async fn trend(&self, from: &str, to: &str) -> zbus::fdo::Result<String> {
        let range = parse_window(from, to)?;
        let trend = self.engine.trend(range).await.map_err(to_fdo)?;
        to_json(&trend)
    }

    /// Subjects absent on at least `threshold` recorded days in the window.
    async fn alerts(&self, from: &str, to: &str, threshold: u32) -> zbus::fdo::Result<String> {
        if threshold == 0 {
            return Err(zbus::fdo::Error::InvalidArgs("threshold must be at least 1".into()));
        }
        let range = parse_window(from, to)?;
        let alerts = self.engine.alerts(range, threshold).await.map_err(to_fdo)?;
        to_json(&alerts)
    }

    /// Emitted once per check-in recorded by a streaming session.
    #[zbus(signal)]
    pub async fn attendance_recorded(emitter: &SignalEmitter<'_>, event_json: &str) -> zbus::Result<()>;
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("serialize: {e}")))
}

fn parse_date(raw: &str) -> zbus::fdo::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid date {raw:?}: {e}")))
}

fn parse_date_or_today(raw: &str) -> zbus::fdo::Result<NaiveDate> {
    if raw.is_empty() {
        Ok(Local::now().date_naive())
    } else {
        parse_date(raw)
    }
}

fn parse_range(from: &str, to: &str) -> zbus::fdo::Result<Option<DateRange>> {
    let parse_opt = |raw: &str| (!raw.is_empty()).then(|| parse_date(raw)).transpose();
    match (parse_opt(from)?, parse_opt(to)?) {
        (None, None) => Ok(None),
        (start, end) => Ok(Some(DateRange::open(start, end))),
    }
}

fn parse_window(from: &str, to: &str) -> zbus::fdo::Result<DateRange> {
    let end = parse_date_or_today(to)?;
    let start = if from.is_empty() {
        end.checked_sub_days(Days::new(DEFAULT_WINDOW_DAYS))
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs(format!("no window before {end}")))?
    } else {
        parse_date(from)?
    };
    Ok(DateRange::new(start, end))
}

/// Map engine errors onto standard D-Bus error names.
fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    let msg = e.to_string();
    match e {
        EngineError::Core(RollcallError::Input(
            InputError::DimensionMismatch { .. } | InputError::DegenerateVector | InputError::NoFacesDetected,
        ))
        | EngineError::Core(RollcallError::Store(StoreError::InvalidTemplate { .. }))
        | EngineError::Core(RollcallError::Ledger(LedgerError::InvalidRange(_))) => {
            zbus::fdo::Error::InvalidArgs(msg)
        }
        EngineError::Core(RollcallError::Store(StoreError::NotFound(_)))
        | EngineError::Core(RollcallError::Ledger(LedgerError::RecordNotFound { .. })) => {
            zbus::fdo::Error::FileNotFound(msg)
        }
        EngineError::Core(RollcallError::Session(
            SessionError::AlreadyRunning | SessionError::InvalidState { .. },
        )) => zbus::fdo::Error::AccessDenied(msg),
        EngineError::Timeout(_) => zbus::fdo::Error::Timeout(msg),
        _ => {
            tracing::warn!(error = %msg, "request failed");
            zbus::fdo::Error::Failed(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_options_override_defaults() {
        let defaults = SessionConfig::default();
        let config = SessionOptions::parse(r#"{"threshold": 0.45, "cooldown_secs": 5400}"#)
            .unwrap()
            .apply(&defaults)
            .unwrap();
        assert_eq!(config.threshold, 0.45);
        assert_eq!(config.cooldown, chrono::Duration::minutes(90));
        assert_eq!(config.note, defaults.note);

        let config = SessionOptions::parse("").unwrap().apply(&defaults).unwrap();
        assert_eq!(config, defaults);
    }

    #[test]
    fn test_session_options_rejects_bad_input() {
        assert!(SessionOptions::parse(r#"{"camera": 2}"#).is_err());
        assert!(SessionOptions::parse(r#"{"threshold": 2.0}"#)
            .unwrap()
            .apply(&SessionConfig::default())
            .is_err());
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("", "").unwrap(), None);
        let range = parse_range("2024-01-01", "").unwrap().unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(9999, 12, 31).unwrap());
        assert!(parse_range("01/02/2024", "").is_err());
    }

    #[test]
    fn test_parse_window_defaults_to_thirty_days() {
        let range = parse_window("", "2024-03-01").unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let range = parse_window("2024-02-10", "2024-02-12").unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 2, 10).unwrap());

        let range = parse_window("", "").unwrap();
        assert_eq!(range.end, Local::now().date_naive());
        assert!(parse_window("yesterday", "").is_err());
    }

    #[test]
    fn test_error_mapping() {
        let err = to_fdo(EngineError::Core(RollcallError::Session(SessionError::AlreadyRunning)));
        assert!(matches!(err, zbus::fdo::Error::AccessDenied(_)));
        let err = to_fdo(EngineError::Core(RollcallError::Input(InputError::DimensionMismatch {
            expected: 512,
            actual: 128,
        })));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
        assert!(matches!(to_fdo(EngineError::ChannelClosed), zbus::fdo::Error::Failed(_)));
        let err = to_fdo(EngineError::Core(RollcallError::Ledger(LedgerError::InvalidRange(
            "reversed".into(),
        ))));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
    }
}
