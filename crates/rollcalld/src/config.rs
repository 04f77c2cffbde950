use rollcall_core::checkin::{DEFAULT_SINGLE_SHOT_NOTE, DEFAULT_SINGLE_SHOT_THRESHOLD};
use rollcall_core::session::{DEFAULT_COOLDOWN_SECS, DEFAULT_STREAM_NOTE, DEFAULT_STREAM_THRESHOLD};
use rollcall_core::{SessionConfig, SingleShotPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 3600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which message bus the daemon claims its name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

impl std::str::FromStr for BusKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "session" => Ok(Self::Session),
            other => Err(ConfigError::Invalid(format!(
                "bus must be \"system\" or \"session\", got {other:?}"
            ))),
        }
    }
}

/// Daemon configuration: optional TOML file, then `ROLLCALL_*`
/// environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// JSON file holding enrolled templates.
    pub templates_path: PathBuf,
    /// Path to the SQLite attendance ledger.
    pub db_path: PathBuf,
    /// Match threshold for streaming sessions.
    pub stream_threshold: f32,
    /// Match threshold for single-shot check-ins.
    pub single_shot_threshold: f32,
    /// Minimum seconds between two recorded check-ins of one identity.
    pub cooldown_secs: u64,
    pub stream_note: String,
    pub single_shot_note: String,
    /// Events buffered per notification subscriber before it lags.
    pub notify_capacity: usize,
    /// Upper bound on one engine request, in seconds.
    pub request_timeout_secs: u64,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            templates_path: data_dir.join("templates.json"),
            db_path: data_dir.join("attendance.db"),
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
            single_shot_threshold: DEFAULT_SINGLE_SHOT_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS as u64,
            stream_note: DEFAULT_STREAM_NOTE.to_string(),
            single_shot_note: DEFAULT_SINGLE_SHOT_NOTE.to_string(),
            notify_capacity: 64,
            request_timeout_secs: 10,
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ROLLCALL_*` overrides read through `lookup`. Unparseable
    /// numeric and bus values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_TEMPLATES_PATH") {
            self.templates_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        override_parsed(&lookup, "ROLLCALL_STREAM_THRESHOLD", &mut self.stream_threshold);
        override_parsed(
            &lookup,
            "ROLLCALL_SINGLE_SHOT_THRESHOLD",
            &mut self.single_shot_threshold,
        );
        override_parsed(&lookup, "ROLLCALL_COOLDOWN_SECS", &mut self.cooldown_secs);
        override_parsed(&lookup, "ROLLCALL_NOTIFY_CAPACITY", &mut self.notify_capacity);
        override_parsed(
            &lookup,
            "ROLLCALL_REQUEST_TIMEOUT_SECS",
            &mut self.request_timeout_secs,
        );
        if let Some(v) = lookup("ROLLCALL_STREAM_NOTE") {
            self.stream_note = v;
        }
        if let Some(v) = lookup("ROLLCALL_SINGLE_SHOT_NOTE") {
            self.single_shot_note = v;
        }
        override_parsed(&lookup, "ROLLCALL_BUS", &mut self.bus);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("stream_threshold", self.stream_threshold),
            ("single_shot_threshold", self.single_shot_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [-1, 1], got {value}"
                )));
            }
        }
        if self.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(ConfigError::Invalid(format!(
                "cooldown_secs must be at most {MAX_COOLDOWN_SECS}"
            )));
        }
        if self.notify_capacity == 0 {
            return Err(ConfigError::Invalid("notify_capacity must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Session parameters used when a start request does not override them.
    pub fn session_defaults(&self) -> SessionConfig {
        SessionConfig {
            threshold: self.stream_threshold,
            cooldown: chrono::Duration::seconds(self.cooldown_secs as i64),
            note: self.stream_note.clone(),
        }
    }

    pub fn single_shot_policy(&self) -> SingleShotPolicy {
        SingleShotPolicy {
            threshold: self.single_shot_threshold,
            note: self.single_shot_note.clone(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.stream_threshold, 0.35);
        assert_eq!(config.single_shot_threshold, 0.45);
        assert_eq!(config.cooldown_secs, 300);
        assert_eq!(config.notify_capacity, 64);
        assert_eq!(config.bus, BusKind::Session);
        assert!(config.db_path.ends_with("rollcall/attendance.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/ledger.db"),
            ("ROLLCALL_STREAM_THRESHOLD", "0.5"),
            ("ROLLCALL_COOLDOWN_SECS", "5400"),
            ("ROLLCALL_NOTIFY_CAPACITY", "not-a-number"),
            ("ROLLCALL_BUS", "system"),
        ]));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/rollcall/ledger.db"));
        assert_eq!(config.stream_threshold, 0.5);
        assert_eq!(config.cooldown_secs, 5400);
        assert_eq!(config.notify_capacity, 64);
        assert_eq!(config.bus, BusKind::System);
        assert_eq!(config.session_defaults().cooldown, chrono::Duration::minutes(90));
    }

    #[test]
    fn test_bus_override_parsing() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[("ROLLCALL_BUS", " System ")]));
        assert_eq!(config.bus, BusKind::System);

        // Unknown values leave the current setting alone.
        config.apply_overrides(lookup(&[("ROLLCALL_BUS", "sytem")]));
        assert_eq!(config.bus, BusKind::System);
        config.apply_overrides(lookup(&[("ROLLCALL_BUS", "session")]));
        assert_eq!(config.bus, BusKind::Session);

        assert!(matches!("user".parse::<BusKind>(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_toml_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcalld.toml");
        std::fs::write(
            &path,
            "templates_path = \"/srv/templates.json\"\nsingle_shot_threshold = 0.6\nbus = \"system\"\n",
        )
        .unwrap();

        let mut config = Config::from_file(&path).unwrap();
        assert_eq!(config.templates_path, PathBuf::from("/srv/templates.json"));
        assert_eq!(config.single_shot_threshold, 0.6);
        assert_eq!(config.stream_threshold, 0.35);

        config.apply_overrides(lookup(&[("ROLLCALL_SINGLE_SHOT_THRESHOLD", "0.4")]));
        assert_eq!(config.single_shot_policy().threshold, 0.4);
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcalld.toml");
        std::fs::write(&path, "camera_device = \"/dev/video0\"\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_threshold_out_of_range_is_invalid() {
        let config = Config {
            stream_threshold: 1.5,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
