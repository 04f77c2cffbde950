use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::TemplateStore;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    gen_blocking = false,
    interface = "org.freedesktop.Rollcall1",
    default_service = "org.freedesktop.Rollcall1",
    default_path = "/org/freedesktop/Rollcall1"
)]
trait Rollcall {
    async fn start_session(&self, options_json: &str) -> zbus::Result<String>;
    async fn stop_session(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn process_frame(&self, frame: &[u8], record: bool) -> zbus::Result<String>;
    async fn check_image(&self, image: &[u8], record: bool) -> zbus::Result<String>;
    async fn reload_templates(&self) -> zbus::Result<u32>;
    async fn query_records(&self, identity: &str, from: &str, to: &str) -> zbus::Result<String>;
    async fn manual_override(&self, identity: &str, date: &str, note: &str) -> zbus::Result<String>;
    async fn bulk_override(&self, identities: &[String], date: &str, note: &str) -> zbus::Result<String>;
    async fn update_status(&self, identity: &str, date: &str, status: &str, note: &str) -> zbus::Result<()>;
    async fn register_subject(&self, identity: &str, external_id: &str) -> zbus::Result<bool>;
    async fn absent_list(&self, date: &str) -> zbus::Result<String>;
    async fn summary(&self, from: &str, to: &str) -> zbus::Result<String>;
    async fn trend(&self, from: &str, to: &str) -> zbus::Result<String>;
    async fn alerts(&self, from: &str, to: &str, threshold: u32) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a recognition session
    Start {
        /// Match threshold for this session
        #[arg(long)]
        threshold: Option<f32>,
        /// Seconds before the same person is recorded again
        #[arg(long)]
        cooldown_secs: Option<u32>,
        /// Note stored with each check-in
        #[arg(long)]
        note: Option<String>,
    },
    /// Stop the running session
    Stop,
    /// Show daemon and session status
    Status,
    /// Send one detector payload to the running session
    Frame {
        file: PathBuf,
        /// Match only; do not write to the ledger
        #[arg(long)]
        no_record: bool,
    },
    /// Single-shot check-in from one detector payload
    Check {
        file: PathBuf,
        #[arg(long)]
        no_record: bool,
    },
    /// List attendance records, newest first
    Records {
        #[arg(long)]
        identity: Option<String>,
        /// First date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Last date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },
    /// Mark someone present without a face match
    Override {
        identity: String,
        /// Date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = "manual override")]
        note: String,
    },
    /// Mark several people present, skipping existing records
    BulkOverride {
        #[arg(required = true)]
        identities: Vec<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = "manual override")]
        note: String,
    },
    /// Correct the status of an existing record
    UpdateStatus {
        identity: String,
        date: String,
        /// present, late or absent
        status: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Registered subjects with no check-in on a date
    Absent {
        #[arg(long)]
        date: Option<String>,
    },
    /// Per-subject attendance over a date range
    Summary {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Daily present counts; defaults to the 30 days up to today
    Trend {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Subjects with repeated absences; defaults to the 30 days up to today
    Alerts {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        /// Absent days that raise a warning; twice this is severe
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
        threshold: u32,
    },
    /// Register a subject in the ledger
    Register {
        identity: String,
        #[arg(long)]
        external_id: Option<String>,
    },
    /// Ask the daemon to reload templates from disk
    Reload,
    /// Enroll or replace a template from a JSON array of floats
    Enroll {
        identity: String,
        vector_file: PathBuf,
        /// Template file; defaults to the daemon's location
        #[arg(long, env = "ROLLCALL_TEMPLATES_PATH")]
        templates: Option<PathBuf>,
    },
    /// Remove an enrolled template
    Unenroll {
        identity: String,
        #[arg(long, env = "ROLLCALL_TEMPLATES_PATH")]
        templates: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let system = cli.system || bus_from_env();

    match cli.command {
        Commands::Enroll {
            identity,
            vector_file,
            templates,
        } => {
            let vector = read_vector(&vector_file)?;
            let store = open_store(templates)?;
            let set = store
                .upsert(&identity, vector)
                .with_context(|| format!("failed to enroll {identity}"))?;
            println!("Enrolled {identity} ({} templates, version {})", set.len(), set.version());
            notify_reload(system).await;
        }
        Commands::Unenroll {
            identity,
            templates,
        } => {
            let store = open_store(templates)?;
            if store.remove(&identity)? {
                println!("Removed {identity}");
                notify_reload(system).await;
            } else {
                bail!("{identity} is not enrolled");
            }
        }
        command => {
            let proxy = connect(system).await?;
            run_remote(&proxy, command).await?;
        }
    }

    Ok(())
}

async fn run_remote(proxy: &RollcallProxy<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Start {
            threshold,
            cooldown_secs,
            note,
        } => {
            let mut options = serde_json::Map::new();
            if let Some(t) = threshold {
                options.insert("threshold".into(), t.into());
            }
            if let Some(c) = cooldown_secs {
                options.insert("cooldown_secs".into(), c.into());
            }
            if let Some(n) = note {
                options.insert("note".into(), n.into());
            }
            let options = serde_json::Value::Object(options).to_string();
            print_json(&proxy.start_session(&options).await?)?;
        }
        Commands::Stop => print_json(&proxy.stop_session().await?)?,
        Commands::Status => print_json(&proxy.status().await?)?,
        Commands::Frame { file, no_record } => {
            let frame = read_file(&file)?;
            print_json(&proxy.process_frame(&frame, !no_record).await?)?;
        }
        Commands::Check { file, no_record } => {
            let image = read_file(&file)?;
            print_json(&proxy.check_image(&image, !no_record).await?)?;
        }
        Commands::Records { identity, from, to } => {
            let records = proxy
                .query_records(
                    identity.as_deref().unwrap_or(""),
                    from.as_deref().unwrap_or(""),
                    to.as_deref().unwrap_or(""),
                )
                .await?;
            print_json(&records)?;
        }
        Commands::Override {
            identity,
            date,
            note,
        } => {
            let outcome = proxy
                .manual_override(&identity, date.as_deref().unwrap_or(""), &note)
                .await?;
            println!("{identity}: {}", outcome.trim_matches('"'));
        }
        Commands::BulkOverride {
            identities,
            date,
            note,
        } => {
            let report = proxy
                .bulk_override(&identities, date.as_deref().unwrap_or(""), &note)
                .await?;
            print_json(&report)?;
        }
        Commands::UpdateStatus {
            identity,
            date,
            status,
            note,
        } => {
            proxy
                .update_status(&identity, &date, &status, note.as_deref().unwrap_or(""))
                .await?;
            println!("{identity} on {date}: {status}");
        }
        Commands::Absent { date } => {
            print_json(&proxy.absent_list(date.as_deref().unwrap_or("")).await?)?;
        }
        Commands::Summary { from, to } => print_json(&proxy.summary(&from, &to).await?)?,
        Commands::Trend { from, to } => {
            let trend = proxy
                .trend(from.as_deref().unwrap_or(""), to.as_deref().unwrap_or(""))
                .await?;
            print_json(&trend)?;
        }
        Commands::Alerts {
            from,
            to,
            threshold,
        } => {
            let alerts = proxy
                .alerts(
                    from.as_deref().unwrap_or(""),
                    to.as_deref().unwrap_or(""),
                    threshold,
                )
                .await?;
            print_json(&alerts)?;
        }
        Commands::Register {
            identity,
            external_id,
        } => {
            let created = proxy
                .register_subject(&identity, external_id.as_deref().unwrap_or(""))
                .await?;
            if created {
                println!("Registered {identity}");
            } else {
                println!("{identity} is already registered");
            }
        }
        Commands::Reload => {
            let count = proxy.reload_templates().await?;
            println!("Reloaded {count} templates");
        }
        Commands::Enroll { .. } | Commands::Unenroll { .. } => {
            bail!("enrollment runs locally, not through the daemon")
        }
    }
    Ok(())
}

/// `ROLLCALL_BUS=system` selects the system bus, as it does for rollcalld.
fn bus_from_env() -> bool {
    match std::env::var("ROLLCALL_BUS") {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "system" => true,
            "session" => false,
            _ => {
                tracing::warn!(value = %v, "ignoring unknown ROLLCALL_BUS; using the session bus");
                false
            }
        },
        Err(_) => false,
    }
}

async fn connect(system: bool) -> Result<RollcallProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    RollcallProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")
}

/// Tell a running daemon about template changes. Enrollment works without
/// a daemon, so failure here is only reported.
async fn notify_reload(system: bool) {
    let result = async {
        let proxy = connect(system).await?;
        anyhow::Ok(proxy.reload_templates().await?)
    }
    .await;
    match result {
        Ok(count) => println!("rollcalld reloaded {count} templates"),
        Err(e) => tracing::warn!(error = %e, "daemon not notified; run `rollcall reload` later"),
    }
}

fn open_store(path: Option<PathBuf>) -> Result<TemplateStore> {
    let path = path.unwrap_or_else(default_templates_path);
    TemplateStore::open_or_empty(&path)
        .with_context(|| format!("failed to open template store {}", path.display()))
}

fn default_templates_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/templates.json")
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_vector(path: &Path) -> Result<Vec<f32>> {
    let bytes = read_file(path)?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("{} must hold a JSON array of numbers", path.display()))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alerts_threshold_defaults_and_bounds() {
        let cli = Cli::try_parse_from(["rollcall", "alerts", "--from", "2024-01-01"]).unwrap();
        match cli.command {
            Commands::Alerts {
                from,
                to,
                threshold,
            } => {
                assert_eq!(from.as_deref(), Some("2024-01-01"));
                assert_eq!(to, None);
                assert_eq!(threshold, 3);
            }
            _ => panic!("expected alerts"),
        }
        assert!(Cli::try_parse_from(["rollcall", "alerts", "--threshold", "0"]).is_err());
    }

    #[test]
    fn test_trend_takes_optional_window() {
        let cli = Cli::try_parse_from(["rollcall", "--system", "trend"]).unwrap();
        assert!(cli.system);
        assert!(matches!(cli.command, Commands::Trend { from: None, to: None }));
    }
}
