use anyhow::{Context, Result};
use rollcall_core::{
    AttendanceEvent, BroadcastNotifier, Ledger, PayloadDetector, SessionController, TemplateStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        templates = %config.templates_path.display(),
        db = %config.db_path.display(),
        stream_threshold = config.stream_threshold,
        single_shot_threshold = config.single_shot_threshold,
        cooldown_secs = config.cooldown_secs,
        bus = ?config.bus,
        "configuration loaded"
    );

    let store = TemplateStore::open_or_empty(&config.templates_path)
        .with_context(|| format!("failed to open template store {}", config.templates_path.display()))?;
    let ledger = Ledger::open(&config.db_path)
        .with_context(|| format!("failed to open ledger {}", config.db_path.display()))?;

    let notifier = BroadcastNotifier::new(config.notify_capacity);
    let events = notifier.subscribe();

    let controller = Arc::new(SessionController::new(
        Arc::new(store),
        Arc::new(ledger),
        Box::new(PayloadDetector),
        Arc::new(notifier),
    ));
    let engine = engine::spawn_engine(
        controller,
        config.single_shot_policy(),
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("failed to spawn engine thread")?;

    let service = RollcallService::new(engine, config.session_defaults());
    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    let emitter = SignalEmitter::new(&conn, OBJECT_PATH)?.into_owned();
    tokio::spawn(forward_events(events, emitter));

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}

/// Re-emit check-in events as `AttendanceRecorded` signals. Delivery is
/// best effort; a lagging forwarder skips events rather than blocking the
/// engine.
async fn forward_events(
    mut events: broadcast::Receiver<AttendanceEvent>,
    emitter: SignalEmitter<'static>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize attendance event");
                        continue;
                    }
                };
                if let Err(e) = RollcallService::attendance_recorded(&emitter, &json).await {
                    tracing::warn!(identity = %event.identity, error = %e, "failed to emit AttendanceRecorded");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "attendance event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::debug!("attendance event forwarder stopped");
}
