use chrono::NaiveDate;
use rollcall_core::ledger::{AttendanceSummary, Subject};
use rollcall_core::{
    AbsenceAlerts, AttendanceRecord, AttendanceStatus, AttendanceTrend, BulkOverrideReport, CheckInReport, DateRange, FrameResult,
    RollcallError, SessionConfig, SessionController, SessionStatus, SingleShotPolicy,
    UpsertOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] RollcallError),
    #[error("engine request timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start {
        config: SessionConfig,
        reply: Reply<SessionStatus>,
    },
    Stop {
        reply: Reply<SessionStatus>,
    },
    Status {
        reply: Reply<SessionStatus>,
    },
    ProcessFrame {
        frame: Vec<u8>,
        record: bool,
        reply: Reply<FrameResult>,
    },
    CheckImage {
        image: Vec<u8>,
        record: bool,
        reply: Reply<CheckInReport>,
    },
    Reload {
        reply: Reply<usize>,
    },
    Query {
        identity: Option<String>,
        range: Option<DateRange>,
        reply: Reply<Vec<AttendanceRecord>>,
    },
    Override {
        identity: String,
        date: NaiveDate,
        note: String,
        reply: Reply<UpsertOutcome>,
    },
    BulkOverride {
        identities: Vec<String>,
        date: NaiveDate,
        note: String,
        reply: Reply<BulkOverrideReport>,
    },
    UpdateStatus {
        identity: String,
        date: NaiveDate,
        status: AttendanceStatus,
        note: Option<String>,
        reply: Reply<()>,
    },
    RegisterSubject {
        identity: String,
        external_id: Option<String>,
        reply: Reply<bool>,
    },
    AbsentOn {
        date: NaiveDate,
        reply: Reply<Vec<Subject>>,
    },
    Summary {
        range: DateRange,
        reply: Reply<AttendanceSummary>,
    },
    Trend {
        range: DateRange,
        reply: Reply<AttendanceTrend>,
    },
    Alerts {
        range: DateRange,
        threshold: u32,
        reply: Reply<AbsenceAlerts>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed)?,
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }

    pub async fn start(&self, config: SessionConfig) -> Result<SessionStatus, EngineError> {
        self.request(|reply| EngineRequest::Start { config, reply }).await
    }

    pub async fn stop(&self) -> Result<SessionStatus, EngineError> {
        self.request(|reply| EngineRequest::Stop { reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    pub async fn process_frame(&self, frame: Vec<u8>, record: bool) -> Result<FrameResult, EngineError> {
        self.request(|reply| EngineRequest::ProcessFrame {
            frame,
            record,
            reply,
        })
        .await
    }

    pub async fn check_image(&self, image: Vec<u8>, record: bool) -> Result<CheckInReport, EngineError> {
        self.request(|reply| EngineRequest::CheckImage {
            image,
            record,
            reply,
        })
        .await
    }

    /// Reload templates; returns the new template count.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Reload { reply }).await
    }

    pub async fn query(
        &self,
        identity: Option<String>,
        range: Option<DateRange>,
    ) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.request(|reply| EngineRequest::Query {
            identity,
            range,
            reply,
        })
        .await
    }

    pub async fn manual_override(
        &self,
        identity: String,
        date: NaiveDate,
        note: String,
    ) -> Result<UpsertOutcome, EngineError> {
        self.request(|reply| EngineRequest::Override {
            identity,
            date,
            note,
            reply,
        })
        .await
    }

    pub async fn bulk_override(
        &self,
        identities: Vec<String>,
        date: NaiveDate,
        note: String,
    ) -> Result<BulkOverrideReport, EngineError> {
        self.request(|reply| EngineRequest::BulkOverride {
            identities,
            date,
            note,
            reply,
        })
        .await
    }

    pub async fn update_status(
        &self,
        identity: String,
        date: NaiveDate,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::UpdateStatus {
            identity,
            date,
            status,
            note,
            reply,
        })
        .await
    }

    pub async fn register_subject(
        &self,
        identity: String,
        external_id: Option<String>,
    ) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::RegisterSubject {
            identity,
            external_id,
            reply,
        })
        .await
    }

    pub async fn absent_on(&self, date: NaiveDate) -> Result<Vec<Subject>, EngineError> {
        self.request(|reply| EngineRequest::AbsentOn { date, reply }).await
    }

    pub async fn summary(&self, range: DateRange) -> Result<AttendanceSummary, EngineError> {
        self.request(|reply| EngineRequest::Summary { range, reply }).await
    }

    pub async fn trend(&self, range: DateRange) -> Result<AttendanceTrend, EngineError> {
        self.request(|reply| EngineRequest::Trend { range, reply }).await
    }

    pub async fn alerts(&self, range: DateRange, threshold: u32) -> Result<AbsenceAlerts, EngineError> {
        self.request(|reply| EngineRequest::Alerts {
            range,
            threshold,
            reply,
        })
        .await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// SQLite and the detector are blocking, so every request is served from
/// one thread in arrival order. The D-Bus handlers only await replies.
pub fn spawn_engine(
    controller: Arc<SessionController>,
    single_shot: SingleShotPolicy,
    timeout: Duration,
) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle(&controller, &single_shot, req);
            }
            let status = controller.stop();
            tracing::info!(state = %status.state, "engine thread exiting");
        })?;

    Ok(EngineHandle { tx, timeout })
}

fn respond<T>(reply: Reply<T>, result: Result<T, RollcallError>) {
    // The caller may have timed out and dropped its receiver.
    let _ = reply.send(result.map_err(EngineError::from));
}

fn handle(controller: &SessionController, single_shot: &SingleShotPolicy, req: EngineRequest) {
    let ledger = controller.ledger();
    match req {
        EngineRequest::Start { config, reply } => {
            respond(reply, controller.start(config).map_err(RollcallError::from));
        }
        EngineRequest::Stop { reply } => respond(reply, Ok(controller.stop())),
        EngineRequest::Status { reply } => respond(reply, Ok(controller.status())),
        EngineRequest::ProcessFrame {
            frame,
            record,
            reply,
        } => respond(reply, controller.process_input(&frame, record)),
        EngineRequest::CheckImage {
            image,
            record,
            reply,
        } => respond(reply, controller.check_image(&image, single_shot, record)),
        EngineRequest::Reload { reply } => {
            respond(reply, controller.reload_templates().map(|set| set.len()));
        }
        EngineRequest::Query {
            identity,
            range,
            reply,
        } => respond(
            reply,
            ledger.query(identity.as_deref(), range).map_err(RollcallError::from),
        ),
        EngineRequest::Override {
            identity,
            date,
            note,
            reply,
        } => respond(
            reply,
            ledger
                .manual_override(&identity, date, &note)
                .map_err(RollcallError::from),
        ),
        EngineRequest::BulkOverride {
            identities,
            date,
            note,
            reply,
        } => respond(
            reply,
            rollcall_core::bulk_override(ledger, &identities, date, &note)
                .map_err(RollcallError::from),
        ),
        EngineRequest::UpdateStatus {
            identity,
            date,
            status,
            note,
            reply,
        } => respond(
            reply,
            ledger
                .update_status(&identity, date, status, note.as_deref())
                .map_err(RollcallError::from),
        ),
        EngineRequest::RegisterSubject {
            identity,
            external_id,
            reply,
        } => respond(
            reply,
            ledger
                .register_subject(&identity, external_id.as_deref())
                .map_err(RollcallError::from),
        ),
        EngineRequest::AbsentOn { date, reply } => {
            respond(reply, ledger.absent_on(date).map_err(RollcallError::from));
        }
        EngineRequest::Summary { range, reply } => {
            respond(reply, ledger.summary(range).map_err(RollcallError::from));
        }
        EngineRequest::Trend { range, reply } => {
            respond(reply, ledger.trend(range).map_err(RollcallError::from));
        }
        EngineRequest::Alerts {
            range,
            threshold,
            reply,
        } => respond(reply, ledger.alerts(range, threshold).map_err(RollcallError::from)),
    }
}
