use crate::detector::DetectorError;
use crate::ledger::LedgerError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::types::InputError;
use thiserror::Error;

/// Any failure surfaced by the engine to its caller.
#[derive(Error, Debug)]
pub enum RollcallError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
}

pub type Result<T, E = RollcallError> = std::result::Result<T, E>;
