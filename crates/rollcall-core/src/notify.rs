//! Check-in notifications.
//!
//! Delivery is fire-and-forget: a failed or unobserved notification never
//! fails the ledger write that produced it.

use crate::types::AttendanceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Emitted once per successful streaming ledger write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub identity: String,
    pub confidence: f32,
    pub status: AttendanceStatus,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl AttendanceEvent {
    pub fn checked_in(identity: &str, confidence: f32, timestamp: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            confidence,
            status: AttendanceStatus::Present,
            timestamp,
            message: format!("{identity} checked in"),
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("no subscribers")]
    NoSubscribers,
}

/// Notification collaborator.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &AttendanceEvent) -> Result<(), NotifyError>;
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: &AttendanceEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Fans events out to any number of in-process subscribers.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<AttendanceEvent>,
}

impl BroadcastNotifier {
    /// `capacity` bounds how far a slow subscriber may lag before it
    /// starts losing events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: &AttendanceEvent) -> Result<(), NotifyError> {
        let delivered = self
            .tx
            .send(event.clone())
            .map_err(|_| NotifyError::NoSubscribers)?;
        tracing::debug!(identity = %event.identity, delivered, "attendance event broadcast");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_without_subscribers_reports_error() {
        let notifier = BroadcastNotifier::new(4);
        let event = AttendanceEvent::checked_in("alice", 0.9, Utc::now());
        assert!(matches!(notifier.notify(&event), Err(NotifyError::NoSubscribers)));
    }

    #[test]
    fn test_broadcast_reaches_subscriber() {
        let notifier = BroadcastNotifier::new(4);
        let mut rx = notifier.subscribe();
        let event = AttendanceEvent::checked_in("alice", 0.9, Utc::now());
        notifier.notify(&event).unwrap();
        let got = rx.try_recv().unwrap();
        assert_eq!(got, event);
        assert_eq!(got.message, "alice checked in");
    }
}
