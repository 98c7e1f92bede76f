//! Monitor events and subscriptions

use crate::drift::DriftReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum MonitorEvent {
    /// Emitted after every cycle; a failed one is followed by `Error`
    #[serde(rename = "monitoring:cycle", rename_all = "camelCase")]
    Cycle {
        timestamp: DateTime<Utc>,
        drift_found: bool,
        succeeded: bool,
    },

    #[serde(rename = "drift-detected")]
    DriftDetected { report: DriftReport },

    #[serde(rename = "monitoring:error")]
    Error {
        timestamp: DateTime<Utc>,
        message: String,
    },
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Cycle { .. } => "monitoring:cycle",
            MonitorEvent::DriftDetected { .. } => "drift-detected",
            MonitorEvent::Error { .. } => "monitoring:error",
        }
    }
}

/// A subscription to one monitor's events
///
/// Yields events until the monitor stops. A subscriber that falls more than
/// the configured buffer behind loses the oldest events.
pub struct MonitorEvents {
    rx: broadcast::Receiver<MonitorEvent>,
}

impl MonitorEvents {
    pub(crate) fn new(rx: broadcast::Receiver<MonitorEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the monitor has stopped
    pub async fn next(&mut self) -> Option<MonitorEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!("Monitor subscriber lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
