//! Drift monitor
//!
//! Periodically analyzes the live schema, snapshots it and compares it with
//! the baseline. Cycles never overlap: a tick that comes due while the
//! previous cycle is still running is skipped, not queued.

pub mod events;

pub use events::{MonitorEvent, MonitorEvents};

use crate::config::MonitoringConfig;
use crate::drift::{detector::DriftDetector, DriftReport};
use crate::error::{EngineError, EngineResult};
use crate::schema::{SchemaModel, SchemaProvider};
use crate::snapshot::{Snapshot, SnapshotStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One analyze -> snapshot -> detect pass
pub struct DriftCycle {
    provider: Arc<dyn SchemaProvider>,
    store: Arc<SnapshotStore>,
    detector: DriftDetector,
}

impl DriftCycle {
    pub fn new(provider: Arc<dyn SchemaProvider>, store: Arc<SnapshotStore>, detector: DriftDetector) -> Self {
        Self {
            provider,
            store,
            detector,
        }
    }

    /// Snapshot the live schema and report drift against the baseline
    ///
    /// The first snapshot ever taken becomes the baseline.
    pub async fn run(&self) -> EngineResult<DriftReport> {
        let analysis = self.provider.analyze().await?;
        self.compare(analysis.model).await
    }

    async fn compare(&self, model: SchemaModel) -> EngineResult<DriftReport> {
        let current = self.store.save(model).await?;

        let baseline = match self.store.get_baseline().await {
            Some(baseline) => baseline,
            None => {
                self.store.set_baseline(current.version).await?;
                info!("No baseline yet, using snapshot v{}", current.version);
                current.clone()
            }
        };

        let report = self.detector.detect(&baseline, &current);
        self.store.record_report(&report).await?;
        Ok(report)
    }

    /// Changes that would take `current` back to `baseline`
    pub fn restore_report(&self, baseline: &Snapshot, current: &Snapshot) -> DriftReport {
        self.detector.detect(current, baseline)
    }

    /// Run once, publishing the outcome
    ///
    /// Only the analysis is bounded by `budget`; once a model is in hand the
    /// snapshot write always runs to completion.
    async fn run_bounded(&self, budget: Duration, events: &broadcast::Sender<MonitorEvent>) {
        let outcome = match tokio::time::timeout(budget, self.provider.analyze()).await {
            Ok(Ok(analysis)) => self.compare(analysis.model).await,
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::TickTimeout { elapsed: budget }),
        };

        // No subscribers is fine
        match outcome {
            Ok(report) => {
                let drift_found = report.has_drift;
                let _ = events.send(MonitorEvent::Cycle {
                    timestamp: Utc::now(),
                    drift_found,
                    succeeded: true,
                });
                if drift_found {
                    warn!(
                        "⚠️  Drift detected: {} change(s) since baseline v{}",
                        report.changes.len(),
                        report.baseline_version
                    );
                    let _ = events.send(MonitorEvent::DriftDetected { report });
                }
            }
            Err(e) => {
                error!("Monitor cycle failed: {}", e);
                let _ = events.send(MonitorEvent::Cycle {
                    timestamp: Utc::now(),
                    drift_found: false,
                    succeeded: false,
                });
                let _ = events.send(MonitorEvent::Error {
                    timestamp: Utc::now(),
                    message: e.to_string(),
                });
            }
        }
    }
}

enum MonitorState {
    Idle {
        events: broadcast::Sender<MonitorEvent>,
    },
    Running {
        events: broadcast::Sender<MonitorEvent>,
        shutdown: watch::Sender<bool>,
        scheduler: JoinHandle<()>,
    },
    Stopped,
}

pub struct DriftMonitor {
    cycle: Arc<DriftCycle>,
    tick_timeout: Duration,
    state: Mutex<MonitorState>,
}

impl DriftMonitor {
    pub fn new(cycle: Arc<DriftCycle>, config: &MonitoringConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            cycle,
            tick_timeout: config.tick_timeout,
            state: Mutex::new(MonitorState::Idle { events }),
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, MonitorState::Running { .. })
    }

    /// Start the scheduler; the first cycle runs immediately
    pub async fn start(&self, interval: Duration) -> EngineResult<()> {
        if interval.is_zero() {
            return Err(EngineError::Validation("monitor interval must be positive".into()));
        }

        let mut state = self.state.lock().await;
        let events = match &*state {
            MonitorState::Idle { events } => events.clone(),
            MonitorState::Running { .. } => {
                return Err(EngineError::Conflict("drift monitor is already running".into()))
            }
            MonitorState::Stopped => {
                return Err(EngineError::Conflict("a stopped drift monitor cannot be restarted".into()))
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = tokio::spawn(schedule(
            self.cycle.clone(),
            interval,
            self.tick_timeout,
            events.clone(),
            shutdown_rx,
        ));

        info!("🔭 Drift monitor started (every {:?})", interval);
        *state = MonitorState::Running {
            events,
            shutdown,
            scheduler,
        };
        Ok(())
    }

    /// Cancel future ticks and wait for the in-flight cycle
    ///
    /// Subscriptions end once this returns.
    pub async fn stop(&self) -> EngineResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock().await, MonitorState::Stopped);

        match previous {
            MonitorState::Running {
                shutdown, scheduler, ..
            } => {
                let _ = shutdown.send(true);
                scheduler
                    .await
                    .map_err(|e| EngineError::Internal(format!("monitor scheduler panicked: {}", e)))?;
                info!("Drift monitor stopped");
            }
            MonitorState::Idle { .. } => debug!("Drift monitor stopped before it started"),
            MonitorState::Stopped => {}
        }
        Ok(())
    }

    pub async fn subscribe(&self) -> MonitorEvents {
        match &*self.state.lock().await {
            MonitorState::Idle { events } | MonitorState::Running { events, .. } => {
                MonitorEvents::new(events.subscribe())
            }
            MonitorState::Stopped => {
                let (_, rx) = broadcast::channel(1);
                MonitorEvents::new(rx)
            }
        }
    }
}

async fn schedule(
    cycle: Arc<DriftCycle>,
    period: Duration,
    budget: Duration,
    events: broadcast::Sender<MonitorEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
                    warn!("Previous monitor cycle still running, skipping tick");
                    continue;
                }
                let cycle = cycle.clone();
                let events = events.clone();
                in_flight = Some(tokio::spawn(async move {
                    cycle.run_bounded(budget, &events).await;
                }));
            }
            _ = shutdown.changed() => break,
        }
    }

    if let Some(handle) = in_flight {
        if let Err(e) = handle.await {
            error!("Monitor cycle task failed: {}", e);
        }
    }
}
