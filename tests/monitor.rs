//! Drift monitor scheduling against slow and failing schema providers

mod common;

use async_trait::async_trait;
use common::*;
use pretty_assertions::assert_eq;
use schemaflow_engine::config::MonitoringConfig;
use schemaflow_engine::drift::DriftDetector;
use schemaflow_engine::monitor::{DriftCycle, DriftMonitor, MonitorEvent, MonitorEvents};
use schemaflow_engine::schema::{Analysis, SchemaProvider};
use schemaflow_engine::snapshot::SnapshotStore;
use schemaflow_engine::{EngineError, EngineResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Provider that takes `delay` per analysis and tracks concurrency
struct SlowProvider {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowProvider {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SchemaProvider for SlowProvider {
    async fn analyze(&self) -> EngineResult<Analysis> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Analysis {
            model: model(vec![users()]),
            warnings: Vec::new(),
        })
    }
}

struct FailingProvider;

#[async_trait]
impl SchemaProvider for FailingProvider {
    async fn analyze(&self) -> EngineResult<Analysis> {
        Err(EngineError::Connection("connection refused".into()))
    }
}

fn monitor_for(provider: Arc<dyn SchemaProvider>, tick_timeout: Duration) -> DriftMonitor {
    let cycle = DriftCycle::new(
        provider,
        Arc::new(SnapshotStore::in_memory()),
        DriftDetector::default(),
    );
    let config = MonitoringConfig {
        tick_timeout,
        ..MonitoringConfig::default()
    };
    DriftMonitor::new(Arc::new(cycle), &config)
}

async fn next_event(events: &mut MonitorEvents) -> MonitorEvent {
    tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_slow_cycles_never_overlap() {
    let provider = SlowProvider::new(Duration::from_millis(120));
    let monitor = monitor_for(provider.clone(), Duration::from_secs(5));

    monitor.start(Duration::from_millis(30)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    monitor.stop().await.unwrap();

    assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(provider.in_flight.load(Ordering::SeqCst), 0);
    // Ticks were skipped rather than queued
    let calls = provider.calls.load(Ordering::SeqCst);
    assert!(calls >= 2, "expected at least two cycles, got {}", calls);
    assert!(calls <= 5, "ticks were queued: {} cycles", calls);
}

#[tokio::test]
async fn test_cycle_over_budget_reports_timeout() {
    let provider = SlowProvider::new(Duration::from_millis(300));
    let monitor = monitor_for(provider, Duration::from_millis(50));
    let mut events = monitor.subscribe().await;

    monitor.start(Duration::from_secs(60)).await.unwrap();

    let cycle = next_event(&mut events).await;
    assert!(matches!(
        cycle,
        MonitorEvent::Cycle {
            succeeded: false,
            drift_found: false,
            ..
        }
    ));
    match next_event(&mut events).await {
        MonitorEvent::Error { message, .. } => assert!(message.contains("exceeded")),
        other => panic!("expected monitoring:error, got {}", other.name()),
    }

    monitor.stop().await.unwrap();
}

/// Provider whose first analysis hangs past any reasonable budget
struct StallsOnceProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl SchemaProvider for StallsOnceProvider {
    async fn analyze(&self) -> EngineResult<Analysis> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(Analysis {
            model: model(vec![users()]),
            warnings: Vec::new(),
        })
    }
}

#[tokio::test]
async fn test_cycle_after_timeout_snapshots_normally() {
    let store = Arc::new(SnapshotStore::in_memory());
    let cycle = DriftCycle::new(
        Arc::new(StallsOnceProvider {
            calls: AtomicUsize::new(0),
        }),
        store.clone(),
        DriftDetector::default(),
    );
    let config = MonitoringConfig {
        tick_timeout: Duration::from_millis(50),
        ..MonitoringConfig::default()
    };
    let monitor = DriftMonitor::new(Arc::new(cycle), &config);
    let mut events = monitor.subscribe().await;

    monitor.start(Duration::from_millis(100)).await.unwrap();

    let names: Vec<&str> = [
        next_event(&mut events).await,
        next_event(&mut events).await,
    ]
    .iter()
    .map(|e| e.name())
    .collect();
    assert_eq!(names, vec!["monitoring:cycle", "monitoring:error"]);
    assert!(matches!(
        next_event(&mut events).await,
        MonitorEvent::Cycle {
            succeeded: true,
            drift_found: false,
            ..
        }
    ));

    monitor.stop().await.unwrap();
    assert_eq!(store.get_baseline().await.unwrap().version, 1);
}

#[tokio::test]
async fn test_provider_failure_keeps_monitor_running() {
    let monitor = monitor_for(Arc::new(FailingProvider), Duration::from_secs(1));
    let mut events = monitor.subscribe().await;

    monitor.start(Duration::from_millis(20)).await.unwrap();

    for _ in 0..2 {
        let cycle = next_event(&mut events).await;
        assert!(matches!(cycle, MonitorEvent::Cycle { succeeded: false, .. }));
        assert_eq!(next_event(&mut events).await.name(), "monitoring:error");
    }
    assert!(monitor.is_running().await);

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_ends_subscriptions() {
    let provider = SlowProvider::new(Duration::from_millis(10));
    let monitor = monitor_for(provider, Duration::from_secs(1));
    let mut events = monitor.subscribe().await;

    monitor.start(Duration::from_secs(60)).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap();
    assert!(matches!(
        first,
        Some(MonitorEvent::Cycle {
            drift_found: false,
            succeeded: true,
            ..
        })
    ));

    monitor.stop().await.unwrap();
    assert!(!monitor.is_running().await);

    let end = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap();
    assert_eq!(end, None);

    // Late subscribers see a closed stream
    let mut late = monitor.subscribe().await;
    assert_eq!(late.next().await, None);
}
