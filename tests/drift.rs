//! Drift scenarios through the snapshot store, and generate/apply round trips

mod common;

use common::*;
use pretty_assertions::assert_eq;
use schemaflow_engine::drift::{ChangeKind, DriftDetector, Impact};
use schemaflow_engine::migration::memory::apply_operations;
use schemaflow_engine::migration::MigrationGenerator;
use schemaflow_engine::schema::{CanonicalType, SchemaModel};
use schemaflow_engine::snapshot::SnapshotStore;

async fn drift_between(baseline: SchemaModel, current: SchemaModel) -> Vec<(ChangeKind, String, Impact)> {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open(dir.path()).await.unwrap();
    let before = store.save(baseline).await.unwrap();
    store.set_baseline(before.version).await.unwrap();
    let after = store.save(current).await.unwrap();

    let report = DriftDetector::default().detect(&store.get_baseline().await.unwrap(), &after);
    assert!(store.record_report(&report).await.unwrap().is_some());

    report
        .changes
        .into_iter()
        .map(|c| (c.kind, c.path, c.impact))
        .collect()
}

#[tokio::test]
async fn test_scenario_nullable_column_added() {
    let mut current = users();
    current.columns.push(col("phone", CanonicalType::String(Some(20)), true, 3));

    let changes = drift_between(model(vec![users()]), model(vec![current])).await;
    assert_eq!(
        changes,
        vec![(ChangeKind::Added, "users.phone".to_string(), Impact::NonBreaking)]
    );
}

#[tokio::test]
async fn test_scenario_not_null_relaxed() {
    let mut current = users();
    current.columns[1].nullable = true;

    let changes = drift_between(model(vec![users()]), model(vec![current])).await;
    assert_eq!(
        changes,
        vec![(ChangeKind::Modified, "users.email".to_string(), Impact::NonBreaking)]
    );
}

#[tokio::test]
async fn test_scenario_column_dropped() {
    let mut current = users();
    current.columns.retain(|c| c.name != "email");

    let changes = drift_between(model(vec![users()]), model(vec![current])).await;
    assert_eq!(
        changes,
        vec![(ChangeKind::Removed, "users.email".to_string(), Impact::Breaking)]
    );
}

#[tokio::test]
async fn test_unchanged_schema_has_no_drift() {
    let schema = model(vec![users(), orders()]);
    let changes = drift_between(schema.clone(), schema).await;
    assert!(changes.is_empty());
}

#[test]
fn test_round_trip_between_schemas() {
    let mut widened = orders();
    widened.columns[1].data_type = CanonicalType::BigInt;
    widened.indexes.clear();

    let mut users_with_phone = users();
    users_with_phone
        .columns
        .push(col("phone", CanonicalType::Text, true, 3));

    let pairs = vec![
        (model(vec![]), model(vec![users(), orders()])),
        (model(vec![users(), orders()]), model(vec![users()])),
        (model(vec![users(), orders()]), model(vec![users_with_phone, widened])),
    ];

    for (a, b) in pairs {
        let migrations = MigrationGenerator::generate_from_desired_state_at(&a, &b, 1);
        assert_eq!(migrations.len(), 1);

        let forward = apply_operations(a.clone(), &migrations[0].up).unwrap();
        assert!(forward.structurally_eq(&b), "up did not reach target");

        let back = apply_operations(forward, &migrations[0].down).unwrap();
        assert!(back.structurally_eq(&a), "down did not restore source");
    }
}
