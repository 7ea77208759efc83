//! Integration tests for shiftplan-core.
//!
//! Requires a running PostgreSQL instance.
//! Set TEST_DATABASE_URL env var, e.g.:
//!   TEST_DATABASE_URL="host=localhost user=postgres dbname=shiftplan_test"
//!
//! Run with: cargo test --test integration_test
//! Tests are skipped when the variable is not set.

use std::sync::atomic::{AtomicU64, Ordering};

use shiftplan_core::config::{DatabaseConfig, ShiftplanConfig, UpgradeConfig};
use shiftplan_core::model::{ColumnFlags, ColumnType, KeyColumn, KeyType, Snapshot};
use shiftplan_core::postgres::{self, db::quote_ident};
use shiftplan_core::version::SchemaVersion;
use shiftplan_core::{Shiftplan, UpgradeMode, UpgradeStatus};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Build a config pointing at a unique schema to isolate test runs.
fn test_config(url: &str, schema: &str) -> ShiftplanConfig {
    ShiftplanConfig {
        database: DatabaseConfig {
            url: Some(url.to_string()),
            ..Default::default()
        },
        upgrade: UpgradeConfig {
            mode: UpgradeMode::Always,
            schemas: vec![schema.to_string()],
            store_schema: schema.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper: connect, create a fresh schema, return client + schema name.
async fn setup_schema(url: &str, prefix: &str) -> (tokio_postgres::Client, String) {
    let client = postgres::connect(url, &DatabaseConfig::default())
        .await
        .expect("Failed to connect to DB");

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let schema = format!("shiftplan_test_{}_{}_{}", prefix, std::process::id(), id);

    client
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE; CREATE SCHEMA {}",
            quote_ident(&schema),
            quote_ident(&schema)
        ))
        .await
        .expect("Failed to create test schema");

    (client, schema)
}

/// Helper: drop the test schema.
async fn teardown_schema(client: &tokio_postgres::Client, schema: &str) {
    let _ = client
        .batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema)))
        .await;
}

fn v(s: &str) -> SchemaVersion {
    s.parse().unwrap()
}

/// Version 1 of the application schema, spelled the way the catalog reports it.
fn customer_order(schema: &str) -> Snapshot {
    let mut s = Snapshot::new();
    s.add_schema(schema);
    let c = s.add_table(schema, "customer");
    let cid = s.add_column(c, "id", ColumnType::named("bigint"), ColumnFlags::PRIMARY_KEY);
    s.add_column(c, "name", ColumnType::sized("character varying", 200), ColumnFlags::NULLABLE);
    let pk = s.add_key(c, "pk_customer", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(cid)]);
    let o = s.add_table(schema, "order");
    let oid = s.add_column(o, "id", ColumnType::named("bigint"), ColumnFlags::PRIMARY_KEY);
    let fk_col = s.add_column(o, "customer_id", ColumnType::named("bigint"), ColumnFlags::NONE);
    s.add_key(o, "pk_order", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(oid)]);
    let fk = s.add_key(o, "fk_order_customer", KeyType::FOREIGN_KEY, vec![KeyColumn::asc(fk_col)]);
    s.add_ref_constraint(fk, pk, true);
    s
}

// ─── Tests ───

#[tokio::test]
async fn test_upgrade_installs_schema_and_records_version() {
    let Some(url) = test_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let (client, schema) = setup_schema(&url, "install").await;
    let sp = Shiftplan::new(test_config(&url, &schema)).await.unwrap();

    let desired = customer_order(&schema);
    let plan = sp.upgrade(&desired, &v("1.0")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::Applied);
    assert_eq!(plan.applied.len(), 5);

    let report = sp.snapshot(None).await.unwrap();
    assert_eq!(report.tables, 2);
    assert_eq!(report.ref_constraints, 1);

    let info = sp.info(50).await.unwrap();
    assert_eq!(info.db_info.unwrap().version, v("1.0"));
    assert_eq!(info.log.len(), 5);
    assert!(info.log.iter().all(|e| e.success));

    // Re-checking the same version finds nothing to do
    let plan = sp.plan(&desired, &v("1.0")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::NoChanges, "changes: {:?}", plan.changes.changes);

    teardown_schema(&client, &schema).await;
}

#[tokio::test]
async fn test_upgrade_renames_column_and_keeps_data() {
    let Some(url) = test_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let (client, schema) = setup_schema(&url, "rename").await;
    let sp = Shiftplan::new(test_config(&url, &schema)).await.unwrap();

    sp.upgrade(&customer_order(&schema), &v("1.0")).await.unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO {}.customer (id, name) VALUES (1, 'Ada')",
            quote_ident(&schema)
        ))
        .await
        .unwrap();

    let mut desired = customer_order(&schema);
    let customer = desired.find_table(&format!("{}.customer", schema)).unwrap().id;
    let name = desired.find_column(customer, "name").unwrap().id;
    desired.columns[name.0].name = "full_name".to_string();
    desired.add_previous_column_name(name, "name");
    desired.add_column(customer, "email", ColumnType::named("text"), ColumnFlags::NULLABLE);

    let plan = sp.upgrade(&desired, &v("1.1")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::Applied);

    let row = client
        .query_one(
            &format!("SELECT full_name FROM {}.customer WHERE id = 1", quote_ident(&schema)),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(row.get::<_, String>(0), "Ada");

    teardown_schema(&client, &schema).await;
}

#[tokio::test]
async fn test_failed_script_is_logged_and_version_kept() {
    let Some(url) = test_url() else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let (client, schema) = setup_schema(&url, "failure").await;
    let sp = Shiftplan::new(test_config(&url, &schema)).await.unwrap();

    sp.upgrade(&customer_order(&schema), &v("1.0")).await.unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO {}.customer (id) VALUES (1)",
            quote_ident(&schema)
        ))
        .await
        .unwrap();

    // Adding a NOT NULL column without a default fails on a populated table
    let mut desired = customer_order(&schema);
    let customer = desired.find_table(&format!("{}.customer", schema)).unwrap().id;
    desired.add_column(customer, "code", ColumnType::named("text"), ColumnFlags::NONE);

    let err = sp.upgrade(&desired, &v("1.1")).await.unwrap_err();
    assert!(matches!(err, shiftplan_core::ShiftplanError::ScriptFailed { .. }));

    let info = sp.info(50).await.unwrap();
    assert_eq!(info.db_info.unwrap().version, v("1.0"));
    let newest = &info.log[0];
    assert!(!newest.success);
    assert!(newest.error.is_some());
    assert_eq!(newest.to_version, "1.1");

    teardown_schema(&client, &schema).await;
}
