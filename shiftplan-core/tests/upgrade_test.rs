//! Upgrade orchestration tests against in-memory collaborators.
//!
//! No database is needed: the loader, version store and executor are
//! replaced by fakes while the real PostgreSQL driver renders the scripts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use shiftplan_core::error::{Result, ShiftplanError};
use shiftplan_core::migration::MigrationSet;
use shiftplan_core::model::{ColumnFlags, ColumnType, KeyColumn, KeyType, Snapshot};
use shiftplan_core::postgres::PostgresDriver;
use shiftplan_core::script::{Script, ScriptKind};
use shiftplan_core::upgrade::{
    ScriptConnection, ScriptExecutor, SnapshotLoader, UpgradeEvent, UpgradeFailure, UpgradeMode,
    UpgradeSettings, UpgradeStatus, Upgrader, VersionStore,
};
use shiftplan_core::version::{DbInfo, InstanceKind, SchemaVersion};

struct FakeLoader {
    deployed: Snapshot,
    loads: AtomicUsize,
}

impl FakeLoader {
    fn new(deployed: Snapshot) -> Self {
        Self {
            deployed,
            loads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SnapshotLoader for FakeLoader {
    async fn load(&self) -> Result<Snapshot> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.deployed.clone())
    }
}

#[derive(Default)]
struct MemoryStore {
    info: Mutex<Option<DbInfo>>,
    successes: Mutex<Vec<Vec<Script>>>,
    failures: Mutex<Vec<UpgradeFailure>>,
}

impl MemoryStore {
    fn at(version: &str, instance_kind: InstanceKind) -> Self {
        let store = Self::default();
        *store.info.lock().unwrap() = Some(DbInfo {
            version: v(version),
            instance_kind,
            updated_on: None,
        });
        store
    }

    fn version(&self) -> Option<SchemaVersion> {
        self.info.lock().unwrap().as_ref().map(|i| i.version.clone())
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn load(&self) -> Result<Option<DbInfo>> {
        Ok(self.info.lock().unwrap().clone())
    }

    async fn record_success(&self, info: &DbInfo, applied: &[Script]) -> Result<()> {
        *self.info.lock().unwrap() = Some(info.clone());
        self.successes.lock().unwrap().push(applied.to_vec());
        Ok(())
    }

    async fn record_failure(&self, failure: &UpgradeFailure) -> Result<()> {
        self.failures.lock().unwrap().push(failure.clone());
        Ok(())
    }
}

/// Records every statement it is given; fails on the `fail_at`-th one (1-based).
#[derive(Default)]
struct RecordingExecutor {
    fail_at: Option<usize>,
    executed: Arc<Mutex<Vec<String>>>,
    opened: AtomicUsize,
}

impl RecordingExecutor {
    fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Default::default()
        }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptExecutor for RecordingExecutor {
    async fn open(&self) -> Result<Box<dyn ScriptConnection>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConnection {
            fail_at: self.fail_at,
            executed: Arc::clone(&self.executed),
        }))
    }
}

struct RecordingConnection {
    fail_at: Option<usize>,
    executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ScriptConnection for RecordingConnection {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        let mut executed = self.executed.lock().unwrap();
        executed.push(sql.to_string());
        if self.fail_at == Some(executed.len()) {
            return Err(ShiftplanError::IoError(std::io::Error::other(
                "relation \"sales.customer\" does not exist",
            )));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn v(s: &str) -> SchemaVersion {
    s.parse().unwrap()
}

fn settings(mode: UpgradeMode, instance_kind: InstanceKind) -> UpgradeSettings {
    UpgradeSettings {
        mode,
        instance_kind,
        ..Default::default()
    }
}

/// Two tables, two primary keys and a cascading foreign key.
fn customer_order() -> Snapshot {
    let mut s = Snapshot::new();
    s.add_schema("sales");
    let c = s.add_table("sales", "customer");
    let cid = s.add_column(c, "id", ColumnType::named("int8"), ColumnFlags::PRIMARY_KEY);
    s.add_column(c, "name", ColumnType::sized("varchar", 200), ColumnFlags::NULLABLE);
    let pk = s.add_key(c, "pk_customer", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(cid)]);
    let o = s.add_table("sales", "order");
    let oid = s.add_column(o, "id", ColumnType::named("int8"), ColumnFlags::PRIMARY_KEY);
    let fk_col = s.add_column(o, "customer_id", ColumnType::named("int8"), ColumnFlags::NONE);
    s.add_key(o, "pk_order", KeyType::PRIMARY_KEY, vec![KeyColumn::asc(oid)]);
    let fk = s.add_key(o, "fk_order_customer", KeyType::FOREIGN_KEY, vec![KeyColumn::asc(fk_col)]);
    s.add_ref_constraint(fk, pk, true);
    s
}

/// Deployed database that already has the `sales` schema but no tables.
fn empty_sales() -> Snapshot {
    let mut s = Snapshot::new();
    s.add_schema("sales");
    s
}

#[tokio::test]
async fn test_first_install_applies_everything_and_records_version() {
    let loader = FakeLoader::new(Snapshot::new());
    let store = MemoryStore::default();
    let executor = RecordingExecutor::default();
    let driver = PostgresDriver::new();
    let upgrader = Upgrader::new(
        &loader,
        &store,
        &executor,
        &driver,
        settings(UpgradeMode::NonProductionOnly, InstanceKind::Test),
    );

    let mut plan = upgrader.check(&customer_order(), &v("1.0")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::ChangesDetected);
    assert!(plan.db_info.is_none());
    assert_eq!(plan.instance_kind, InstanceKind::Test);
    assert_eq!(plan.scripts.len(), 6);
    assert_eq!(plan.scripts[0].kind, ScriptKind::SchemaAdd);

    upgrader.apply(&mut plan).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::Applied);
    assert_eq!(plan.applied.len(), 6);
    assert!(plan.applied.iter().all(|s| s.elapsed_ms.is_some()));

    let expected: Vec<String> = plan.scripts.iter().map(|s| s.sql.clone()).collect();
    assert_eq!(executor.executed(), expected);

    let info = store.info.lock().unwrap().clone().unwrap();
    assert_eq!(info.version, v("1.0"));
    assert_eq!(info.instance_kind, InstanceKind::Test);
    assert!(info.updated_on.is_some());
    assert_eq!(store.successes.lock().unwrap()[0].len(), 6);
}

#[tokio::test]
async fn test_higher_database_version_is_refused() {
    let loader = FakeLoader::new(customer_order());
    let store = MemoryStore::at("2.0", InstanceKind::Development);
    let executor = RecordingExecutor::default();
    let driver = PostgresDriver::new();
    let upgrader = Upgrader::new(
        &loader,
        &store,
        &executor,
        &driver,
        settings(UpgradeMode::Always, InstanceKind::Development),
    );

    let mut plan = upgrader.check(&customer_order(), &v("1.5")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::HigherVersionDetected);
    assert!(plan.scripts.is_empty());
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

    let err = upgrader.apply(&mut plan).await.unwrap_err();
    assert!(matches!(err, ShiftplanError::UpgradeNotAllowed { .. }));
    assert_eq!(executor.opened.load(Ordering::SeqCst), 0);
    assert_eq!(store.version(), Some(v("2.0")));
}

#[tokio::test]
async fn test_policy_blocks_production_and_notifies_listeners() {
    let loader = FakeLoader::new(Snapshot::new());
    let store = MemoryStore::at("1.0", InstanceKind::Production);
    let executor = RecordingExecutor::default();
    let driver = PostgresDriver::new();
    let events = Arc::new(Mutex::new(vec![]));
    let seen = Arc::clone(&events);
    let upgrader = Upgrader::new(
        &loader,
        &store,
        &executor,
        &driver,
        settings(UpgradeMode::NonProductionOnly, InstanceKind::Development),
    )
    .on_event(move |event| {
        if let UpgradeEvent::NotAllowed { instance_kind, mode } = event {
            seen.lock().unwrap().push(format!("{} {:?}", instance_kind, mode));
        }
    });

    let plan = upgrader.check(&customer_order(), &v("1.1")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::NotAllowed);
    // The persisted kind wins over the configured one
    assert_eq!(plan.instance_kind, InstanceKind::Production);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["production NonProductionOnly".to_string()]
    );
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_identical_schema_and_version_is_no_changes() {
    let loader = FakeLoader::new(customer_order());
    let store = MemoryStore::at("1.0", InstanceKind::Development);
    let executor = RecordingExecutor::default();
    let driver = PostgresDriver::new();
    let upgrader = Upgrader::new(&loader, &store, &executor, &driver, UpgradeSettings::default());

    let mut plan = upgrader.check(&customer_order(), &v("1.0")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::NoChanges);
    assert!(plan.changes.is_empty());

    upgrader.apply(&mut plan).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::NoChanges);
    assert_eq!(executor.opened.load(Ordering::SeqCst), 0);
    assert!(store.successes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_version_bump_alone_is_recorded() {
    let loader = FakeLoader::new(customer_order());
    let store = MemoryStore::at("1.0", InstanceKind::Development);
    let executor = RecordingExecutor::default();
    let driver = PostgresDriver::new();
    let upgrader = Upgrader::new(&loader, &store, &executor, &driver, UpgradeSettings::default());

    let mut plan = upgrader.check(&customer_order(), &v("1.1")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::ChangesDetected);
    assert!(plan.scripts.is_empty());

    upgrader.apply(&mut plan).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::Applied);
    assert_eq!(store.version(), Some(v("1.1")));
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn test_failure_stops_at_failing_script_and_is_recorded() {
    let loader = FakeLoader::new(empty_sales());
    let store = MemoryStore::at("1.0", InstanceKind::Development);
    let executor = RecordingExecutor::failing_at(3);
    let driver = PostgresDriver::new();
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    let upgrader = Upgrader::new(
        &loader,
        &store,
        &executor,
        &driver,
        settings(UpgradeMode::Always, InstanceKind::Development),
    )
    .on_event(move |event| {
        if let UpgradeEvent::Failed(_) = event {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut plan = upgrader.check(&customer_order(), &v("1.1")).await.unwrap();
    assert_eq!(plan.scripts.len(), 5);

    let err = upgrader.apply(&mut plan).await.unwrap_err();
    match err {
        ShiftplanError::ScriptFailed { index, ref object, .. } => {
            assert_eq!(index, 3);
            assert_eq!(object, &plan.scripts[2].object);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Scripts four and five were never attempted
    assert_eq!(executor.executed().len(), 3);
    assert_eq!(plan.applied.len(), 2);
    assert_eq!(plan.status, UpgradeStatus::ChangesDetected);
    assert_eq!(plan.failed.as_ref().unwrap().sql, plan.scripts[2].sql);
    assert!(plan.error.as_deref().unwrap().contains("does not exist"));

    let recorded = store.failures.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].index, 3);
    assert_eq!(recorded[0].applied.len(), 2);
    assert_eq!(recorded[0].from_version, Some(v("1.0")));
    assert_eq!(recorded[0].to_version, v("1.1"));
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    // Version is left untouched
    assert_eq!(store.version(), Some(v("1.0")));
    assert!(store.successes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_applied_event_carries_timed_scripts() {
    let loader = FakeLoader::new(empty_sales());
    let store = MemoryStore::at("1.0", InstanceKind::Development);
    let executor = RecordingExecutor::default();
    let driver = PostgresDriver::new();
    let applied = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&applied);
    let upgrader = Upgrader::new(&loader, &store, &executor, &driver, UpgradeSettings::default())
        .on_event(move |event| {
            if let UpgradeEvent::Applied { version, scripts } = event {
                let timed = scripts.iter().all(|s| s.elapsed_ms.is_some());
                *seen.lock().unwrap() = Some((version.to_string(), scripts.len(), timed));
            }
        });

    let mut plan = upgrader.check(&customer_order(), &v("1.1")).await.unwrap();
    upgrader.apply(&mut plan).await.unwrap();

    assert_eq!(
        applied.lock().unwrap().clone(),
        Some(("1.1".to_string(), 5, true))
    );
}

#[tokio::test]
async fn test_data_migrations_run_between_recorded_and_app_version() {
    let mut migrations = MigrationSet::new();
    migrations
        .add_sql("1.1", "seed customers", "INSERT INTO sales.customer (id) VALUES (1)")
        .unwrap();
    migrations
        .add_sql("1.3", "later", "UPDATE sales.customer SET name = 'x'")
        .unwrap();

    let loader = FakeLoader::new(customer_order());
    let store = MemoryStore::at("1.0", InstanceKind::Development);
    let executor = RecordingExecutor::default();
    let driver = PostgresDriver::new();
    let upgrader = Upgrader::new(&loader, &store, &executor, &driver, UpgradeSettings::default())
        .with_migrations(&migrations);

    let mut plan = upgrader.check(&customer_order(), &v("1.2")).await.unwrap();
    assert_eq!(plan.status, UpgradeStatus::ChangesDetected);
    assert_eq!(plan.scripts.len(), 1);
    assert_eq!(plan.scripts[0].kind, ScriptKind::Custom);
    assert_eq!(plan.scripts[0].object, "1.1 seed customers");

    upgrader.apply(&mut plan).await.unwrap();
    assert_eq!(
        executor.executed(),
        vec!["INSERT INTO sales.customer (id) VALUES (1)".to_string()]
    );
}

#[tokio::test]
async fn test_data_migrations_skipped_on_first_install() {
    let mut migrations = MigrationSet::new();
    migrations
        .add_sql("0.9", "seed", "INSERT INTO sales.customer (id) VALUES (1)")
        .unwrap();

    let loader = FakeLoader::new(Snapshot::new());
    let store = MemoryStore::default();
    let executor = RecordingExecutor::default();
    let driver = PostgresDriver::new();
    let upgrader = Upgrader::new(&loader, &store, &executor, &driver, UpgradeSettings::default())
        .with_migrations(&migrations);

    let plan = upgrader.check(&customer_order(), &v("1.0")).await.unwrap();
    assert!(plan.scripts.iter().all(|s| s.kind != ScriptKind::Custom));
}
