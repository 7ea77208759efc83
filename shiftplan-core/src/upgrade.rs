//! Upgrade orchestration.
//!
//! [`Upgrader::check`] runs the planning pipeline (version guard, policy,
//! load, match, diff, render, schedule) and returns an [`UpgradePlan`];
//! [`Upgrader::apply`] executes a plan's scripts on one connection.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::change::ChangeSet;
use crate::diff::{build_changes, CompareOptions};
use crate::driver::{render_changes, Driver, RenderContext};
use crate::error::{Result, ShiftplanError};
use crate::matcher::match_snapshots;
use crate::migration::{MigrationContext, MigrationSet};
use crate::model::Snapshot;
use crate::scheduler::schedule_change_set;
use crate::script::Script;
use crate::version::{DbInfo, InstanceKind, SchemaVersion};

/// Loads the deployed snapshot.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self) -> Result<Snapshot>;
}

/// Reads and writes the persisted version record and the upgrade log.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Persisted metadata, `None` on a database never upgraded before.
    async fn load(&self) -> Result<Option<DbInfo>>;

    async fn record_success(&self, info: &DbInfo, applied: &[Script]) -> Result<()>;

    async fn record_failure(&self, failure: &UpgradeFailure) -> Result<()>;
}

/// Opens the connection scripts run on.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn open(&self) -> Result<Box<dyn ScriptConnection>>;
}

#[async_trait]
pub trait ScriptConnection: Send {
    async fn execute(&mut self, sql: &str) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpgradeStatus {
    Unknown,
    NotAllowed,
    HigherVersionDetected,
    NoChanges,
    ChangesDetected,
    Applied,
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradeStatus::Unknown => "Unknown",
            UpgradeStatus::NotAllowed => "NotAllowed",
            UpgradeStatus::HigherVersionDetected => "HigherVersionDetected",
            UpgradeStatus::NoChanges => "NoChanges",
            UpgradeStatus::ChangesDetected => "ChangesDetected",
            UpgradeStatus::Applied => "Applied",
        };
        f.write_str(s)
    }
}

/// When automatic upgrades are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum UpgradeMode {
    Always,
    #[default]
    NonProductionOnly,
    Never,
}

impl UpgradeMode {
    pub fn allows(self, kind: InstanceKind) -> bool {
        match self {
            UpgradeMode::Always => true,
            UpgradeMode::NonProductionOnly => kind != InstanceKind::Production,
            UpgradeMode::Never => false,
        }
    }
}

impl FromStr for UpgradeMode {
    type Err = ShiftplanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "always" => Ok(UpgradeMode::Always),
            "nonproductiononly" | "nonproduction" => Ok(UpgradeMode::NonProductionOnly),
            "never" => Ok(UpgradeMode::Never),
            _ => Err(ShiftplanError::ConfigError(format!(
                "Invalid upgrade mode '{}'. Use 'always', 'non-production-only', or 'never'.",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpgradeSettings {
    pub mode: UpgradeMode,

    /// Classification recorded for a database on its first upgrade.
    pub instance_kind: InstanceKind,

    pub compare: CompareOptions,
}

/// Result of one upgrade check, updated in place by [`Upgrader::apply`].
#[derive(Debug, Clone, Serialize)]
pub struct UpgradePlan {
    pub status: UpgradeStatus,

    /// Persisted metadata as loaded; replaced after a successful apply.
    pub db_info: Option<DbInfo>,

    pub app_version: SchemaVersion,

    /// Classification the policy was evaluated against.
    pub instance_kind: InstanceKind,

    pub changes: ChangeSet,

    /// Scripts in execution order.
    pub scripts: Vec<Script>,

    /// Scripts executed successfully, with timings.
    pub applied: Vec<Script>,

    pub failed: Option<Script>,
    pub error: Option<String>,
    pub started_on: DateTime<Utc>,
}

impl UpgradePlan {
    fn new(app_version: SchemaVersion, instance_kind: InstanceKind) -> Self {
        Self {
            status: UpgradeStatus::Unknown,
            db_info: None,
            app_version,
            instance_kind,
            changes: ChangeSet::default(),
            scripts: vec![],
            applied: vec![],
            failed: None,
            error: None,
            started_on: Utc::now(),
        }
    }

    /// Soft notices collected from every change.
    pub fn notices(&self) -> Vec<String> {
        self.changes.notices()
    }
}

/// Forensic record of a failed upgrade.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeFailure {
    pub from_version: Option<SchemaVersion>,
    pub to_version: SchemaVersion,
    pub applied: Vec<Script>,

    /// 1-based position of the failing script.
    pub index: usize,
    pub failed: Script,
    pub error: String,
}

#[derive(Debug)]
pub enum UpgradeEvent<'a> {
    HigherVersionDetected {
        db_version: &'a SchemaVersion,
        app_version: &'a SchemaVersion,
    },
    NotAllowed {
        instance_kind: InstanceKind,
        mode: UpgradeMode,
    },
    Applied {
        version: &'a SchemaVersion,
        scripts: &'a [Script],
    },
    Failed(&'a UpgradeFailure),
}

type Listener = Box<dyn Fn(&UpgradeEvent<'_>) + Send + Sync>;

pub struct Upgrader<'a> {
    loader: &'a dyn SnapshotLoader,
    store: &'a dyn VersionStore,
    executor: &'a dyn ScriptExecutor,
    driver: &'a dyn Driver,
    migrations: Option<&'a MigrationSet>,
    settings: UpgradeSettings,
    listeners: Vec<Listener>,
}

impl<'a> Upgrader<'a> {
    pub fn new(
        loader: &'a dyn SnapshotLoader,
        store: &'a dyn VersionStore,
        executor: &'a dyn ScriptExecutor,
        driver: &'a dyn Driver,
        settings: UpgradeSettings,
    ) -> Self {
        Self {
            loader,
            store,
            executor,
            driver,
            migrations: None,
            settings,
            listeners: vec![],
        }
    }

    pub fn with_migrations(mut self, migrations: &'a MigrationSet) -> Self {
        self.migrations = Some(migrations);
        self
    }

    pub fn on_event<F>(mut self, listener: F) -> Self
    where
        F: Fn(&UpgradeEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
        self
    }

    fn emit(&self, event: UpgradeEvent<'_>) {
        for listener in &self.listeners {
            listener(&event);
        }
    }

    /// Decide whether `desired` can be deployed and build the script list.
    pub async fn check(&self, desired: &Snapshot, app_version: &SchemaVersion) -> Result<UpgradePlan> {
        let info = self.store.load().await?;
        let instance_kind = info
            .as_ref()
            .map_or(self.settings.instance_kind, |i| i.instance_kind);
        let mut plan = UpgradePlan::new(app_version.clone(), instance_kind);
        plan.db_info = info.clone();

        if let Some(info) = &info {
            if info.version > *app_version {
                log::warn!(
                    "Database is newer than the application; db_version={}, app_version={}",
                    info.version,
                    app_version
                );
                plan.status = UpgradeStatus::HigherVersionDetected;
                self.emit(UpgradeEvent::HigherVersionDetected {
                    db_version: &info.version,
                    app_version,
                });
                return Ok(plan);
            }
        }

        if !self.settings.mode.allows(instance_kind) {
            log::info!(
                "Upgrade not allowed by policy; mode={:?}, instance_kind={}",
                self.settings.mode,
                instance_kind
            );
            plan.status = UpgradeStatus::NotAllowed;
            self.emit(UpgradeEvent::NotAllowed {
                instance_kind,
                mode: self.settings.mode,
            });
            return Ok(plan);
        }

        let deployed = self.loader.load().await?;
        let caps = *self.driver.capability();
        let peers = match_snapshots(&deployed, desired, caps);
        let mut changes = build_changes(&deployed, desired, &peers, caps, &self.settings.compare);
        render_changes(self.driver, &RenderContext::new(&deployed, desired, &peers), &mut changes)?;

        let data_scripts = match (&info, self.migrations) {
            (Some(info), Some(migrations)) => migrations.scripts(&MigrationContext {
                db_version: &info.version,
                app_version,
                changes: &changes,
                old: &deployed,
                new: desired,
            }),
            _ => vec![],
        };

        plan.scripts = schedule_change_set(&changes, data_scripts);
        plan.changes = changes;

        let version_changed = info.as_ref().is_none_or(|i| i.version != *app_version);
        plan.status = if plan.scripts.is_empty() && !version_changed {
            UpgradeStatus::NoChanges
        } else {
            UpgradeStatus::ChangesDetected
        };

        log::info!(
            "Upgrade check complete; status={}, changes={}, scripts={}, notices={}",
            plan.status,
            plan.changes.len(),
            plan.scripts.len(),
            plan.changes.notices().len()
        );
        Ok(plan)
    }

    /// Execute the scripts of a `ChangesDetected` plan.
    ///
    /// Stops at the first failing script. The failure is persisted before
    /// the error is returned; already-applied scripts are not rolled back.
    pub async fn apply(&self, plan: &mut UpgradePlan) -> Result<()> {
        match plan.status {
            UpgradeStatus::ChangesDetected => {}
            UpgradeStatus::NoChanges | UpgradeStatus::Applied => return Ok(()),
            other => {
                return Err(ShiftplanError::UpgradeNotAllowed {
                    status: other.to_string(),
                })
            }
        }

        let mut conn = self.executor.open().await?;
        let outcome = run_scripts(conn.as_mut(), plan).await;
        if let Err(e) = conn.close().await {
            log::warn!("Failed to close upgrade connection: {}", e);
        }

        if let Err((index, error)) = outcome {
            let failed = plan.scripts[index - 1].clone();
            let failure = UpgradeFailure {
                from_version: plan.db_info.as_ref().map(|i| i.version.clone()),
                to_version: plan.app_version.clone(),
                applied: plan.applied.clone(),
                index,
                failed: failed.clone(),
                error: error.to_string(),
            };
            plan.failed = Some(failed);
            plan.error = Some(failure.error.clone());

            if let Err(e) = self.store.record_failure(&failure).await {
                log::error!("Failed to record upgrade failure: {}", e);
            }
            self.emit(UpgradeEvent::Failed(&failure));

            return Err(ShiftplanError::ScriptFailed {
                index,
                object: failure.failed.object.clone(),
                reason: failure.error,
            });
        }

        let info = DbInfo {
            version: plan.app_version.clone(),
            instance_kind: plan.instance_kind,
            updated_on: Some(Utc::now()),
        };
        self.store.record_success(&info, &plan.applied).await?;
        plan.db_info = Some(info);
        plan.status = UpgradeStatus::Applied;

        log::info!(
            "Upgrade applied; version={}, scripts={}, total_ms={}",
            plan.app_version,
            plan.applied.len(),
            plan.applied.iter().filter_map(|s| s.elapsed_ms).sum::<u64>()
        );
        self.emit(UpgradeEvent::Applied {
            version: &plan.app_version,
            scripts: &plan.applied,
        });
        Ok(())
    }
}

/// Run every script in order, recording timings. On failure returns the
/// 1-based index of the failing script.
async fn run_scripts(
    conn: &mut dyn ScriptConnection,
    plan: &mut UpgradePlan,
) -> std::result::Result<(), (usize, ShiftplanError)> {
    let total = plan.scripts.len();
    for i in 0..total {
        let script = &mut plan.scripts[i];
        log::info!(
            "Applying script; index={}, total={}, kind={:?}, object={}",
            i + 1,
            total,
            script.kind,
            script.object
        );
        let start = Instant::now();
        match conn.execute(&script.sql).await {
            Ok(()) => {
                script.elapsed_ms = Some(start.elapsed().as_millis() as u64);
                plan.applied.push(script.clone());
            }
            Err(e) => {
                log::error!(
                    "Script failed; index={}, object={}, error={}",
                    i + 1,
                    script.object,
                    e
                );
                return Err((i + 1, e));
            }
        }
    }
    Ok(())
}
