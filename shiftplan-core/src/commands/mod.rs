//! Command implementations: plan, upgrade, snapshot, info.

pub mod info;
pub mod plan;
pub mod snapshot;
pub mod upgrade;

use std::path::Path;

use tokio_postgres::Client;

use crate::config::ShiftplanConfig;
use crate::error::{Result, ShiftplanError};
use crate::migration::MigrationSet;
use crate::model::Snapshot;
use crate::postgres::{PgExecutor, PgLoader, PgVersionStore, PostgresDriver};
use crate::upgrade::Upgrader;
use crate::version::SchemaVersion;

/// The PostgreSQL collaborators an [`Upgrader`] borrows.
pub(crate) struct Collaborators<'a> {
    loader: PgLoader<'a>,
    store: PgVersionStore<'a>,
    executor: PgExecutor,
    driver: PostgresDriver,
    migrations: MigrationSet,
}

impl<'a> Collaborators<'a> {
    pub(crate) fn new(client: &'a Client, config: &ShiftplanConfig) -> Result<Self> {
        let upgrade = &config.upgrade;
        let loader = snapshot::loader(client, config);
        let store = PgVersionStore::new(
            client,
            &upgrade.store_schema,
            &upgrade.info_table,
            &upgrade.log_table,
        );
        let executor = PgExecutor::new(config.connection_string()?, config.database.clone());
        let driver = match &upgrade.grant_role {
            Some(role) => PostgresDriver::new().with_grant_role(role),
            None => PostgresDriver::new(),
        };
        let migrations = match &upgrade.migrations_dir {
            Some(dir) => MigrationSet::load_dir(dir)?,
            None => MigrationSet::new(),
        };
        Ok(Self {
            loader,
            store,
            executor,
            driver,
            migrations,
        })
    }

    pub(crate) fn upgrader(&self, config: &ShiftplanConfig) -> Upgrader<'_> {
        Upgrader::new(
            &self.loader,
            &self.store,
            &self.executor,
            &self.driver,
            config.upgrade_settings(),
        )
        .with_migrations(&self.migrations)
    }
}

/// Desired snapshot and application version named by the configuration.
pub fn load_target(config: &ShiftplanConfig) -> Result<(Snapshot, SchemaVersion)> {
    let path = config.upgrade.desired.as_deref().ok_or_else(|| {
        ShiftplanError::ConfigError(
            "No desired snapshot configured. Set [upgrade] desired or pass --desired.".to_string(),
        )
    })?;
    let version = config.upgrade.app_version.as_deref().ok_or_else(|| {
        ShiftplanError::ConfigError(
            "No application version configured. Set [upgrade] app_version or pass --app-version."
                .to_string(),
        )
    })?;
    Ok((load_snapshot(path)?, version.parse()?))
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let snapshot = Snapshot::load(path)?;
    log::debug!(
        "Loaded desired snapshot; path={}, tables={}",
        path.display(),
        snapshot.tables.len()
    );
    Ok(snapshot)
}
