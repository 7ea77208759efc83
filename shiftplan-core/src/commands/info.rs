//! Show the persisted schema version and recent upgrade log rows.

use serde::Serialize;
use tokio_postgres::Client;

use crate::config::ShiftplanConfig;
use crate::error::Result;
use crate::postgres::store::LogEntry;
use crate::postgres::PgVersionStore;
use crate::upgrade::VersionStore;
use crate::version::DbInfo;

/// Persisted metadata plus the tail of the upgrade log.
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    /// `None` when nothing was ever installed.
    pub db_info: Option<DbInfo>,
    /// Newest first.
    pub log: Vec<LogEntry>,
}

/// Execute the info command.
pub async fn execute(client: &Client, config: &ShiftplanConfig, limit: i64) -> Result<InfoReport> {
    let store = PgVersionStore::new(
        client,
        &config.upgrade.store_schema,
        &config.upgrade.info_table,
        &config.upgrade.log_table,
    );
    Ok(InfoReport {
        db_info: store.load().await?,
        log: store.recent_log(limit).await?,
    })
}
