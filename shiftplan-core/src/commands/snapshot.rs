//! Capture the deployed schema as a snapshot file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_postgres::Client;

use crate::config::ShiftplanConfig;
use crate::error::Result;
use crate::model::Snapshot;
use crate::postgres::PgLoader;
use crate::upgrade::SnapshotLoader;

/// Counts of the captured objects.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    /// Where the snapshot was written, if anywhere.
    pub path: Option<PathBuf>,
    pub schemas: usize,
    pub tables: usize,
    pub views: usize,
    pub keys: usize,
    pub ref_constraints: usize,
    pub sequences: usize,
    pub custom_types: usize,
    pub routines: usize,
}

impl SnapshotReport {
    fn new(snapshot: &Snapshot, path: Option<&Path>) -> Self {
        let views = snapshot.tables.iter().filter(|t| t.is_view()).count();
        Self {
            path: path.map(Path::to_path_buf),
            schemas: snapshot.schemas.len(),
            tables: snapshot.tables.len() - views,
            views,
            keys: snapshot.keys.len(),
            ref_constraints: snapshot.ref_constraints.len(),
            sequences: snapshot.sequences.len(),
            custom_types: snapshot.custom_types.len(),
            routines: snapshot.routines.len(),
        }
    }
}

/// Catalog loader for the configured schemas, leaving out the bookkeeping tables.
pub(crate) fn loader<'a>(client: &'a Client, config: &ShiftplanConfig) -> PgLoader<'a> {
    let upgrade = &config.upgrade;
    PgLoader::new(client, upgrade.schemas.clone())
        .exclude_table(&upgrade.store_schema, &upgrade.info_table)
        .exclude_table(&upgrade.store_schema, &upgrade.log_table)
}

/// Execute the snapshot command, writing the snapshot to `output` when given.
pub async fn execute(
    client: &Client,
    config: &ShiftplanConfig,
    output: Option<&Path>,
) -> Result<SnapshotReport> {
    let snapshot = loader(client, config).load().await?;
    if let Some(path) = output {
        snapshot.save(path)?;
        log::info!("Snapshot saved; path={}", path.display());
    }
    Ok(SnapshotReport::new(&snapshot, output))
}
