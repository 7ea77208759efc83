//! Compare the deployed schema with the desired snapshot without executing anything.

use tokio_postgres::Client;

use crate::config::ShiftplanConfig;
use crate::error::Result;
use crate::model::Snapshot;
use crate::upgrade::UpgradePlan;
use crate::version::SchemaVersion;

use super::Collaborators;

/// Execute the plan command.
pub async fn execute(
    client: &Client,
    config: &ShiftplanConfig,
    desired: &Snapshot,
    app_version: &SchemaVersion,
) -> Result<UpgradePlan> {
    let collaborators = Collaborators::new(client, config)?;
    let upgrader = collaborators.upgrader(config);
    upgrader.check(desired, app_version).await
}
