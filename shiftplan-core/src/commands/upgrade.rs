//! Plan and apply an upgrade to the desired snapshot.

use tokio_postgres::Client;

use crate::config::ShiftplanConfig;
use crate::error::Result;
use crate::model::Snapshot;
use crate::upgrade::{UpgradeEvent, UpgradePlan, UpgradeStatus};
use crate::version::SchemaVersion;

use super::Collaborators;

/// Execute the upgrade command.
///
/// Plans first and applies only when the plan is `ChangesDetected`; any
/// other status is returned as-is so the caller can report it.
pub async fn execute(
    client: &Client,
    config: &ShiftplanConfig,
    desired: &Snapshot,
    app_version: &SchemaVersion,
) -> Result<UpgradePlan> {
    let collaborators = Collaborators::new(client, config)?;
    let upgrader = collaborators.upgrader(config).on_event(|event| match event {
        UpgradeEvent::HigherVersionDetected {
            db_version,
            app_version,
        } => log::warn!(
            "Refusing to downgrade; db_version={}, app_version={}",
            db_version,
            app_version
        ),
        UpgradeEvent::NotAllowed {
            instance_kind,
            mode,
        } => log::warn!(
            "Upgrade blocked by policy; instance_kind={}, mode={:?}",
            instance_kind,
            mode
        ),
        UpgradeEvent::Applied { version, scripts } => {
            log::info!("Upgrade complete; version={}, scripts={}", version, scripts.len())
        }
        UpgradeEvent::Failed(failure) => log::error!(
            "Upgrade failed; index={}, object={}, applied={}",
            failure.index,
            failure.failed.object,
            failure.applied.len()
        ),
    });

    let mut plan = upgrader.check(desired, app_version).await?;
    if plan.status == UpgradeStatus::ChangesDetected {
        upgrader.apply(&mut plan).await?;
    }
    Ok(plan)
}
