//! Schema diff and migration planning for relational databases.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use shiftplan_core::config::{CliOverrides, ShiftplanConfig};
//! use shiftplan_core::Shiftplan;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ShiftplanConfig::load(None, &CliOverrides::default())?;
//! let sp = Shiftplan::new(config).await?;
//! let (desired, version) = sp.load_target()?;
//! let plan = sp.upgrade(&desired, &version).await?;
//! println!("{}: {} scripts applied", plan.status, plan.applied.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`model`]: Snapshot arena: tables, columns, keys, references, routines
//! - [`matcher`]: Pairs deployed objects with desired ones (renames included)
//! - [`diff`]: Builds the change set from a matched pair of snapshots
//! - [`driver`]: Vendor seam: capabilities and change rendering
//! - [`scheduler`]: Orders rendered scripts by phase and kind
//! - [`upgrade`]: Orchestrates check and apply against the collaborators
//! - [`migration`]: Version-keyed data migrations
//! - [`postgres`]: PostgreSQL driver, catalog loader, version store, executor
//! - [`config`]: Configuration loading (TOML, env vars, CLI overrides)
//! - [`commands`]: Individual command implementations
//! - [`error`]: Error types

pub mod capability;
pub mod change;
pub mod commands;
pub mod config;
pub mod diff;
pub mod driver;
pub mod error;
pub mod matcher;
pub mod migration;
pub mod model;
pub mod postgres;
pub mod scheduler;
pub mod script;
pub mod upgrade;
pub mod version;

use std::path::Path;

use config::ShiftplanConfig;
use error::Result;
use model::Snapshot;
use tokio_postgres::Client;
use version::SchemaVersion;

pub use capability::{Capabilities, Feature};
pub use change::{Change, ChangeKind, ChangeSet, ObjectRef};
pub use commands::info::InfoReport;
pub use commands::snapshot::SnapshotReport;
pub use config::CliOverrides;
pub use diff::CompareOptions;
pub use error::ShiftplanError;
pub use script::{ApplyPhase, Script, ScriptKind};
pub use upgrade::{UpgradeMode, UpgradePlan, UpgradeStatus, Upgrader};
pub use version::{DbInfo, InstanceKind};

/// Main entry point for the shiftplan library.
///
/// Wraps a configuration and a connection to the target database.
pub struct Shiftplan {
    pub config: ShiftplanConfig,
    client: Client,
}

impl Shiftplan {
    /// Create a new instance, connecting to the database.
    ///
    /// If `connect_retries` is configured, retries with exponential backoff.
    pub async fn new(config: ShiftplanConfig) -> Result<Self> {
        let conn_string = config.connection_string()?;
        let client = postgres::connect(&conn_string, &config.database).await?;
        Ok(Self { config, client })
    }

    /// Create a new instance with an existing database client.
    pub fn with_client(config: ShiftplanConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Get a reference to the underlying database client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Desired snapshot and application version from the configuration.
    pub fn load_target(&self) -> Result<(Snapshot, SchemaVersion)> {
        commands::load_target(&self.config)
    }

    /// Compute the upgrade plan without executing it.
    pub async fn plan(&self, desired: &Snapshot, app_version: &SchemaVersion) -> Result<UpgradePlan> {
        commands::plan::execute(&self.client, &self.config, desired, app_version).await
    }

    /// Plan and apply an upgrade.
    pub async fn upgrade(&self, desired: &Snapshot, app_version: &SchemaVersion) -> Result<UpgradePlan> {
        commands::upgrade::execute(&self.client, &self.config, desired, app_version).await
    }

    /// Capture the deployed schema, optionally writing it to `output`.
    pub async fn snapshot(&self, output: Option<&Path>) -> Result<SnapshotReport> {
        commands::snapshot::execute(&self.client, &self.config, output).await
    }

    /// Show the persisted version and the most recent upgrade log rows.
    pub async fn info(&self, limit: i64) -> Result<InfoReport> {
        commands::info::execute(&self.client, &self.config, limit).await
    }
}
