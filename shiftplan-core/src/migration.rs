//! Hand-written data migrations merged into the upgrade script stream.
//!
//! A migration is keyed by the schema version that introduces it and runs
//! once, when a database is upgraded across that version.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::change::ChangeSet;
use crate::error::{Result, ShiftplanError};
use crate::model::Snapshot;
use crate::script::{ApplyPhase, Script, ScriptKind};
use crate::version::SchemaVersion;

/// What a migration callback gets to look at.
pub struct MigrationContext<'a> {
    /// Version persisted in the database before the upgrade.
    pub db_version: &'a SchemaVersion,
    pub app_version: &'a SchemaVersion,
    pub changes: &'a ChangeSet,
    /// Deployed snapshot.
    pub old: &'a Snapshot,
    /// Desired snapshot.
    pub new: &'a Snapshot,
}

type MigrationFn = Box<dyn Fn(&MigrationContext<'_>) -> Vec<String> + Send + Sync>;

enum MigrationBody {
    Sql(String),
    Callback(MigrationFn),
}

pub struct Migration {
    pub version: SchemaVersion,
    pub name: String,
    pub phase: ApplyPhase,
    body: MigrationBody,
}

impl Migration {
    /// SQL statements this migration contributes for `cx`.
    pub fn statements(&self, cx: &MigrationContext<'_>) -> Vec<String> {
        match &self.body {
            MigrationBody::Sql(sql) => vec![sql.clone()],
            MigrationBody::Callback(f) => f(cx),
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match self.body {
            MigrationBody::Sql(_) => "sql",
            MigrationBody::Callback(_) => "callback",
        };
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("body", &body)
            .finish()
    }
}

/// Registry of data migrations.
#[derive(Debug, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a static SQL migration in the default phase.
    pub fn add_sql(&mut self, version: &str, name: &str, sql: impl Into<String>) -> Result<&mut Self> {
        self.push(version, name, ApplyPhase::Default, MigrationBody::Sql(sql.into()))
    }

    /// Register a migration whose SQL is computed from the upgrade context.
    pub fn add_callback<F>(&mut self, version: &str, name: &str, phase: ApplyPhase, f: F) -> Result<&mut Self>
    where
        F: Fn(&MigrationContext<'_>) -> Vec<String> + Send + Sync + 'static,
    {
        self.push(version, name, phase, MigrationBody::Callback(Box::new(f)))
    }

    fn push(&mut self, version: &str, name: &str, phase: ApplyPhase, body: MigrationBody) -> Result<&mut Self> {
        self.migrations.push(Migration {
            version: version.parse()?,
            name: name.to_string(),
            phase,
            body,
        });
        Ok(self)
    }

    /// Load `V<version>__<name>.sql` files from `dir`. Other files are ignored.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut set = Self::new();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            ShiftplanError::ConfigError(format!(
                "Failed to read migrations directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut files = vec![];
        for entry in entries {
            let path = entry?.path();
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if let Some((version, name)) = parse_file_name(&file_name) {
                files.push((version.parse::<SchemaVersion>()?, version, name, path));
            } else {
                log::debug!("Skipping non-migration file; path={}", path.display());
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

        for (_, version, name, path) in files {
            let sql = std::fs::read_to_string(&path)?;
            set.add_sql(&version, &name, sql)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Migrations with `db < version <= app`, in version order. Nothing is
    /// pending on a fresh install (`db` is `None`).
    pub fn pending(&self, db: Option<&SchemaVersion>, app: &SchemaVersion) -> Vec<&Migration> {
        let Some(db) = db else {
            return vec![];
        };
        let mut pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| &m.version > db && &m.version <= app)
            .collect();
        pending.sort_by(|a, b| a.version.cmp(&b.version));
        pending
    }

    /// Scripts for every pending migration, tagged [`ScriptKind::Custom`].
    pub fn scripts(&self, cx: &MigrationContext<'_>) -> Vec<Script> {
        self.pending(Some(cx.db_version), cx.app_version)
            .into_iter()
            .flat_map(|m| {
                let object = format!("{} {}", m.version, m.name);
                m.statements(cx)
                    .into_iter()
                    .map(move |sql| Script::new(ScriptKind::Custom, object.clone(), sql).in_phase(m.phase))
            })
            .collect()
    }
}

static MIGRATION_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^V([0-9]+(?:[._][0-9]+)*)__(.+)\.sql$").unwrap());

fn parse_file_name(name: &str) -> Option<(String, String)> {
    let caps = MIGRATION_FILE_RE.captures(name)?;
    Some((caps[1].replace('_', "."), caps[2].replace('_', " ")))
}
