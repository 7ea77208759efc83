//! Bookkeeping tables: the persisted schema version and the upgrade log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::Client;

use crate::error::Result;
use crate::script::Script;
use crate::upgrade::{UpgradeFailure, VersionStore};
use crate::version::{DbInfo, SchemaVersion};

use super::db::{quote_ident, quote_qualified};

/// A row from the upgrade log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub seq: i64,
    pub run_on: DateTime<Utc>,
    pub from_version: Option<String>,
    pub to_version: String,
    /// 1-based position of the script within its upgrade.
    pub ordinal: i32,
    pub kind: String,
    pub object: String,
    pub sql: String,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub error: Option<String>,
}

/// [`VersionStore`] backed by two tables in the target database.
pub struct PgVersionStore<'a> {
    client: &'a Client,
    schema: String,
    info_table: String,
    log_table: String,
}

impl<'a> PgVersionStore<'a> {
    pub fn new(
        client: &'a Client,
        schema: impl Into<String>,
        info_table: impl Into<String>,
        log_table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            schema: schema.into(),
            info_table: info_table.into(),
            log_table: log_table.into(),
        }
    }

    fn info_fq(&self) -> String {
        quote_qualified(&self.schema, &self.info_table)
    }

    fn log_fq(&self) -> String {
        quote_qualified(&self.schema, &self.log_table)
    }

    /// Create both bookkeeping tables if they do not exist.
    pub async fn ensure_tables(&self) -> Result<()> {
        let sql = format!(
            r#"
CREATE SCHEMA IF NOT EXISTS {schema};

CREATE TABLE IF NOT EXISTS {info} (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    version       VARCHAR(50) NOT NULL,
    instance_kind VARCHAR(20) NOT NULL,
    updated_on    TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS {log} (
    seq          BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    run_on       TIMESTAMPTZ NOT NULL DEFAULT now(),
    from_version VARCHAR(50),
    to_version   VARCHAR(50) NOT NULL,
    ordinal      INTEGER NOT NULL,
    kind         VARCHAR(40) NOT NULL,
    object       VARCHAR(1000) NOT NULL,
    sql          TEXT NOT NULL,
    duration_ms  BIGINT,
    success      BOOLEAN NOT NULL,
    error        TEXT
);
"#,
            schema = quote_ident(&self.schema),
            info = self.info_fq(),
            log = self.log_fq(),
        );
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn info_table_exists(&self) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (
                    SELECT FROM information_schema.tables
                    WHERE table_schema = $1 AND table_name = $2
                )",
                &[&self.schema, &self.info_table],
            )
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn insert_log(
        &self,
        from_version: Option<&str>,
        to_version: &str,
        ordinal: i32,
        script: &Script,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} \
             (from_version, to_version, ordinal, kind, object, sql, duration_ms, success, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.log_fq()
        );
        let kind = format!("{:?}", script.kind);
        let duration_ms = script.elapsed_ms.map(|ms| ms as i64);
        self.client
            .execute(
                &sql,
                &[
                    &from_version,
                    &to_version,
                    &ordinal,
                    &kind,
                    &script.object,
                    &script.sql,
                    &duration_ms,
                    &success,
                    &error,
                ],
            )
            .await?;
        Ok(())
    }

    /// Most recent upgrade log rows, newest first.
    pub async fn recent_log(&self, limit: i64) -> Result<Vec<LogEntry>> {
        if !self.info_table_exists().await? {
            return Ok(vec![]);
        }
        let sql = format!(
            "SELECT seq, run_on, from_version, to_version, ordinal, kind, object, sql, \
             duration_ms, success, error \
             FROM {} ORDER BY seq DESC LIMIT $1",
            self.log_fq()
        );
        let rows = self.client.query(&sql, &[&limit]).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(LogEntry {
                seq: row.get(0),
                run_on: row.get(1),
                from_version: row.get(2),
                to_version: row.get(3),
                ordinal: row.get(4),
                kind: row.get(5),
                object: row.get(6),
                sql: row.get(7),
                duration_ms: row.get(8),
                success: row.get(9),
                error: row.get(10),
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl VersionStore for PgVersionStore<'_> {
    async fn load(&self) -> Result<Option<DbInfo>> {
        if !self.info_table_exists().await? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT version, instance_kind, updated_on FROM {} WHERE id = 1",
            self.info_fq()
        );
        let Some(row) = self.client.query_opt(&sql, &[]).await? else {
            return Ok(None);
        };
        let version: String = row.get(0);
        let instance_kind: String = row.get(1);
        Ok(Some(DbInfo {
            version: SchemaVersion::parse(&version)?,
            instance_kind: instance_kind.parse()?,
            updated_on: Some(row.get(2)),
        }))
    }

    async fn record_success(&self, info: &DbInfo, applied: &[Script]) -> Result<()> {
        self.ensure_tables().await?;
        let previous = self.load().await?.map(|i| i.version.to_string());
        let to_version = info.version.to_string();

        for (i, script) in applied.iter().enumerate() {
            self.insert_log(previous.as_deref(), &to_version, i as i32 + 1, script, true, None)
                .await?;
        }

        let sql = format!(
            "INSERT INTO {} (id, version, instance_kind, updated_on) VALUES (1, $1, $2, now()) \
             ON CONFLICT (id) DO UPDATE \
             SET version = EXCLUDED.version, instance_kind = EXCLUDED.instance_kind, updated_on = now()",
            self.info_fq()
        );
        let instance_kind = info.instance_kind.to_string();
        self.client
            .execute(&sql, &[&to_version, &instance_kind])
            .await?;

        log::info!(
            "Recorded upgrade; version={}, previous={}, scripts={}",
            to_version,
            previous.as_deref().unwrap_or("none"),
            applied.len()
        );
        Ok(())
    }

    async fn record_failure(&self, failure: &UpgradeFailure) -> Result<()> {
        self.ensure_tables().await?;
        let from = failure.from_version.as_ref().map(|v| v.to_string());
        let to = failure.to_version.to_string();

        for (i, script) in failure.applied.iter().enumerate() {
            self.insert_log(from.as_deref(), &to, i as i32 + 1, script, true, None)
                .await?;
        }
        self.insert_log(
            from.as_deref(),
            &to,
            failure.index as i32,
            &failure.failed,
            false,
            Some(&failure.error),
        )
        .await?;
        Ok(())
    }
}
