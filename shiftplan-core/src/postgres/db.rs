//! Connections, identifier quoting and script execution.

use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::Client;

use crate::config::{DatabaseConfig, SslMode};
use crate::error::{Result, ShiftplanError};
use crate::upgrade::{ScriptConnection, ScriptExecutor};

/// Quote a SQL identifier.
///
/// Doubles any embedded double-quotes and wraps in double-quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified name, `sales.order` → `"sales"."order"`.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    if schema.is_empty() {
        quote_ident(name)
    } else {
        format!("{}.{}", quote_ident(schema), quote_ident(name))
    }
}

/// Validate that a SQL identifier contains only `[a-zA-Z0-9_]`.
///
/// Used for names taken from configuration (schemas, bookkeeping tables)
/// that end up in queries.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ShiftplanError::ConfigError(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ShiftplanError::ConfigError(format!(
            "Identifier '{}' contains invalid characters. Only [a-zA-Z0-9_] are allowed.",
            name
        )));
    }
    Ok(())
}

fn rustls_config() -> Result<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(std::sync::Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ShiftplanError::ConfigError(format!("TLS setup failed: {}", e)))?
    .with_root_certificates(root_store)
    .with_no_client_auth();
    Ok(config)
}

/// Authentication failures are never retried.
fn is_permanent_error(e: &ShiftplanError) -> bool {
    match e {
        ShiftplanError::DatabaseError(pg) => pg.as_db_error().is_some_and(|db| {
            // 28P01 = invalid_password, 28000 = invalid_authorization_specification
            matches!(db.code().code(), "28P01" | "28000")
        }),
        ShiftplanError::ConfigError(_) => true,
        _ => false,
    }
}

fn spawn_connection_task<F>(connection: F)
where
    F: std::future::Future<Output = std::result::Result<(), tokio_postgres::Error>>
        + Send
        + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::error!("Database connection error: {}", e);
        }
    });
}

async fn connect_tls(conn_string: &str) -> Result<Client> {
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(rustls_config()?);
    let (client, connection) = tokio_postgres::connect(conn_string, tls).await?;
    spawn_connection_task(connection);
    Ok(client)
}

async fn connect_plain(conn_string: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(conn_string, tokio_postgres::NoTls).await?;
    spawn_connection_task(connection);
    Ok(client)
}

async fn connect_once(conn_string: &str, db: &DatabaseConfig) -> Result<Client> {
    let attempt = async {
        match db.ssl_mode {
            SslMode::Disable => connect_plain(conn_string).await,
            SslMode::Require => connect_tls(conn_string).await,
            SslMode::Prefer => match connect_tls(conn_string).await {
                Ok(client) => Ok(client),
                Err(e) => {
                    log::debug!("TLS connection failed, falling back to plaintext; error={}", e);
                    connect_plain(conn_string).await
                }
            },
        }
    };

    if db.connect_timeout_secs == 0 {
        return attempt.await;
    }
    tokio::time::timeout(Duration::from_secs(db.connect_timeout_secs as u64), attempt)
        .await
        .unwrap_or_else(|_| Err(ShiftplanError::DatabaseError(tokio_postgres::Error::__private_api_timeout())))
}

/// Connect, retrying up to `db.connect_retries` times with exponential
/// backoff and jitter.
pub async fn connect(conn_string: &str, db: &DatabaseConfig) -> Result<Client> {
    let mut attempt = 0;
    loop {
        match connect_once(conn_string, db).await {
            Ok(client) => {
                if attempt > 0 {
                    log::info!("Connected after retry; attempt={}", attempt + 1);
                }
                if db.statement_timeout_secs > 0 {
                    client
                        .batch_execute(&format!(
                            "SET statement_timeout = '{}s'",
                            db.statement_timeout_secs
                        ))
                        .await?;
                }
                return Ok(client);
            }
            Err(e) if is_permanent_error(&e) || attempt >= db.connect_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                let delay = Duration::from_secs(std::cmp::min(1u64 << attempt, 30))
                    + Duration::from_millis(fastrand::u64(0..1000));
                log::info!(
                    "Connection attempt failed, retrying; attempt={}, max_attempts={}, delay_ms={}, error={}",
                    attempt,
                    db.connect_retries + 1,
                    delay.as_millis() as u64,
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Opens a dedicated connection per upgrade.
pub struct PgExecutor {
    conn_string: String,
    database: DatabaseConfig,
}

impl PgExecutor {
    pub fn new(conn_string: impl Into<String>, database: DatabaseConfig) -> Self {
        Self {
            conn_string: conn_string.into(),
            database,
        }
    }
}

#[async_trait]
impl ScriptExecutor for PgExecutor {
    async fn open(&self) -> Result<Box<dyn ScriptConnection>> {
        let client = connect(&self.conn_string, &self.database).await?;
        Ok(Box::new(PgConnection { client }))
    }
}

struct PgConnection {
    client: Client,
}

#[async_trait]
impl ScriptConnection for PgConnection {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Dropping the client ends the spawned connection task.
        drop(self.client);
        Ok(())
    }
}
