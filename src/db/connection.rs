use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolError, RecyclingMethod};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};
use tokio_postgres::{CancelToken, NoTls};
use tracing::{debug, warn};

use super::datasource::{Connector, Datasource};
use super::query::{row_to_json, DriverError, JsonRow, Statement};
use crate::error::DatasourceError;
use crate::template::ParamValue;

/// TLS options applied to every PostgreSQL datasource whose URI asks for
/// `sslmode=prefer` or `sslmode=require`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Accept invalid/self-signed certificates. Use with caution.
    pub accept_invalid_certs: bool,
    /// Optional PEM file with one or more CA certificates.
    /// If not set, the system CA store is used.
    pub ca_cert_path: Option<PathBuf>,
}

/// Builds pooled PostgreSQL datasources.
///
/// Pools are created lazily: `connect` only validates the URI and prepares
/// the pool, the first query opens the first connection.
#[derive(Debug, Clone)]
pub struct PgConnector {
    pub pool_max_size: usize,
    pub tls: TlsConfig,
}

impl PgConnector {
    pub fn new(pool_max_size: usize, tls: TlsConfig) -> Self {
        Self { pool_max_size, tls }
    }
}

impl Connector for PgConnector {
    fn connect(&self, uri: &str) -> Result<Box<dyn Datasource>, DatasourceError> {
        let pg_config = tokio_postgres::Config::from_str(uri)
            .map_err(|e| DatasourceError::InvalidUri(e.to_string()))?;
        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let (manager, tls) = match pg_config.get_ssl_mode() {
            SslMode::Disable => (
                Manager::from_config(pg_config, NoTls, manager_config),
                PgTls::Plain,
            ),
            _ => {
                let connector = build_tls_connector(&self.tls)?;
                (
                    Manager::from_config(pg_config, connector.clone(), manager_config),
                    PgTls::Native(connector),
                )
            }
        };

        let pool = Pool::builder(manager)
            .max_size(self.pool_max_size)
            .build()
            .map_err(|e| DatasourceError::Pool(e.to_string()))?;

        Ok(Box::new(PgDatasource { pool, tls }))
    }
}

#[derive(Clone)]
enum PgTls {
    Plain,
    Native(MakeTlsConnector),
}

pub struct PgDatasource {
    pool: Pool,
    tls: PgTls,
}

#[async_trait]
impl Datasource for PgDatasource {
    fn driver(&self) -> &'static str {
        "postgres"
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<JsonRow>, DatasourceError> {
        let client = self.pool.get().await.map_err(|e| match e {
            PoolError::Backend(err) => DatasourceError::Query(DriverError::from_pg_error(&err, "")),
            PoolError::Closed => DatasourceError::Closed,
            other => DatasourceError::Pool(other.to_string()),
        })?;

        let values: Vec<Box<dyn ToSql + Send + Sync>> =
            statement.params.iter().map(to_sql_value).collect();
        let params: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|v| &**v as &(dyn ToSql + Sync))
            .collect();

        // If the caller gives up (timeout, disconnect) this future is dropped
        // mid-query and the guard asks the server to cancel it.
        let mut guard = CancelOnDrop::new(client.cancel_token(), self.tls.clone());
        let result = if params.is_empty() {
            client.query(statement.sql.as_str(), &[]).await
        } else {
            match prepare(&client, statement).await {
                Ok(prepared) => client.query(&prepared, &params).await,
                Err(e) => Err(e),
            }
        };
        guard.disarm();

        let rows = result
            .map_err(|e| DatasourceError::Query(DriverError::from_pg_error(&e, &statement.sql)))?;
        debug!(rows = rows.len(), "postgres query finished");
        Ok(rows.iter().map(row_to_json).collect())
    }

    fn close(&self) {
        self.pool.close();
    }
}

/// Prepare (or reuse) the statement on this connection.
///
/// Untyped string placeholders take their type from context. When the
/// context gives none (`SELECT $1`), the statement is prepared again with
/// each placeholder typed after its argument.
async fn prepare(
    client: &deadpool_postgres::Client,
    statement: &Statement,
) -> Result<tokio_postgres::Statement, tokio_postgres::Error> {
    match client.prepare_cached(&statement.sql).await {
        Err(e) if e.code() == Some(&SqlState::INDETERMINATE_DATATYPE) => {
            let types: Vec<Type> = statement.params.iter().map(declared_type).collect();
            client.prepare_typed_cached(&statement.sql, &types).await
        }
        other => other,
    }
}

fn declared_type(value: &ParamValue) -> Type {
    match value {
        ParamValue::Text(_) => Type::TEXT,
        ParamValue::Integer(_) => Type::INT8,
        ParamValue::Float(_) => Type::FLOAT8,
    }
}

/// A string sent in PostgreSQL's text format.
///
/// The server parses it with the input function of whatever type it inferred
/// for the placeholder, exactly as it would a quoted literal, so a string can
/// be compared against timestamptz, uuid, date or enum columns.
#[derive(Debug)]
struct UntypedText(String);

impl ToSql for UntypedText {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

fn to_sql_value(value: &ParamValue) -> Box<dyn ToSql + Send + Sync> {
    match value {
        ParamValue::Text(s) => Box::new(UntypedText(s.clone())),
        ParamValue::Integer(i) => Box::new(*i),
        ParamValue::Float(f) => Box::new(*f),
    }
}

struct CancelOnDrop {
    token: Option<CancelToken>,
    tls: PgTls,
}

impl CancelOnDrop {
    fn new(token: CancelToken, tls: PgTls) -> Self {
        Self {
            token: Some(token),
            tls,
        }
    }

    fn disarm(&mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let tls = self.tls.clone();
        runtime.spawn(async move {
            let result = match tls {
                PgTls::Plain => token.cancel_query(NoTls).await,
                PgTls::Native(connector) => token.cancel_query(connector).await,
            };
            match result {
                Ok(()) => debug!("cancelled abandoned query"),
                Err(e) => warn!(
                    "failed to cancel abandoned query: {}",
                    DriverError::from_pg_error(&e, "")
                ),
            }
        });
    }
}

/// Build a TLS connector from the configured certificate options.
fn build_tls_connector(config: &TlsConfig) -> Result<MakeTlsConnector, DatasourceError> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        for cert in load_ca_certificates(ca_path)? {
            builder.add_root_certificate(cert);
        }
    }
    // If no custom CA is given, use system defaults

    let connector = builder
        .build()
        .map_err(|e| DatasourceError::Tls(format!("failed to build TLS connector: {e}")))?;

    Ok(MakeTlsConnector::new(connector))
}

/// Read every certificate from a PEM bundle.
fn load_ca_certificates(path: &Path) -> Result<Vec<native_tls::Certificate>, DatasourceError> {
    let tls_error = DatasourceError::Tls;

    let pem = std::fs::read_to_string(path)
        .map_err(|e| tls_error(format!("failed to read CA file {}: {e}", path.display())))?;

    let certs = split_pem_bundle(&pem)
        .into_iter()
        .map(|block| {
            native_tls::Certificate::from_pem(block.as_bytes())
                .map_err(|e| tls_error(format!("failed to parse certificate: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if certs.is_empty() {
        return Err(tls_error(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Split a PEM bundle into individual `BEGIN/END CERTIFICATE` blocks.
fn split_pem_bundle(pem: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_cert = false;

    for line in pem.lines() {
        if line.contains("-----BEGIN CERTIFICATE-----") {
            in_cert = true;
            current.clear();
        }
        if in_cert {
            current.push_str(line.trim());
            current.push('\n');
        }
        if line.contains("-----END CERTIFICATE-----") && in_cert {
            in_cert = false;
            blocks.push(std::mem::take(&mut current));
        }
    }

    blocks
}
