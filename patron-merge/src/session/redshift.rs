use std::error::Error;
use std::io::BufReader;

use bytes::{BufMut, BytesMut};
use patron_merge_config::shared::{APPLICATION_NAME, RedshiftConnectionConfig, TlsConfig};
use rustls::ClientConfig;
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::{Format, IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, Config, Connection, NoTls, SimpleQueryMessage, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info, warn};

use crate::credentials::DbCredentials;
use crate::error::{ErrorKind, MergeError, MergeResult, postgres_error_detail};
use crate::merge_error;
use crate::queries::SqlStatement;
use crate::row::StagingRow;
use crate::session::{SessionFactory, WarehouseSession};

/// Parameter sent to the server in text format.
///
/// The server parses the text into whatever type it inferred for the placeholder, which keeps
/// row values independent from the column types of the staging table.
#[derive(Debug)]
struct TextParam<'a>(Option<&'a str>);

impl ToSql for TextParam<'_> {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.0 {
            Some(value) => {
                out.put_slice(value.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// Spawns a background task driving a connection until it terminates.
fn spawn_connection<T>(
    connection: Connection<Socket, T::Stream>,
) -> JoinHandle<Result<(), tokio_postgres::Error>>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        let result = connection.await;

        match &result {
            Err(err) => error!("an error occurred during the redshift connection: {}", err),
            Ok(()) => info!("redshift connection terminated successfully"),
        }

        result
    }
    .instrument(span);

    tokio::spawn(task)
}

/// Builds a rustls connector trusting only the configured PEM roots.
fn tls_connector(tls: &TlsConfig) -> MergeResult<MakeRustlsConnect> {
    let mut root_store = rustls::RootCertStore::empty();
    let mut root_certs_reader = BufReader::new(tls.trusted_root_certs.as_bytes());
    for cert in rustls_pemfile::certs(&mut root_certs_reader) {
        let cert = cert.map_err(|err| {
            merge_error!(
                ErrorKind::ConfigError,
                "Trusted root certificates are not valid PEM",
                source: err
            )
        })?;
        root_store.add(cert)?;
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(MakeRustlsConnect::new(tls_config))
}

/// Digits added to the text output of floating point values.
///
/// Rows are compared and re-inserted through their text form, which must round-trip exactly.
/// Redshift accepts at most 2.
const EXTRA_FLOAT_DIGITS: i8 = 2;

/// Settings applied to every session right after connecting.
fn session_settings(config: &RedshiftConnectionConfig) -> String {
    let mut settings = format!("SET extra_float_digits TO {EXTRA_FLOAT_DIGITS};");
    if config.statement_timeout_ms > 0 {
        settings.push_str(&format!(
            " SET statement_timeout TO {};",
            config.statement_timeout_ms
        ));
    }

    settings
}

/// Opens [`RedshiftSession`]s for a fixed database and connection settings.
#[derive(Debug, Clone)]
pub struct RedshiftSessionFactory {
    config: RedshiftConnectionConfig,
}

impl RedshiftSessionFactory {
    pub fn new(config: RedshiftConnectionConfig) -> Self {
        Self { config }
    }

    fn client_config(&self, credentials: &DbCredentials) -> Config {
        let mut config = Config::new();
        config
            .host(&credentials.host)
            .port(self.config.port)
            .dbname(&self.config.name)
            .user(&credentials.username)
            .password(credentials.password.expose_secret())
            .application_name(APPLICATION_NAME)
            .keepalives(true)
            .ssl_mode(if self.config.tls.enabled {
                SslMode::Require
            } else {
                SslMode::Disable
            });

        config
    }
}

impl SessionFactory for RedshiftSessionFactory {
    type Session = RedshiftSession;

    async fn open(&self, credentials: DbCredentials) -> MergeResult<RedshiftSession> {
        let config = self.client_config(&credentials);

        let (client, connection) = if self.config.tls.enabled {
            let (client, connection) = config.connect(tls_connector(&self.config.tls)?).await?;
            let connection = spawn_connection::<MakeRustlsConnect>(connection);
            info!(host = %credentials.host, "connected to redshift with tls");

            (client, connection)
        } else {
            let (client, connection) = config.connect(NoTls).await?;
            let connection = spawn_connection::<NoTls>(connection);
            info!(host = %credentials.host, "connected to redshift without tls");

            (client, connection)
        };

        let session = RedshiftSession { client, connection };
        session
            .client
            .batch_execute(&session_settings(&self.config))
            .await?;

        Ok(session)
    }
}

/// [`WarehouseSession`] over a `tokio-postgres` client.
pub struct RedshiftSession {
    client: Client,
    connection: JoinHandle<Result<(), tokio_postgres::Error>>,
}

impl RedshiftSession {
    async fn execute_statement(&self, statement: &SqlStatement) -> Result<(), tokio_postgres::Error> {
        if !statement.has_params() {
            return self.client.batch_execute(&statement.sql).await;
        }

        let params = statement
            .params
            .iter()
            .map(|value| TextParam(value.as_deref()))
            .collect::<Vec<_>>();
        let params = params
            .iter()
            .map(|param| param as &(dyn ToSql + Sync))
            .collect::<Vec<_>>();

        self.client.execute(statement.sql.as_str(), &params).await?;

        Ok(())
    }

    /// Rolls back the open transaction, logging instead of failing.
    async fn rollback(&self) {
        match self.client.batch_execute("ROLLBACK;").await {
            Ok(()) => warn!("transaction rolled back"),
            Err(err) => error!(
                error = %postgres_error_detail(&err),
                "failed to roll back transaction"
            ),
        }
    }
}

impl WarehouseSession for RedshiftSession {
    async fn fetch_rows(&self, sql: &str) -> MergeResult<Vec<StagingRow>> {
        debug!(sql, "running query");

        let messages = self.client.simple_query(sql).await?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let mut values = Vec::with_capacity(row.len());
                for index in 0..row.len() {
                    values.push(row.try_get(index)?.map(str::to_string));
                }
                rows.push(StagingRow::new(values));
            }
        }

        Ok(rows)
    }

    async fn execute_transaction(&self, statements: &[SqlStatement]) -> MergeResult<()> {
        self.client.batch_execute("BEGIN;").await.map_err(|err| {
            merge_error!(
                ErrorKind::TransactionFailed,
                "Could not start transaction",
                postgres_error_detail(&err),
                source: err
            )
        })?;

        for (index, statement) in statements.iter().enumerate() {
            debug!(sql = %statement.sql, params = statement.params.len(), "running statement");

            if let Err(err) = self.execute_statement(statement).await {
                self.rollback().await;

                return Err(merge_error!(
                    ErrorKind::TransactionFailed,
                    "Transaction failed and was rolled back",
                    format!(
                        "statement {} of {}: {}",
                        index + 1,
                        statements.len(),
                        postgres_error_detail(&err)
                    ),
                    source: err
                ));
            }
        }

        if let Err(err) = self.client.batch_execute("COMMIT;").await {
            self.rollback().await;

            return Err(merge_error!(
                ErrorKind::TransactionFailed,
                "Transaction failed to commit",
                postgres_error_detail(&err),
                source: err
            ));
        }

        Ok(())
    }

    async fn close(self) -> MergeResult<()> {
        let RedshiftSession { client, connection } = self;

        // Dropping the last client handle makes the connection send a terminate message.
        drop(client);

        match connection.await {
            Ok(result) => result.map_err(MergeError::from),
            Err(err) => Err(merge_error!(
                ErrorKind::ConnectionFailed,
                "Redshift connection task failed",
                err.to_string(),
                source: err
            )),
        }
    }
}
