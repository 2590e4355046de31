use patron_merge_config::shared::{AuthConfig, RedshiftConnectionConfig, TlsConfig};
use secrecy::SecretString;
use tokio::runtime::Handle;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use uuid::Uuid;

use crate::credentials::DbCredentials;

/// Database every test database is created from and dropped through.
const MAINTENANCE_DATABASE: &str = "postgres";

/// Server the test databases are created on.
///
/// Read from environment variables:
/// - `TESTS_DATABASE_HOST`: Postgres server hostname (required)
/// - `TESTS_DATABASE_PORT`: Postgres server port (required)
/// - `TESTS_DATABASE_USERNAME`: Database user (required)
/// - `TESTS_DATABASE_PASSWORD`: Database password (optional)
#[derive(Debug, Clone)]
struct LocalServer {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
}

impl LocalServer {
    fn from_env() -> Self {
        Self {
            host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
            port: std::env::var("TESTS_DATABASE_PORT")
                .expect("TESTS_DATABASE_PORT must be set")
                .parse()
                .expect("TESTS_DATABASE_PORT must be a valid port number"),
            username: std::env::var("TESTS_DATABASE_USERNAME")
                .expect("TESTS_DATABASE_USERNAME must be set"),
            password: std::env::var("TESTS_DATABASE_PASSWORD").ok(),
        }
    }

    async fn connect(&self, database: &str) -> Client {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .dbname(database);
        if let Some(password) = &self.password {
            config.password(password);
        }

        let (client, connection) = config
            .connect(NoTls)
            .await
            .expect("Failed to connect to the test database server");
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                eprintln!("test database connection error: {err}");
            }
        });

        client
    }
}

/// A freshly created Postgres database that is dropped again when this value is dropped.
///
/// Redshift speaks the Postgres wire protocol, so the merge statements run unchanged against
/// it. Dropping requires a multi threaded runtime.
pub struct TestDatabase {
    pub name: String,
    pub client: Client,
    server: LocalServer,
}

impl TestDatabase {
    /// Credentials a session factory can connect to this database with.
    pub fn credentials(&self) -> DbCredentials {
        DbCredentials {
            host: self.server.host.clone(),
            username: self.server.username.clone(),
            password: self.password(),
        }
    }

    /// Plaintext auth settings for this database.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::Password {
            host: self.server.host.clone(),
            username: self.server.username.clone(),
            password: self.password(),
        }
    }

    /// Connection settings pointing at this database, without TLS or timeout.
    pub fn connection_config(&self) -> RedshiftConnectionConfig {
        RedshiftConnectionConfig {
            port: self.server.port,
            name: self.name.clone(),
            tls: TlsConfig::disabled(),
            statement_timeout_ms: 0,
        }
    }

    /// Runs `sql`, which may hold several statements.
    ///
    /// # Panics
    ///
    /// Panics if any statement fails.
    pub async fn execute(&self, sql: &str) {
        self.client
            .batch_execute(sql)
            .await
            .unwrap_or_else(|err| panic!("Failed to run `{sql}`: {err}"));
    }

    /// Returns every row of `table` rendered as a record literal, e.g. `(p1,addr1,)`, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the table cannot be read.
    pub async fn table_rows(&self, table: &str) -> Vec<String> {
        let messages = self
            .client
            .simple_query(&format!("SELECT t::text FROM {table} t ORDER BY 1;"))
            .await
            .unwrap_or_else(|err| panic!("Failed to read `{table}`: {err}"));

        messages
            .into_iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
                _ => None,
            })
            .collect()
    }

    fn password(&self) -> SecretString {
        SecretString::from(self.server.password.clone().unwrap_or_default())
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let server = self.server.clone();
        let name = self.name.clone();

        tokio::task::block_in_place(move || {
            Handle::current().block_on(async move { drop_test_database(&server, &name).await });
        });
    }
}

/// Creates a new database with a random name on the server configured through
/// `TESTS_DATABASE_*`.
///
/// # Panics
///
/// Panics if the variables are missing or the database cannot be created.
pub async fn spawn_test_database() -> TestDatabase {
    let server = LocalServer::from_env();
    let name = Uuid::new_v4().to_string();

    server
        .connect(MAINTENANCE_DATABASE)
        .await
        .batch_execute(&format!("CREATE DATABASE \"{name}\";"))
        .await
        .expect("Failed to create test database");

    let client = server.connect(&name).await;

    TestDatabase {
        name,
        client,
        server,
    }
}

/// Drops the test database, disconnecting any session still attached to it.
///
/// # Panics
///
/// Panics if the database cannot be dropped.
async fn drop_test_database(server: &LocalServer, name: &str) {
    server
        .connect(MAINTENANCE_DATABASE)
        .await
        .batch_execute(&format!("DROP DATABASE IF EXISTS \"{name}\" WITH (FORCE);"))
        .await
        .expect("Failed to destroy test database");
}
