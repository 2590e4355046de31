//! Error types and result definitions for the merge job.
//!
//! [`MergeError`] carries an [`ErrorKind`] classification, a static description, optional
//! dynamic detail, an optional source error, and the callsite location and backtrace captured
//! when the error was created.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use tokio_postgres::error::SqlState;

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Categories of failures the merge job can hit.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Credential errors
    CredentialDecryptionFailed,
    CredentialIssueFailed,

    // Connection errors
    ConnectionFailed,
    AuthenticationFailed,

    // Query & merge errors
    QueryFailed,
    ReconciliationConflict,
    IntegrityCheckFailed,
    TransactionFailed,

    // Data errors
    InvalidData,

    // Configuration & IO errors
    ConfigError,
    EncryptionError,
    IoError,
    SerializationError,

    Unknown,
}

impl ErrorKind {
    /// Returns a stable snake case name for logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CredentialDecryptionFailed => "credential_decryption_failed",
            ErrorKind::CredentialIssueFailed => "credential_issue_failed",
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::QueryFailed => "query_failed",
            ErrorKind::ReconciliationConflict => "reconciliation_conflict",
            ErrorKind::IntegrityCheckFailed => "integrity_check_failed",
            ErrorKind::TransactionFailed => "transaction_failed",
            ErrorKind::InvalidData => "invalid_data",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::EncryptionError => "encryption_error",
            ErrorKind::IoError => "io_error",
            ErrorKind::SerializationError => "serialization_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type of the merge job.
#[derive(Debug, Clone)]
pub struct MergeError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl MergeError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the dynamic detail attached to this error, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the backtrace captured when the error was created.
    ///
    /// The backtrace is only populated when `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE` is set.
    pub fn backtrace(&self) -> &Backtrace {
        self.backtrace.as_ref()
    }

    /// Returns the callsite at which the error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MergeError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }
}

impl PartialEq for MergeError {
    fn eq(&self, other: &MergeError) -> bool {
        self.kind == other.kind && self.description == other.description
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            if detail.trim().is_empty() {
                write!(f, "\n  Detail: <empty>")?;
            } else {
                write!(f, "\n  Detail:")?;
                for line in detail.lines() {
                    write!(f, "\n    {line}")?;
                }
            }
        }

        Ok(())
    }
}

impl error::Error for MergeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Creates a [`MergeError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for MergeError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> MergeError {
        MergeError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`MergeError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for MergeError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> MergeError {
        MergeError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

impl From<std::io::Error> for MergeError {
    #[track_caller]
    fn from(err: std::io::Error) -> MergeError {
        let detail = err.to_string();
        MergeError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for MergeError {
    #[track_caller]
    fn from(err: serde_json::Error) -> MergeError {
        let detail = err.to_string();
        MergeError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("JSON serialization failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<base64::DecodeError> for MergeError {
    #[track_caller]
    fn from(err: base64::DecodeError) -> MergeError {
        let detail = err.to_string();
        MergeError::from_components(
            ErrorKind::CredentialDecryptionFailed,
            Cow::Borrowed("Encrypted credential is not valid base64"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::string::FromUtf8Error> for MergeError {
    #[track_caller]
    fn from(err: std::string::FromUtf8Error) -> MergeError {
        let detail = err.to_string();
        MergeError::from_components(
            ErrorKind::CredentialDecryptionFailed,
            Cow::Borrowed("Decrypted credential is not valid UTF-8"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<rustls::Error> for MergeError {
    #[track_caller]
    fn from(err: rustls::Error) -> MergeError {
        let detail = err.to_string();
        MergeError::from_components(
            ErrorKind::EncryptionError,
            Cow::Borrowed("TLS configuration failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps a SQLSTATE onto an [`ErrorKind`] and description.
///
/// Well known codes are matched first, then the two character class prefix decides.
fn classify_sqlstate(sqlstate: &SqlState) -> (ErrorKind, &'static str) {
    match *sqlstate {
        SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
            ErrorKind::AuthenticationFailed,
            "Redshift authentication failed",
        ),
        SqlState::INSUFFICIENT_PRIVILEGE => {
            (ErrorKind::QueryFailed, "Redshift permission denied")
        }
        SqlState::UNDEFINED_TABLE | SqlState::UNDEFINED_COLUMN | SqlState::UNDEFINED_SCHEMA => {
            (ErrorKind::QueryFailed, "Redshift object not found")
        }
        SqlState::QUERY_CANCELED => (ErrorKind::QueryFailed, "Redshift query canceled"),
        SqlState::T_R_SERIALIZATION_FAILURE | SqlState::T_R_DEADLOCK_DETECTED => (
            ErrorKind::TransactionFailed,
            "Redshift transaction conflict",
        ),
        SqlState::ADMIN_SHUTDOWN | SqlState::CRASH_SHUTDOWN | SqlState::CANNOT_CONNECT_NOW => {
            (ErrorKind::ConnectionFailed, "Redshift is shutting down")
        }
        _ => match sqlstate.code().get(..2) {
            Some("08") => (ErrorKind::ConnectionFailed, "Redshift connection failed"),
            Some("28") => (
                ErrorKind::AuthenticationFailed,
                "Redshift authentication failed",
            ),
            Some("22") | Some("23") => (ErrorKind::InvalidData, "Redshift rejected row data"),
            Some("25") | Some("40") => (
                ErrorKind::TransactionFailed,
                "Redshift transaction state error",
            ),
            Some("53") | Some("57") => (
                ErrorKind::ConnectionFailed,
                "Redshift resource or operator error",
            ),
            Some("F0") => (ErrorKind::ConfigError, "Redshift configuration error"),
            _ => (ErrorKind::QueryFailed, "Redshift query failed"),
        },
    }
}

/// Renders a database error with the server's message when one was received.
///
/// The `Display` of a server error is only `db error`, so the message, SQLSTATE, detail,
/// hint and constraint are pulled from the [`tokio_postgres::error::DbError`] instead.
pub(crate) fn postgres_error_detail(err: &tokio_postgres::Error) -> String {
    let Some(db_error) = err.as_db_error() else {
        return err.to_string();
    };

    let mut detail = format!(
        "{} {}: {}",
        db_error.severity(),
        db_error.code().code(),
        db_error.message()
    );
    if let Some(extra) = db_error.detail() {
        detail.push_str(&format!("; detail: {extra}"));
    }
    if let Some(hint) = db_error.hint() {
        detail.push_str(&format!("; hint: {hint}"));
    }
    if let Some(constraint) = db_error.constraint() {
        detail.push_str(&format!("; constraint: {constraint}"));
    }

    detail
}

/// Converts [`tokio_postgres::Error`] to [`MergeError`] using the SQLSTATE when present.
///
/// Errors without a SQLSTATE come from the client or the socket and are reported as
/// connection failures.
impl From<tokio_postgres::Error> for MergeError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> MergeError {
        let (kind, description) = match err.code() {
            Some(sqlstate) => classify_sqlstate(sqlstate),
            None => (ErrorKind::ConnectionFailed, "Redshift connection failed"),
        };

        let detail = postgres_error_detail(&err);
        MergeError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
