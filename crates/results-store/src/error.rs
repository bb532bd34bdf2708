use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unsupported data store type: {0}")]
    UnsupportedBackend(String),

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to connect to {backend}: {message}")]
    Connection { backend: &'static str, message: String },

    #[error("{0} store is not connected")]
    NotConnected(&'static str),

    #[error("failed to upsert scan data: {message}")]
    Write { message: String, transient: bool },

    #[error("upsert timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    pub fn connection(backend: &'static str, err: impl Display) -> Self {
        StoreError::Connection { backend, message: err.to_string() }
    }

    pub fn write(message: impl Into<String>, transient: bool) -> Self {
        StoreError::Write { message: message.into(), transient }
    }

    /// Whether retrying the same write may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Write { transient: true, .. } | StoreError::Timeout(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let transient = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        );
        StoreError::write(err.to_string(), transient)
    }
}

#[cfg(feature = "cockroach")]
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        let transient = postgres_error_is_transient(&err);
        StoreError::write(err.to_string(), transient)
    }
}

#[cfg(feature = "cockroach")]
impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StoreError::write(format!("connection pool: {err}"), true)
    }
}

#[cfg(feature = "cockroach")]
fn postgres_error_is_transient(err: &tokio_postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }
    match err.code() {
        // no SQLSTATE: I/O or protocol failure below the SQL layer
        None => true,
        Some(state) => sqlstate_is_transient(state.code()),
    }
}

#[cfg(feature = "cockroach")]
fn sqlstate_is_transient(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "57P01" | "57P02" | "57P03")
}
