//! Error types for pool construction.

use sea_orm::DbErr;

/// Why a connection string could not be turned into a [`PoolConfig`].
///
/// [`PoolConfig`]: crate::PoolConfig
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("connection string has no scheme: {0:?}")]
    MissingScheme(String),

    #[error("unsupported database scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid value {value:?} for {param}")]
    InvalidParam { param: &'static str, value: String },
}

/// Errors returned while building a traced pool.
///
/// Query failures are not represented here: they are logged by the tracer
/// and handed back to the caller as an unchanged [`DbErr`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("tracer already set, cannot attach logging tracer")]
    TracerAlreadySet,

    #[error(transparent)]
    Connect(DbErr),

    #[error("failed to ping database: {0}")]
    Ping(#[source] DbErr),
}

pub type Result<T> = std::result::Result<T, Error>;
