//! # sea-orm-querylog
//!
//! Structured query logging for SeaORM connection pools.
//!
//! Every query executed through a [`TracedPool`] produces one structured
//! record: how long it took, its bound arguments, the whitespace-normalized
//! SQL text and either the row count or the error message. Records go to a
//! [`LogSink`]; the default [`TracingSink`] forwards them to `tracing`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sea_orm_querylog::{connect_with_trace, TracingSink};
//!
//! let pool = connect_with_trace(TracingSink, "postgres://localhost/mydb?pool_max_conns=10").await?;
//!
//! // Use it exactly like a normal DatabaseConnection
//! let users = Users::find().all(&pool).await?;
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! use sea_orm_querylog::{connect_with_config, PoolConfig, TracingSink};
//!
//! let config = PoolConfig::new("postgres://localhost/mydb")
//!     .with_max_connections(20)
//!     .with_idle_timeout(Duration::from_secs(300));
//!
//! // Logs the pool options once at info level, then every query
//! let pool = connect_with_config(TracingSink, config).await?;
//! ```
//!
//! ## Record Fields
//!
//! | Field | Description |
//! |-------|-------------|
//! | `duration` | Elapsed time between query start and end |
//! | `args` | Bound parameter values |
//! | `sql` | SQL text with whitespace runs collapsed |
//! | `rows_affected` | Row count for DELETE, INSERT and UPDATE |
//! | `rows_returned` | Row count for every other statement |
//! | `error` | Error message (failed queries only, logged at ERROR) |

mod config;
mod connection;
mod error;
mod record;
mod sql;
mod tracer;
mod transaction;

pub use config::PoolConfig;
pub use connection::{connect_with_config, connect_with_trace, TracedPool, TracingExt};
pub use error::{Error, ParseError, Result};
pub use record::{FieldValue, LogRecord, LogSink, TracingSink, TRACING_TARGET};
pub use sql::{normalize_sql, parse_operation, SqlOperation};
pub use tracer::{
    CommandTag, LoggingQueryTracer, QueryOutcome, QueryStart, QueryTracer, TraceContext,
};
pub use transaction::TracedTransaction;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        connect_with_config, connect_with_trace, LoggingQueryTracer, PoolConfig, TracedPool,
        TracingExt, TracingSink,
    };
}
