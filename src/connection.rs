//! Traced connection pool and pool construction helpers.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    AccessMode, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    DbErr, ExecResult, IsolationLevel, QueryResult, Statement, StreamTrait, TransactionError,
    TransactionTrait,
};
use tracing::{field, Instrument, Span};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::record::{LogSink, TracingSink};
use crate::sql::{parse_operation, SqlOperation};
use crate::tracer::{CommandTag, LoggingQueryTracer, QueryOutcome, QueryStart, QueryTracer};
use crate::transaction::TracedTransaction;

/// A SeaORM connection pool whose queries pass through a [`QueryTracer`].
///
/// `TracedPool` implements `ConnectionTrait`, `StreamTrait` and
/// `TransactionTrait`, so it can be handed to any SeaORM query in place of a
/// `DatabaseConnection`. Each query calls [`QueryTracer::on_query_start`]
/// before it runs and [`QueryTracer::on_query_end`] with its outcome
/// afterwards. The query result is returned unchanged.
///
/// Cloning is cheap: clones share the connection pool and the tracer.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm_querylog::{connect_with_trace, TracingSink};
///
/// let pool = connect_with_trace(TracingSink, "postgres://localhost/mydb").await?;
///
/// // Every query is logged under the `sea_orm_querylog` target
/// let users = Users::find().all(&pool).await?;
/// ```
#[derive(Clone)]
pub struct TracedPool {
    inner: Arc<DatabaseConnection>,
    tracer: Arc<dyn QueryTracer>,
}

impl TracedPool {
    /// Wrap an open connection with the given tracer.
    pub fn new(connection: DatabaseConnection, tracer: impl QueryTracer) -> Self {
        Self::with_shared_tracer(connection, Arc::new(tracer))
    }

    /// Wrap an open connection, logging queries through `tracing`.
    pub fn wrap(connection: DatabaseConnection) -> Self {
        Self::new(connection, LoggingQueryTracer::new(TracingSink))
    }

    pub fn with_shared_tracer(
        connection: DatabaseConnection,
        tracer: Arc<dyn QueryTracer>,
    ) -> Self {
        Self {
            inner: Arc::new(connection),
            tracer,
        }
    }

    /// Open a pool from `config` and verify it answers a ping.
    ///
    /// Uses the tracer installed on `config`, or a [`LoggingQueryTracer`]
    /// writing to [`TracingSink`] when there is none.
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        let tracer = match config.tracer() {
            Some(tracer) => tracer.clone(),
            None => Arc::new(LoggingQueryTracer::new(TracingSink)),
        };

        let connection = Database::connect(config.connect_options())
            .await
            .map_err(Error::Connect)?;
        let pool = Self::with_shared_tracer(connection, tracer);
        pool.ping().await.map_err(Error::Ping)?;

        Ok(pool)
    }

    /// Liveness check: one round trip to the database.
    pub async fn ping(&self) -> std::result::Result<(), DbErr> {
        self.inner().ping().await
    }

    /// Start a transaction whose statements, including `BEGIN`, `COMMIT`
    /// and `ROLLBACK`, pass through this pool's tracer.
    pub async fn begin_traced(&self) -> std::result::Result<TracedTransaction, DbErr> {
        let txn = run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            QueryStart::new(SqlOperation::Begin.as_str(), Vec::new()),
            self.inner().begin(),
            |_| 0,
        )
        .await?;

        Ok(TracedTransaction::new(txn, self.tracer.clone()))
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    pub fn tracer(&self) -> &Arc<dyn QueryTracer> {
        &self.tracer
    }

    /// Return the inner `DatabaseConnection`, or `None` while other clones
    /// of this pool are alive.
    pub fn into_inner(self) -> Option<DatabaseConnection> {
        Arc::into_inner(self.inner)
    }

    fn db_system(&self) -> &'static str {
        db_system(self.get_database_backend())
    }
}

fn db_system(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Postgres => "postgresql",
        DbBackend::MySql => "mysql",
        DbBackend::Sqlite => "sqlite",
    }
}

fn query_span(backend: DbBackend, operation: SqlOperation) -> Span {
    tracing::debug_span!(
        "db.query",
        db.system = %db_system(backend),
        db.operation = %operation,
    )
}

/// Run `query` between the tracer's start and end hooks.
pub(crate) async fn run_traced<T, F>(
    tracer: &dyn QueryTracer,
    backend: DbBackend,
    start: QueryStart,
    query: F,
    rows: impl FnOnce(&T) -> u64,
) -> std::result::Result<T, DbErr>
where
    F: Future<Output = std::result::Result<T, DbErr>>,
{
    let operation = parse_operation(&start.sql);
    let context = tracer.on_query_start(backend, start);

    let result = query.instrument(query_span(backend, operation)).await;

    let outcome = match &result {
        Ok(value) => QueryOutcome::Completed(CommandTag::new(operation, rows(value))),
        Err(err) => QueryOutcome::Failed(err),
    };
    tracer.on_query_end(backend, Some(context), outcome);

    result
}

pub(crate) fn statement_start(stmt: &Statement) -> QueryStart {
    let args = stmt
        .values
        .as_ref()
        .map(|values| values.0.clone())
        .unwrap_or_default();
    QueryStart::new(stmt.sql.clone(), args)
}

impl fmt::Debug for TracedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedPool")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl From<DatabaseConnection> for TracedPool {
    fn from(connection: DatabaseConnection) -> Self {
        Self::wrap(connection)
    }
}

impl AsRef<DatabaseConnection> for TracedPool {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

#[async_trait]
impl ConnectionTrait for TracedPool {
    fn get_database_backend(&self) -> DbBackend {
        self.inner().get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> std::result::Result<ExecResult, DbErr> {
        let start = statement_start(&stmt);
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            start,
            self.inner().execute(stmt),
            |r| r.rows_affected(),
        )
        .await
    }

    async fn execute_unprepared(&self, sql: &str) -> std::result::Result<ExecResult, DbErr> {
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            QueryStart::new(sql, Vec::new()),
            self.inner().execute_unprepared(sql),
            |r| r.rows_affected(),
        )
        .await
    }

    async fn query_one(&self, stmt: Statement) -> std::result::Result<Option<QueryResult>, DbErr> {
        let start = statement_start(&stmt);
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            start,
            self.inner().query_one(stmt),
            |row| u64::from(row.is_some()),
        )
        .await
    }

    async fn query_all(&self, stmt: Statement) -> std::result::Result<Vec<QueryResult>, DbErr> {
        let start = statement_start(&stmt);
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            start,
            self.inner().query_all(stmt),
            |rows| rows.len() as u64,
        )
        .await
    }

    fn support_returning(&self) -> bool {
        self.inner().support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner().is_mock_connection()
    }
}

/// Streams are traced when they are opened: the record carries the
/// statement and the time to first result, with a row count of 0 since rows
/// are not known yet.
#[async_trait]
impl StreamTrait for TracedPool {
    type Stream<'a> = <DatabaseConnection as StreamTrait>::Stream<'a>;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Self::Stream<'a>, DbErr>> + 'a + Send>>
    {
        let start = statement_start(&stmt);
        let backend = self.get_database_backend();

        Box::pin(run_traced(
            self.tracer.as_ref(),
            backend,
            start,
            self.inner().stream(stmt),
            |_| 0,
        ))
    }
}

/// `begin` is traced as a `BEGIN` statement. The returned
/// `DatabaseTransaction` and the transaction passed to `transaction`
/// callbacks are plain SeaORM transactions; use
/// [`TracedPool::begin_traced`] to trace the statements inside.
#[async_trait]
impl TransactionTrait for TracedPool {
    async fn begin(&self) -> std::result::Result<DatabaseTransaction, DbErr> {
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            QueryStart::new(SqlOperation::Begin.as_str(), Vec::new()),
            self.inner().begin(),
            |_| 0,
        )
        .await
    }

    async fn begin_with_config(
        &self,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> std::result::Result<DatabaseTransaction, DbErr> {
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            QueryStart::new(SqlOperation::Begin.as_str(), Vec::new()),
            self.inner().begin_with_config(isolation_level, access_mode),
            |_| 0,
        )
        .await
    }

    async fn transaction<F, T, E>(
        &self,
        callback: F,
    ) -> std::result::Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let span = tracing::info_span!(
            "db.transaction",
            db.system = %self.db_system(),
            otel.status_code = field::Empty,
        );

        let result = self
            .inner()
            .transaction(callback)
            .instrument(span.clone())
            .await;

        span.record("otel.status_code", if result.is_ok() { "OK" } else { "ERROR" });
        result
    }

    async fn transaction_with_config<F, T, E>(
        &self,
        callback: F,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> std::result::Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let span = tracing::info_span!(
            "db.transaction",
            db.system = %self.db_system(),
            db.transaction.isolation_level = ?isolation_level,
            db.transaction.access_mode = ?access_mode,
            otel.status_code = field::Empty,
        );

        let result = self
            .inner()
            .transaction_with_config(callback, isolation_level, access_mode)
            .instrument(span.clone())
            .await;

        span.record("otel.status_code", if result.is_ok() { "OK" } else { "ERROR" });
        result
    }
}

/// Parse `database_url`, attach a [`LoggingQueryTracer`] writing to `sink`,
/// open the pool and ping it.
///
/// `pool_*` query parameters are honored, see [`PoolConfig::parse`].
pub async fn connect_with_trace<S: LogSink>(sink: S, database_url: &str) -> Result<TracedPool> {
    let mut config = PoolConfig::parse(database_url)?;
    config.set_tracer(Arc::new(LoggingQueryTracer::new(sink)));

    TracedPool::connect(config).await
}

/// Attach a [`LoggingQueryTracer`] writing to `sink` to `config`, log the pool
/// options at info level, open the pool and ping it.
///
/// Fails with [`Error::TracerAlreadySet`] before connecting if `config`
/// already carries a tracer.
pub async fn connect_with_config<S: LogSink>(
    sink: S,
    mut config: PoolConfig,
) -> Result<TracedPool> {
    if config.has_tracer() {
        return Err(Error::TracerAlreadySet);
    }

    sink.info_map(config.tuning_record());
    config.set_tracer(Arc::new(LoggingQueryTracer::new(sink)));

    TracedPool::connect(config).await
}

/// Extension trait for easy wrapping of database connections.
pub trait TracingExt {
    /// Wrap this connection, logging queries through `tracing`.
    fn with_query_log(self) -> TracedPool;

    /// Wrap this connection with a custom tracer.
    fn with_tracer(self, tracer: impl QueryTracer) -> TracedPool;
}

impl TracingExt for DatabaseConnection {
    fn with_query_log(self) -> TracedPool {
        TracedPool::wrap(self)
    }

    fn with_tracer(self, tracer: impl QueryTracer) -> TracedPool {
        TracedPool::new(self, tracer)
    }
}
