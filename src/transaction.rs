//! Transactions whose statements pass through the pool's tracer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbBackend, DbErr, ExecResult, QueryResult, Statement,
};

use crate::connection::{run_traced, statement_start};
use crate::sql::SqlOperation;
use crate::tracer::{QueryStart, QueryTracer};

/// A `DatabaseTransaction` opened by [`TracedPool::begin_traced`].
///
/// Dropping it without `commit` rolls back as SeaORM does, but that
/// implicit rollback is not traced.
///
/// [`TracedPool::begin_traced`]: crate::TracedPool::begin_traced
pub struct TracedTransaction {
    inner: DatabaseTransaction,
    tracer: Arc<dyn QueryTracer>,
}

impl TracedTransaction {
    pub(crate) fn new(inner: DatabaseTransaction, tracer: Arc<dyn QueryTracer>) -> Self {
        Self { inner, tracer }
    }

    pub async fn commit(self) -> Result<(), DbErr> {
        let Self { inner, tracer } = self;
        let backend = inner.get_database_backend();
        run_traced(
            tracer.as_ref(),
            backend,
            QueryStart::new(SqlOperation::Commit.as_str(), Vec::new()),
            inner.commit(),
            |_| 0,
        )
        .await
    }

    pub async fn rollback(self) -> Result<(), DbErr> {
        let Self { inner, tracer } = self;
        let backend = inner.get_database_backend();
        run_traced(
            tracer.as_ref(),
            backend,
            QueryStart::new(SqlOperation::Rollback.as_str(), Vec::new()),
            inner.rollback(),
            |_| 0,
        )
        .await
    }

    pub fn inner(&self) -> &DatabaseTransaction {
        &self.inner
    }
}

impl fmt::Debug for TracedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedTransaction")
            .field("backend", &self.inner.get_database_backend())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionTrait for TracedTransaction {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let start = statement_start(&stmt);
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            start,
            self.inner.execute(stmt),
            |r| r.rows_affected(),
        )
        .await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            QueryStart::new(sql, Vec::new()),
            self.inner.execute_unprepared(sql),
            |r| r.rows_affected(),
        )
        .await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let start = statement_start(&stmt);
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            start,
            self.inner.query_one(stmt),
            |row| u64::from(row.is_some()),
        )
        .await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let start = statement_start(&stmt);
        run_traced(
            self.tracer.as_ref(),
            self.get_database_backend(),
            start,
            self.inner.query_all(stmt),
            |rows| rows.len() as u64,
        )
        .await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::{MockDatabase, MockExecResult, TransactionTrait};
    use tracing::Level;

    use crate::record::testing::RecordingSink;
    use crate::record::FieldValue;
    use crate::tracer::LoggingQueryTracer;
    use crate::TracingExt;

    use super::*;

    #[tokio::test]
    async fn test_rollback_and_failures_are_traced() {
        let sink = RecordingSink::default();
        let pool = MockDatabase::new(DbBackend::Postgres)
            .append_exec_errors([DbErr::Custom("deadlock detected".into())])
            .into_connection()
            .with_tracer(LoggingQueryTracer::new(sink.clone()));

        let txn = pool.begin_traced().await.unwrap();
        assert!(txn.execute_unprepared("UPDATE t SET a = 1").await.is_err());
        txn.rollback().await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].0, Level::ERROR);
        assert!(records[1].1.contains("error"));
        assert_eq!(records[2].0, Level::DEBUG);
        assert_eq!(records[2].1.get("sql").and_then(FieldValue::as_text), Some("ROLLBACK"));
    }

    #[tokio::test]
    async fn test_untraced_transaction_bypasses_tracer() {
        let sink = RecordingSink::default();
        let pool = MockDatabase::new(DbBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection()
            .with_tracer(LoggingQueryTracer::new(sink.clone()));

        pool.transaction::<_, (), DbErr>(|txn| {
            Box::pin(async move {
                txn.execute_unprepared("UPDATE t SET a = 1").await?;
                Ok(())
            })
        })
        .await
        .unwrap();

        assert!(sink.records().is_empty());
    }
}
