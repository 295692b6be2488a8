//! Query lifecycle hooks and the logging tracer.

use std::time::Instant;

use sea_orm::{DbBackend, DbErr, Value};

use crate::record::{LogRecord, LogSink, TracingSink};
use crate::sql::{normalize_sql, SqlOperation};

/// Data available when a query is about to run.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStart {
    pub sql: String,
    pub args: Vec<Value>,
}

impl QueryStart {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Completion descriptor for a successful query: statement kind and the
/// number of rows it affected or returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTag {
    pub operation: SqlOperation,
    pub rows: u64,
}

impl CommandTag {
    pub fn new(operation: SqlOperation, rows: u64) -> Self {
        Self { operation, rows }
    }

    /// `true` for DELETE, INSERT and UPDATE.
    pub fn is_mutation(&self) -> bool {
        self.operation.is_mutation()
    }
}

/// How a traced query finished.
#[derive(Debug, Clone, Copy)]
pub enum QueryOutcome<'a> {
    Completed(CommandTag),
    Failed(&'a DbErr),
}

/// Per-query correlation value returned by [`QueryTracer::on_query_start`]
/// and handed back to [`QueryTracer::on_query_end`].
#[derive(Debug, Clone)]
pub struct TraceContext {
    start: QueryStart,
    started_at: Instant,
}

impl TraceContext {
    pub fn new(start: QueryStart) -> Self {
        Self {
            start,
            started_at: Instant::now(),
        }
    }

    pub fn start(&self) -> &QueryStart {
        &self.start
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Whitespace-normalized SQL text of the query.
    pub fn sql(&self) -> String {
        normalize_sql(&self.start.sql)
    }
}

/// Hooks invoked by [`TracedPool`](crate::TracedPool) around every query.
///
/// The context returned from `on_query_start` is the only state carried to
/// `on_query_end`; implementations need no shared mutable state.
pub trait QueryTracer: Send + Sync + 'static {
    fn on_query_start(&self, backend: DbBackend, start: QueryStart) -> TraceContext;

    /// `context` is `None` when no start was recorded for this query; the
    /// call must then be a no-op.
    fn on_query_end(
        &self,
        backend: DbBackend,
        context: Option<TraceContext>,
        outcome: QueryOutcome<'_>,
    );
}

/// Tracer that writes one structured record per completed query.
///
/// Successful queries are logged at debug level with either `rows_affected`
/// (DELETE, INSERT, UPDATE) or `rows_returned`. Failed queries are logged at
/// error level with an `error` field and no row count. Every record carries
/// `duration`, `args` and the normalized `sql`.
#[derive(Debug, Clone, Default)]
pub struct LoggingQueryTracer<S = TracingSink> {
    sink: S,
}

impl<S: LogSink> LoggingQueryTracer<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: LogSink> QueryTracer for LoggingQueryTracer<S> {
    fn on_query_start(&self, _backend: DbBackend, start: QueryStart) -> TraceContext {
        TraceContext::new(start)
    }

    fn on_query_end(
        &self,
        _backend: DbBackend,
        context: Option<TraceContext>,
        outcome: QueryOutcome<'_>,
    ) {
        let Some(context) = context else {
            return;
        };

        let mut record = LogRecord::new()
            .with("duration", context.started_at.elapsed())
            .with("args", format!("{:?}", context.start.args))
            .with("sql", context.sql());

        match outcome {
            QueryOutcome::Failed(err) => {
                record.insert("error", err.to_string());
                self.sink.error_map(record);
            }
            QueryOutcome::Completed(tag) => {
                let field = if tag.is_mutation() {
                    "rows_affected"
                } else {
                    "rows_returned"
                };
                record.insert(field, tag.rows);
                self.sink.debug_map(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tracing::Level;

    use super::*;
    use crate::record::testing::RecordingSink;
    use crate::record::FieldValue;

    fn tracer() -> (LoggingQueryTracer<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        (LoggingQueryTracer::new(sink.clone()), sink)
    }

    fn start(sql: &str) -> QueryStart {
        QueryStart::new(sql, vec![Value::Int(Some(7))])
    }

    #[test]
    fn test_failed_query_logs_error_without_row_count() {
        let (tracer, sink) = tracer();
        let ctx = tracer.on_query_start(DbBackend::Postgres, start("SELECT  1"));
        let err = DbErr::Custom("relation \"users\" does not exist".into());
        tracer.on_query_end(DbBackend::Postgres, Some(ctx), QueryOutcome::Failed(&err));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let (level, record) = &records[0];
        assert_eq!(*level, Level::ERROR);
        assert_eq!(
            record.get("error").and_then(FieldValue::as_text),
            Some(err.to_string().as_str())
        );
        assert!(!record.contains("rows_affected"));
        assert!(!record.contains("rows_returned"));
        assert_eq!(record.get("sql").and_then(FieldValue::as_text), Some("SELECT 1"));
    }

    #[test]
    fn test_mutations_log_rows_affected() {
        for op in [SqlOperation::Delete, SqlOperation::Insert, SqlOperation::Update] {
            let (tracer, sink) = tracer();
            let ctx = tracer.on_query_start(DbBackend::Postgres, start("UPDATE t SET a = $1"));
            tracer.on_query_end(
                DbBackend::Postgres,
                Some(ctx),
                QueryOutcome::Completed(CommandTag::new(op, 4)),
            );

            let records = sink.records();
            assert_eq!(records.len(), 1);
            let (level, record) = &records[0];
            assert_eq!(*level, Level::DEBUG);
            assert_eq!(record.get("rows_affected").and_then(FieldValue::as_unsigned), Some(4));
            assert!(!record.contains("rows_returned"));
            assert!(!record.contains("error"));
        }
    }

    #[test]
    fn test_other_commands_log_rows_returned() {
        for op in [SqlOperation::Select, SqlOperation::Create, SqlOperation::Other] {
            let (tracer, sink) = tracer();
            let ctx = tracer.on_query_start(DbBackend::Postgres, start("SELECT * FROM t"));
            tracer.on_query_end(
                DbBackend::Postgres,
                Some(ctx),
                QueryOutcome::Completed(CommandTag::new(op, 9)),
            );

            let records = sink.records();
            let (level, record) = &records[0];
            assert_eq!(*level, Level::DEBUG);
            assert_eq!(record.get("rows_returned").and_then(FieldValue::as_unsigned), Some(9));
            assert!(!record.contains("rows_affected"));
        }
    }

    #[test]
    fn test_record_carries_args_and_duration() {
        let (tracer, sink) = tracer();
        let ctx = tracer.on_query_start(DbBackend::Postgres, start("SELECT $1"));
        std::thread::sleep(Duration::from_millis(5));
        tracer.on_query_end(
            DbBackend::Postgres,
            Some(ctx),
            QueryOutcome::Completed(CommandTag::new(SqlOperation::Select, 1)),
        );

        let records = sink.records();
        let (_, record) = &records[0];
        let duration = record.get("duration").and_then(FieldValue::as_duration).unwrap();
        assert!(duration >= Duration::from_millis(5));
        assert_eq!(
            record.get("args").and_then(FieldValue::as_text),
            Some(format!("{:?}", vec![Value::Int(Some(7))]).as_str())
        );
    }

    #[test]
    fn test_duration_bounded_by_observed_interval() {
        let (tracer, sink) = tracer();
        let ctx = tracer.on_query_start(DbBackend::Postgres, start("SELECT 1"));
        let outer = ctx.started_at().elapsed();
        tracer.on_query_end(
            DbBackend::Postgres,
            Some(ctx.clone()),
            QueryOutcome::Completed(CommandTag::new(SqlOperation::Select, 1)),
        );
        let after = ctx.started_at().elapsed();

        let records = sink.records();
        let (_, record) = &records[0];
        let duration = record.get("duration").and_then(FieldValue::as_duration).unwrap();
        assert!(duration >= outer);
        assert!(duration <= after);
    }

    #[test]
    fn test_missing_context_is_silent() {
        let (tracer, sink) = tracer();
        let err = DbErr::Custom("boom".into());
        tracer.on_query_end(DbBackend::Postgres, None, QueryOutcome::Failed(&err));
        tracer.on_query_end(
            DbBackend::Postgres,
            None,
            QueryOutcome::Completed(CommandTag::new(SqlOperation::Select, 1)),
        );

        assert!(sink.records().is_empty());
    }
}
