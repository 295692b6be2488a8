//! Structured log records and the sinks that receive them.

use std::collections::BTreeMap;
use std::time::Duration;

/// Target used by [`TracingSink`] events.
pub const TRACING_TARGET: &str = "sea_orm_querylog";

/// A single value in a [`LogRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Unsigned(u64),
    Duration(Duration),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            FieldValue::Unsigned(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            FieldValue::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Unsigned(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Unsigned(value.into())
    }
}

impl From<Duration> for FieldValue {
    fn from(value: Duration) -> Self {
        FieldValue::Duration(value)
    }
}

/// A mapping from field name to value, emitted once per event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    fields: BTreeMap<&'static str, FieldValue>,
}

impl LogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any previous value under the same name.
    pub fn with(mut self, name: &'static str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &'static str, value: impl Into<FieldValue>) {
        self.fields.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn unsigned(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(FieldValue::as_unsigned)
    }

    pub fn duration(&self, name: &str) -> Option<Duration> {
        self.get(name).and_then(FieldValue::as_duration)
    }
}

/// A severity-leveled destination for structured records.
///
/// Emission is fire-and-forget: the methods return nothing and callers never
/// learn whether a record reached its destination. A sink that can fail is
/// expected to handle or drop its own errors.
pub trait LogSink: Send + Sync + 'static {
    fn info_map(&self, record: LogRecord);

    fn debug_map(&self, record: LogRecord);

    fn error_map(&self, record: LogRecord);
}

/// Default sink that forwards records to the `tracing` ecosystem.
///
/// Each record becomes one event under the `sea_orm_querylog` target with
/// the record's fields as `tracing` fields, so JSON or OpenTelemetry layers
/// see `sql`, `duration` and the row count individually. Fields absent from
/// the record are left out of the event. Names outside the query and pool
/// option sets below are not forwarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

macro_rules! emit {
    ($level:ident, $record:expr) => {{
        let r = $record;
        tracing::$level!(
            target: TRACING_TARGET,
            sql = r.text("sql"),
            args = r.text("args"),
            duration = r.duration("duration").map(tracing::field::debug),
            rows_affected = r.unsigned("rows_affected"),
            rows_returned = r.unsigned("rows_returned"),
            error = r.text("error"),
            max_connections = r.unsigned("max_connections"),
            min_connections = r.unsigned("min_connections"),
            min_idle_connections = r.unsigned("min_idle_connections"),
            max_lifetime = r.duration("max_lifetime").map(tracing::field::debug),
            idle_timeout = r.duration("idle_timeout").map(tracing::field::debug),
            health_check_period = r.duration("health_check_period").map(tracing::field::debug),
            max_lifetime_jitter = r.duration("max_lifetime_jitter").map(tracing::field::debug),
            "{}",
            r.text("message").unwrap_or("query"),
        )
    }};
}

impl LogSink for TracingSink {
    fn info_map(&self, record: LogRecord) {
        emit!(info, &record);
    }

    fn debug_map(&self, record: LogRecord) {
        emit!(debug, &record);
    }

    fn error_map(&self, record: LogRecord) {
        emit!(error, &record);
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;

    #[test]
    fn test_record_builder() {
        let record = LogRecord::new()
            .with("sql", "SELECT 1")
            .with("rows_returned", 1u64)
            .with("duration", Duration::from_millis(3));

        assert_eq!(record.len(), 3);
        assert_eq!(record.get("sql").and_then(FieldValue::as_text), Some("SELECT 1"));
        assert_eq!(record.get("rows_returned").and_then(FieldValue::as_unsigned), Some(1));
        assert!(!record.contains("error"));
    }

    #[test]
    fn test_typed_accessors_check_kind() {
        let record = LogRecord::new()
            .with("sql", "SELECT 1")
            .with("duration", Duration::from_millis(2));

        assert_eq!(record.text("sql"), Some("SELECT 1"));
        assert_eq!(record.unsigned("sql"), None);
        assert_eq!(record.duration("duration"), Some(Duration::from_millis(2)));
        assert_eq!(record.text("missing"), None);
    }

    /// Collects the fields of every event as `(name, rendered value)`.
    #[derive(Clone, Default)]
    struct FieldCapture(Arc<Mutex<Vec<Vec<(String, String)>>>>);

    struct Visitor(Vec<(String, String)>);

    impl Visit for Visitor {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.push((field.name().to_owned(), value.to_owned()));
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_owned(), format!("{value:?}")));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for FieldCapture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = Visitor(Vec::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push(visitor.0);
        }
    }

    fn capture(emit: impl FnOnce()) -> Vec<(String, String)> {
        let layer = FieldCapture::default();
        let events = layer.0.clone();
        tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), emit);
        let mut events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        events.pop().unwrap()
    }

    fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
        fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_tracing_sink_emits_structured_fields() {
        let fields = capture(|| {
            TracingSink.debug_map(
                LogRecord::new()
                    .with("sql", "SELECT 1")
                    .with("args", "[]")
                    .with("rows_returned", 2u64)
                    .with("duration", Duration::from_micros(1500)),
            )
        });

        assert_eq!(field(&fields, "sql"), Some("SELECT 1"));
        assert_eq!(field(&fields, "args"), Some("[]"));
        assert_eq!(field(&fields, "rows_returned"), Some("2"));
        assert_eq!(field(&fields, "duration"), Some("1.5ms"));
        assert_eq!(field(&fields, "message"), Some("query"));
        assert_eq!(field(&fields, "rows_affected"), None);
        assert_eq!(field(&fields, "error"), None);
    }

    #[test]
    fn test_tracing_sink_error_record() {
        let fields = capture(|| {
            TracingSink.error_map(
                LogRecord::new()
                    .with("sql", "SELECT nope")
                    .with("error", "column does not exist"),
            )
        });

        assert_eq!(field(&fields, "error"), Some("column does not exist"));
        assert_eq!(field(&fields, "rows_returned"), None);
    }
}
