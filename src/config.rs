//! Pool configuration and connection string parsing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::ConnectOptions;

use crate::error::ParseError;
use crate::record::LogRecord;
use crate::tracer::QueryTracer;

const SUPPORTED_SCHEMES: &[&str] = &["postgres", "postgresql", "mysql", "sqlite"];

/// Connection pool settings plus the tracer slot.
///
/// Pool tuning can be given in code or as `pool_*` query parameters on the
/// connection string:
///
/// ```rust
/// use sea_orm_querylog::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::parse(
///     "postgres://localhost/app?pool_max_conns=20&pool_max_conn_idle_time=5m&sslmode=disable",
/// )
/// .unwrap();
///
/// assert_eq!(config.max_connections, 20);
/// assert_eq!(config.idle_timeout, Duration::from_secs(300));
/// assert_eq!(config.url(), "postgres://localhost/app?sslmode=disable");
/// ```
#[derive(Clone)]
pub struct PoolConfig {
    url: String,

    /// Upper bound on open connections.
    /// Default: the number of available CPUs, at least 4
    pub max_connections: u32,

    /// Connections kept open even when idle.
    /// Default: 0
    pub min_connections: u32,

    /// Idle connections the pool tries to keep ready.
    /// Default: 0
    pub min_idle_connections: u32,

    /// Maximum age of a connection before it is closed.
    /// Default: 1 hour
    pub max_lifetime: Duration,

    /// Idle time after which a connection is closed.
    /// Default: 30 minutes
    pub idle_timeout: Duration,

    /// Interval between background health checks of idle connections.
    /// Default: 1 minute
    pub health_check_period: Duration,

    /// Random extra lifetime added per connection to avoid mass reconnects.
    /// Default: 0
    pub max_lifetime_jitter: Duration,

    tracer: Option<Arc<dyn QueryTracer>>,
}

impl PoolConfig {
    /// Create a configuration with default pool settings for `url`.
    ///
    /// The URL is used as given; see [`PoolConfig::parse`] for validation and
    /// `pool_*` parameter handling.
    pub fn new(url: impl Into<String>) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);

        Self {
            url: url.into(),
            max_connections: cpus.max(4),
            min_connections: 0,
            min_idle_connections: 0,
            max_lifetime: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
            health_check_period: Duration::from_secs(60),
            max_lifetime_jitter: Duration::ZERO,
            tracer: None,
        }
    }

    /// Parse a connection string, applying and removing `pool_*` parameters.
    ///
    /// Recognised parameters: `pool_max_conns`, `pool_min_conns`,
    /// `pool_min_idle_conns`, `pool_max_conn_lifetime`,
    /// `pool_max_conn_idle_time`, `pool_health_check_period` and
    /// `pool_max_conn_lifetime_jitter`. Durations take unit suffixes
    /// (`ns`, `us`, `ms`, `s`, `m`, `h`), may be fractional and may be
    /// combined, e.g. `1h30m` or `1.5h`. Other parameters are left for the
    /// driver.
    ///
    /// `pool_max_conns` must be at least 1 and `pool_min_conns` may not
    /// exceed the maximum.
    pub fn parse(url: &str) -> Result<Self, ParseError> {
        let scheme = match url.split_once(':') {
            Some((scheme, _)) if !scheme.is_empty() => scheme.to_ascii_lowercase(),
            _ => return Err(ParseError::MissingScheme(url.to_owned())),
        };
        if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
            return Err(ParseError::UnsupportedScheme(scheme));
        }

        let (base, query) = match url.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (url, None),
        };

        let mut config = Self::new(base);
        let mut passthrough = Vec::new();

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "pool_max_conns" => {
                    config.max_connections = parse_count("pool_max_conns", value)?;
                    if config.max_connections < 1 {
                        return Err(ParseError::InvalidParam {
                            param: "pool_max_conns",
                            value: value.to_owned(),
                        });
                    }
                }
                "pool_min_conns" => config.min_connections = parse_count("pool_min_conns", value)?,
                "pool_min_idle_conns" => {
                    config.min_idle_connections = parse_count("pool_min_idle_conns", value)?
                }
                "pool_max_conn_lifetime" => {
                    config.max_lifetime = parse_duration("pool_max_conn_lifetime", value)?
                }
                "pool_max_conn_idle_time" => {
                    config.idle_timeout = parse_duration("pool_max_conn_idle_time", value)?
                }
                "pool_health_check_period" => {
                    config.health_check_period = parse_duration("pool_health_check_period", value)?
                }
                "pool_max_conn_lifetime_jitter" => {
                    config.max_lifetime_jitter =
                        parse_duration("pool_max_conn_lifetime_jitter", value)?
                }
                _ => passthrough.push(pair),
            }
        }

        if config.min_connections > config.max_connections {
            return Err(ParseError::InvalidParam {
                param: "pool_min_conns",
                value: config.min_connections.to_string(),
            });
        }

        if !passthrough.is_empty() {
            config.url = format!("{}?{}", base, passthrough.join("&"));
        }

        Ok(config)
    }

    /// Connection URL handed to the driver.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_min_idle_connections(mut self, min: u32) -> Self {
        self.min_idle_connections = min;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_health_check_period(mut self, period: Duration) -> Self {
        self.health_check_period = period;
        self
    }

    pub fn with_max_lifetime_jitter(mut self, jitter: Duration) -> Self {
        self.max_lifetime_jitter = jitter;
        self
    }

    /// Install a query tracer.
    pub fn with_tracer(mut self, tracer: impl QueryTracer) -> Self {
        self.tracer = Some(Arc::new(tracer));
        self
    }

    pub fn has_tracer(&self) -> bool {
        self.tracer.is_some()
    }

    pub fn tracer(&self) -> Option<&Arc<dyn QueryTracer>> {
        self.tracer.as_ref()
    }

    pub(crate) fn set_tracer(&mut self, tracer: Arc<dyn QueryTracer>) {
        self.tracer = Some(tracer);
    }

    /// Options for `sea_orm::Database::connect`.
    ///
    /// Health check period, idle minimum and lifetime jitter have no
    /// SeaORM counterpart and are not applied here.
    pub fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions::new(self.url.clone());
        opts.max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_timeout)
            .sqlx_logging(false);
        opts
    }

    /// Tuning parameters as a record, for the startup log line.
    pub(crate) fn tuning_record(&self) -> LogRecord {
        LogRecord::new()
            .with("message", "query tracer pool options")
            .with("max_connections", self.max_connections)
            .with("min_connections", self.min_connections)
            .with("max_lifetime", self.max_lifetime)
            .with("idle_timeout", self.idle_timeout)
            .with("health_check_period", self.health_check_period)
            .with("min_idle_connections", self.min_idle_connections)
            .with("max_lifetime_jitter", self.max_lifetime_jitter)
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("url", &self.url)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("min_idle_connections", &self.min_idle_connections)
            .field("max_lifetime", &self.max_lifetime)
            .field("idle_timeout", &self.idle_timeout)
            .field("health_check_period", &self.health_check_period)
            .field("max_lifetime_jitter", &self.max_lifetime_jitter)
            .field("has_tracer", &self.tracer.is_some())
            .finish()
    }
}

fn parse_count(param: &'static str, value: &str) -> Result<u32, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidParam {
        param,
        value: value.to_owned(),
    })
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "\u{b5}s" | "\u{3bc}s" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 60 * 60 * NANOS_PER_SEC,
        _ => return None,
    })
}

/// Parse a duration such as `90s`, `1h30m`, `1.5h` or `250ms`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`; every number
/// needs one except a bare `0`. Signs are rejected and fraction digits finer
/// than a nanosecond are dropped.
fn parse_duration(param: &'static str, value: &str) -> Result<Duration, ParseError> {
    let invalid = || ParseError::InvalidParam {
        param,
        value: value.to_owned(),
    };

    if value == "0" {
        return Ok(Duration::ZERO);
    }
    if value.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    let mut rest = value;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, tail) = rest.split_at(int_len);
        let (frac_part, tail) = match tail.strip_prefix('.') {
            Some(after) => {
                let frac_len = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
                after.split_at(frac_len)
            }
            None => ("", tail),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = unit_nanos(unit).ok_or_else(invalid)?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(invalid)?;
        let mut place = scale;
        for digit in frac_part.bytes() {
            place /= 10;
            if place == 0 {
                break;
            }
            nanos = nanos
                .checked_add(u128::from(digit - b'0') * place)
                .ok_or_else(invalid)?;
        }

        total = total.checked_add(nanos).ok_or_else(invalid)?;
        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| invalid())?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}
