//! SQL text utilities: whitespace normalization and statement kind detection.

use once_cell::sync::Lazy;
use regex::Regex;

/// SQL operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Truncate,
    Begin,
    Commit,
    Rollback,
    Set,
    Other,
}

impl SqlOperation {
    /// Returns the operation keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::Select => "SELECT",
            SqlOperation::Insert => "INSERT",
            SqlOperation::Update => "UPDATE",
            SqlOperation::Delete => "DELETE",
            SqlOperation::Create => "CREATE",
            SqlOperation::Drop => "DROP",
            SqlOperation::Alter => "ALTER",
            SqlOperation::Truncate => "TRUNCATE",
            SqlOperation::Begin => "BEGIN",
            SqlOperation::Commit => "COMMIT",
            SqlOperation::Rollback => "ROLLBACK",
            SqlOperation::Set => "SET",
            SqlOperation::Other => "QUERY",
        }
    }

    /// Whether the statement modifies rows, so its count means "affected"
    /// rather than "returned".
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            SqlOperation::Delete | SqlOperation::Insert | SqlOperation::Update
        )
    }
}

impl std::fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Unicode White_Space plus the Zs space separators.
static EDGE_WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s\p{Zs}]+|[\s\p{Zs}]+$").unwrap());

static INNER_WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\p{Zs}]{2,}").unwrap());

/// Normalize whitespace in a SQL string for logging.
///
/// Leading and trailing whitespace is removed and every run of two or more
/// whitespace characters becomes a single ASCII space. A lone whitespace
/// character between tokens is left untouched.
///
/// ```rust
/// use sea_orm_querylog::normalize_sql;
///
/// assert_eq!(normalize_sql("  SELECT  *   FROM\n\tusers "), "SELECT * FROM users");
/// ```
pub fn normalize_sql(sql: &str) -> String {
    let trimmed = EDGE_WHITESPACE_REGEX.replace_all(sql, "");
    INNER_WHITESPACE_REGEX
        .replace_all(&trimmed, " ")
        .into_owned()
}

impl SqlOperation {
    /// Map a statement's leading keyword, in any case, to its operation.
    fn from_keyword(word: &str) -> Self {
        const KEYWORDS: &[(&str, SqlOperation)] = &[
            ("SELECT", SqlOperation::Select),
            ("WITH", SqlOperation::Select),
            ("VALUES", SqlOperation::Select),
            ("INSERT", SqlOperation::Insert),
            ("UPDATE", SqlOperation::Update),
            ("DELETE", SqlOperation::Delete),
            ("CREATE", SqlOperation::Create),
            ("DROP", SqlOperation::Drop),
            ("ALTER", SqlOperation::Alter),
            ("TRUNCATE", SqlOperation::Truncate),
            ("BEGIN", SqlOperation::Begin),
            ("START", SqlOperation::Begin),
            ("COMMIT", SqlOperation::Commit),
            ("END", SqlOperation::Commit),
            ("ROLLBACK", SqlOperation::Rollback),
            ("ABORT", SqlOperation::Rollback),
            ("SET", SqlOperation::Set),
        ];

        KEYWORDS
            .iter()
            .find(|(keyword, _)| keyword.eq_ignore_ascii_case(word))
            .map_or(SqlOperation::Other, |&(_, op)| op)
    }
}

/// Classify a statement by its first keyword.
///
/// Leading whitespace and opening parentheses are skipped, and the keyword
/// must stand alone, so `SETTINGS` is not `SET`.
///
/// ```rust
/// use sea_orm_querylog::{parse_operation, SqlOperation};
///
/// assert_eq!(parse_operation("(select 1) union (select 2)"), SqlOperation::Select);
/// assert_eq!(parse_operation("delete from t"), SqlOperation::Delete);
/// ```
pub fn parse_operation(sql: &str) -> SqlOperation {
    let body = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    let end = body
        .find(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .unwrap_or(body.len());
    SqlOperation::from_keyword(&body[..end])
}
