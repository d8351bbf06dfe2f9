//! Error types for coinstore operations.

use std::fmt;

/// The primary error type for all coinstore operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, reset)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// In-memory and on-disk state have diverged
    Consistency(ConsistencyError),
    /// A delete was rejected because other rows still reference the target
    Dependency(DependencyError),
    /// Schema reconciliation / introspection errors
    Schema(SchemaError),
    /// Type conversion errors
    Type(TypeError),
    /// Configuration errors (bad URL, invalid descriptor universe)
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation (socket reset and friends)
    Disconnected,
    /// Connection refused
    Refused,
    /// Connection already closed
    Closed,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Database is locked or busy
    Locked,
    /// Other database error
    Database,
}

/// An affected-row count or row lookup did not match what the engine
/// knows must be true. Always fatal: the cache can no longer be trusted.
#[derive(Debug)]
pub struct ConsistencyError {
    pub table: Option<String>,
    pub expected: u64,
    pub affected: u64,
    pub message: String,
}

/// A delete collided with rows that still reference the target.
///
/// This is the one database rejection callers are expected to catch and
/// handle (typically by refusing the delete in the UI), so it carries the
/// property-set id of the object that could not be removed.
#[derive(Debug)]
pub struct DependencyError {
    pub set_id: String,
    pub row_id: i64,
    pub message: String,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy)]
pub enum SchemaErrorKind {
    /// Failed to read live database metadata
    Introspection,
    /// DDL statement failed
    Ddl,
    /// The dialect cannot express a required DDL operation
    Unsupported,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this the narrow class of connection failures that warrants one
    /// reconnect-and-retry of the failing unit of work?
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Disconnected | ConnectionErrorKind::Refused
            ),
            _ => false,
        }
    }

    /// Get the SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for a [`ConsistencyError`] about an affected-row count.
    pub fn row_count(table: impl Into<String>, expected: u64, affected: u64) -> Self {
        let table = table.into();
        let message = format!(
            "expected {expected} affected row(s) in '{table}', got {affected}"
        );
        Error::Consistency(ConsistencyError {
            table: Some(table),
            expected,
            affected,
            message,
        })
    }

    /// Shorthand for a [`ConfigError`].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }
}

impl QueryError {
    /// Is this a foreign key rejection?
    pub fn is_constraint_violation(&self) -> bool {
        self.kind == QueryErrorKind::Constraint
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Consistency(e) => write!(f, "Consistency violation: {}", e.message),
            Error::Dependency(e) => write!(
                f,
                "Dependency error: '{}' row {} is still referenced: {}",
                e.set_id, e.row_id, e.message
            ),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Schema(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ConsistencyError> for Error {
    fn from(err: ConsistencyError) -> Self {
        Error::Consistency(err)
    }
}

impl From<DependencyError> for Error {
    fn from(err: DependencyError) -> Self {
        Error::Dependency(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for coinstore operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_flag_covers_disconnects_only() {
        let dropped = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: "socket reset".to_string(),
            source: None,
        });
        let refused = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Refused,
            message: "refused".to_string(),
            source: None,
        });
        let bad_sql = Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some("SELEC 1".to_string()),
            message: "syntax error".to_string(),
            source: None,
        });

        assert!(dropped.is_transient());
        assert!(refused.is_transient());
        assert!(!bad_sql.is_transient());
    }

    #[test]
    fn row_count_shorthand_fills_fields() {
        let err = Error::row_count("finance_account", 1, 0);
        match err {
            Error::Consistency(c) => {
                assert_eq!(c.table.as_deref(), Some("finance_account"));
                assert_eq!(c.expected, 1);
                assert_eq!(c.affected, 0);
            }
            other => panic!("expected consistency error, got {other:?}"),
        }
    }

    #[test]
    fn dependency_error_carries_set_id() {
        let err = Error::Dependency(DependencyError {
            set_id: "finance.account".to_string(),
            row_id: 7,
            message: "entries still reference this account".to_string(),
        });
        let rendered = err.to_string();
        assert!(rendered.contains("finance.account"));
        assert!(rendered.contains('7'));
    }
}
