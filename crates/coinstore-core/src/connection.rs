//! Synchronous database connection traits.
//!
//! The engine runs on a single logical connection and blocks for the
//! duration of every call; callers serialize access externally. Drivers
//! implement [`Connection`] and a [`Connector`] that can re-establish a
//! dropped connection for the one-shot retry path.

use crate::Result;
use crate::dialect::Dialect;
use crate::row::Row;
use crate::value::Value;

/// A live database connection.
///
/// Object-safe so the engine can hold `Box<dyn Connection>` and swap the
/// box on reconnect.
pub trait Connection: Send {
    /// The dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the generated row id.
    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Run a query and collect all rows eagerly.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a query expected to produce at most one row.
    fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Run a query lazily; rows are fetched as the stream is advanced.
    ///
    /// The stream owns the underlying statement and must release it both
    /// when iteration completes and when the stream is dropped early.
    fn query_lazy(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>>;

    /// Begin an explicit transaction (suspends autocommit).
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction (restores autocommit).
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction (restores autocommit).
    fn rollback(&mut self) -> Result<()>;

    /// Close the connection. Subsequent calls fail.
    fn close(&mut self) -> Result<()>;
}

/// An incrementally-consumed result set.
pub trait RowStream: Send {
    /// Fetch the next row, or `None` once the result set is exhausted.
    fn next_row(&mut self) -> Result<Option<Row>>;
}

/// A factory for connections, used at startup and for the single
/// reconnect-and-retry on a transient connection failure.
pub trait Connector: Send + Sync {
    /// Establish a fresh connection.
    fn connect(&self) -> Result<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, QueryError, QueryErrorKind};

    struct FixedRows(Vec<Row>);

    impl Connection for FixedRows {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }
        fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Ok(0)
        }
        fn insert(&mut self, _sql: &str, _params: &[Value]) -> Result<i64> {
            Ok(1)
        }
        fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Ok(self.0.clone())
        }
        fn query_lazy(&mut self, _sql: &str, _params: &[Value]) -> Result<Box<dyn RowStream>> {
            Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                message: "not supported".to_string(),
                source: None,
            }))
        }
        fn begin(&mut self) -> Result<()> {
            Ok(())
        }
        fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn query_one_takes_first_row() {
        let rows = vec![
            Row::new(vec!["n".to_string()], vec![Value::Int(1)]),
            Row::new(vec!["n".to_string()], vec![Value::Int(2)]),
        ];
        let mut conn = FixedRows(rows);
        let first = conn.query_one("SELECT n", &[]).unwrap().unwrap();
        assert_eq!(first.get_named::<i32>("n").unwrap(), 1);

        let mut empty = FixedRows(Vec::new());
        assert!(empty.query_one("SELECT n", &[]).unwrap().is_none());
    }
}
