//! SQL dialect abstraction.
//!
//! The engine speaks one ANSI-flavored SQL with three points of divergence
//! per dialect: identifier quoting, boolean representation, and DDL
//! capabilities (auto-increment syntax and ALTER TABLE limits). Everything
//! that varies is funneled through [`Dialect`].

use serde::{Deserialize, Serialize};

use crate::identifiers::{quote_ident, quote_ident_mysql};
use crate::value::{Value, format_iso_date};

/// The SQL dialects the engine can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    /// Human-readable dialect name.
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }

    /// Resolve a store-URL subprotocol to a dialect.
    pub fn from_subprotocol(sub: &str) -> Option<Self> {
        match sub.to_ascii_lowercase().as_str() {
            "sqlite" => Some(Dialect::Sqlite),
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::Mysql),
            _ => None,
        }
    }

    /// Quote an identifier for this dialect.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::Mysql => quote_ident_mysql(ident),
            _ => quote_ident(ident),
        }
    }

    /// Boolean literal for this dialect.
    pub const fn bool_literal(self, v: bool) -> &'static str {
        match self {
            Dialect::Postgres => {
                if v { "TRUE" } else { "FALSE" }
            }
            _ => {
                if v { "1" } else { "0" }
            }
        }
    }

    /// Positional parameter placeholder. `index` is 1-based.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            _ => "?".to_string(),
        }
    }

    /// Can this dialect add a constraint to an existing table with
    /// ALTER TABLE? SQLite cannot.
    pub const fn supports_add_constraint(self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }

    /// Render a value as a literal SQL fragment.
    ///
    /// Returns `None` for blobs, which must be bound as parameters rather
    /// than inlined. String-ish values quote with embedded single quotes
    /// doubled, dates render as quoted ISO `YYYY-MM-DD`.
    pub fn literal(self, value: &Value) -> Option<String> {
        match value {
            Value::Null => Some("NULL".to_string()),
            Value::Bool(v) => Some(self.bool_literal(*v).to_string()),
            Value::Char(c) => Some(quote_str(&c.to_string())),
            Value::Int(v) => Some(v.to_string()),
            Value::BigInt(v) => Some(v.to_string()),
            Value::Double(v) => {
                if v.is_finite() {
                    Some(format_double(*v))
                } else {
                    tracing::warn!(value = %v, "non-finite double has no SQL literal, writing NULL");
                    Some("NULL".to_string())
                }
            }
            Value::Text(s) => Some(quote_str(s)),
            Value::Date(d) => Some(format!("'{}'", format_iso_date(*d))),
            Value::Bytes(_) => None,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Format a double so it round-trips and always reads back as a double
/// (integral values get a trailing `.0`).
fn format_double(v: f64) -> String {
    let s = format!("{v}");
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::days_from_civil;

    #[test]
    fn subprotocol_resolution() {
        assert_eq!(Dialect::from_subprotocol("sqlite"), Some(Dialect::Sqlite));
        assert_eq!(
            Dialect::from_subprotocol("PostgreSQL"),
            Some(Dialect::Postgres)
        );
        assert_eq!(Dialect::from_subprotocol("mysql"), Some(Dialect::Mysql));
        assert_eq!(Dialect::from_subprotocol("oracle"), None);
    }

    #[test]
    fn quoting_per_dialect() {
        assert_eq!(Dialect::Sqlite.quote("finance_entry"), "\"finance_entry\"");
        assert_eq!(Dialect::Mysql.quote("finance_entry"), "`finance_entry`");
    }

    #[test]
    fn string_literals_double_embedded_quotes() {
        assert_eq!(
            Dialect::Sqlite.literal(&Value::Text("O'Brien".into())),
            Some("'O''Brien'".to_string())
        );
        assert_eq!(
            Dialect::Sqlite.literal(&Value::Char('\'')),
            Some("''''".to_string())
        );
    }

    #[test]
    fn bool_literals_differ() {
        assert_eq!(
            Dialect::Postgres.literal(&Value::Bool(true)),
            Some("TRUE".to_string())
        );
        assert_eq!(
            Dialect::Sqlite.literal(&Value::Bool(true)),
            Some("1".to_string())
        );
        assert_eq!(
            Dialect::Mysql.literal(&Value::Bool(false)),
            Some("0".to_string())
        );
    }

    #[test]
    fn date_literal_is_quoted_iso() {
        let d = days_from_civil(2024, 3, 9);
        assert_eq!(
            Dialect::Sqlite.literal(&Value::Date(d)),
            Some("'2024-03-09'".to_string())
        );
    }

    #[test]
    fn blobs_never_inline() {
        assert_eq!(Dialect::Sqlite.literal(&Value::Bytes(vec![1, 2])), None);
    }

    #[test]
    fn doubles_read_back_as_doubles() {
        assert_eq!(
            Dialect::Sqlite.literal(&Value::Double(10.0)),
            Some("10.0".to_string())
        );
        assert_eq!(
            Dialect::Sqlite.literal(&Value::Double(-0.25)),
            Some("-0.25".to_string())
        );
        assert_eq!(
            Dialect::Sqlite.literal(&Value::Double(f64::NAN)),
            Some("NULL".to_string())
        );
    }
}
