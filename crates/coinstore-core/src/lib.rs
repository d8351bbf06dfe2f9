//! Core types and traits for the coinstore persistence engine.
//!
//! This crate provides the foundational abstractions the engine is built
//! from:
//!
//! - `PropertySet` / `Registry` runtime type descriptors
//! - `Value` dynamic SQL values and `Row` result rows
//! - `Connection` / `Connector` / `RowStream` synchronous driver traits
//! - `Dialect` for the per-engine SQL differences
//! - the shared error taxonomy and `StoreConfig`

pub mod config;
pub mod connection;
pub mod descriptor;
pub mod dialect;
pub mod error;
pub mod identifiers;
pub mod naming;
pub mod row;
pub mod value;

pub use config::{StoreConfig, StoreUrl};
pub use connection::{Connection, Connector, RowStream};
pub use descriptor::{ListKey, ListProperty, PropertyKind, PropertySet, Registry, ScalarProperty};
pub use dialect::Dialect;
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, ConsistencyError, DependencyError, Error,
    QueryError, QueryErrorKind, Result, SchemaError, SchemaErrorKind, TypeError,
};
pub use identifiers::{quote_ident, quote_ident_mysql, sanitize_identifier};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
