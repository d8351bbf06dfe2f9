//! Schema mapping for coinstore.
//!
//! Translates the descriptor registry into relational shape: expected
//! table layouts, dialect-specific DDL, live-database introspection, and
//! the additive startup reconciler.

pub mod columns;
pub mod ddl;
pub mod introspect;
pub mod reconcile;

pub use columns::{ColumnKind, ColumnSpec, ForeignKeySpec, TableLayout};
pub use introspect::{LiveSchema, TableFacts};
pub use reconcile::{ReconcileReport, reconcile};
