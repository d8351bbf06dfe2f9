//! DDL text generation.
//!
//! All statements are assembled from a [`TableLayout`] and differ per
//! dialect only where the engines genuinely diverge: auto-increment
//! primary keys, boolean/blob/text type names, and whether constraints can
//! be added to an existing table.

use coinstore_core::descriptor::PropertyKind;
use coinstore_core::naming::DISCRIMINATOR_LEN;
use coinstore_core::{Dialect, Error, Result, SchemaError, SchemaErrorKind};

use crate::columns::{ColumnKind, ColumnSpec, ForeignKeySpec, TableLayout};

/// SQL type name for a column.
pub fn column_type(dialect: Dialect, kind: &ColumnKind) -> String {
    match kind {
        ColumnKind::RowId { .. } | ColumnKind::Parent => "BIGINT".to_string(),
        ColumnKind::Discriminator => format!("VARCHAR({DISCRIMINATOR_LEN})"),
        ColumnKind::Scalar(kind) => scalar_type(dialect, kind).to_string(),
    }
}

fn scalar_type(dialect: Dialect, kind: &PropertyKind) -> &'static str {
    match kind {
        PropertyKind::Boolean => "BOOLEAN",
        PropertyKind::Character => "CHAR(1)",
        PropertyKind::Integer => "INTEGER",
        PropertyKind::Long | PropertyKind::Reference(_) => "BIGINT",
        PropertyKind::Double => match dialect {
            Dialect::Mysql => "DOUBLE",
            _ => "DOUBLE PRECISION",
        },
        PropertyKind::Text => "TEXT",
        PropertyKind::Date => "DATE",
        PropertyKind::Blob => match dialect {
            Dialect::Sqlite => "BLOB",
            Dialect::Postgres => "BYTEA",
            Dialect::Mysql => "LONGBLOB",
        },
    }
}

/// The primary key column definition, auto-generated or plain.
fn pk_definition(dialect: Dialect, name: &str, auto: bool) -> String {
    let quoted = dialect.quote(name);
    if auto {
        match dialect {
            Dialect::Sqlite => format!("{quoted} INTEGER PRIMARY KEY AUTOINCREMENT"),
            Dialect::Postgres => format!("{quoted} BIGSERIAL PRIMARY KEY"),
            Dialect::Mysql => format!("{quoted} BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY"),
        }
    } else {
        format!("{quoted} BIGINT PRIMARY KEY")
    }
}

fn column_definition(dialect: Dialect, column: &ColumnSpec) -> String {
    if let ColumnKind::RowId { auto } = column.kind {
        return pk_definition(dialect, &column.name, auto);
    }
    let mut def = format!(
        "{} {}",
        dialect.quote(&column.name),
        column_type(dialect, &column.kind)
    );
    if let Some(default) = &column.default {
        match dialect.literal(default) {
            Some(literal) => def.push_str(&format!(" DEFAULT {literal}")),
            None => {
                tracing::warn!(
                    column = %column.name,
                    "blob defaults are not expressible in DDL, skipping"
                );
            }
        }
    }
    def
}

fn fk_clause(dialect: Dialect, fk: &ForeignKeySpec) -> String {
    format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE {}",
        dialect.quote(&fk.name),
        dialect.quote(&fk.column),
        dialect.quote(&fk.ref_table),
        dialect.quote("_ID"),
        if fk.cascade { "CASCADE" } else { "RESTRICT" },
    )
}

/// CREATE TABLE for a layout, foreign keys declared inline.
///
/// Declaring the keys at create time is what lets SQLite (which cannot
/// ALTER a constraint in) satisfy the reconciler's second pass.
pub fn create_table(dialect: Dialect, layout: &TableLayout) -> String {
    let mut parts: Vec<String> = layout
        .columns
        .iter()
        .map(|c| column_definition(dialect, c))
        .collect();
    parts.extend(layout.foreign_keys.iter().map(|fk| fk_clause(dialect, fk)));
    format!(
        "CREATE TABLE {} ({})",
        dialect.quote(&layout.table),
        parts.join(", ")
    )
}

/// ALTER TABLE ... ADD COLUMN for one missing column.
pub fn add_column(dialect: Dialect, table: &str, column: &ColumnSpec) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote(table),
        column_definition(dialect, column)
    )
}

/// ALTER TABLE ... ADD CONSTRAINT for one missing foreign key.
///
/// Errors on dialects that cannot alter constraints in.
pub fn add_foreign_key(dialect: Dialect, table: &str, fk: &ForeignKeySpec) -> Result<String> {
    if !dialect.supports_add_constraint() {
        return Err(Error::Schema(SchemaError {
            kind: SchemaErrorKind::Unsupported,
            message: format!(
                "{} cannot add constraint '{}' to existing table '{table}'",
                dialect.name(),
                fk.name
            ),
            source: None,
        }));
    }
    Ok(format!(
        "ALTER TABLE {} ADD {}",
        dialect.quote(table),
        fk_clause(dialect, fk)
    ))
}
