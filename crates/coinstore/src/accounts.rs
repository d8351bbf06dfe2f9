//! Account-entry read helpers.
//!
//! Entries live under transactions and point at accounts through a
//! reference property, so "the entries of an account" is not a containing
//! list. These wrappers express the three read shapes callers need:
//! membership, enumeration, and a date-ranged sum.

use std::sync::Arc;

use coinstore_core::descriptor::PropertyKind;
use coinstore_core::naming::table_name;
use coinstore_core::{Error, Result, Value};
use coinstore_query::select;

use crate::entity::Entity;
use crate::store::DataStore;

/// Does any row of `entry_set` reference the given account?
pub fn account_has_entries(
    store: &DataStore,
    entry_set: &str,
    account_property: &str,
    account_id: i64,
) -> Result<bool> {
    let sql = count_sql(store, entry_set, account_property, account_id)?;
    let count = store
        .query_one(&sql, &[])?
        .as_ref()
        .and_then(|r| r.get(0))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    Ok(count > 0)
}

/// Every row of `entry_set` referencing the given account, materialized.
pub fn account_entries(
    store: &DataStore,
    entry_set: &str,
    account_property: &str,
    account_id: i64,
) -> Result<Vec<Arc<Entity>>> {
    let registry = store.registry();
    let base = select::join_select(registry, store.dialect(), entry_set)?;
    let (declaring, column) = reference_column(store, entry_set, account_property)?;
    let sql = format!(
        "{base} WHERE {}.{} = {account_id}",
        store.dialect().quote(&table_name(&declaring)),
        store.dialect().quote(&column),
    );
    let mut out = Vec::new();
    for row in store.query(&sql, &[])? {
        out.push(store.materialize_row(entry_set, &row)?);
    }
    Ok(out)
}

/// SUM of an amount property over the entries of one account whose date
/// property falls inside `[from, to]` (inclusive, days since epoch).
pub fn account_total(
    store: &DataStore,
    entry_set: &str,
    account_property: &str,
    amount_property: &str,
    date_property: &str,
    account_id: i64,
    from: i32,
    to: i32,
) -> Result<f64> {
    let dialect = store.dialect();
    let base = select::join_select(store.registry(), dialect, entry_set)?;
    let from_clause = base
        .strip_prefix("SELECT * ")
        .unwrap_or(&base)
        .to_string();
    let (ref_table, ref_column) = reference_column(store, entry_set, account_property)?;
    let (amount_table, amount_column) = scalar_location(store, entry_set, amount_property)?;
    let (date_table, date_column) = scalar_location(store, entry_set, date_property)?;
    let from_lit = dialect
        .literal(&Value::Date(from))
        .unwrap_or_else(|| "NULL".to_string());
    let to_lit = dialect
        .literal(&Value::Date(to))
        .unwrap_or_else(|| "NULL".to_string());

    let sql = format!(
        "SELECT SUM({}.{}) {from_clause} WHERE {}.{} = {account_id} AND {dt}.{dc} >= {from_lit} AND {dt}.{dc} <= {to_lit}",
        dialect.quote(&table_name(&amount_table)),
        dialect.quote(&amount_column),
        dialect.quote(&table_name(&ref_table)),
        dialect.quote(&ref_column),
        dt = dialect.quote(&table_name(&date_table)),
        dc = dialect.quote(&date_column),
    );
    let total = store
        .query_one(&sql, &[])?
        .as_ref()
        .and_then(|r| r.get(0))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    Ok(total)
}

fn count_sql(
    store: &DataStore,
    entry_set: &str,
    account_property: &str,
    account_id: i64,
) -> Result<String> {
    let dialect = store.dialect();
    let base = select::join_select(store.registry(), dialect, entry_set)?;
    let from_clause = base.strip_prefix("SELECT * ").unwrap_or(&base);
    let (table, column) = reference_column(store, entry_set, account_property)?;
    Ok(format!(
        "SELECT COUNT(*) {from_clause} WHERE {}.{} = {account_id}",
        dialect.quote(&table_name(&table)),
        dialect.quote(&column),
    ))
}

/// The (declaring set, column name) of a reference scalar, validated.
fn reference_column(
    store: &DataStore,
    entry_set: &str,
    property: &str,
) -> Result<(String, String)> {
    let (set, column) = scalar_location(store, entry_set, property)?;
    let declaring = store.registry().expect(&set)?;
    let is_reference = declaring
        .scalar_named(property)
        .is_some_and(|p| matches!(p.kind, PropertyKind::Reference(_)));
    if !is_reference {
        return Err(Error::config(format!(
            "'{property}' of '{entry_set}' is not a reference property"
        )));
    }
    Ok((set, column))
}

/// Which ancestor level declares a scalar, and the column it maps to.
fn scalar_location(store: &DataStore, set_id: &str, property: &str) -> Result<(String, String)> {
    for level in store.registry().ancestry(set_id)? {
        if store
            .registry()
            .expect(level)?
            .scalar_named(property)
            .is_some()
        {
            return Ok((level.clone(), property.to_string()));
        }
    }
    Err(Error::config(format!(
        "'{set_id}' declares no scalar property '{property}'"
    )))
}
