//! SELECT construction across an inheritance chain.
//!
//! Every read of a row of final type `T` joins `T`'s table with every
//! ancestor table on `_ID`, most-derived table first, so one statement
//! yields the scalar columns of the whole chain.

use coinstore_core::descriptor::{ListKey, Registry};
use coinstore_core::naming::{DISCRIMINATOR_COLUMN, ID_COLUMN, parent_column, table_name};
use coinstore_core::{Dialect, Error, Result, Value};

/// A ready-to-run statement with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryText {
    pub sql: String,
    pub params: Vec<Value>,
}

/// `SELECT * FROM <final> JOIN <ancestors...>` for one final set.
pub fn join_select(registry: &Registry, dialect: Dialect, final_set: &str) -> Result<String> {
    let set = registry.expect(final_set)?;
    if !set.is_final() {
        return Err(Error::config(format!(
            "'{final_set}' is derivable; only final sets map to whole rows"
        )));
    }
    let ancestry = registry.ancestry(final_set)?;
    let own_table = table_name(final_set);
    let mut sql = format!("SELECT * FROM {}", dialect.quote(&own_table));
    for ancestor in ancestry.iter().rev().skip(1) {
        let ancestor_table = table_name(ancestor);
        sql.push_str(&format!(
            " INNER JOIN {t} ON {own}.{id} = {t}.{id}",
            t = dialect.quote(&ancestor_table),
            own = dialect.quote(&own_table),
            id = dialect.quote(ID_COLUMN),
        ));
    }
    Ok(sql)
}

/// Select one whole row of a final set by its row id.
pub fn select_by_id(
    registry: &Registry,
    dialect: Dialect,
    final_set: &str,
    id: i64,
) -> Result<QueryText> {
    let base = join_select(registry, dialect, final_set)?;
    let own_table = table_name(final_set);
    Ok(QueryText {
        sql: format!(
            "{base} WHERE {}.{} = {}",
            dialect.quote(&own_table),
            dialect.quote(ID_COLUMN),
            dialect.placeholder(1),
        ),
        params: vec![Value::BigInt(id)],
    })
}

/// Read the discriminator of a basemost row, to learn the actual most
/// derived type before materializing.
pub fn discriminator_query(
    registry: &Registry,
    dialect: Dialect,
    basemost_set: &str,
    id: i64,
) -> Result<QueryText> {
    if !registry.has_discriminator(basemost_set) {
        return Err(Error::config(format!(
            "'{basemost_set}' has no discriminator column"
        )));
    }
    let table = table_name(basemost_set);
    Ok(QueryText {
        sql: format!(
            "SELECT {} FROM {} WHERE {} = {}",
            dialect.quote(DISCRIMINATOR_COLUMN),
            dialect.quote(&table),
            dialect.quote(ID_COLUMN),
            dialect.placeholder(1),
        ),
        params: vec![Value::BigInt(id)],
    })
}

/// The WHERE clause scoping a join-select to one containing list.
///
/// Session lists are the implicit parent: membership means every candidate
/// parent column of the element's ancestor chain is null. Other lists
/// match their single parent column against the bound parent row id.
fn list_filter(
    registry: &Registry,
    dialect: Dialect,
    list: &ListKey,
    parent_id: Option<i64>,
    final_set: &str,
) -> Result<(String, Vec<Value>)> {
    if registry.is_session_list(list) {
        let mut clauses = Vec::new();
        for candidate in registry.candidate_lists(final_set)? {
            let element = registry.list_element(&candidate)?;
            clauses.push(format!(
                "{}.{} IS NULL",
                dialect.quote(&table_name(element)),
                dialect.quote(&parent_column(&candidate)),
            ));
        }
        if clauses.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        return Ok((format!(" WHERE {}", clauses.join(" AND ")), Vec::new()));
    }

    let parent_id = parent_id.ok_or_else(|| {
        Error::config(format!("list '{list}' requires a parent row id"))
    })?;
    let element = registry.list_element(list)?;
    let ancestry = registry.ancestry(final_set)?;
    if !ancestry.iter().any(|a| a == element) {
        return Err(Error::config(format!(
            "final set '{final_set}' is not an element of list '{list}'"
        )));
    }
    Ok((
        format!(
            " WHERE {}.{} = {}",
            dialect.quote(&table_name(element)),
            dialect.quote(&parent_column(list)),
            dialect.placeholder(1),
        ),
        vec![Value::BigInt(parent_id)],
    ))
}

/// Join-select of every row of `final_set` contained in the given list.
pub fn list_query(
    registry: &Registry,
    dialect: Dialect,
    list: &ListKey,
    parent_id: Option<i64>,
    final_set: &str,
) -> Result<QueryText> {
    let base = join_select(registry, dialect, final_set)?;
    let (filter, params) = list_filter(registry, dialect, list, parent_id, final_set)?;
    Ok(QueryText {
        sql: format!("{base}{filter}"),
        params,
    })
}

/// COUNT of rows of `final_set` contained in the given list.
pub fn count_query(
    registry: &Registry,
    dialect: Dialect,
    list: &ListKey,
    parent_id: Option<i64>,
    final_set: &str,
) -> Result<QueryText> {
    let joined = join_select(registry, dialect, final_set)?;
    let from = joined
        .strip_prefix("SELECT * ")
        .unwrap_or(&joined)
        .to_string();
    let (filter, params) = list_filter(registry, dialect, list, parent_id, final_set)?;
    Ok(QueryText {
        sql: format!("SELECT COUNT(*) {from}{filter}"),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinstore_core::descriptor::{PropertyKind, PropertySet};

    fn registry() -> Registry {
        Registry::build(
            "fin.session",
            vec![
                PropertySet::new("fin.session")
                    .list("accounts", "fin.account")
                    .list("transactions", "fin.transaction"),
                PropertySet::new("fin.account")
                    .derivable()
                    .scalar("name", PropertyKind::Text)
                    .list("subAccounts", "fin.account"),
                PropertySet::new("fin.bankAccount")
                    .base("fin.account")
                    .scalar("balance", PropertyKind::Double),
                PropertySet::new("fin.transaction").scalar("date", PropertyKind::Date),
            ],
        )
        .unwrap()
    }

    #[test]
    fn join_select_walks_the_chain_most_derived_first() {
        let reg = registry();
        let sql = join_select(&reg, Dialect::Sqlite, "fin.bankAccount").unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"fin_bankAccount\" INNER JOIN \"fin_account\" \
             ON \"fin_bankAccount\".\"_ID\" = \"fin_account\".\"_ID\""
        );
    }

    #[test]
    fn join_select_rejects_derivable_sets() {
        let reg = registry();
        assert!(join_select(&reg, Dialect::Sqlite, "fin.account").is_err());
    }

    #[test]
    fn list_query_binds_parent_id() {
        let reg = registry();
        let list = ListKey::new("fin.account", "subAccounts");
        let q = list_query(&reg, Dialect::Sqlite, &list, Some(7), "fin.bankAccount").unwrap();
        assert!(q.sql.ends_with(
            "WHERE \"fin_account\".\"fin_account_subAccounts\" = ?"
        ));
        assert_eq!(q.params, vec![Value::BigInt(7)]);
    }

    #[test]
    fn session_list_query_requires_all_parents_null() {
        let reg = registry();
        let list = ListKey::new("fin.session", "accounts");
        let q = list_query(&reg, Dialect::Sqlite, &list, None, "fin.bankAccount").unwrap();
        assert!(q.sql.ends_with(
            "WHERE \"fin_account\".\"fin_account_subAccounts\" IS NULL"
        ));
        assert!(q.params.is_empty());
    }

    #[test]
    fn session_list_with_no_candidates_has_no_where() {
        let reg = registry();
        let list = ListKey::new("fin.session", "transactions");
        let q = list_query(&reg, Dialect::Sqlite, &list, None, "fin.transaction").unwrap();
        assert!(!q.sql.contains("WHERE"));
    }

    #[test]
    fn count_query_swaps_the_projection() {
        let reg = registry();
        let list = ListKey::new("fin.session", "accounts");
        let q = count_query(&reg, Dialect::Sqlite, &list, None, "fin.bankAccount").unwrap();
        assert!(q.sql.starts_with("SELECT COUNT(*) FROM \"fin_bankAccount\""));
        assert!(q.sql.contains("INNER JOIN"));
    }

    #[test]
    fn select_by_id_filters_on_own_table() {
        let reg = registry();
        let q = select_by_id(&reg, Dialect::Sqlite, "fin.bankAccount", 42).unwrap();
        assert!(q.sql.ends_with("WHERE \"fin_bankAccount\".\"_ID\" = ?"));
        assert_eq!(q.params, vec![Value::BigInt(42)]);
    }

    #[test]
    fn discriminator_query_targets_basemost_only() {
        let reg = registry();
        let q = discriminator_query(&reg, Dialect::Sqlite, "fin.account", 3).unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"_PROPERTY_SET\" FROM \"fin_account\" WHERE \"_ID\" = ?"
        );
        assert!(discriminator_query(&reg, Dialect::Sqlite, "fin.transaction", 3).is_err());
    }

    #[test]
    fn postgres_uses_numbered_placeholders() {
        let reg = registry();
        let q = select_by_id(&reg, Dialect::Postgres, "fin.bankAccount", 1).unwrap();
        assert!(q.sql.ends_with("= $1"));
    }
}
