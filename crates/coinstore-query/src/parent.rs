//! Containing-list resolution from a fetched row.

use tracing::trace;

use coinstore_core::descriptor::{ListKey, Registry};
use coinstore_core::naming::parent_column;
use coinstore_core::{Result, Row};

/// Which list a row belongs to, and under which parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParent {
    pub list: ListKey,
    /// `None` means the owner is the session (no parent column exists).
    pub parent_id: Option<i64>,
}

/// Scan the row's candidate parent columns and decide its containing list.
///
/// Candidates are visited ancestor type by ancestor type, basemost first,
/// declaration order within a type; the first non-null column wins. A row
/// with every candidate null belongs to the session list that accepts its
/// type. More than one non-null candidate is treated permissively (first
/// match), the same way existing data files are read by other tools.
pub fn resolve_parent(registry: &Registry, row: &Row, set_id: &str) -> Result<ResolvedParent> {
    let candidates = registry.candidate_lists(set_id)?;
    debug_assert!(
        candidates
            .iter()
            .filter_map(|key| row.get_by_name(&parent_column(key)))
            .filter(|v| !v.is_null())
            .count()
            <= 1,
        "row of '{set_id}' has multiple non-null parent columns"
    );

    for key in candidates {
        let column = parent_column(&key);
        if let Some(value) = row.get_by_name(&column) {
            if let Some(parent_id) = value.as_i64() {
                trace!(set = set_id, list = %key, parent_id, "resolved containing list");
                return Ok(ResolvedParent {
                    list: key,
                    parent_id: Some(parent_id),
                });
            }
        }
    }

    let list = registry.session_list_for(set_id)?;
    trace!(set = set_id, list = %list, "row belongs to the session");
    Ok(ResolvedParent {
        list,
        parent_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinstore_core::Value;
    use coinstore_core::descriptor::{PropertyKind, PropertySet};

    fn registry() -> Registry {
        Registry::build(
            "fin.session",
            vec![
                PropertySet::new("fin.session").list("accounts", "fin.account"),
                PropertySet::new("fin.account")
                    .derivable()
                    .scalar("name", PropertyKind::Text)
                    .list("subAccounts", "fin.account"),
                PropertySet::new("fin.bankAccount")
                    .base("fin.account")
                    .scalar("balance", PropertyKind::Double),
            ],
        )
        .unwrap()
    }

    #[test]
    fn non_null_parent_column_wins() {
        let reg = registry();
        let row = Row::new(
            vec![
                "_ID".to_string(),
                "fin_account_subAccounts".to_string(),
            ],
            vec![Value::BigInt(5), Value::BigInt(2)],
        );
        let resolved = resolve_parent(&reg, &row, "fin.bankAccount").unwrap();
        assert_eq!(resolved.list, ListKey::new("fin.account", "subAccounts"));
        assert_eq!(resolved.parent_id, Some(2));
    }

    #[test]
    fn all_null_falls_back_to_session_list() {
        let reg = registry();
        let row = Row::new(
            vec![
                "_ID".to_string(),
                "fin_account_subAccounts".to_string(),
            ],
            vec![Value::BigInt(5), Value::Null],
        );
        let resolved = resolve_parent(&reg, &row, "fin.bankAccount").unwrap();
        assert_eq!(resolved.list, ListKey::new("fin.session", "accounts"));
        assert_eq!(resolved.parent_id, None);
    }

    #[test]
    fn missing_column_is_treated_as_null() {
        let reg = registry();
        let row = Row::new(vec!["_ID".to_string()], vec![Value::BigInt(5)]);
        let resolved = resolve_parent(&reg, &row, "fin.bankAccount").unwrap();
        assert_eq!(resolved.parent_id, None);
    }
}
