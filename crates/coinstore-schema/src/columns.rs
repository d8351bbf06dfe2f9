//! Expected table layouts derived from the descriptor registry.
//!
//! One [`TableLayout`] per non-extension property set. Extension sets do
//! not appear here; their scalar properties already landed in their host's
//! layout as qualified columns.

use coinstore_core::descriptor::{PropertyKind, Registry};
use coinstore_core::naming::{
    DISCRIMINATOR_COLUMN, ID_COLUMN, parent_column, scalar_column, table_name,
};
use coinstore_core::{Error, Result, Value};

/// What a column holds, which drives its SQL type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// The `_ID` primary key. Auto-generated on basemost tables only.
    RowId { auto: bool },
    /// The `_PROPERTY_SET` discriminator on basemost derivable tables.
    Discriminator,
    /// A nullable parent-reference column for one containing list.
    Parent,
    /// A scalar property column.
    Scalar(PropertyKind),
}

/// One expected column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    /// Only extension columns carry defaults; rows written before the
    /// extension module existed must still read sensibly.
    pub default: Option<Value>,
}

/// One expected foreign key, always referencing `_ID` of `ref_table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    pub name: String,
    pub column: String,
    pub ref_table: String,
    /// Derived-table `_ID` keys cascade (the rows share one identity);
    /// parent and reference keys are restrictive so deletes stay explicit.
    pub cascade: bool,
}

/// The full expected shape of one table.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub set_id: String,
    pub table: String,
    pub columns: Vec<ColumnSpec>,
    pub foreign_keys: Vec<ForeignKeySpec>,
}

impl TableLayout {
    /// Compute the layout for a non-extension set.
    pub fn for_set(registry: &Registry, set_id: &str) -> Result<Self> {
        let set = registry.expect(set_id)?;
        if set.is_extension() {
            return Err(Error::config(format!(
                "extension set '{set_id}' has no table of its own"
            )));
        }
        let table = table_name(set_id);
        let ancestry = registry.ancestry(set_id)?;
        let is_basemost = ancestry.len() == 1;

        let mut columns = vec![ColumnSpec {
            name: ID_COLUMN.to_string(),
            kind: ColumnKind::RowId { auto: is_basemost },
            default: None,
        }];
        let mut foreign_keys = Vec::new();

        if !is_basemost {
            // _ID doubles as a join key up the chain.
            let base_table = table_name(&ancestry[ancestry.len() - 2]);
            foreign_keys.push(ForeignKeySpec {
                name: fk_name(&table, ID_COLUMN),
                column: ID_COLUMN.to_string(),
                ref_table: base_table,
                cascade: true,
            });
        }

        if registry.has_discriminator(set_id) {
            columns.push(ColumnSpec {
                name: DISCRIMINATOR_COLUMN.to_string(),
                kind: ColumnKind::Discriminator,
                default: None,
            });
        }

        for list in registry.lists_of_element(set_id) {
            let column = parent_column(list);
            let owner_basemost = registry.basemost(&list.owner)?;
            foreign_keys.push(ForeignKeySpec {
                name: fk_name(&table, &column),
                column: column.clone(),
                ref_table: table_name(owner_basemost),
                cascade: false,
            });
            columns.push(ColumnSpec {
                name: column,
                kind: ColumnKind::Parent,
                default: None,
            });
        }

        let mut push_scalars =
            |owner_id: &str, extension: bool, columns: &mut Vec<ColumnSpec>| -> Result<()> {
                let owner = registry.expect(owner_id)?;
                for scalar in owner.scalars() {
                    let column = scalar_column(owner_id, &scalar.name, extension);
                    if let PropertyKind::Reference(target) = &scalar.kind {
                        let target_basemost = registry.basemost(target)?;
                        foreign_keys.push(ForeignKeySpec {
                            name: fk_name(&table, &column),
                            column: column.clone(),
                            ref_table: table_name(target_basemost),
                            cascade: false,
                        });
                    }
                    columns.push(ColumnSpec {
                        name: column,
                        kind: ColumnKind::Scalar(scalar.kind.clone()),
                        default: if extension { scalar.default.clone() } else { None },
                    });
                }
                Ok(())
            };

        push_scalars(set_id, false, &mut columns)?;
        for extension_id in registry.extensions_of(set_id) {
            push_scalars(extension_id, true, &mut columns)?;
        }

        Ok(Self {
            set_id: set_id.to_string(),
            table,
            columns,
            foreign_keys,
        })
    }

    /// Layouts for every table-mapped set, in registration order.
    pub fn all(registry: &Registry) -> Result<Vec<Self>> {
        registry
            .sets()
            .filter(|s| !s.is_extension())
            .map(|s| Self::for_set(registry, s.id()))
            .collect()
    }

    /// Find a column spec by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

fn fk_name(table: &str, column: &str) -> String {
    format!("fk_{table}_{column}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinstore_core::descriptor::PropertySet;

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
                PropertySet::new("fin.transaction")
                    .scalar("date", PropertyKind::Date)
                    .list("entries", "fin.entry"),
                PropertySet::new("fin.entry")
                    .scalar("amount", PropertyKind::Double)
                    .scalar("account", PropertyKind::Reference("fin.account".into())),
                PropertySet::new("budget.goal")
                    .extension_of("fin.account")
                    .scalar_default("target", PropertyKind::Double, Value::Double(0.0)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn basemost_layout_has_auto_pk_and_discriminator() {
        let reg = registry();
        let layout = TableLayout::for_set(&reg, "fin.account").unwrap();
        assert_eq!(layout.table, "fin_account");

        let pk = layout.column("_ID").unwrap();
        assert_eq!(pk.kind, ColumnKind::RowId { auto: true });
        assert!(layout.column("_PROPERTY_SET").is_some());

        // Self-referencing list puts its parent column on this very table.
        let parent = layout.column("fin_account_subAccounts").unwrap();
        assert_eq!(parent.kind, ColumnKind::Parent);
        let fk = layout
            .foreign_keys
            .iter()
            .find(|fk| fk.column == "fin_account_subAccounts")
            .unwrap();
        assert_eq!(fk.ref_table, "fin_account");
        assert!(!fk.cascade);
    }

    #[test]
    fn derived_layout_reuses_base_id() {
        let reg = registry();
        let layout = TableLayout::for_set(&reg, "fin.bankAccount").unwrap();

        let pk = layout.column("_ID").unwrap();
        assert_eq!(pk.kind, ColumnKind::RowId { auto: false });
        assert!(layout.column("_PROPERTY_SET").is_none());

        let fk = layout
            .foreign_keys
            .iter()
            .find(|fk| fk.column == "_ID")
            .unwrap();
        assert_eq!(fk.ref_table, "fin_account");
        assert!(fk.cascade);
    }

    #[test]
    fn session_lists_add_no_columns() {
        let reg = registry();
        let layout = TableLayout::for_set(&reg, "fin.transaction").unwrap();
        // Only _ID, date and the entry parent column does not belong here.
        assert!(layout.column("fin_session_transactions").is_none());
        assert!(layout.column("date").is_some());
    }

    #[test]
    fn extension_columns_are_qualified_and_carry_defaults() {
        let reg = registry();
        let layout = TableLayout::for_set(&reg, "fin.account").unwrap();
        let col = layout.column("budget_goal_target").unwrap();
        assert_eq!(col.default, Some(Value::Double(0.0)));

        let own = layout.column("name").unwrap();
        assert_eq!(own.default, None);
    }

    #[test]
    fn reference_columns_point_at_basemost_table() {
        let reg = registry();
        let layout = TableLayout::for_set(&reg, "fin.entry").unwrap();
        let fk = layout
            .foreign_keys
            .iter()
            .find(|fk| fk.column == "account")
            .unwrap();
        assert_eq!(fk.ref_table, "fin_account");
        assert!(!fk.cascade);
    }

    #[test]
    fn extensions_have_no_layout() {
        let reg = registry();
        assert!(TableLayout::for_set(&reg, "budget.goal").is_err());
        let all = TableLayout::all(&reg).unwrap();
        assert!(all.iter().all(|l| l.set_id != "budget.goal"));
        assert_eq!(all.len(), 5);
    }
}
