//! Relational naming conventions.
//!
//! These rules must stay bit-exact for compatibility with existing data
//! files produced by other tools sharing the schema.

use crate::descriptor::ListKey;

/// Primary key column, present on every table.
pub const ID_COLUMN: &str = "_ID";

/// Discriminator column on basemost derivable tables, holding the dotted
/// identifier of the row's most-derived property set.
pub const DISCRIMINATOR_COLUMN: &str = "_PROPERTY_SET";

/// Generous size for the discriminator VARCHAR.
pub const DISCRIMINATOR_LEN: u16 = 250;

/// Table name for a property set: dotted identifier with `.` -> `_`.
pub fn table_name(set_id: &str) -> String {
    set_id.replace('.', "_")
}

/// Parent-reference column for a containing list: the list property's fully
/// qualified name with `.` -> `_`.
pub fn parent_column(list: &ListKey) -> String {
    list.qualified().replace('.', "_")
}

/// Column name for a scalar property.
///
/// Extension properties use the fully qualified (dotted -> underscored)
/// name so two modules can contribute same-named properties to one host
/// table; everything else uses the unqualified local name.
pub fn scalar_column(owner_id: &str, property: &str, extension: bool) -> String {
    if extension {
        format!("{owner_id}.{property}").replace('.', "_")
    } else {
        property.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_replace_dots() {
        assert_eq!(table_name("finance.account"), "finance_account");
        assert_eq!(table_name("nodots"), "nodots");
    }

    #[test]
    fn parent_columns_use_qualified_list_name() {
        let key = ListKey::new("finance.account", "subAccounts");
        assert_eq!(parent_column(&key), "finance_account_subAccounts");
    }

    #[test]
    fn extension_columns_are_qualified() {
        assert_eq!(
            scalar_column("budget.accountGoal", "target", true),
            "budget_accountGoal_target"
        );
        assert_eq!(scalar_column("finance.account", "name", false), "name");
    }
}
