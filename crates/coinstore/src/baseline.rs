//! The baseline finance model.
//!
//! The property sets the core finance module contributes; feature modules
//! register additional sets (and extensions of these) before the registry
//! is built.

use coinstore_core::descriptor::{PropertyKind, PropertySet, Registry};
use coinstore_core::{Result, Value};

pub const SESSION: &str = "finance.session";
pub const COMMODITY: &str = "finance.commodity";
pub const CURRENCY: &str = "finance.currency";
pub const SECURITY: &str = "finance.security";
pub const ACCOUNT: &str = "finance.account";
pub const BANK_ACCOUNT: &str = "finance.bankAccount";
pub const TRANSACTION: &str = "finance.transaction";
pub const ENTRY: &str = "finance.entry";
/// Extension contributed by the budgeting module; adds columns to the
/// account table.
pub const BUDGET_EXTENSION: &str = "budgeting.account";

/// The property sets of the baseline model.
pub fn property_sets() -> Vec<PropertySet> {
    vec![
        PropertySet::new(SESSION)
            .list("commodities", COMMODITY)
            .list("accounts", ACCOUNT)
            .list("transactions", TRANSACTION),
        PropertySet::new(COMMODITY)
            .derivable()
            .scalar("name", PropertyKind::Text),
        PropertySet::new(CURRENCY)
            .base(COMMODITY)
            .scalar("symbol", PropertyKind::Text)
            .scalar("decimalPlaces", PropertyKind::Integer),
        PropertySet::new(SECURITY)
            .base(COMMODITY)
            .scalar("ticker", PropertyKind::Text),
        PropertySet::new(ACCOUNT)
            .derivable()
            .scalar("name", PropertyKind::Text)
            .scalar("startDate", PropertyKind::Date)
            .list("subAccounts", ACCOUNT),
        PropertySet::new(BANK_ACCOUNT)
            .base(ACCOUNT)
            .scalar("balance", PropertyKind::Double)
            .scalar("currency", PropertyKind::Reference(CURRENCY.to_string())),
        PropertySet::new(TRANSACTION)
            .scalar("date", PropertyKind::Date)
            .scalar("memo", PropertyKind::Text)
            .list("entries", ENTRY),
        PropertySet::new(ENTRY)
            .scalar("amount", PropertyKind::Double)
            .scalar("date", PropertyKind::Date)
            .scalar("account", PropertyKind::Reference(ACCOUNT.to_string())),
        PropertySet::new(BUDGET_EXTENSION)
            .extension_of(ACCOUNT)
            .scalar_default("budgetCategory", PropertyKind::Text, Value::from("none"))
            .scalar("budgetLimit", PropertyKind::Double),
    ]
}

/// Build the registry for the baseline model alone.
pub fn registry() -> Result<Registry> {
    Registry::build(SESSION, property_sets())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinstore_core::descriptor::ListKey;

    #[test]
    fn baseline_registry_builds() {
        let registry = registry().unwrap();
        assert_eq!(registry.session_id(), SESSION);
        assert_eq!(registry.basemost(BANK_ACCOUNT).unwrap(), ACCOUNT);
        assert!(registry.has_discriminator(ACCOUNT));
        assert!(!registry.has_discriminator(TRANSACTION));
        assert_eq!(registry.final_subtypes(COMMODITY), &[CURRENCY, SECURITY]);
        assert_eq!(registry.extensions_of(ACCOUNT), &[BUDGET_EXTENSION]);
    }

    #[test]
    fn session_lists_are_implicit_parents() {
        let registry = registry().unwrap();
        assert!(registry.is_session_list(&ListKey::new(SESSION, "accounts")));
        assert!(!registry.is_session_list(&ListKey::new(ACCOUNT, "subAccounts")));
        // sub-account parent columns exist, session list ones do not
        assert_eq!(
            registry.lists_of_element(ACCOUNT),
            &[ListKey::new(ACCOUNT, "subAccounts")]
        );
    }
}
