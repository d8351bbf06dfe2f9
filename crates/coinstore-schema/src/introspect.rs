//! Live database metadata.
//!
//! The reconciler only ever needs three facts: which tables exist, which
//! columns they have, and which columns already carry a foreign key. All
//! lookups are case-insensitive because the engines fold unquoted
//! identifiers differently.

use std::collections::{HashMap, HashSet};

use coinstore_core::connection::Connection;
use coinstore_core::identifiers::sanitize_identifier;
use coinstore_core::{Dialect, Result};

/// What is actually present in the database right now.
#[derive(Debug, Default)]
pub struct LiveSchema {
    /// Lowercased table name -> facts
    tables: HashMap<String, TableFacts>,
}

/// Facts about one existing table.
#[derive(Debug, Default)]
pub struct TableFacts {
    /// The name as the database reports it
    pub name: String,
    columns: HashSet<String>,
    fk_columns: HashSet<String>,
}

impl TableFacts {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: HashSet::new(),
            fk_columns: HashSet::new(),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(&name.to_lowercase())
    }

    pub fn has_foreign_key_on(&self, column: &str) -> bool {
        self.fk_columns.contains(&column.to_lowercase())
    }

    pub fn add_column(&mut self, name: &str) {
        self.columns.insert(name.to_lowercase());
    }

    pub fn add_foreign_key(&mut self, column: &str) {
        self.fk_columns.insert(column.to_lowercase());
    }
}

impl LiveSchema {
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    pub fn table(&self, name: &str) -> Option<&TableFacts> {
        self.tables.get(&name.to_lowercase())
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableFacts> {
        self.tables.get_mut(&name.to_lowercase())
    }

    /// Record a table the reconciler just created itself.
    pub fn add_table(&mut self, name: &str) -> &mut TableFacts {
        self.tables
            .entry(name.to_lowercase())
            .or_insert_with(|| TableFacts::new(name))
    }

    /// Read the current schema from a live connection.
    pub fn introspect(conn: &mut dyn Connection) -> Result<Self> {
        match conn.dialect() {
            Dialect::Sqlite => introspect_sqlite(conn),
            Dialect::Postgres => introspect_information_schema(conn, "'public'"),
            Dialect::Mysql => introspect_information_schema(conn, "DATABASE()"),
        }
    }
}

fn introspect_sqlite(conn: &mut dyn Connection) -> Result<LiveSchema> {
    let mut live = LiveSchema::default();
    let tables = conn.query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        &[],
    )?;
    for row in tables {
        let table: String = row.get_named("name")?;
        let facts = live.add_table(&table);

        // PRAGMA cannot take bound parameters, so the name is sanitized.
        let safe = sanitize_identifier(&table);
        for col in conn.query(&format!("PRAGMA table_info(\"{safe}\")"), &[])? {
            let name: String = col.get_named("name")?;
            facts.add_column(&name);
        }
        for fk in conn.query(&format!("PRAGMA foreign_key_list(\"{safe}\")"), &[])? {
            let column: String = fk.get_named("from")?;
            facts.add_foreign_key(&column);
        }
    }
    Ok(live)
}

fn introspect_information_schema(conn: &mut dyn Connection, schema: &str) -> Result<LiveSchema> {
    let mut live = LiveSchema::default();
    let tables = conn.query(
        &format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = {schema} AND table_type = 'BASE TABLE'"
        ),
        &[],
    )?;
    for row in tables {
        let table: String = row.get_named("table_name")?;
        live.add_table(&table);
    }

    let columns = conn.query(
        &format!(
            "SELECT table_name, column_name FROM information_schema.columns \
             WHERE table_schema = {schema}"
        ),
        &[],
    )?;
    for row in columns {
        let table: String = row.get_named("table_name")?;
        let column: String = row.get_named("column_name")?;
        if let Some(facts) = live.table_mut(&table) {
            facts.add_column(&column);
        }
    }

    let fks = conn.query(
        &format!(
            "SELECT tc.table_name, kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = {schema}"
        ),
        &[],
    )?;
    for row in fks {
        let table: String = row.get_named("table_name")?;
        let column: String = row.get_named("column_name")?;
        if let Some(facts) = live.table_mut(&table) {
            facts.add_foreign_key(&column);
        }
    }
    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_case_insensitive() {
        let mut live = LiveSchema::default();
        let facts = live.add_table("FIN_ACCOUNT");
        facts.add_column("Name");
        facts.add_foreign_key("fin_account_subAccounts");

        assert!(live.has_table("fin_account"));
        let facts = live.table("Fin_Account").unwrap();
        assert!(facts.has_column("NAME"));
        assert!(facts.has_foreign_key_on("FIN_ACCOUNT_SUBACCOUNTS"));
        assert!(!facts.has_column("balance"));
        assert!(!live.has_table("fin_entry"));
    }

    #[test]
    fn add_table_is_idempotent() {
        let mut live = LiveSchema::default();
        live.add_table("t").add_column("a");
        live.add_table("T").add_column("b");
        let facts = live.table("t").unwrap();
        assert!(facts.has_column("a") && facts.has_column("b"));
    }
}
