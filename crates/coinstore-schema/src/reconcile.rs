//! Additive schema reconciliation.
//!
//! Runs on every startup against a database that other tools may also
//! touch: anything missing is created, nothing is ever dropped, and extra
//! tables or columns are left alone. Two passes, because a foreign key can
//! only be checked once every table in the universe exists.

use tracing::{debug, warn};

use coinstore_core::connection::Connection;
use coinstore_core::descriptor::Registry;
use coinstore_core::{Error, Result};

use crate::columns::TableLayout;
use crate::ddl;
use crate::introspect::LiveSchema;

/// What a reconciliation run changed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub created_tables: Vec<String>,
    /// (table, column) pairs added to pre-existing tables
    pub added_columns: Vec<(String, String)>,
    pub added_foreign_keys: Vec<String>,
    /// Constraints the dialect could not add to a pre-existing table
    pub skipped_foreign_keys: Vec<String>,
}

/// Bring the database up to the registry's expected shape.
///
/// Any database error is fatal to startup; there is no degraded mode.
pub fn reconcile(registry: &Registry, conn: &mut dyn Connection) -> Result<ReconcileReport> {
    let dialect = conn.dialect();
    let layouts = TableLayout::all(registry)?;
    let mut live = LiveSchema::introspect(conn)?;
    let mut report = ReconcileReport::default();

    // Pass 1: tables and columns. Created tables get their foreign keys
    // inline, which is what makes pass 2 a no-op for them on SQLite.
    for layout in &layouts {
        if live.has_table(&layout.table) {
            let missing: Vec<_> = {
                let facts = live
                    .table(&layout.table)
                    .ok_or_else(|| Error::config(format!("table '{}' vanished", layout.table)))?;
                layout
                    .columns
                    .iter()
                    .filter(|c| !facts.has_column(&c.name))
                    .cloned()
                    .collect()
            };
            for column in missing {
                let sql = ddl::add_column(dialect, &layout.table, &column);
                debug!(table = %layout.table, column = %column.name, %sql, "adding column");
                conn.execute(&sql, &[])?;
                if let Some(facts) = live.table_mut(&layout.table) {
                    facts.add_column(&column.name);
                }
                report
                    .added_columns
                    .push((layout.table.clone(), column.name.clone()));
            }
        } else {
            let sql = ddl::create_table(dialect, layout);
            debug!(table = %layout.table, %sql, "creating table");
            conn.execute(&sql, &[])?;
            let facts = live.add_table(&layout.table);
            for column in &layout.columns {
                facts.add_column(&column.name);
            }
            for fk in &layout.foreign_keys {
                facts.add_foreign_key(&fk.column);
            }
            report.created_tables.push(layout.table.clone());
        }
    }

    // Pass 2: foreign keys on pre-existing tables.
    for layout in &layouts {
        for fk in &layout.foreign_keys {
            let present = live
                .table(&layout.table)
                .is_some_and(|facts| facts.has_foreign_key_on(&fk.column));
            if present {
                continue;
            }
            if dialect.supports_add_constraint() {
                let sql = ddl::add_foreign_key(dialect, &layout.table, fk)?;
                debug!(table = %layout.table, constraint = %fk.name, %sql, "adding foreign key");
                conn.execute(&sql, &[])?;
                if let Some(facts) = live.table_mut(&layout.table) {
                    facts.add_foreign_key(&fk.column);
                }
                report.added_foreign_keys.push(fk.name.clone());
            } else {
                // Deletes are explicit and recursive anyway, so a missing
                // constraint on an old table costs referential enforcement
                // only, not correctness of the engine's own operations.
                warn!(
                    table = %layout.table,
                    constraint = %fk.name,
                    "dialect cannot add a constraint to an existing table, leaving it unenforced"
                );
                report.skipped_foreign_keys.push(fk.name.clone());
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinstore_core::connection::RowStream;
    use coinstore_core::descriptor::{PropertyKind, PropertySet};
    use coinstore_core::{Dialect, Row, Value};

    /// Records executed DDL and answers introspection queries from a
    /// scripted schema.
    struct ScriptedConn {
        dialect: Dialect,
        tables: Vec<(String, Vec<String>, Vec<String>)>,
        executed: Vec<String>,
    }

    impl Connection for ScriptedConn {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<u64> {
            self.executed.push(sql.to_string());
            Ok(0)
        }

        fn insert(&mut self, _sql: &str, _params: &[Value]) -> Result<i64> {
            unreachable!("reconciliation never inserts")
        }

        fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            if sql.starts_with("SELECT name FROM sqlite_master") {
                return Ok(self
                    .tables
                    .iter()
                    .map(|(name, _, _)| {
                        Row::new(vec!["name".to_string()], vec![Value::Text(name.clone())])
                    })
                    .collect());
            }
            if let Some(rest) = sql.strip_prefix("PRAGMA table_info(\"") {
                let table = rest.trim_end_matches("\")");
                let cols = self
                    .tables
                    .iter()
                    .find(|(name, _, _)| name == table)
                    .map(|(_, cols, _)| cols.clone())
                    .unwrap_or_default();
                return Ok(cols
                    .into_iter()
                    .map(|c| Row::new(vec!["name".to_string()], vec![Value::Text(c)]))
                    .collect());
            }
            if let Some(rest) = sql.strip_prefix("PRAGMA foreign_key_list(\"") {
                let table = rest.trim_end_matches("\")");
                let fks = self
                    .tables
                    .iter()
                    .find(|(name, _, _)| name == table)
                    .map(|(_, _, fks)| fks.clone())
                    .unwrap_or_default();
                return Ok(fks
                    .into_iter()
                    .map(|c| Row::new(vec!["from".to_string()], vec![Value::Text(c)]))
                    .collect());
            }
            panic!("unexpected query: {sql}");
        }

        fn query_lazy(&mut self, _sql: &str, _params: &[Value]) -> Result<Box<dyn RowStream>> {
            unreachable!()
        }

        fn begin(&mut self) -> Result<()> {
            Ok(())
        }
        fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

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
    fn empty_database_gets_every_table() {
        let mut conn = ScriptedConn {
            dialect: Dialect::Sqlite,
            tables: Vec::new(),
            executed: Vec::new(),
        };
        let report = reconcile(&registry(), &mut conn).unwrap();

        assert_eq!(
            report.created_tables,
            vec!["fin_session", "fin_account", "fin_bankAccount"]
        );
        assert!(report.added_columns.is_empty());
        // Created tables carry their constraints inline; nothing to skip.
        assert!(report.skipped_foreign_keys.is_empty());
        assert!(conn.executed.iter().all(|sql| sql.starts_with("CREATE TABLE")));
    }

    #[test]
    fn existing_table_only_gains_missing_columns() {
        let mut conn = ScriptedConn {
            dialect: Dialect::Sqlite,
            tables: vec![
                ("fin_session".to_string(), vec!["_ID".to_string()], vec![]),
                (
                    // Case differs on purpose; match must be insensitive.
                    "FIN_ACCOUNT".to_string(),
                    vec![
                        "_id".to_string(),
                        "_property_set".to_string(),
                        "name".to_string(),
                        "stray_extra_column".to_string(),
                    ],
                    vec!["fin_account_subAccounts".to_string()],
                ),
            ],
            executed: Vec::new(),
        };
        let report = reconcile(&registry(), &mut conn).unwrap();

        assert_eq!(report.created_tables, vec!["fin_bankAccount"]);
        assert_eq!(
            report.added_columns,
            vec![(
                "fin_account".to_string(),
                "fin_account_subAccounts".to_string()
            )]
        );
        // The stray column is left alone and never mentioned.
        assert!(conn.executed.iter().all(|sql| !sql.contains("stray")));
    }

    #[test]
    fn sqlite_skips_fk_on_preexisting_table() {
        let mut conn = ScriptedConn {
            dialect: Dialect::Sqlite,
            tables: vec![
                ("fin_session".to_string(), vec!["_ID".to_string()], vec![]),
                (
                    "fin_account".to_string(),
                    vec![
                        "_ID".to_string(),
                        "_PROPERTY_SET".to_string(),
                        "name".to_string(),
                        "fin_account_subAccounts".to_string(),
                    ],
                    // No foreign keys recorded on the old table.
                    vec![],
                ),
            ],
            executed: Vec::new(),
        };
        let report = reconcile(&registry(), &mut conn).unwrap();
        assert_eq!(
            report.skipped_foreign_keys,
            vec!["fk_fin_account_fin_account_subAccounts"]
        );
        assert!(report.added_foreign_keys.is_empty());
    }

    #[test]
    fn rerun_on_complete_schema_is_a_no_op() {
        let mut conn = ScriptedConn {
            dialect: Dialect::Sqlite,
            tables: Vec::new(),
            executed: Vec::new(),
        };
        reconcile(&registry(), &mut conn).unwrap();

        // Replay the created schema as the pre-existing state.
        let tables = vec![
            (
                "fin_session".to_string(),
                vec!["_ID".to_string()],
                vec![],
            ),
            (
                "fin_account".to_string(),
                vec![
                    "_ID".to_string(),
                    "_PROPERTY_SET".to_string(),
                    "fin_account_subAccounts".to_string(),
                    "name".to_string(),
                ],
                vec!["fin_account_subAccounts".to_string()],
            ),
            (
                "fin_bankAccount".to_string(),
                vec!["_ID".to_string(), "balance".to_string()],
                vec!["_ID".to_string()],
            ),
        ];
        let mut conn = ScriptedConn {
            dialect: Dialect::Sqlite,
            tables,
            executed: Vec::new(),
        };
        let report = reconcile(&registry(), &mut conn).unwrap();
        assert!(report.created_tables.is_empty());
        assert!(report.added_columns.is_empty());
        assert!(report.added_foreign_keys.is_empty());
        assert!(report.skipped_foreign_keys.is_empty());
        assert!(conn.executed.is_empty());
    }
}
