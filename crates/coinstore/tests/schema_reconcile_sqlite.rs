use coinstore::{Connection, DataStore, Value, baseline, reconcile};
use coinstore_sqlite::{SqliteConfig, SqliteConnection, SqliteConnector};

fn temp_db(name: &str) -> String {
    let path = std::env::temp_dir().join(format!("coinstore-{name}-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path.to_string_lossy().into_owned()
}

#[test]
fn second_reconcile_run_changes_nothing() {
    let registry = baseline::registry().unwrap();
    let mut conn = SqliteConnection::open_memory().unwrap();

    let first = reconcile(&registry, &mut conn).unwrap();
    assert!(!first.created_tables.is_empty());
    assert!(first.created_tables.contains(&"finance_account".to_string()));
    assert!(first.created_tables.contains(&"finance_bankAccount".to_string()));

    let second = reconcile(&registry, &mut conn).unwrap();
    assert!(second.created_tables.is_empty());
    assert!(second.added_columns.is_empty());
    assert!(second.added_foreign_keys.is_empty());
}

#[test]
fn reconcile_leaves_foreign_tables_and_columns_alone() {
    let path = temp_db("reconcile-additive");
    {
        let mut conn = SqliteConnection::open_file(path.clone()).unwrap();
        conn.execute("CREATE TABLE scratchpad (note TEXT)", &[]).unwrap();
        conn.execute("INSERT INTO scratchpad (note) VALUES ('keep me')", &[])
            .unwrap();
        conn.execute(
            "CREATE TABLE \"finance_commodity\" (\"_ID\" INTEGER PRIMARY KEY AUTOINCREMENT, \"extra\" TEXT)",
            &[],
        )
        .unwrap();
        conn.close().unwrap();
    }

    let registry = baseline::registry().unwrap();
    let mut conn = SqliteConnection::open_file(path.clone()).unwrap();
    let report = reconcile(&registry, &mut conn).unwrap();

    // the pre-existing table gained the descriptor columns it lacked
    assert!(
        report
            .added_columns
            .iter()
            .any(|(table, column)| table == "finance_commodity" && column == "name")
    );
    assert!(!report.created_tables.contains(&"finance_commodity".to_string()));

    let rows = conn.query("SELECT note FROM scratchpad", &[]).unwrap();
    assert_eq!(rows[0].get(0).and_then(Value::as_str), Some("keep me"));
    let rows = conn
        .query("SELECT \"extra\", \"name\" FROM \"finance_commodity\"", &[])
        .unwrap();
    assert!(rows.is_empty());
    conn.close().unwrap();

    let _ = std::fs::remove_file(&path);
}

#[test]
fn store_open_reconciles_and_reopen_finds_data() {
    let path = temp_db("reconcile-reopen");

    let registry = baseline::registry().unwrap();
    let store = DataStore::open(
        registry,
        Box::new(SqliteConnector::new(SqliteConfig::file(path.clone()))),
    )
    .unwrap();
    let session = store.session().unwrap();
    let list = coinstore::lists::CachedList::of(&store, &session, "accounts").unwrap();
    let account = list
        .create_element(
            &store,
            baseline::BANK_ACCOUNT,
            &[("name".to_string(), Value::from("Persistent"))]
                .into_iter()
                .collect(),
        )
        .unwrap();
    let id = account.row_id();
    drop(account);
    drop(session);
    drop(store);

    let registry = baseline::registry().unwrap();
    let store = DataStore::open(
        registry,
        Box::new(SqliteConnector::new(SqliteConfig::file(path.clone()))),
    )
    .unwrap();
    let fetched = store.fetch(baseline::ACCOUNT, id).unwrap();
    assert_eq!(fetched.set_id(), baseline::BANK_ACCOUNT);
    assert_eq!(fetched.get("name").as_str(), Some("Persistent"));

    let _ = std::fs::remove_file(&path);
}
