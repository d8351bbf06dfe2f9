//! SQLite connection implementation.
//!
//! Safe wrappers around the SQLite C API implementing the engine's
//! [`Connection`] trait. The raw database handle lives behind an
//! `Arc<Mutex<..>>` so lazy row streams can keep stepping their statement
//! after the call that produced them returns.

use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex};

use coinstore_core::config::{StoreConfig, StoreUrl};
use coinstore_core::error::{
    ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind,
};
use coinstore_core::row::ColumnInfo;
use coinstore_core::{Connection, Connector, Dialect, Result, Row, RowStream, Value};
use libsqlite3_sys as ffi;
use tracing::trace;

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Config for a file-based database (created if missing).
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Config for an in-memory database.
    #[must_use]
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set the busy timeout.
    #[must_use]
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    fn open_flags(&self) -> c_int {
        let mut flags = ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE
            | ffi::SQLITE_OPEN_FULLMUTEX;
        if self.path.starts_with("file:") {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        flags
    }
}

/// Raw database handle. `db` is null once the connection has been closed.
struct RawDb {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is opened in serialized mode (SQLITE_OPEN_FULLMUTEX)
// and all access goes through the owning Mutex.
unsafe impl Send for RawDb {}

impl RawDb {
    fn ptr(&self) -> Result<*mut ffi::sqlite3> {
        if self.db.is_null() {
            Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                message: "connection is closed".to_string(),
                source: None,
            }))
        } else {
            Ok(self.db)
        }
    }
}

impl Drop for RawDb {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is a valid handle; close_v2 defers teardown until
            // any outstanding statements are finalized.
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
        }
    }
}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    db: Arc<Mutex<RawDb>>,
    path: String,
    in_transaction: bool,
}

impl SqliteConnection {
    /// Open a connection with the given configuration.
    ///
    /// Foreign-key enforcement is switched on immediately; the schema
    /// relies on `ON DELETE` actions firing.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();

        // SAFETY: pointers are valid; the return code is checked.
        let rc = unsafe {
            ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, config.open_flags(), ptr::null())
        };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                code_string(rc)
            } else {
                // SAFETY: db is valid even when open fails; errmsg returns
                // a valid C string owned by the handle.
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("failed to open database: {msg}"),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        let conn = Self {
            db: Arc::new(Mutex::new(RawDb { db })),
            path: config.path.clone(),
            in_transaction: false,
        };
        conn.execute_raw("PRAGMA foreign_keys = ON")?;
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// The database path this connection was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute SQL directly without preparing (pragmas, transaction control).
    fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock();
        let db = inner.ptr()?;
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;

        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg.is_null() {
                code_string(rc)
            } else {
                // SAFETY: errmsg is a valid sqlite-allocated string
                let msg = unsafe { CStr::from_ptr(errmsg).to_string_lossy().into_owned() };
                unsafe { ffi::sqlite3_free(errmsg.cast()) };
                msg
            };
            return Err(Error::Query(QueryError {
                kind: error_code_to_kind(rc),
                sql: Some(sql.to_string()),
                message: msg,
                source: None,
            }));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RawDb> {
        match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Prepare a statement and bind its parameters; finalized by the caller.
    fn prepare_bound(
        db: *mut ffi::sqlite3,
        sql: &str,
        params: &[Value],
    ) -> Result<*mut ffi::sqlite3_stmt> {
        let stmt = prepare_stmt(db, sql)?;
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { crate::types::bind_value(stmt, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: stmt is valid
                unsafe { ffi::sqlite3_finalize(stmt) };
                return Err(bind_error(db, sql, i + 1));
            }
        }
        Ok(stmt)
    }

    fn execute_inner(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        trace!(sql, "execute");
        let inner = self.lock();
        let db = inner.ptr()?;
        let stmt = Self::prepare_bound(db, sql, params)?;

        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        // SAFETY: stmt is valid
        unsafe { ffi::sqlite3_finalize(stmt) };

        match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let changes = unsafe { ffi::sqlite3_changes(db) };
                Ok(changes as u64)
            }
            _ => Err(step_error(db, sql)),
        }
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.execute_inner(sql, params)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        trace!(sql, "insert");
        let inner = self.lock();
        let db = inner.ptr()?;
        let stmt = Self::prepare_bound(db, sql, params)?;

        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        // SAFETY: stmt is valid
        unsafe { ffi::sqlite3_finalize(stmt) };

        match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid; rowid read under the same lock as
                // the insert, so no interleaved write can clobber it.
                Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
            }
            _ => Err(step_error(db, sql)),
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        trace!(sql, "query");
        let inner = self.lock();
        let db = inner.ptr()?;
        let stmt = Self::prepare_bound(db, sql, params)?;
        let columns = column_info(stmt);

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            let rc = unsafe { ffi::sqlite3_step(stmt) };
            match rc {
                ffi::SQLITE_ROW => rows.push(read_row(stmt, &columns)),
                ffi::SQLITE_DONE => break,
                _ => {
                    // SAFETY: stmt is valid
                    unsafe { ffi::sqlite3_finalize(stmt) };
                    return Err(step_error(db, sql));
                }
            }
        }

        // SAFETY: stmt is valid
        unsafe { ffi::sqlite3_finalize(stmt) };
        Ok(rows)
    }

    fn query_lazy(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        trace!(sql, "query_lazy");
        let inner = self.lock();
        let db = inner.ptr()?;
        let stmt = Self::prepare_bound(db, sql, params)?;
        let columns = column_info(stmt);
        drop(inner);

        Ok(Box::new(SqliteRowStream {
            db: Arc::clone(&self.db),
            stmt,
            columns,
            sql: sql.to_string(),
            done: false,
        }))
    }

    fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(transaction_state_error("already in a transaction"));
        }
        self.execute_raw("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(transaction_state_error("not in a transaction"));
        }
        self.execute_raw("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(transaction_state_error("not in a transaction"));
        }
        self.execute_raw("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut inner = self.lock();
        let db = inner.ptr()?;
        // SAFETY: db is valid; close_v2 defers teardown past any live
        // statements held by row streams.
        unsafe {
            ffi::sqlite3_close_v2(db);
        }
        inner.db = ptr::null_mut();
        Ok(())
    }
}

/// A lazily-consumed result set holding its own prepared statement.
pub struct SqliteRowStream {
    db: Arc<Mutex<RawDb>>,
    stmt: *mut ffi::sqlite3_stmt,
    columns: Arc<ColumnInfo>,
    sql: String,
    done: bool,
}

// SAFETY: the statement is only stepped while holding the database mutex.
unsafe impl Send for SqliteRowStream {}

impl SqliteRowStream {
    fn finalize(&mut self) {
        if !self.stmt.is_null() {
            let _guard = self.db.lock();
            // SAFETY: stmt is a valid statement handle, finalized once
            unsafe { ffi::sqlite3_finalize(self.stmt) };
            self.stmt = ptr::null_mut();
        }
    }
}

impl RowStream for SqliteRowStream {
    fn next_row(&mut self) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let inner = match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let db = inner.ptr()?;

        // SAFETY: stmt is valid until finalize
        let rc = unsafe { ffi::sqlite3_step(self.stmt) };
        match rc {
            ffi::SQLITE_ROW => Ok(Some(read_row(self.stmt, &self.columns))),
            ffi::SQLITE_DONE => {
                drop(inner);
                self.done = true;
                self.finalize();
                Ok(None)
            }
            _ => {
                let err = step_error(db, &self.sql);
                drop(inner);
                self.done = true;
                self.finalize();
                Err(err)
            }
        }
    }
}

impl Drop for SqliteRowStream {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Connector producing [`SqliteConnection`]s from a store configuration.
pub struct SqliteConnector {
    config: SqliteConfig,
}

impl SqliteConnector {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    /// Build a connector from a store URL such as `store:sqlite:data.db`.
    pub fn from_store(config: &StoreConfig) -> Result<Self> {
        let url: StoreUrl = config.parse()?;
        let dialect = url.dialect()?;
        if dialect != Dialect::Sqlite {
            return Err(Error::config(format!(
                "sqlite connector cannot serve dialect {}",
                dialect.name()
            )));
        }
        Ok(Self::new(SqliteConfig::file(url.data)))
    }
}

impl Connector for SqliteConnector {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection::open(&self.config)?))
    }
}

fn column_info(stmt: *mut ffi::sqlite3_stmt) -> Arc<ColumnInfo> {
    // SAFETY: stmt is a valid prepared statement
    let col_count = unsafe { ffi::sqlite3_column_count(stmt) };
    let mut names = Vec::with_capacity(col_count as usize);
    for i in 0..col_count {
        // SAFETY: i is a valid column index
        let name = unsafe { crate::types::column_name(stmt, i) }.unwrap_or_else(|| format!("col{i}"));
        names.push(name);
    }
    Arc::new(ColumnInfo::new(names))
}

fn read_row(stmt: *mut ffi::sqlite3_stmt, columns: &Arc<ColumnInfo>) -> Row {
    let count = columns.len();
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        // SAFETY: stmt just returned SQLITE_ROW, i is a valid column index
        values.push(unsafe { crate::types::read_column(stmt, i as c_int) });
    }
    Row::with_columns(Arc::clone(columns), values)
}

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: all pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_sql.as_bytes().len() as c_int,
            &mut stmt,
            ptr::null_mut(),
        )
    };

    if rc != ffi::SQLITE_OK {
        return Err(prepare_error(db, sql));
    }
    Ok(stmt)
}

fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: db is valid, errmsg returns a valid C string
    unsafe {
        CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned()
    }
}

fn code_string(code: c_int) -> String {
    // SAFETY: errstr returns a static string for any code
    unsafe {
        CStr::from_ptr(ffi::sqlite3_errstr(code))
            .to_string_lossy()
            .into_owned()
    }
}

fn prepare_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let code = unsafe { ffi::sqlite3_errcode(db) };
    let kind = if code & 0xff == ffi::SQLITE_ERROR {
        QueryErrorKind::Syntax
    } else {
        error_code_to_kind(code)
    };
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        message: errmsg(db),
        source: None,
    })
}

fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: Some(sql.to_string()),
        message: format!("failed to bind parameter {}: {}", param_index, errmsg(db)),
        source: None,
    })
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let code = unsafe { ffi::sqlite3_errcode(db) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message: errmsg(db),
        source: None,
    })
}

fn transaction_state_error(message: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: None,
        message: message.to_string(),
        source: None,
    })
}

fn null_byte_error(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    // Extended result codes carry the primary code in the low byte.
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Locked,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Database,
    }
}
