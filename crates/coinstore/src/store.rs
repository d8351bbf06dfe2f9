//! The engine facade.
//!
//! `DataStore` owns the single logical connection, the registry, and the
//! identity cache, and orchestrates every multi-table operation: insert
//! across an inheritance chain, optimistic update, recursive delete,
//! transactional reparenting, and the one-shot reconnect-and-retry for
//! transient connection failures. Callers serialize access externally;
//! reads run in autocommit, only reparenting opens an explicit
//! transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use coinstore_core::descriptor::{ListKey, PropertyKind, Registry};
use coinstore_core::error::{ConsistencyError, DependencyError, QueryError, QueryErrorKind};
use coinstore_core::naming::{DISCRIMINATOR_COLUMN, ID_COLUMN, parent_column, scalar_column, table_name};
use coinstore_core::value::parse_iso_date;
use coinstore_core::{Connection, Connector, Dialect, Error, Result, Row, RowStream, Value};
use coinstore_query::parent::{ResolvedParent, resolve_parent};
use coinstore_query::select;
use coinstore_schema::reconcile::reconcile;
use tracing::{debug, info, warn};

use crate::entity::Entity;
use crate::identity::{IdentityCache, ObjectKey};

/// What a recursive delete found at the basemost table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The basemost row was already gone; deleting twice is no-op safe.
    AlreadyAbsent,
}

pub struct DataStore {
    registry: Registry,
    connector: Box<dyn Connector>,
    conn: Mutex<Box<dyn Connection>>,
    dialect: Dialect,
    cache: IdentityCache,
    session: Mutex<Option<Arc<Entity>>>,
}

impl DataStore {
    /// Connect and reconcile the schema. Any failure here is fatal; the
    /// engine never starts in a degraded mode.
    pub fn open(registry: Registry, connector: Box<dyn Connector>) -> Result<Self> {
        let mut conn = connector.connect()?;
        let dialect = conn.dialect();
        let report = reconcile(&registry, conn.as_mut())?;
        info!(
            created_tables = report.created_tables.len(),
            added_columns = report.added_columns.len(),
            added_foreign_keys = report.added_foreign_keys.len(),
            "store opened"
        );
        Ok(Self {
            registry,
            connector,
            conn: Mutex::new(conn),
            dialect,
            cache: IdentityCache::new(),
            session: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Forget every cached identity. Live instances keep working; the
    /// next resolution materializes afresh.
    pub fn clear_identity_cache(&self) {
        self.cache.clear();
    }

    /// Run a unit of work against the live connection with exactly one
    /// reconnect-and-retry on a transient connection error. Any other
    /// error, or a second failure, surfaces as-is.
    pub fn with_connection<T>(
        &self,
        mut work: impl FnMut(&mut dyn Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock_conn();
        match work(conn.as_mut()) {
            Ok(value) => Ok(value),
            Err(err) if err.is_transient() => {
                warn!(error = %err, "transient connection failure, reconnecting once");
                *conn = self.connector.connect()?;
                work(conn.as_mut())
            }
            Err(err) => Err(err),
        }
    }

    /// Begin an explicit transaction for multi-statement callers.
    pub fn begin(&self) -> Result<()> {
        self.lock_conn().begin()
    }

    pub fn commit(&self) -> Result<()> {
        self.lock_conn().commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.lock_conn().rollback()
    }

    /// Get or create the singleton session object.
    pub fn session(&self) -> Result<Arc<Entity>> {
        {
            let held = self.lock_session();
            if let Some(session) = held.as_ref() {
                return Ok(Arc::clone(session));
            }
        }

        let session_id = self.registry.session_id().to_string();
        let sql = select::join_select(&self.registry, self.dialect, &session_id)?;
        let entity = match self.query_one(&sql, &[])? {
            Some(row) => self.materialize_row(&session_id, &row)?,
            None => {
                debug!(set = session_id, "creating session row");
                let table = table_name(&session_id);
                let sql = empty_insert(self.dialect, &table);
                let id = self.insert_row(&sql, &[])?;
                let basemost = self.registry.basemost(&session_id)?.to_string();
                let entity = Arc::new(Entity::new(
                    session_id.clone(),
                    ObjectKey::new(basemost, id),
                    None,
                    HashMap::new(),
                ));
                self.cache.register(&entity);
                entity
            }
        };

        let mut held = self.lock_session();
        if let Some(existing) = held.as_ref() {
            return Ok(Arc::clone(existing));
        }
        *held = Some(Arc::clone(&entity));
        Ok(entity)
    }

    /// Materialize an object by identity: cache hit, or discriminator
    /// lookup plus join-select, weak registration, parent resolution.
    pub fn fetch(&self, set_id: &str, id: i64) -> Result<Arc<Entity>> {
        let basemost = self.registry.basemost(set_id)?.to_string();
        if let Some(hit) = self.cache.resolve(&basemost, id) {
            return Ok(hit);
        }

        let actual = if self.registry.has_discriminator(&basemost) {
            let q = select::discriminator_query(&self.registry, self.dialect, &basemost, id)?;
            let row = self
                .query_one(&q.sql, &q.params)?
                .ok_or_else(|| not_found(set_id, id))?;
            row.get_by_name(DISCRIMINATOR_COLUMN)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Consistency(ConsistencyError {
                        table: Some(table_name(&basemost)),
                        expected: 1,
                        affected: 0,
                        message: format!("row {id} of '{basemost}' has no discriminator"),
                    })
                })?
        } else {
            set_id.to_string()
        };

        let q = select::select_by_id(&self.registry, self.dialect, &actual, id)?;
        let row = self
            .query_one(&q.sql, &q.params)?
            .ok_or_else(|| not_found(&actual, id))?;
        self.materialize_row(&actual, &row)
    }

    /// Build an entity from one joined row, registering it weakly. A
    /// still-cached identity short-circuits to the cached instance.
    pub(crate) fn materialize_row(&self, final_set: &str, row: &Row) -> Result<Arc<Entity>> {
        let id = row
            .get_by_name(ID_COLUMN)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::Consistency(ConsistencyError {
                    table: Some(table_name(final_set)),
                    expected: 1,
                    affected: 0,
                    message: format!("fetched row of '{final_set}' carries no row id"),
                })
            })?;
        let basemost = self.registry.basemost(final_set)?.to_string();
        if let Some(hit) = self.cache.resolve(&basemost, id) {
            return Ok(hit);
        }

        let mut values = HashMap::new();
        for level in self.registry.ancestry(final_set)? {
            let set = self.registry.expect(level)?;
            for prop in set.scalars() {
                if let Some(raw) = row.get_by_name(&prop.name) {
                    values.insert(prop.name.clone(), coerce_scalar(&prop.kind, raw, &prop.name));
                }
            }
            for ext_id in self.registry.extensions_of(level) {
                let ext = self.registry.expect(ext_id)?;
                for prop in ext.scalars() {
                    let column = scalar_column(ext_id, &prop.name, true);
                    if let Some(raw) = row.get_by_name(&column) {
                        values.insert(column.clone(), coerce_scalar(&prop.kind, raw, &column));
                    }
                }
            }
        }

        let parent = if final_set == self.registry.session_id() {
            None
        } else {
            Some(resolve_parent(&self.registry, row, final_set)?)
        };

        let entity = Arc::new(Entity::new(
            final_set.to_string(),
            ObjectKey::new(basemost, id),
            parent,
            values,
        ));
        self.cache.register(&entity);
        Ok(entity)
    }

    /// Insert a new object of a final set into a containing list, walking
    /// the ancestor chain basemost to most-derived. The basemost insert
    /// captures the generated key; derived tables insert it explicitly.
    pub fn insert(
        &self,
        set_id: &str,
        list: &ListKey,
        parent_id: Option<i64>,
        values: &HashMap<String, Value>,
    ) -> Result<Arc<Entity>> {
        let set = self.registry.expect(set_id)?;
        if !set.is_final() {
            return Err(Error::config(format!(
                "'{set_id}' is derivable; only final sets can be instantiated"
            )));
        }
        let element = self.registry.list_element(list)?.to_string();
        let ancestry = self.registry.ancestry(set_id)?.to_vec();
        if !ancestry.iter().any(|a| *a == element) {
            return Err(Error::config(format!(
                "'{set_id}' cannot be placed in list '{list}' of element '{element}'"
            )));
        }
        let session_list = self.registry.is_session_list(list);
        if !session_list && parent_id.is_none() {
            return Err(Error::config(format!(
                "list '{list}' requires a parent row id"
            )));
        }

        let basemost = ancestry[0].clone();
        let key = ObjectKey::placeholder(basemost.as_str());

        let id = self.with_connection(|conn| {
            let (sql, params) =
                self.level_insert_sql(set_id, &ancestry[0], None, list, parent_id, values)?;
            debug!(sql, "insert basemost row");
            let id = conn.insert(&sql, &params)?;
            for level in &ancestry[1..] {
                let (sql, params) =
                    self.level_insert_sql(set_id, level, Some(id), list, parent_id, values)?;
                debug!(sql, "insert derived row");
                let affected = conn.execute(&sql, &params)?;
                if affected != 1 {
                    return Err(Error::row_count(table_name(level), 1, affected));
                }
            }
            Ok(id)
        })?;
        key.assign_row_id(id);

        let entity = Arc::new(Entity::new(
            set_id.to_string(),
            key,
            Some(ResolvedParent {
                list: list.clone(),
                parent_id,
            }),
            values.clone(),
        ));
        self.cache.register(&entity);
        Ok(entity)
    }

    /// One INSERT statement for one ancestor level.
    fn level_insert_sql(
        &self,
        most_derived: &str,
        level: &str,
        row_id: Option<i64>,
        list: &ListKey,
        parent_id: Option<i64>,
        values: &HashMap<String, Value>,
    ) -> Result<(String, Vec<Value>)> {
        let set = self.registry.expect(level)?;
        let dialect = self.dialect;
        let mut columns = Vec::new();
        let mut rendered = Vec::new();
        let mut params = Vec::new();

        if let Some(id) = row_id {
            columns.push(dialect.quote(ID_COLUMN));
            rendered.push(id.to_string());
        } else if self.registry.has_discriminator(level) {
            columns.push(dialect.quote(DISCRIMINATOR_COLUMN));
            rendered.push(render(dialect, &Value::from(most_derived), &mut params));
        }

        if !self.registry.is_session_list(list) && level == self.registry.list_element(list)? {
            if let Some(parent) = parent_id {
                columns.push(dialect.quote(&parent_column(list)));
                rendered.push(parent.to_string());
            }
        }

        let mut push_scalar = |name: &str, value: Option<&Value>| {
            if let Some(value) = value {
                if !value.is_null() {
                    columns.push(dialect.quote(name));
                    rendered.push(render(dialect, value, &mut params));
                }
            }
        };
        for prop in set.scalars() {
            push_scalar(&prop.name, values.get(&prop.name));
        }
        for ext_id in self.registry.extensions_of(level) {
            let ext = self.registry.expect(ext_id)?;
            for prop in ext.scalars() {
                let column = scalar_column(ext_id, &prop.name, true);
                push_scalar(&column, values.get(&column));
            }
        }

        let table = dialect.quote(&table_name(level));
        let sql = if columns.is_empty() {
            empty_insert(dialect, &table_name(level))
        } else {
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                rendered.join(", "),
            )
        };
        Ok((sql, params))
    }

    /// Optimistic update: one UPDATE per ancestor table covering only the
    /// changed properties, asserting every changed column's old value.
    pub fn update(&self, entity: &Arc<Entity>, changes: &HashMap<String, Value>) -> Result<()> {
        let ancestry = self.registry.ancestry(entity.set_id())?.to_vec();
        let old = entity.values();
        let dialect = self.dialect;
        let id = entity.row_id();

        // columns per ancestor level, validated up front
        let mut levels: Vec<(String, Vec<String>)> = Vec::new();
        let mut known = 0usize;
        for level in &ancestry {
            let set = self.registry.expect(level)?;
            let mut columns: Vec<String> = set.scalars().iter().map(|p| p.name.clone()).collect();
            for ext_id in self.registry.extensions_of(level) {
                let ext = self.registry.expect(ext_id)?;
                for prop in ext.scalars() {
                    columns.push(scalar_column(ext_id, &prop.name, true));
                }
            }
            known += columns.iter().filter(|c| changes.contains_key(*c)).count();
            levels.push((level.clone(), columns));
        }
        if known != changes.len() {
            return Err(Error::config(format!(
                "update of '{}' names a column no ancestor level declares",
                entity.set_id()
            )));
        }

        self.with_connection(|conn| {
            for (level, level_columns) in &levels {
                let mut assignments = Vec::new();
                let mut guards = Vec::new();
                let mut params = Vec::new();
                for column in level_columns {
                    let Some(new_value) = changes.get(column) else {
                        continue;
                    };
                    let old_value = old.get(column).cloned().unwrap_or(Value::Null);
                    if *new_value == old_value {
                        continue;
                    }
                    assignments.push(format!(
                        "{} = {}",
                        dialect.quote(column),
                        render(dialect, new_value, &mut params),
                    ));
                    if old_value.is_null() {
                        guards.push(format!("{} IS NULL", dialect.quote(column)));
                    } else {
                        guards.push(format!(
                            "{} = {}",
                            dialect.quote(column),
                            render(dialect, &old_value, &mut params),
                        ));
                    }
                }
                if assignments.is_empty() {
                    continue;
                }

                let table = table_name(level);
                let mut sql = format!(
                    "UPDATE {} SET {} WHERE {} = {}",
                    dialect.quote(&table),
                    assignments.join(", "),
                    dialect.quote(ID_COLUMN),
                    id,
                );
                for guard in guards {
                    sql.push_str(" AND ");
                    sql.push_str(&guard);
                }
                debug!(sql, "update row");
                let affected = conn.execute(&sql, &params)?;
                if affected != 1 {
                    return Err(Error::row_count(table, 1, affected));
                }
            }
            Ok(())
        })?;

        for (column, value) in changes {
            entity.set_value(column.clone(), value.clone());
        }
        Ok(())
    }

    /// Depth-first recursive delete: owned list elements first, then this
    /// object's own rows most-derived table first. A foreign-key rejection
    /// surfaces as the distinguished dependency error.
    pub fn delete(&self, entity: &Arc<Entity>) -> Result<DeleteOutcome> {
        let ancestry = self.registry.ancestry(entity.set_id())?.to_vec();
        let id = entity.row_id();

        for level in &ancestry {
            let set = self.registry.expect(level)?;
            for list_prop in set.lists() {
                let key = ListKey::new(level.clone(), list_prop.name.clone());
                let parent = if self.registry.is_session_list(&key) {
                    None
                } else {
                    Some(id)
                };
                for final_sub in self.registry.final_subtypes(&list_prop.element).to_vec() {
                    let q = select::list_query(&self.registry, self.dialect, &key, parent, &final_sub)?;
                    for row in self.query(&q.sql, &q.params)? {
                        let child = self.materialize_row(&final_sub, &row)?;
                        self.delete(&child)?;
                    }
                }
            }
        }

        let basemost = ancestry[0].clone();
        let mut outcome = DeleteOutcome::Deleted;
        self.with_connection(|conn| {
            for level in ancestry.iter().rev() {
                let table = table_name(level);
                let sql = format!(
                    "DELETE FROM {} WHERE {} = {}",
                    self.dialect.quote(&table),
                    self.dialect.quote(ID_COLUMN),
                    id,
                );
                debug!(sql, "delete row");
                let affected = conn.execute(&sql, &[]).map_err(|err| match err {
                    Error::Query(q) if q.is_constraint_violation() => {
                        Error::Dependency(DependencyError {
                            set_id: level.clone(),
                            row_id: id,
                            message: q.message,
                        })
                    }
                    other => other,
                })?;
                if *level == basemost && affected == 0 {
                    outcome = DeleteOutcome::AlreadyAbsent;
                }
            }
            Ok(())
        })?;

        self.cache.evict(&basemost, id);
        Ok(outcome)
    }

    /// Move an object into another containing list, atomically.
    ///
    /// Both column updates run in one transaction; each must affect
    /// exactly one row or everything rolls back.
    pub fn reparent(
        &self,
        entity: &Arc<Entity>,
        new_list: &ListKey,
        new_parent_id: Option<i64>,
    ) -> Result<()> {
        let old = entity
            .parent()
            .ok_or_else(|| Error::config("the session object has no containing list"))?;
        let ancestry = self.registry.ancestry(entity.set_id())?;
        let new_element = self.registry.list_element(new_list)?.to_string();
        if !ancestry.iter().any(|a| *a == new_element) {
            return Err(Error::config(format!(
                "'{}' cannot be placed in list '{new_list}'",
                entity.set_id()
            )));
        }
        let new_is_session = self.registry.is_session_list(new_list);
        if !new_is_session && new_parent_id.is_none() {
            return Err(Error::config(format!(
                "list '{new_list}' requires a parent row id"
            )));
        }
        let id = entity.row_id();
        let dialect = self.dialect;

        let mut conn = self.lock_conn();
        let mut txn = TxnGuard::begin(conn.as_mut())?;

        if !self.registry.is_session_list(&old.list) {
            let old_parent = old.parent_id.ok_or_else(|| {
                Error::Consistency(ConsistencyError {
                    table: None,
                    expected: 1,
                    affected: 0,
                    message: format!("list '{}' has no recorded parent row", old.list),
                })
            })?;
            let element = self.registry.list_element(&old.list)?;
            let table = table_name(element);
            let sql = format!(
                "UPDATE {} SET {col} = NULL WHERE {} = {id} AND {col} = {old_parent}",
                dialect.quote(&table),
                dialect.quote(ID_COLUMN),
                col = dialect.quote(&parent_column(&old.list)),
            );
            debug!(sql, "reparent: clear old parent");
            let affected = txn.conn().execute(&sql, &[])?;
            if affected != 1 {
                return Err(Error::row_count(table, 1, affected));
            }
        }

        if !new_is_session {
            let table = table_name(&new_element);
            let parent = new_parent_id.unwrap_or_default();
            let sql = format!(
                "UPDATE {} SET {col} = {parent} WHERE {} = {id} AND {col} IS NULL",
                dialect.quote(&table),
                dialect.quote(ID_COLUMN),
                col = dialect.quote(&parent_column(new_list)),
            );
            debug!(sql, "reparent: set new parent");
            let affected = txn.conn().execute(&sql, &[])?;
            if affected != 1 {
                return Err(Error::row_count(table, 1, affected));
            }
        }

        txn.commit()?;
        entity.set_parent(Some(ResolvedParent {
            list: new_list.clone(),
            parent_id: new_parent_id,
        }));
        Ok(())
    }

    /// Resolve which ancestor level declares a list property on `owner`,
    /// yielding the list key and the bound parent id (`None` for session
    /// lists).
    pub fn list_key_for(&self, owner: &Entity, property: &str) -> Result<(ListKey, Option<i64>)> {
        for level in self.registry.ancestry(owner.set_id())? {
            if self.registry.expect(level)?.list_named(property).is_some() {
                let key = ListKey::new(level.clone(), property);
                let parent_id = if self.registry.is_session_list(&key) {
                    None
                } else {
                    Some(owner.row_id())
                };
                return Ok((key, parent_id));
            }
        }
        Err(Error::config(format!(
            "'{}' declares no list property '{property}'",
            owner.set_id()
        )))
    }

    pub(crate) fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.with_connection(|conn| conn.query(sql, params))
    }

    pub(crate) fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        self.with_connection(|conn| conn.query_one(sql, params))
    }

    pub(crate) fn query_lazy(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        self.with_connection(|conn| conn.query_lazy(sql, params))
    }

    fn insert_row(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.with_connection(|conn| conn.insert(sql, params))
    }

    fn lock_conn(&self) -> MutexGuard<'_, Box<dyn Connection>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Arc<Entity>>> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Rolls back on drop unless committed.
struct TxnGuard<'a> {
    conn: &'a mut dyn Connection,
    active: bool,
}

impl<'a> TxnGuard<'a> {
    fn begin(conn: &'a mut dyn Connection) -> Result<Self> {
        conn.begin()?;
        Ok(Self { conn, active: true })
    }

    fn conn(&mut self) -> &mut dyn Connection {
        self.conn
    }

    fn commit(mut self) -> Result<()> {
        self.active = false;
        self.conn.commit()
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = self.conn.rollback() {
                warn!(error = %err, "rollback after failed transaction also failed");
            }
        }
    }
}

/// Serialize one value into statement text, falling back to a bound
/// parameter where no literal form exists (blobs).
fn render(dialect: Dialect, value: &Value, params: &mut Vec<Value>) -> String {
    match dialect.literal(value) {
        Some(text) => text,
        None => {
            params.push(value.clone());
            dialect.placeholder(params.len())
        }
    }
}

fn empty_insert(dialect: Dialect, table: &str) -> String {
    match dialect {
        Dialect::Mysql => format!("INSERT INTO {} () VALUES ()", dialect.quote(table)),
        _ => format!("INSERT INTO {} DEFAULT VALUES", dialect.quote(table)),
    }
}

fn not_found(set_id: &str, id: i64) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::NotFound,
        sql: None,
        message: format!("no row {id} for '{set_id}'"),
        source: None,
    })
}

/// Convert one raw column value into the property's kind.
///
/// A value that cannot be converted reads as null; the failure is logged
/// and the rest of the row stays usable.
fn coerce_scalar(kind: &PropertyKind, raw: &Value, column: &str) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    let converted = match kind {
        PropertyKind::Boolean => raw.as_bool().map(Value::Bool),
        PropertyKind::Character => raw.as_char().map(Value::Char),
        PropertyKind::Integer => raw
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Value::Int),
        PropertyKind::Long | PropertyKind::Reference(_) => raw.as_i64().map(Value::BigInt),
        PropertyKind::Double => raw.as_f64().map(Value::Double),
        PropertyKind::Text => raw.as_str().map(Value::from),
        PropertyKind::Date => raw
            .as_date()
            .or_else(|| raw.as_str().and_then(parse_iso_date))
            .map(Value::Date),
        PropertyKind::Blob => raw.as_bytes().map(|b| Value::Bytes(b.to_vec())),
    };
    match converted {
        Some(value) => value,
        None => {
            warn!(
                column,
                actual = raw.type_name(),
                "stored value does not convert to its property kind, reading as null"
            );
            Value::Null
        }
    }
}
