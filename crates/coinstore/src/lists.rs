//! One-to-many list access, cached and uncached.
//!
//! A list manager is addressed by its list key plus the parent row id
//! (`None` when the owner is the session). Managers hold no reference to
//! the store; every operation takes `&DataStore` explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use coinstore_core::descriptor::ListKey;
use coinstore_core::{Error, Result, Row, RowStream, Value};
use coinstore_query::select;
use tracing::debug;

use crate::entity::Entity;
use crate::store::{DataStore, DeleteOutcome};

/// Fully materializing list manager.
///
/// The first read runs one join-select per final subtype of the element
/// type and builds an ordered in-memory collection; once built it stays
/// authoritative for this manager's lifetime and is never silently
/// rebuilt.
pub struct CachedList {
    list: ListKey,
    parent_id: Option<i64>,
    elements: Mutex<Option<Vec<Arc<Entity>>>>,
}

impl CachedList {
    pub fn new(list: ListKey, parent_id: Option<i64>) -> Self {
        Self {
            list,
            parent_id,
            elements: Mutex::new(None),
        }
    }

    /// The manager for one list property of `owner`.
    pub fn of(store: &DataStore, owner: &Entity, property: &str) -> Result<Self> {
        let (list, parent_id) = store.list_key_for(owner, property)?;
        Ok(Self::new(list, parent_id))
    }

    pub fn key(&self) -> &ListKey {
        &self.list
    }

    pub fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }

    pub fn len(&self, store: &DataStore) -> Result<usize> {
        self.ensure_built(store)?;
        Ok(self.lock().as_ref().map_or(0, Vec::len))
    }

    pub fn is_empty(&self, store: &DataStore) -> Result<bool> {
        Ok(self.len(store)? == 0)
    }

    pub fn contains(&self, store: &DataStore, entity: &Arc<Entity>) -> Result<bool> {
        self.ensure_built(store)?;
        Ok(self
            .lock()
            .as_ref()
            .is_some_and(|built| built.iter().any(|e| Arc::ptr_eq(e, entity))))
    }

    /// Snapshot of the built collection, in materialization order.
    pub fn elements(&self, store: &DataStore) -> Result<Vec<Arc<Entity>>> {
        self.ensure_built(store)?;
        Ok(self.lock().as_ref().cloned().unwrap_or_default())
    }

    /// Write the row immediately and append to the collection if one has
    /// been built.
    pub fn create_element(
        &self,
        store: &DataStore,
        set_id: &str,
        values: &HashMap<String, Value>,
    ) -> Result<Arc<Entity>> {
        let entity = store.insert(set_id, &self.list, self.parent_id, values)?;
        self.add(&entity);
        Ok(entity)
    }

    /// Recursive delete through the store, then drop from the collection.
    pub fn delete_element(&self, store: &DataStore, entity: &Arc<Entity>) -> Result<DeleteOutcome> {
        let outcome = store.delete(entity)?;
        self.remove(entity);
        Ok(outcome)
    }

    /// Move an element into another list via the store's reparent.
    pub fn move_element(
        &self,
        store: &DataStore,
        entity: &Arc<Entity>,
        into: &ListKey,
        into_parent: Option<i64>,
    ) -> Result<()> {
        store.reparent(entity, into, into_parent)?;
        self.remove(entity);
        Ok(())
    }

    /// Mutate the in-memory collection only; a no-op before the first
    /// read, because the row change alone is picked up by the eventual
    /// build.
    pub fn add(&self, entity: &Arc<Entity>) {
        if let Some(built) = self.lock().as_mut() {
            built.push(Arc::clone(entity));
        }
    }

    pub fn remove(&self, entity: &Arc<Entity>) {
        if let Some(built) = self.lock().as_mut() {
            built.retain(|e| !Arc::ptr_eq(e, entity));
        }
    }

    fn ensure_built(&self, store: &DataStore) -> Result<()> {
        if self.lock().is_some() {
            return Ok(());
        }
        let registry = store.registry();
        let element = registry.list_element(&self.list)?.to_string();
        let mut built = Vec::new();
        for final_sub in registry.final_subtypes(&element).to_vec() {
            let q = select::list_query(registry, store.dialect(), &self.list, self.parent_id, &final_sub)?;
            debug!(sql = q.sql, "building cached list");
            for row in store.query(&q.sql, &q.params)? {
                built.push(store.materialize_row(&final_sub, &row)?);
            }
        }
        let mut guard = self.lock();
        // first build wins; a concurrent build of the same manager must
        // not replace an already-authoritative collection
        if guard.is_none() {
            *guard = Some(built);
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<Arc<Entity>>>> {
        match self.elements.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Per-call-queried list manager; supports final element types only.
#[derive(Debug)]
pub struct UncachedList {
    list: ListKey,
    parent_id: Option<i64>,
    element: String,
}

impl UncachedList {
    pub fn new(store: &DataStore, list: ListKey, parent_id: Option<i64>) -> Result<Self> {
        let registry = store.registry();
        let element = registry.list_element(&list)?.to_string();
        if !registry.expect(&element)?.is_final() {
            return Err(Error::config(format!(
                "uncached access to list '{list}' needs a final element type, '{element}' is derivable"
            )));
        }
        Ok(Self {
            list,
            parent_id,
            element,
        })
    }

    pub fn of(store: &DataStore, owner: &Entity, property: &str) -> Result<Self> {
        let (list, parent_id) = store.list_key_for(owner, property)?;
        Self::new(store, list, parent_id)
    }

    pub fn key(&self) -> &ListKey {
        &self.list
    }

    pub fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }

    /// COUNT query with the list's WHERE logic.
    pub fn len(&self, store: &DataStore) -> Result<usize> {
        let q = select::count_query(
            store.registry(),
            store.dialect(),
            &self.list,
            self.parent_id,
            &self.element,
        )?;
        let row = store.query_one(&q.sql, &q.params)?;
        let count = row
            .as_ref()
            .and_then(|r| r.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn is_empty(&self, store: &DataStore) -> Result<bool> {
        Ok(self.len(store)? == 0)
    }

    /// Membership by row id, against the database.
    pub fn contains(&self, store: &DataStore, entity: &Arc<Entity>) -> Result<bool> {
        let q = select::count_query(
            store.registry(),
            store.dialect(),
            &self.list,
            self.parent_id,
            &self.element,
        )?;
        let sql = append_id_filter(store, &q.sql, &self.element, entity.row_id());
        let row = store.query_one(&sql, &q.params)?;
        Ok(row
            .as_ref()
            .and_then(|r| r.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0)
            > 0)
    }

    /// Lazy iteration; the iterator owns the statement and closes it on
    /// completion or drop.
    pub fn iter<'a>(&self, store: &'a DataStore) -> Result<ObjectIterator<'a>> {
        let q = select::list_query(
            store.registry(),
            store.dialect(),
            &self.list,
            self.parent_id,
            &self.element,
        )?;
        let stream = store.query_lazy(&q.sql, &q.params)?;
        Ok(ObjectIterator {
            store,
            stream,
            final_set: self.element.clone(),
            done: false,
        })
    }

    pub fn create_element(
        &self,
        store: &DataStore,
        values: &HashMap<String, Value>,
    ) -> Result<Arc<Entity>> {
        store.insert(&self.element, &self.list, self.parent_id, values)
    }

    pub fn delete_element(&self, store: &DataStore, entity: &Arc<Entity>) -> Result<DeleteOutcome> {
        store.delete(entity)
    }

    pub fn move_element(
        &self,
        store: &DataStore,
        entity: &Arc<Entity>,
        into: &ListKey,
        into_parent: Option<i64>,
    ) -> Result<()> {
        store.reparent(entity, into, into_parent)
    }
}

fn append_id_filter(store: &DataStore, sql: &str, final_set: &str, id: i64) -> String {
    let dialect = store.dialect();
    let clause = format!(
        "{}.{} = {id}",
        dialect.quote(&coinstore_core::naming::table_name(final_set)),
        dialect.quote(coinstore_core::naming::ID_COLUMN),
    );
    if sql.contains(" WHERE ") {
        format!("{sql} AND {clause}")
    } else {
        format!("{sql} WHERE {clause}")
    }
}

/// Lazy sequence of materialized objects over one result stream.
pub struct ObjectIterator<'a> {
    store: &'a DataStore,
    stream: Box<dyn RowStream>,
    final_set: String,
    done: bool,
}

impl ObjectIterator<'_> {
    fn materialize(&self, row: &Row) -> Result<Arc<Entity>> {
        self.store.materialize_row(&self.final_set, row)
    }
}

impl Iterator for ObjectIterator<'_> {
    type Item = Result<Arc<Entity>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stream.next_row() {
            Ok(Some(row)) => Some(self.materialize(&row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
