//! In-memory persisted objects.

use std::collections::HashMap;
use std::sync::RwLock;

use coinstore_core::Value;
use coinstore_query::parent::ResolvedParent;

use crate::identity::ObjectKey;

/// One materialized (or freshly created) row family.
///
/// Scalar values are keyed by column name: the local property name for a
/// set's own scalars, the qualified underscored name for extension
/// scalars. Reference properties hold the referenced basemost row id.
/// The containing-list token is `None` only for the session object.
#[derive(Debug)]
pub struct Entity {
    set_id: String,
    key: ObjectKey,
    parent: RwLock<Option<ResolvedParent>>,
    values: RwLock<HashMap<String, Value>>,
}

impl Entity {
    pub fn new(
        set_id: String,
        key: ObjectKey,
        parent: Option<ResolvedParent>,
        values: HashMap<String, Value>,
    ) -> Self {
        Self {
            set_id,
            key,
            parent: RwLock::new(parent),
            values: RwLock::new(values),
        }
    }

    /// The most-derived property-set id of this object.
    pub fn set_id(&self) -> &str {
        &self.set_id
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// The database row id (negative while a fresh insert is in flight).
    pub fn row_id(&self) -> i64 {
        self.key.row_id()
    }

    /// Read one scalar by column name; absent or unset reads as null.
    pub fn get(&self, column: &str) -> Value {
        self.read_values()
            .get(column)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// The referenced row id of a reference property, if set.
    pub fn reference_id(&self, column: &str) -> Option<i64> {
        self.get(column).as_i64()
    }

    /// Snapshot of every stored scalar.
    pub fn values(&self) -> HashMap<String, Value> {
        self.read_values().clone()
    }

    /// The containing list this object belongs to, `None` for the session.
    pub fn parent(&self) -> Option<ResolvedParent> {
        match self.parent.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_parent(&self, parent: Option<ResolvedParent>) {
        let mut guard = match self.parent.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = parent;
    }

    pub(crate) fn set_value(&self, column: impl Into<String>, value: Value) {
        let mut guard = match self.values.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(column.into(), value);
    }

    fn read_values(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Value>> {
        match self.values.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
