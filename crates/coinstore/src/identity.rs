//! Row identity and the weak identity cache.
//!
//! Every persisted object is identified by (row id, basemost set id); row
//! ids are only unique within one basemost table family, so the cache keeps
//! one sub-map per basemost set. Entries are held weakly: the cache never
//! extends an instance's lifetime, it only guarantees that while anyone
//! else holds the instance, a second resolution returns the same one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, Weak};

use crate::entity::Entity;

static NEXT_PLACEHOLDER: AtomicI64 = AtomicI64::new(-1);

/// A fresh negative id for a row the database has not assigned yet.
pub fn next_placeholder_id() -> i64 {
    NEXT_PLACEHOLDER.fetch_sub(1, Ordering::Relaxed)
}

/// The identity of one persisted row: basemost set id plus row id.
///
/// The row id is atomic because a freshly built object carries a negative
/// placeholder until its basemost insert reports the generated key.
#[derive(Debug)]
pub struct ObjectKey {
    basemost: String,
    row_id: AtomicI64,
}

impl ObjectKey {
    pub fn new(basemost: impl Into<String>, row_id: i64) -> Self {
        Self {
            basemost: basemost.into(),
            row_id: AtomicI64::new(row_id),
        }
    }

    /// A key for a row that has not been inserted yet.
    pub fn placeholder(basemost: impl Into<String>) -> Self {
        Self::new(basemost, next_placeholder_id())
    }

    pub fn basemost(&self) -> &str {
        &self.basemost
    }

    pub fn row_id(&self) -> i64 {
        self.row_id.load(Ordering::Relaxed)
    }

    /// True while the database has not assigned a real id.
    pub fn is_placeholder(&self) -> bool {
        self.row_id() < 0
    }

    pub(crate) fn assign_row_id(&self, id: i64) {
        self.row_id.store(id, Ordering::Relaxed);
    }
}

/// Weak map from (basemost set, row id) to the live instance.
#[derive(Debug, Default)]
pub struct IdentityCache {
    maps: Mutex<HashMap<String, HashMap<i64, Weak<Entity>>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live instance for an identity, or `None` if it was never
    /// registered or has since been dropped. Dead entries are pruned.
    pub fn resolve(&self, basemost: &str, row_id: i64) -> Option<std::sync::Arc<Entity>> {
        let mut maps = self.lock();
        let submap = maps.get_mut(basemost)?;
        match submap.get(&row_id) {
            Some(weak) => match weak.upgrade() {
                Some(live) => Some(live),
                None => {
                    submap.remove(&row_id);
                    None
                }
            },
            None => None,
        }
    }

    /// Store a weak handle, overwriting any stale entry.
    pub fn register(&self, entity: &std::sync::Arc<Entity>) {
        let key = entity.key();
        self.lock()
            .entry(key.basemost().to_string())
            .or_default()
            .insert(key.row_id(), std::sync::Arc::downgrade(entity));
    }

    /// Drop one entry, e.g. after its row was deleted.
    pub fn evict(&self, basemost: &str, row_id: i64) {
        if let Some(submap) = self.lock().get_mut(basemost) {
            submap.remove(&row_id);
        }
    }

    /// Drop every entry; live instances keep working but lose their
    /// identity guarantee against future resolutions.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<i64, Weak<Entity>>>> {
        match self.maps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entity(basemost: &str, id: i64) -> Arc<Entity> {
        Arc::new(Entity::new(
            basemost.to_string(),
            ObjectKey::new(basemost, id),
            None,
            HashMap::new(),
        ))
    }

    #[test]
    fn placeholder_ids_are_negative_and_distinct() {
        let a = ObjectKey::placeholder("fin_account");
        let b = ObjectKey::placeholder("fin_account");
        assert!(a.is_placeholder());
        assert!(b.is_placeholder());
        assert_ne!(a.row_id(), b.row_id());

        a.assign_row_id(7);
        assert!(!a.is_placeholder());
        assert_eq!(a.row_id(), 7);
    }

    #[test]
    fn resolve_returns_live_instance() {
        let cache = IdentityCache::new();
        let e = entity("fin.account", 1);
        cache.register(&e);

        let hit = cache.resolve("fin.account", 1).unwrap();
        assert!(Arc::ptr_eq(&e, &hit));
        assert!(cache.resolve("fin.account", 2).is_none());
        assert!(cache.resolve("fin.commodity", 1).is_none());
    }

    #[test]
    fn dropped_instances_are_not_resurrected() {
        let cache = IdentityCache::new();
        let e = entity("fin.account", 1);
        cache.register(&e);
        drop(e);

        assert!(cache.resolve("fin.account", 1).is_none());
    }

    #[test]
    fn evict_forgets_one_identity() {
        let cache = IdentityCache::new();
        let e = entity("fin.account", 1);
        cache.register(&e);
        cache.evict("fin.account", 1);
        assert!(cache.resolve("fin.account", 1).is_none());
        // still alive, just no longer tracked
        assert_eq!(e.key().row_id(), 1);
    }
}
