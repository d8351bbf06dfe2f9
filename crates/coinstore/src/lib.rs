//! coinstore: an extensible relational persistence engine for
//! personal-finance data.
//!
//! Feature modules contribute inheritance-based property-set descriptors
//! at startup; the engine maps them onto joined relational tables,
//! reconciles the live schema additively, and materializes objects with
//! single-instance identity per stored row.
//!
//! ```rust,ignore
//! use coinstore::{DataStore, baseline, lists::CachedList};
//! use coinstore_sqlite::{SqliteConfig, SqliteConnector};
//!
//! let registry = baseline::registry()?;
//! let connector = SqliteConnector::new(SqliteConfig::file("ledger.db"));
//! let store = DataStore::open(registry, Box::new(connector))?;
//!
//! let session = store.session()?;
//! let accounts = CachedList::of(&store, &session, "accounts")?;
//! ```

pub mod accounts;
pub mod baseline;
pub mod entity;
pub mod identity;
pub mod lists;
pub mod store;

pub use entity::Entity;
pub use identity::{IdentityCache, ObjectKey};
pub use lists::{CachedList, ObjectIterator, UncachedList};
pub use store::{DataStore, DeleteOutcome};

pub use coinstore_core::{
    Connection, ConnectionError, ConnectionErrorKind, Connector, ConsistencyError,
    DependencyError, Dialect, Error, QueryError, QueryErrorKind, Result, Row, RowStream,
    StoreConfig, Value,
};
pub use coinstore_core::descriptor::{ListKey, PropertyKind, PropertySet, Registry};
pub use coinstore_query::parent::ResolvedParent;
pub use coinstore_schema::reconcile::{ReconcileReport, reconcile};
