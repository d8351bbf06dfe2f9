//! Query construction for coinstore: inheritance join-selects, containing
//! list filters, counts, and parent-column resolution.

pub mod parent;
pub mod select;

pub use parent::{ResolvedParent, resolve_parent};
pub use select::{
    QueryText, count_query, discriminator_query, join_select, list_query, select_by_id,
};
