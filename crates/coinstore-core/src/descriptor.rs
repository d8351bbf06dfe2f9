//! Runtime property-set descriptors and the registry.
//!
//! Persisted types are not compiled into the engine. Feature modules
//! contribute [`PropertySet`] descriptors at startup and the [`Registry`]
//! validates the universe once, freezing it for the lifetime of the store.
//! Single inheritance maps onto joined tables; extension sets add columns
//! to another set's table without owning a table of their own.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::Result;
use crate::error::Error;
use crate::value::Value;

/// The closed set of scalar value kinds a property can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Boolean,
    Character,
    Integer,
    Long,
    Double,
    Text,
    Date,
    Blob,
    /// Reference to another persisted object, stored as the referenced
    /// basemost row id. Carries the target property-set id.
    Reference(String),
}

impl PropertyKind {
    /// Is this a reference to another persisted object?
    pub fn is_reference(&self) -> bool {
        matches!(self, PropertyKind::Reference(_))
    }
}

/// A single-valued property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarProperty {
    pub name: String,
    pub kind: PropertyKind,
    /// Column default, only honored for extension properties (rows written
    /// before the extension module existed must read sensibly).
    pub default: Option<Value>,
}

/// A list-valued property; elements are rows of the named set or any of
/// its subtypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListProperty {
    pub name: String,
    pub element: String,
}

/// Identifies one list property in the universe: owner set id plus the
/// property name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListKey {
    pub owner: String,
    pub property: String,
}

impl ListKey {
    pub fn new(owner: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            property: property.into(),
        }
    }

    /// The fully qualified list property name, e.g.
    /// `finance.account.subAccounts`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.owner, self.property)
    }
}

impl std::fmt::Display for ListKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.owner, self.property)
    }
}

/// A runtime type descriptor.
///
/// Built with the builder methods and handed to [`Registry::build`]; not
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    id: String,
    base: Option<String>,
    derivable: bool,
    extension_of: Option<String>,
    scalars: Vec<ScalarProperty>,
    lists: Vec<ListProperty>,
}

impl PropertySet {
    /// Start a descriptor for the given dotted identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base: None,
            derivable: false,
            extension_of: None,
            scalars: Vec::new(),
            lists: Vec::new(),
        }
    }

    /// Declare the single base set this set derives from.
    #[must_use]
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Allow further sets to derive from this one. Basemost derivable sets
    /// get a discriminator column.
    #[must_use]
    pub fn derivable(mut self) -> Self {
        self.derivable = true;
        self
    }

    /// Declare this set an extension of `host`: its columns land in the
    /// host's table and it never has a table of its own.
    #[must_use]
    pub fn extension_of(mut self, host: impl Into<String>) -> Self {
        self.extension_of = Some(host.into());
        self
    }

    /// Add a scalar property.
    #[must_use]
    pub fn scalar(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.scalars.push(ScalarProperty {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    /// Add a scalar property with a column default.
    #[must_use]
    pub fn scalar_default(
        mut self,
        name: impl Into<String>,
        kind: PropertyKind,
        default: Value,
    ) -> Self {
        self.scalars.push(ScalarProperty {
            name: name.into(),
            kind,
            default: Some(default),
        });
        self
    }

    /// Add a list property.
    #[must_use]
    pub fn list(mut self, name: impl Into<String>, element: impl Into<String>) -> Self {
        self.lists.push(ListProperty {
            name: name.into(),
            element: element.into(),
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_id(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn is_derivable(&self) -> bool {
        self.derivable
    }

    /// Final sets cannot be derived from; only they may appear as actual
    /// row types.
    pub fn is_final(&self) -> bool {
        !self.derivable
    }

    pub fn is_extension(&self) -> bool {
        self.extension_of.is_some()
    }

    pub fn extension_host(&self) -> Option<&str> {
        self.extension_of.as_deref()
    }

    pub fn scalars(&self) -> &[ScalarProperty] {
        &self.scalars
    }

    pub fn lists(&self) -> &[ListProperty] {
        &self.lists
    }

    /// Look up a scalar property by local name.
    pub fn scalar_named(&self, name: &str) -> Option<&ScalarProperty> {
        self.scalars.iter().find(|p| p.name == name)
    }

    /// Look up a list property by local name.
    pub fn list_named(&self, name: &str) -> Option<&ListProperty> {
        self.lists.iter().find(|p| p.name == name)
    }
}

/// The validated, immutable descriptor universe.
///
/// Built once at engine initialization from every module's contributed
/// sets. All derived views (basemost ancestors, ancestry chains, final
/// subtypes, containing lists) are precomputed here so the hot paths are
/// lookups.
#[derive(Debug)]
pub struct Registry {
    sets: HashMap<String, PropertySet>,
    /// Registration order, for deterministic iteration
    order: Vec<String>,
    session_id: String,
    basemost: HashMap<String, String>,
    /// Basemost-first chain ending at the set itself (extensions excluded)
    ancestry: HashMap<String, Vec<String>>,
    /// Host id -> extension set ids in registration order
    extensions: HashMap<String, Vec<String>>,
    /// Element id -> final sets whose ancestry contains it
    final_subtypes: HashMap<String, Vec<String>>,
    /// Element id -> non-session lists declared with exactly that element
    lists_by_element: HashMap<String, Vec<ListKey>>,
}

impl Registry {
    /// Validate the universe and precompute the derived views.
    ///
    /// `session_id` names the distinguished top-level set whose lists have
    /// no parent columns. Any structural violation is a fatal
    /// configuration error.
    pub fn build(session_id: impl Into<String>, sets: Vec<PropertySet>) -> Result<Self> {
        let session_id = session_id.into();
        let mut map: HashMap<String, PropertySet> = HashMap::with_capacity(sets.len());
        let mut order = Vec::with_capacity(sets.len());
        for set in sets {
            if map.contains_key(set.id()) {
                return Err(Error::config(format!(
                    "duplicate property set '{}'",
                    set.id()
                )));
            }
            order.push(set.id().to_string());
            map.insert(set.id().to_string(), set);
        }

        let session = map
            .get(&session_id)
            .ok_or_else(|| Error::config(format!("session set '{session_id}' not registered")))?;
        if session.is_extension() || session.base_id().is_some() {
            return Err(Error::config(format!(
                "session set '{session_id}' must be a root, non-extension set"
            )));
        }

        // Structural validation per set.
        for id in &order {
            let set = &map[id];
            if set.is_extension() {
                let host_id = set.extension_host().unwrap_or_default();
                let host = map.get(host_id).ok_or_else(|| {
                    Error::config(format!("extension '{id}' names unknown host '{host_id}'"))
                })?;
                if host.is_extension() {
                    return Err(Error::config(format!(
                        "extension '{id}' cannot extend extension '{host_id}'"
                    )));
                }
                if set.base_id().is_some() || set.is_derivable() || !set.lists().is_empty() {
                    return Err(Error::config(format!(
                        "extension '{id}' may only contribute scalar properties"
                    )));
                }
            }
            if let Some(base_id) = set.base_id() {
                let base = map.get(base_id).ok_or_else(|| {
                    Error::config(format!("set '{id}' names unknown base '{base_id}'"))
                })?;
                if base.is_extension() {
                    return Err(Error::config(format!(
                        "set '{id}' cannot derive from extension '{base_id}'"
                    )));
                }
                if !base.is_derivable() {
                    return Err(Error::config(format!(
                        "set '{id}' derives from final set '{base_id}'"
                    )));
                }
            }
            for scalar in set.scalars() {
                if let PropertyKind::Reference(target) = &scalar.kind {
                    match map.get(target) {
                        Some(t) if !t.is_extension() => {}
                        _ => {
                            return Err(Error::config(format!(
                                "property '{}.{}' references unknown set '{target}'",
                                id, scalar.name
                            )));
                        }
                    }
                }
            }
            for list in set.lists() {
                match map.get(&list.element) {
                    Some(e) if !e.is_extension() => {}
                    _ => {
                        return Err(Error::config(format!(
                            "list '{}.{}' has unknown element set '{}'",
                            id, list.name, list.element
                        )));
                    }
                }
            }
        }

        // Ancestry chains, with cycle detection.
        let mut ancestry: HashMap<String, Vec<String>> = HashMap::new();
        let mut basemost: HashMap<String, String> = HashMap::new();
        for id in &order {
            if map[id].is_extension() {
                continue;
            }
            let mut chain = vec![id.clone()];
            let mut seen: HashSet<&str> = HashSet::new();
            seen.insert(id);
            let mut cursor = id.as_str();
            while let Some(base_id) = map[cursor].base_id() {
                if !seen.insert(base_id) {
                    return Err(Error::config(format!(
                        "inheritance cycle through '{base_id}'"
                    )));
                }
                chain.push(base_id.to_string());
                cursor = map[base_id].id();
            }
            chain.reverse();
            basemost.insert(id.clone(), chain[0].clone());
            ancestry.insert(id.clone(), chain);
        }

        // Extensions per host.
        let mut extensions: HashMap<String, Vec<String>> = HashMap::new();
        for id in &order {
            if let Some(host) = map[id].extension_host() {
                extensions
                    .entry(host.to_string())
                    .or_default()
                    .push(id.clone());
            }
        }

        // Final subtypes per element set.
        let mut final_subtypes: HashMap<String, Vec<String>> = HashMap::new();
        for id in &order {
            let set = &map[id];
            if set.is_extension() || !set.is_final() {
                continue;
            }
            for ancestor in &ancestry[id] {
                final_subtypes
                    .entry(ancestor.clone())
                    .or_default()
                    .push(id.clone());
            }
        }

        // Lists by declared element, session lists excluded (they are the
        // implicit parent and get no column).
        let mut lists_by_element: HashMap<String, Vec<ListKey>> = HashMap::new();
        for id in &order {
            if *id == session_id {
                continue;
            }
            for list in map[id].lists() {
                lists_by_element
                    .entry(list.element.clone())
                    .or_default()
                    .push(ListKey::new(id.clone(), list.name.clone()));
            }
        }

        Ok(Self {
            sets: map,
            order,
            session_id,
            basemost,
            ancestry,
            extensions,
            final_subtypes,
            lists_by_element,
        })
    }

    /// Look up a set.
    pub fn get(&self, id: &str) -> Option<&PropertySet> {
        self.sets.get(id)
    }

    /// Look up a set, erroring if it is unknown.
    pub fn expect(&self, id: &str) -> Result<&PropertySet> {
        self.get(id)
            .ok_or_else(|| Error::config(format!("unknown property set '{id}'")))
    }

    /// All sets in registration order.
    pub fn sets(&self) -> impl Iterator<Item = &PropertySet> {
        self.order.iter().map(|id| &self.sets[id])
    }

    /// The distinguished session set id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The distinguished session set.
    pub fn session(&self) -> &PropertySet {
        &self.sets[&self.session_id]
    }

    /// The basemost ancestor of a non-extension set.
    pub fn basemost(&self, id: &str) -> Result<&str> {
        self.basemost
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| Error::config(format!("'{id}' is not a table-mapped set")))
    }

    /// The ancestry chain of a non-extension set, basemost first, ending
    /// at the set itself.
    pub fn ancestry(&self, id: &str) -> Result<&[String]> {
        self.ancestry
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::config(format!("'{id}' is not a table-mapped set")))
    }

    /// Does this set own a discriminator column (basemost and derivable)?
    pub fn has_discriminator(&self, id: &str) -> bool {
        self.basemost.get(id).is_some_and(|b| b == id) && self.sets[id].is_derivable()
    }

    /// Extensions contributing columns to the given host.
    pub fn extensions_of(&self, host: &str) -> &[String] {
        self.extensions.get(host).map_or(&[], Vec::as_slice)
    }

    /// Every final set assignable to the given element type, in
    /// registration order.
    pub fn final_subtypes(&self, element: &str) -> &[String] {
        self.final_subtypes.get(element).map_or(&[], Vec::as_slice)
    }

    /// Is this list owned by the session (and therefore column-less)?
    pub fn is_session_list(&self, key: &ListKey) -> bool {
        key.owner == self.session_id
    }

    /// The non-session lists declared with exactly this element set. Their
    /// parent columns live on this set's own table.
    pub fn lists_of_element(&self, element: &str) -> &[ListKey] {
        self.lists_by_element.get(element).map_or(&[], Vec::as_slice)
    }

    /// The non-session lists a row of `set_id` could live in, in
    /// ancestor-then-declaration order (basemost ancestor first). One
    /// parent column exists per entry.
    pub fn candidate_lists(&self, set_id: &str) -> Result<Vec<ListKey>> {
        let mut out = Vec::new();
        for ancestor in self.ancestry(set_id)? {
            if let Some(keys) = self.lists_by_element.get(ancestor) {
                out.extend(keys.iter().cloned());
            }
        }
        Ok(out)
    }

    /// The session list a row of `set_id` falls into when every parent
    /// column is null.
    pub fn session_list_for(&self, set_id: &str) -> Result<ListKey> {
        let ancestry = self.ancestry(set_id)?;
        for list in self.session().lists() {
            if ancestry.iter().any(|a| *a == list.element) {
                return Ok(ListKey::new(self.session_id.clone(), list.name.clone()));
            }
        }
        Err(Error::config(format!(
            "no session list accepts elements of '{set_id}'"
        )))
    }

    /// Resolve a list key to its declared element set id.
    pub fn list_element(&self, key: &ListKey) -> Result<&str> {
        let owner = self.expect(&key.owner)?;
        owner
            .list_named(&key.property)
            .map(|l| l.element.as_str())
            .ok_or_else(|| {
                Error::config(format!(
                    "set '{}' has no list property '{}'",
                    key.owner, key.property
                ))
            })
    }
}
