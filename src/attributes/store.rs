//! Indexed and named attribute stores.

use std::{
    any::Any,
    sync::{Arc, PoisonError, RwLock},
};

use dashmap::DashMap;

use super::{Attribute, AttributeIndex, AttributeRegistry};

/// Type-erased attribute value.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

fn downcast<T: Send + Sync + 'static>(value: AttributeValue) -> Option<Arc<T>> {
    value.downcast::<T>().ok()
}

/// Fixed-slot store addressed by pre-resolved [`AttributeIndex`] values.
///
/// Slots grow on demand up to the highest index written. Lookups never
/// hash.
#[derive(Debug, Default)]
pub struct IndexedAttributes {
    slots: RwLock<Vec<Option<AttributeValue>>>,
}

impl IndexedAttributes {
    /// Read the value stored at `index`.
    #[must_use]
    pub fn get(&self, index: AttributeIndex) -> Option<AttributeValue> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index.as_usize())
            .and_then(Clone::clone)
    }

    /// Store `value` at `index`, returning the previous value.
    pub fn set(&self, index: AttributeIndex, value: AttributeValue) -> Option<AttributeValue> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let pos = index.as_usize();
        if slots.len() <= pos {
            slots.resize(pos + 1, None);
        }
        slots[pos].replace(value)
    }

    /// Return the value at `index`, storing the result of `init` first if
    /// the slot is empty.
    pub fn get_or_insert_with<F>(&self, index: AttributeIndex, init: F) -> AttributeValue
    where
        F: FnOnce() -> AttributeValue,
    {
        if let Some(value) = self.get(index) {
            return value;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let pos = index.as_usize();
        if slots.len() <= pos {
            slots.resize(pos + 1, None);
        }
        Arc::clone(slots[pos].get_or_insert_with(init))
    }

    /// Remove and return the value at `index`.
    pub fn remove(&self, index: AttributeIndex) -> Option<AttributeValue> {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(index.as_usize())
            .and_then(Option::take)
    }

    /// Indices that currently hold a value.
    #[must_use]
    pub fn occupied(&self) -> Vec<AttributeIndex> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(pos, _)| AttributeIndex::from_usize(pos))
            .collect()
    }

    /// Drop every value but keep the slot allocation for reuse.
    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Open-ended store keyed by attribute name.
///
/// Suited to names discovered at runtime. Concurrent readers and writers are
/// supported; concurrent writes to the same name resolve last-write-wins.
#[derive(Debug, Default)]
pub struct NamedAttributes {
    values: DashMap<Arc<str>, AttributeValue>,
}

impl NamedAttributes {
    /// Read the value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<AttributeValue> {
        self.values.get(name).map(|v| Arc::clone(v.value()))
    }

    /// Store `value` under `name`, returning the previous value.
    pub fn set(&self, name: &str, value: AttributeValue) -> Option<AttributeValue> {
        self.values.insert(Arc::from(name), value)
    }

    /// Remove and return the value stored under `name`.
    pub fn remove(&self, name: &str) -> Option<AttributeValue> {
        self.values.remove(name).map(|(_, v)| v)
    }

    /// Names that currently hold a value.
    #[must_use]
    pub fn names(&self) -> Vec<Arc<str>> {
        self.values.iter().map(|e| Arc::clone(e.key())).collect()
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize { self.values.len() }

    /// Whether the store holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Drop every value.
    pub fn clear(&self) { self.values.clear(); }
}

/// Attribute store owned by a connection or exchange.
///
/// Attributes known when the pipeline is built go through typed
/// [`Attribute`] handles and land in the indexed half. Ad hoc names go to
/// the named half. Every name used through either half is interned in the
/// store's [`AttributeRegistry`], but the halves are separate namespaces: a
/// value set through a typed handle is not visible to
/// [`get_named`](Self::get_named) under the same name, and the reverse.
///
/// # Examples
///
/// ```
/// use wireline::attributes::{Attribute, AttributeStore};
///
/// let user: Attribute<String> = Attribute::new("doc.user");
/// let store = AttributeStore::new();
/// store.set(&user, "ada".to_string());
/// assert_eq!(store.get(&user).as_deref().map(String::as_str), Some("ada"));
///
/// store.set_named("doc.trace", 7u64);
/// assert_eq!(store.get_named::<u64>("doc.trace").as_deref(), Some(&7));
/// ```
#[derive(Debug)]
pub struct AttributeStore {
    registry: &'static AttributeRegistry,
    indexed: IndexedAttributes,
    named: NamedAttributes,
}

impl Default for AttributeStore {
    fn default() -> Self { Self::new() }
}

impl AttributeStore {
    /// Create an empty store bound to [`AttributeRegistry::global`].
    #[must_use]
    pub fn new() -> Self { Self::with_registry(AttributeRegistry::global()) }

    /// Create an empty store bound to `registry`.
    #[must_use]
    pub fn with_registry(registry: &'static AttributeRegistry) -> Self {
        Self {
            registry,
            indexed: IndexedAttributes::default(),
            named: NamedAttributes::default(),
        }
    }

    /// Registry the store interns names into.
    #[must_use]
    pub fn registry(&self) -> &'static AttributeRegistry { self.registry }

    /// Read a typed attribute.
    ///
    /// Falls back to the attribute's initializer, storing its result, when
    /// the slot is empty and the attribute has one.
    #[must_use]
    pub fn get<T>(&self, attr: &Attribute<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = match attr.initializer() {
            Some(init) => Some(
                self.indexed
                    .get_or_insert_with(attr.index(), || Arc::new(init()) as AttributeValue),
            ),
            None => self.indexed.get(attr.index()),
        };
        value.and_then(downcast)
    }

    /// Whether a value is stored for `attr`, without running initializers.
    #[must_use]
    pub fn contains<T>(&self, attr: &Attribute<T>) -> bool {
        self.indexed.get(attr.index()).is_some()
    }

    /// Store a typed attribute.
    pub fn set<T>(&self, attr: &Attribute<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.indexed.set(attr.index(), Arc::new(value));
    }

    /// Remove a typed attribute, returning its value.
    pub fn remove<T>(&self, attr: &Attribute<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.indexed.remove(attr.index()).and_then(downcast)
    }

    /// Read a value stored under an ad hoc name.
    ///
    /// Only sees values written by [`set_named`](Self::set_named).
    #[must_use]
    pub fn get_named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.named.get(name).and_then(downcast)
    }

    /// Store a value under an ad hoc name, interning the name on first use.
    pub fn set_named<T>(&self, name: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.registry.intern(name);
        self.named.set(name, Arc::new(value));
    }

    /// Remove the value stored under `name`. The name stays interned.
    pub fn remove_named(&self, name: &str) -> Option<AttributeValue> { self.named.remove(name) }

    /// Names of every attribute currently holding a value.
    #[must_use]
    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = self
            .indexed
            .occupied()
            .into_iter()
            .filter_map(|index| self.registry.name_of(index))
            .collect();
        names.extend(self.named.names());
        names.sort();
        names.dedup();
        names
    }

    /// Indexed half of the store.
    #[must_use]
    pub fn indexed(&self) -> &IndexedAttributes { &self.indexed }

    /// Named half of the store.
    #[must_use]
    pub fn named(&self) -> &NamedAttributes { &self.named }

    /// Drop every value so the owner can be reused.
    pub fn clear(&self) {
        self.indexed.clear();
        self.named.clear();
    }
}
