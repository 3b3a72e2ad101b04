//! Process-wide interning of attribute names.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::trace;

/// Stable slot index assigned to an interned attribute name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeIndex(usize);

impl AttributeIndex {
    /// Return the raw slot position.
    #[must_use]
    pub const fn as_usize(self) -> usize { self.0 }

    pub(crate) const fn from_usize(pos: usize) -> Self { Self(pos) }
}

impl std::fmt::Display for AttributeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AttributeIndex({})", self.0)
    }
}

/// Arena of interned attribute names.
///
/// Registration is monotonic: once a name has an index it keeps it for the
/// lifetime of the registry, regardless of how many stores later set or
/// remove a value under it.
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    by_name: DashMap<Arc<str>, AttributeIndex>,
    names: RwLock<Vec<Arc<str>>>,
}

impl AttributeRegistry {
    /// Create an empty registry, mostly useful for isolated tests.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Registry shared by every store in the process.
    pub fn global() -> &'static AttributeRegistry {
        static GLOBAL: OnceLock<AttributeRegistry> = OnceLock::new();
        GLOBAL.get_or_init(AttributeRegistry::new)
    }

    /// Return the index for `name`, assigning the next free slot on first use.
    pub fn intern(&self, name: &str) -> AttributeIndex {
        if let Some(index) = self.by_name.get(name) {
            return *index;
        }
        *self.by_name.entry(Arc::from(name)).or_insert_with(|| {
            let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
            let index = AttributeIndex(names.len());
            names.push(Arc::from(name));
            trace!(name, index = index.0, "attribute name interned");
            index
        })
    }

    /// Look up the index of an already interned name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<AttributeIndex> {
        self.by_name.get(name).map(|index| *index)
    }

    /// Name registered at `index`.
    #[must_use]
    pub fn name_of(&self, index: AttributeIndex) -> Option<Arc<str>> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index.0)
            .cloned()
    }

    /// Number of interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no name has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
