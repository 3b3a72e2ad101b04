//! Attribute propagation between pipeline stages.
//!
//! Stages share context through an [`AttributeStore`] owned by the
//! connection (or by a single exchange) instead of referring to each other.
//! Names are interned once into a process-wide [`AttributeRegistry`]; typed
//! [`Attribute`] handles capture the resulting index so hot-path lookups
//! address a slot directly.

mod registry;
mod store;

use std::sync::Arc;

pub use registry::{AttributeIndex, AttributeRegistry};
pub use store::{AttributeStore, AttributeValue, IndexedAttributes, NamedAttributes};

/// Typed handle to an interned attribute name.
///
/// Handles are cheap to clone and are normally created once, when a stage
/// is constructed, then shared by every connection the stage serves.
pub struct Attribute<T> {
    name: Arc<str>,
    index: AttributeIndex,
    init: Option<fn() -> T>,
}

impl<T> Attribute<T> {
    /// Intern `name` in the global registry.
    #[must_use]
    pub fn new(name: &str) -> Self { Self::in_registry(AttributeRegistry::global(), name) }

    /// Intern `name` in the global registry with a lazy default.
    ///
    /// [`AttributeStore::get`] stores and returns `init()` when the slot is
    /// empty.
    #[must_use]
    pub fn with_default(name: &str, init: fn() -> T) -> Self {
        Self {
            init: Some(init),
            ..Self::new(name)
        }
    }

    /// Intern `name` in `registry`.
    ///
    /// The handle must only be used with stores bound to the same registry.
    #[must_use]
    pub fn in_registry(registry: &AttributeRegistry, name: &str) -> Self {
        Self {
            name: Arc::from(name),
            index: registry.intern(name),
            init: None,
        }
    }

    /// Interned name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Slot index resolved at construction.
    #[must_use]
    pub fn index(&self) -> AttributeIndex { self.index }

    pub(crate) fn initializer(&self) -> Option<fn() -> T> { self.init }
}

impl<T> Clone for Attribute<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            index: self.index,
            init: self.init,
        }
    }
}

impl<T> std::fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("has_default", &self.init.is_some())
            .finish()
    }
}
