//! Named codec factories.

use std::{error::Error, fmt, sync::Arc};

use dashmap::DashMap;

use super::ComposeError;
use crate::pipeline::Stage;

/// Boxed error returned by a failing factory.
pub type FactoryError = Box<dyn Error + Send + Sync>;

/// Builds a fresh codec stage.
pub type CodecFactory = Arc<dyn Fn() -> Result<Arc<dyn Stage>, FactoryError> + Send + Sync>;

/// Protocols a listener can switch between, keyed by name.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use wireline::{
///     listener::ProtocolRegistry,
///     pipeline::{Stage, StageAction, StageContext, StageError},
/// };
///
/// struct Lines;
///
/// impl Stage for Lines {
///     fn name(&self) -> &str { "lines" }
///
///     fn handle(&self, _ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
///         Ok(StageAction::Continue)
///     }
/// }
///
/// let protocols = ProtocolRegistry::new();
/// protocols.register("lines", || Ok(Arc::new(Lines) as Arc<dyn Stage>));
/// assert!(protocols.create("lines").is_ok());
/// assert!(protocols.create("spdy").is_err());
/// ```
#[derive(Default)]
pub struct ProtocolRegistry {
    factories: DashMap<String, CodecFactory>,
}

impl ProtocolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register or replace the factory for `name`.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Stage>, FactoryError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Remove the factory for `name`.
    pub fn unregister(&self, name: &str) -> bool { self.factories.remove(name).is_some() }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.factories.contains_key(name) }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Build a codec stage for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::UnknownProtocol`] if nothing is registered
    /// under `name` and [`ComposeError::Factory`] if the factory fails.
    pub fn create(&self, name: &str) -> Result<Arc<dyn Stage>, ComposeError> {
        let factory = self
            .factories
            .get(name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| ComposeError::UnknownProtocol(name.to_owned()))?;
        factory().map_err(|source| ComposeError::Factory {
            protocol: name.to_owned(),
            source,
        })
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("protocols", &self.names())
            .finish()
    }
}
