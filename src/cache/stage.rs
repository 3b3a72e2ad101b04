//! Pipeline stage answering requests from the cache.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::{CacheKey, ResourceCache};
use crate::{
    attributes::Attribute,
    monitoring::MonitoringView,
    pipeline::{IoEvent, Stage, StageAction, StageContext, StageError},
};

/// Attribute through which earlier stages publish the key of the request
/// being processed.
pub fn request_key() -> &'static Attribute<CacheKey> {
    static KEY: OnceLock<Attribute<CacheKey>> = OnceLock::new();
    KEY.get_or_init(|| Attribute::new("wireline.cache.request-key"))
}

/// Serves cached payloads for read events.
///
/// When the request key attribute names a resident entry the payload is
/// queued on the connection and the event stops here. Otherwise the event
/// continues to the next stage.
#[derive(Debug)]
pub struct CacheStage {
    cache: Arc<ResourceCache>,
}

impl CacheStage {
    /// Serve from `cache`.
    #[must_use]
    pub fn new(cache: Arc<ResourceCache>) -> Self { Self { cache } }

    /// Cache backing the stage.
    #[must_use]
    pub fn cache(&self) -> &Arc<ResourceCache> { &self.cache }
}

impl Stage for CacheStage {
    fn name(&self) -> &str { "cache" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        if !matches!(ctx.event(), IoEvent::Read) {
            return Ok(StageAction::Continue);
        }
        let Some(key) = ctx.attributes().get(request_key()) else {
            return Ok(StageAction::Continue);
        };
        let Some(entry) = self.cache.lookup(&key) else {
            return Ok(StageAction::Continue);
        };
        debug!(connection = %ctx.connection().id(), %key, "serving cached resource");
        ctx.write(entry.payload().clone())?;
        Ok(StageAction::Stop)
    }

    fn monitoring_view(&self) -> Option<Arc<dyn MonitoringView>> {
        Some(Arc::clone(&self.cache) as Arc<dyn MonitoringView>)
    }
}
