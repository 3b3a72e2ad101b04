//! Stage composition with monitoring reconciliation.
//!
//! A listener's pluggable parts (codec, keep-alive policy, resource cache and
//! transport) live in a [`StageSet`]. Replacing the set goes through
//! [`ListenerComposer::apply`], which compares each slot by pointer identity
//! and keeps the [`MonitoringRegistry`] in step: the view of a removed
//! instance is deregistered before the view of its replacement is
//! registered. All reconciliation for one listener is serialized by a single
//! mutex.

use std::{fmt, sync::Arc};

use tracing::{debug, error, warn};

use super::{ComposeError, ProtocolRegistry};
use crate::{
    cache::{CacheStage, ResourceCache},
    keep_alive::KeepAlive,
    monitoring::{MonitoringError, MonitoringRegistry, MonitoringSnapshot, MonitoringView, ViewKey},
    pipeline::{Pipeline, Stage},
    sync::{Mutex, lock},
    transport::Transport,
};

/// Pluggable parts of a listener.
#[derive(Clone, Default)]
pub struct StageSet {
    /// Protocol codec, first stage of every pipeline.
    pub codec: Option<Arc<dyn Stage>>,
    /// Persistent-connection policy.
    pub keep_alive: Option<Arc<KeepAlive>>,
    /// Resource cache consulted before application stages.
    pub cache: Option<Arc<ResourceCache>>,
    /// Transport writing queued data to sockets.
    pub transport: Option<Arc<dyn Transport>>,
}

impl StageSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Replace the codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Stage>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Replace the keep-alive policy.
    #[must_use]
    pub fn keep_alive(mut self, policy: Arc<KeepAlive>) -> Self {
        self.keep_alive = Some(policy);
        self
    }

    /// Replace the cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ResourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Remove the cache.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    fn changed(&self, next: &Self, slot: Slot) -> bool {
        match slot {
            Slot::Codec => !same(self.codec.as_ref(), next.codec.as_ref()),
            Slot::KeepAlive => !same(self.keep_alive.as_ref(), next.keep_alive.as_ref()),
            Slot::Cache => !same(self.cache.as_ref(), next.cache.as_ref()),
            Slot::Transport => !same(self.transport.as_ref(), next.transport.as_ref()),
        }
    }

    fn occupied(&self, slot: Slot) -> bool {
        match slot {
            Slot::Codec => self.codec.is_some(),
            Slot::KeepAlive => self.keep_alive.is_some(),
            Slot::Cache => self.cache.is_some(),
            Slot::Transport => self.transport.is_some(),
        }
    }

    fn view(&self, slot: Slot) -> Option<Arc<dyn MonitoringView>> {
        match slot {
            Slot::Codec => self
                .codec
                .as_ref()
                .map(|codec| Arc::new(CodecView(Arc::clone(codec))) as Arc<dyn MonitoringView>),
            Slot::KeepAlive => self
                .keep_alive
                .as_ref()
                .map(|policy| Arc::clone(policy) as Arc<dyn MonitoringView>),
            Slot::Cache => self
                .cache
                .as_ref()
                .map(|cache| Arc::clone(cache) as Arc<dyn MonitoringView>),
            Slot::Transport => self
                .transport
                .as_ref()
                .map(|t| Arc::new(TransportView(Arc::clone(t))) as Arc<dyn MonitoringView>),
        }
    }
}

fn same<T: ?Sized>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSet")
            .field("codec", &self.codec.as_ref().map(|c| c.name().to_owned()))
            .field("keep_alive", &self.keep_alive.is_some())
            .field("cache", &self.cache.as_ref().map(|c| c.name().to_owned()))
            .field("transport", &self.transport.as_ref().map(|t| t.name().to_owned()))
            .finish()
    }
}

/// Monitored slot of a [`StageSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Codec,
    KeepAlive,
    Cache,
    Transport,
}

impl Slot {
    /// Every slot, in reconciliation order.
    pub const ALL: [Slot; 4] = [Slot::Codec, Slot::KeepAlive, Slot::Cache, Slot::Transport];

    /// Slot name used in [`ViewKey`]s.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Codec => "codec",
            Slot::KeepAlive => "keep-alive",
            Slot::Cache => "cache",
            Slot::Transport => "transport",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Registry change made during reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    /// The view of the previous instance was removed.
    Deregistered(Slot),
    /// A view for the new instance was added.
    Registered(Slot),
}

/// Actions taken by one [`ListenerComposer::apply`] call, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    actions: Vec<ReconcileAction>,
}

impl Reconciliation {
    /// Actions in the order they were taken.
    #[must_use]
    pub fn actions(&self) -> &[ReconcileAction] { &self.actions }

    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.actions.is_empty() }

    /// Number of registrations.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, ReconcileAction::Registered(_)))
            .count()
    }

    /// Number of deregistrations.
    #[must_use]
    pub fn deregistered(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, ReconcileAction::Deregistered(_)))
            .count()
    }
}

struct CodecView(Arc<dyn Stage>);

impl MonitoringView for CodecView {
    fn snapshot(&self) -> MonitoringSnapshot {
        self.0
            .monitoring_view()
            .map_or_else(|| MonitoringSnapshot::new("codec"), |view| view.snapshot())
            .with("name", self.0.name())
    }
}

struct TransportView(Arc<dyn Transport>);

impl MonitoringView for TransportView {
    fn snapshot(&self) -> MonitoringSnapshot { self.0.snapshot() }
}

/// Owns a listener's [`StageSet`] and keeps its monitoring views current.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use wireline::{
///     cache::{CacheConfig, ResourceCache},
///     listener::{ListenerComposer, StageSet},
///     monitoring::{MonitoringRegistry, ViewKey},
/// };
///
/// let monitoring = Arc::new(MonitoringRegistry::new());
/// let composer = ListenerComposer::new("http-listener", Arc::clone(&monitoring));
/// let cache = Arc::new(ResourceCache::new("files", CacheConfig::default()));
///
/// let changes = composer.apply(StageSet::new().cache(cache)).expect("apply");
/// assert_eq!(changes.registered(), 1);
/// assert!(monitoring.contains(&ViewKey::new("http-listener", "cache")));
/// ```
pub struct ListenerComposer {
    name: String,
    monitoring: Arc<MonitoringRegistry>,
    current: Mutex<StageSet>,
    application: Vec<Arc<dyn Stage>>,
}

impl ListenerComposer {
    /// Create a composer with an empty stage set.
    #[must_use]
    pub fn new(name: impl Into<String>, monitoring: Arc<MonitoringRegistry>) -> Self {
        Self {
            name: name.into(),
            monitoring,
            current: Mutex::new(StageSet::default()),
            application: Vec::new(),
        }
    }

    /// Append an application stage, run after the composed stages.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.application.push(stage);
        self
    }

    /// Listener name, used as the monitoring scope.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Registry receiving the views.
    #[must_use]
    pub fn monitoring(&self) -> &Arc<MonitoringRegistry> { &self.monitoring }

    /// Monitoring key of `slot`.
    #[must_use]
    pub fn key(&self, slot: Slot) -> ViewKey { ViewKey::new(self.name.clone(), slot.as_str()) }

    /// Current stage set.
    #[must_use]
    pub fn current(&self) -> StageSet { lock(&self.current).clone() }

    /// Replace the stage set with `next` and reconcile monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::Monitoring`] when a slot that is empty here
    /// is already registered by someone else, or when a registration fails
    /// part way. Views already swapped are restored and the previous set
    /// stays installed.
    pub fn apply(&self, next: StageSet) -> Result<Reconciliation, ComposeError> {
        let mut current = lock(&self.current);
        self.reconcile(&mut current, next)
    }

    /// Build the next stage set from the current one and apply it.
    ///
    /// `build` runs under the reconciliation lock.
    ///
    /// # Errors
    ///
    /// Returns the error from `build`, or from [`apply`](Self::apply). The
    /// previous set stays installed.
    pub fn update<F>(&self, build: F) -> Result<Reconciliation, ComposeError>
    where
        F: FnOnce(&StageSet) -> Result<StageSet, ComposeError>,
    {
        let mut current = lock(&self.current);
        let next = build(&current).inspect_err(|err| {
            warn!(listener = %self.name, error = %err, "stage set update rejected");
        })?;
        self.reconcile(&mut current, next)
    }

    /// Switch the codec to the one built by `protocols` for `name`.
    ///
    /// # Errors
    ///
    /// See [`ProtocolRegistry::create`]. The previous codec stays installed.
    pub fn select_protocol(&self, protocols: &ProtocolRegistry, name: &str) -> Result<Reconciliation, ComposeError> {
        self.update(|current| {
            let codec = protocols.create(name)?;
            Ok(current.clone().codec(codec))
        })
    }

    /// Pipeline for a new connection: codec, keep-alive, cache, then
    /// application stages.
    #[must_use]
    pub fn pipeline(&self) -> Pipeline {
        let set = self.current();
        let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(3 + self.application.len());
        stages.extend(set.codec);
        if let Some(policy) = set.keep_alive {
            stages.push(policy);
        }
        if let Some(cache) = set.cache {
            stages.push(Arc::new(CacheStage::new(cache)));
        }
        stages.extend(self.application.iter().cloned());
        Pipeline::new(stages)
    }

    /// Remove every slot and its view.
    pub fn shutdown(&self) -> Reconciliation {
        let mut current = lock(&self.current);
        let previous = std::mem::take(&mut *current);
        let mut done = Reconciliation::default();
        for slot in Slot::ALL {
            if previous.occupied(slot) && self.monitoring.deregister(&self.key(slot)).is_some() {
                done.actions.push(ReconcileAction::Deregistered(slot));
            }
        }
        done
    }

    fn reconcile(&self, current: &mut StageSet, next: StageSet) -> Result<Reconciliation, ComposeError> {
        self.reconcile_into(&*self.monitoring, current, next)
    }

    fn reconcile_into<R: ViewRegistry + ?Sized>(
        &self,
        registry: &R,
        current: &mut StageSet,
        next: StageSet,
    ) -> Result<Reconciliation, ComposeError> {
        let changed: Vec<Slot> = Slot::ALL
            .into_iter()
            .filter(|slot| current.changed(&next, *slot))
            .collect();

        // A slot we do not own must not already hold a view.
        for slot in &changed {
            let key = self.key(*slot);
            if next.occupied(*slot) && !current.occupied(*slot) && registry.contains(&key) {
                warn!(listener = %self.name, %key, "monitoring slot taken");
                return Err(MonitoringError::Duplicate(key).into());
            }
        }

        let mut done = Reconciliation::default();
        for slot in changed {
            let key = self.key(slot);
            if current.occupied(slot) && registry.deregister(&key).is_some() {
                done.actions.push(ReconcileAction::Deregistered(slot));
            }
            if let Some(view) = next.view(slot) {
                if let Err(err) = registry.register(key, view) {
                    warn!(listener = %self.name, error = %err, "registration failed, restoring previous views");
                    self.roll_back(registry, current, &done);
                    return Err(err.into());
                }
                done.actions.push(ReconcileAction::Registered(slot));
            }
        }
        *current = next;
        debug!(listener = %self.name, actions = done.actions.len(), "stage set reconciled");
        Ok(done)
    }

    /// Undo `done` in reverse so the registry again shows `current`.
    fn roll_back<R: ViewRegistry + ?Sized>(&self, registry: &R, current: &StageSet, done: &Reconciliation) {
        for action in done.actions.iter().rev() {
            match *action {
                ReconcileAction::Registered(slot) => {
                    registry.deregister(&self.key(slot));
                }
                ReconcileAction::Deregistered(slot) => {
                    let Some(view) = current.view(slot) else { continue };
                    if let Err(err) = registry.register(self.key(slot), view) {
                        error!(listener = %self.name, error = %err, "could not restore monitoring view");
                    }
                }
            }
        }
    }
}

/// Registry operations reconciliation needs.
trait ViewRegistry {
    fn contains(&self, key: &ViewKey) -> bool;
    fn register(&self, key: ViewKey, view: Arc<dyn MonitoringView>) -> Result<(), MonitoringError>;
    fn deregister(&self, key: &ViewKey) -> Option<Arc<dyn MonitoringView>>;
}

impl ViewRegistry for MonitoringRegistry {
    fn contains(&self, key: &ViewKey) -> bool { Self::contains(self, key) }

    fn register(&self, key: ViewKey, view: Arc<dyn MonitoringView>) -> Result<(), MonitoringError> {
        Self::register(self, key, view)
    }

    fn deregister(&self, key: &ViewKey) -> Option<Arc<dyn MonitoringView>> { Self::deregister(self, key) }
}

impl fmt::Debug for ListenerComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerComposer")
            .field("name", &self.name)
            .field("current", &self.current())
            .field("application", &self.application.len())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::io;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        cache::CacheConfig,
        keep_alive::KeepAliveConfig,
        pipeline::{StageAction, StageContext, StageError},
        transport::TcpTransport,
    };

    struct Codec(&'static str);

    impl Stage for Codec {
        fn name(&self) -> &str { self.0 }

        fn handle(&self, _ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
            Ok(StageAction::Continue)
        }
    }

    fn codec(name: &'static str) -> Arc<dyn Stage> { Arc::new(Codec(name)) }

    #[fixture]
    fn composer() -> ListenerComposer {
        ListenerComposer::new("listener-1", Arc::new(MonitoringRegistry::new()))
    }

    #[rstest]
    fn initial_apply_registers_every_present_slot(composer: ListenerComposer) {
        let set = StageSet::new()
            .codec(codec("http"))
            .keep_alive(Arc::new(KeepAlive::new(KeepAliveConfig::default())))
            .transport(Arc::new(TcpTransport::default()));
        let done = composer.apply(set).expect("apply");
        assert_eq!(
            done.actions(),
            &[
                ReconcileAction::Registered(Slot::Codec),
                ReconcileAction::Registered(Slot::KeepAlive),
                ReconcileAction::Registered(Slot::Transport),
            ]
        );
        assert!(!composer.monitoring().contains(&composer.key(Slot::Cache)));
    }

    #[rstest]
    fn unchanged_slots_are_left_alone(composer: ListenerComposer) {
        let set = StageSet::new().codec(codec("http"));
        composer.apply(set.clone()).expect("apply");
        let done = composer.apply(set).expect("reapply");
        assert!(done.is_empty());
        assert_eq!(composer.monitoring().stats().registrations, 1);
    }

    #[rstest]
    fn swapping_codec_deregisters_then_registers(composer: ListenerComposer) {
        composer.apply(StageSet::new().codec(codec("http"))).expect("apply");
        let done = composer
            .update(|current| Ok(current.clone().codec(codec("spdy"))))
            .expect("swap");
        assert_eq!(
            done.actions(),
            &[
                ReconcileAction::Deregistered(Slot::Codec),
                ReconcileAction::Registered(Slot::Codec),
            ]
        );
        let snapshot = composer
            .monitoring()
            .snapshot(&composer.key(Slot::Codec))
            .expect("codec view");
        assert_eq!(snapshot.get("name"), Some(&"spdy".into()));
    }

    #[rstest]
    fn removing_a_slot_only_deregisters(composer: ListenerComposer) {
        let cache = Arc::new(ResourceCache::new("files", CacheConfig::default()));
        composer.apply(StageSet::new().cache(cache)).expect("apply");
        let done = composer
            .update(|current| Ok(current.clone().without_cache()))
            .expect("remove");
        assert_eq!(done.actions(), &[ReconcileAction::Deregistered(Slot::Cache)]);
        assert!(composer.monitoring().is_empty());
    }

    #[rstest]
    fn failed_update_keeps_previous_set(composer: ListenerComposer) {
        composer.apply(StageSet::new().codec(codec("http"))).expect("apply");
        let err = composer
            .update(|_| {
                Err(ComposeError::Factory {
                    protocol: "spdy".to_owned(),
                    source: Box::new(io::Error::other("boom")),
                })
            })
            .expect_err("factory failure");
        assert!(matches!(err, ComposeError::Factory { .. }));
        assert_eq!(
            composer.current().codec.map(|c| c.name().to_owned()),
            Some("http".to_owned())
        );
        assert!(composer.monitoring().contains(&composer.key(Slot::Codec)));
    }

    #[rstest]
    fn foreign_registration_blocks_apply_without_changes(composer: ListenerComposer) {
        let cache = Arc::new(ResourceCache::new("intruder", CacheConfig::default()));
        composer
            .monitoring()
            .register(composer.key(Slot::Cache), cache)
            .expect("register");
        let set = StageSet::new()
            .codec(codec("http"))
            .cache(Arc::new(ResourceCache::new("files", CacheConfig::default())));

        let err = composer.apply(set).expect_err("slot taken");
        assert!(matches!(err, ComposeError::Monitoring(MonitoringError::Duplicate(_))));
        assert!(composer.current().codec.is_none());
        assert!(!composer.monitoring().contains(&composer.key(Slot::Codec)));
    }

    /// Passes through to a real registry but refuses one numbered
    /// registration.
    struct Refusing<'a> {
        inner: &'a MonitoringRegistry,
        refuse: usize,
        calls: std::cell::Cell<usize>,
    }

    impl ViewRegistry for Refusing<'_> {
        fn contains(&self, key: &ViewKey) -> bool { self.inner.contains(key) }

        fn register(&self, key: ViewKey, view: Arc<dyn MonitoringView>) -> Result<(), MonitoringError> {
            let call = self.calls.get() + 1;
            self.calls.set(call);
            if call == self.refuse {
                return Err(MonitoringError::Duplicate(key));
            }
            self.inner.register(key, view)
        }

        fn deregister(&self, key: &ViewKey) -> Option<Arc<dyn MonitoringView>> { self.inner.deregister(key) }
    }

    #[rstest]
    fn failed_registration_restores_previous_views(composer: ListenerComposer) {
        composer
            .apply(
                StageSet::new()
                    .codec(codec("http"))
                    .cache(Arc::new(ResourceCache::new("files", CacheConfig::default()))),
            )
            .expect("apply");
        let next = StageSet::new()
            .codec(codec("spdy"))
            .cache(Arc::new(ResourceCache::new("assets", CacheConfig::default())));
        let registry = Refusing {
            inner: composer.monitoring(),
            refuse: 2,
            calls: std::cell::Cell::new(0),
        };

        let err = {
            let mut current = lock(&composer.current);
            composer
                .reconcile_into(&registry, &mut current, next)
                .expect_err("second registration refused")
        };

        assert!(matches!(err, ComposeError::Monitoring(MonitoringError::Duplicate(_))));
        let name = |slot| {
            composer
                .monitoring()
                .snapshot(&composer.key(slot))
                .and_then(|snapshot| snapshot.get("name").cloned())
        };
        assert_eq!(name(Slot::Codec), Some("http".into()));
        assert_eq!(name(Slot::Cache), Some("files".into()));
        assert_eq!(
            composer.current().codec.map(|c| c.name().to_owned()),
            Some("http".to_owned())
        );
    }

    #[rstest]
    fn pipeline_orders_composed_stages(composer: ListenerComposer) {
        let composer = composer.with_stage(codec("app"));
        composer
            .apply(
                StageSet::new()
                    .codec(codec("http"))
                    .keep_alive(Arc::new(KeepAlive::default()))
                    .cache(Arc::new(ResourceCache::new("files", CacheConfig::default()))),
            )
            .expect("apply");
        let pipeline = composer.pipeline();
        assert_eq!(pipeline.stage_names(), vec!["http", "keep-alive", "cache", "app"]);
    }

    #[rstest]
    fn shutdown_removes_all_views(composer: ListenerComposer) {
        composer
            .apply(
                StageSet::new()
                    .codec(codec("http"))
                    .transport(Arc::new(TcpTransport::default())),
            )
            .expect("apply");
        let done = composer.shutdown();
        assert_eq!(done.deregistered(), 2);
        assert!(composer.monitoring().is_empty());
    }
}
