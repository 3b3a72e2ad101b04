#![cfg(not(loom))]
//! Listener composition kept in step with the monitoring registry.

use std::{io, sync::Arc};

use rstest::{fixture, rstest};
use wireline::{
    cache::{CacheConfig, ResourceCache},
    keep_alive::{KeepAlive, KeepAliveConfig},
    listener::{ComposeError, ListenerComposer, ProtocolRegistry, ReconcileAction, Slot, StageSet},
    monitoring::{MonitoredValue, MonitoringRegistry},
    pipeline::Stage,
};
use wireline_testing::TraceStage;

struct Fixture {
    monitoring: Arc<MonitoringRegistry>,
    composer: ListenerComposer,
    protocols: ProtocolRegistry,
}

#[fixture]
fn http_listener() -> Fixture {
    let monitoring = Arc::new(MonitoringRegistry::new());
    let composer = ListenerComposer::new("http-listener", Arc::clone(&monitoring));
    let protocols = ProtocolRegistry::new();
    protocols.register("http", || Ok(Arc::new(TraceStage::new("http")) as Arc<dyn Stage>));
    protocols.register("spdy", || Ok(Arc::new(TraceStage::new("spdy")) as Arc<dyn Stage>));
    protocols.register("broken", || Err(io::Error::other("no tls config").into()));
    Fixture {
        monitoring,
        composer,
        protocols,
    }
}

fn codec_name(fixture: &Fixture) -> Option<MonitoredValue> {
    fixture
        .monitoring
        .snapshot(&fixture.composer.key(Slot::Codec))
        .and_then(|snapshot| snapshot.get("name").cloned())
}

#[rstest]
fn switching_codec_replaces_exactly_one_view(http_listener: Fixture) {
    let cache = Arc::new(ResourceCache::new("files", CacheConfig::default()));
    http_listener
        .composer
        .apply(StageSet::new().cache(cache))
        .expect("initial set");
    http_listener
        .composer
        .select_protocol(&http_listener.protocols, "http")
        .expect("http");

    let changes = http_listener
        .composer
        .select_protocol(&http_listener.protocols, "spdy")
        .expect("spdy");

    assert_eq!(
        changes.actions(),
        [
            ReconcileAction::Deregistered(Slot::Codec),
            ReconcileAction::Registered(Slot::Codec),
        ]
    );
    assert_eq!(codec_name(&http_listener), Some("spdy".into()));
    assert_eq!(http_listener.monitoring.len(), 2);
}

#[rstest]
fn failing_factory_keeps_previous_codec(http_listener: Fixture) {
    http_listener
        .composer
        .select_protocol(&http_listener.protocols, "http")
        .expect("http");

    let err = http_listener
        .composer
        .select_protocol(&http_listener.protocols, "broken")
        .expect_err("factory fails");

    assert!(matches!(err, ComposeError::Factory { ref protocol, .. } if protocol == "broken"));
    assert_eq!(codec_name(&http_listener), Some("http".into()));
    let codec = http_listener.composer.current().codec.expect("codec kept");
    assert_eq!(codec.name(), "http");
}

#[rstest]
fn unknown_protocol_changes_nothing(http_listener: Fixture) {
    let err = http_listener
        .composer
        .select_protocol(&http_listener.protocols, "gopher")
        .expect_err("unknown");

    assert!(matches!(err, ComposeError::UnknownProtocol(ref name) if name == "gopher"));
    assert!(http_listener.monitoring.is_empty());
    assert!(http_listener.composer.current().codec.is_none());
}

#[rstest]
fn disabling_cache_removes_its_view_only(http_listener: Fixture) {
    let policy = Arc::new(KeepAlive::new(KeepAliveConfig::default()));
    let cache = Arc::new(ResourceCache::new("files", CacheConfig::default()));
    http_listener
        .composer
        .apply(StageSet::new().keep_alive(policy).cache(cache))
        .expect("initial set");

    let changes = http_listener
        .composer
        .update(|current| Ok(current.clone().without_cache()))
        .expect("drop cache");

    assert_eq!(changes.actions(), [ReconcileAction::Deregistered(Slot::Cache)]);
    assert!(!http_listener.monitoring.contains(&http_listener.composer.key(Slot::Cache)));
    assert!(http_listener.monitoring.contains(&http_listener.composer.key(Slot::KeepAlive)));
}

#[rstest]
fn pipelines_follow_the_installed_set(http_listener: Fixture) {
    let composer = ListenerComposer::new("ordered", Arc::clone(&http_listener.monitoring))
        .with_stage(Arc::new(TraceStage::new("app")));
    composer
        .select_protocol(&http_listener.protocols, "http")
        .expect("http");
    let before = composer.pipeline();

    composer
        .select_protocol(&http_listener.protocols, "spdy")
        .expect("spdy");

    assert_eq!(before.stage_names(), ["http", "app"]);
    assert_eq!(composer.pipeline().stage_names(), ["spdy", "app"]);
}

#[rstest]
fn shutdown_leaves_registry_empty(http_listener: Fixture) {
    http_listener
        .composer
        .select_protocol(&http_listener.protocols, "http")
        .expect("http");
    let policy = Arc::new(KeepAlive::new(KeepAliveConfig::default()));
    http_listener
        .composer
        .update(|current| Ok(current.clone().keep_alive(policy)))
        .expect("keep-alive");

    let done = http_listener.composer.shutdown();

    assert_eq!(done.deregistered(), 2);
    assert!(http_listener.monitoring.is_empty());
}
