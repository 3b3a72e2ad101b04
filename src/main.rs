//! Demo binary running an echo listener.

mod cli;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use clap::Parser;
use wireline::{
    cache::{CacheConfig, ResourceCache},
    keep_alive::{KeepAlive, KeepAliveConfig},
    listener::{Listener, ListenerComposer, ListenerConfig, StageSet},
    monitoring::MonitoringRegistry,
    pipeline::{Stage, StageAction, StageContext, StageError},
    transport::TcpTransport,
};

struct Echo;

impl Stage for Echo {
    fn name(&self) -> &str { "echo" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        if let Some(bytes) = ctx.take_message::<Bytes>() {
            ctx.write(bytes)?;
        }
        Ok(StageAction::Stop)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    install_exporter(&cli)?;

    let idle_timeout = (cli.idle_timeout > 0).then(|| Duration::from_secs(cli.idle_timeout));
    let mut config = ListenerConfig::new(cli.name.clone())
        .host(cli.host.clone())
        .port(cli.port)
        .idle_timeout(idle_timeout)
        .max_pending_bytes(cli.max_pending_bytes);
    if let Some(workers) = cli.workers {
        config = config.workers(workers);
    }

    let composer = ListenerComposer::new(cli.name.clone(), Arc::new(MonitoringRegistry::new())).with_stage(Arc::new(Echo));
    composer.apply(
        StageSet::new()
            .keep_alive(Arc::new(KeepAlive::new(
                KeepAliveConfig::default()
                    .max_requests(cli.max_requests)
                    .idle_timeout(idle_timeout),
            )))
            .cache(Arc::new(ResourceCache::new(
                "responses",
                CacheConfig::default().max_heap_bytes(cli.cache_heap_bytes),
            )))
            .transport(Arc::new(TcpTransport::default())),
    )?;

    Listener::new(config, composer).bind()?.run().await?;
    Ok(())
}

#[cfg(feature = "metrics")]
fn install_exporter(cli: &cli::Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_exporter(cli: &cli::Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.metrics_addr.is_some() {
        tracing::warn!("built without the metrics feature; ignoring --metrics-addr");
    }
    Ok(())
}
