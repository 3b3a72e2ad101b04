//! Command line interface for the `wireline` demo binary.
//!
//! The binary runs an echo listener with keep-alive and a resource cache so
//! the engine can be exercised by hand.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `wireline` binary.
#[derive(Debug, Parser)]
#[command(name = "wireline", version, about = "Echo listener built on wireline")]
pub struct Cli {
    /// Listener name, used as the monitoring scope.
    #[arg(long, default_value = "echo")]
    pub name: String,
    /// Host or address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Port to bind.
    #[arg(short, long, default_value_t = 7878)]
    pub port: u16,
    /// Number of accept loops. Defaults to the available parallelism.
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Idle timeout in seconds; zero disables it.
    #[arg(long, default_value_t = 30)]
    pub idle_timeout: u64,
    /// Requests served per connection before it is closed.
    #[arg(long)]
    pub max_requests: Option<u32>,
    /// Outstanding bytes per connection before writers are told to back off.
    #[arg(long)]
    pub max_pending_bytes: Option<usize>,
    /// Heap budget of the resource cache in bytes.
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub cache_heap_bytes: u64,
    /// Address for the Prometheus exporter.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}
