#![doc(html_root_url = "https://docs.rs/wireline/latest")]
//! Public API for the `wireline` library.
//!
//! This crate provides the core of an event-driven transport engine:
//! ordered asynchronous write queues built on recyclable records, attribute
//! stores shared by pipeline stages, stage pipelines that can stop, suspend
//! or rebuild themselves, a bounded resource cache with observer probes, and
//! TCP listeners whose pluggable parts are kept in step with a monitoring
//! registry.

pub mod attributes;
pub mod cache;
pub mod connection;
pub mod keep_alive;
#[cfg(not(loom))]
pub mod listener;
pub mod metrics;
pub mod monitoring;
pub mod panic;
pub mod pipeline;
pub mod recycle;
pub(crate) mod sync;
pub mod transport;
pub mod write_queue;

pub use attributes::{Attribute, AttributeStore};
pub use cache::{CacheConfig, CacheKey, CacheProbe, InsertOutcome, ResourceCache};
pub use connection::{CloseReason, Connection, ConnectionId, ConnectionRegistry};
pub use keep_alive::{KeepAlive, KeepAliveConfig};
#[cfg(not(loom))]
pub use listener::{Listener, ListenerComposer, ListenerConfig, StageSet};
pub use monitoring::{MonitoringRegistry, MonitoringSnapshot, MonitoringView};
pub use pipeline::{IoEvent, Pipeline, Stage, StageAction, StageContext};
pub use recycle::{Recyclable, RecyclePool};
pub use transport::{TcpTransport, Transport};
pub use write_queue::{Admission, WriteQueue, WriteQueueConfig, WriteRequest};
