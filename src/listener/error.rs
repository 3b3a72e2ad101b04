//! Errors raised while composing and running listeners.

use std::io;

use thiserror::Error;

use super::protocols::FactoryError;
use crate::monitoring::MonitoringError;

/// Errors raised while changing a listener's stage set.
///
/// Any of these leaves the previous configuration, and its monitoring
/// registrations, in place.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComposeError {
    /// No codec factory is registered under the name.
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),
    /// The codec factory failed.
    #[error("codec factory for {protocol:?} failed: {source}")]
    Factory {
        /// Protocol whose factory failed.
        protocol: String,
        /// Error reported by the factory.
        #[source]
        source: FactoryError,
    },
    /// A monitoring slot was already taken by someone else.
    #[error(transparent)]
    Monitoring(#[from] MonitoringError),
}

/// Errors that may occur while binding or running a listener.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ListenerError {
    /// The configured address could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address from the configuration.
        address: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The initial stage set could not be composed.
    #[error(transparent)]
    Compose(#[from] ComposeError),
    /// The listener's own view could not be registered.
    #[error(transparent)]
    Monitoring(#[from] MonitoringError),
    /// A socket operation failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}
