//! Test utilities for crates built on [`wireline`].
//!
//! Helpers cover log capture, recording write completions and cache events,
//! metric snapshots, small pipeline stages, and listener plumbing.
//!
//! ```rust
//! use wireline::{
//!     connection::ConnectionId,
//!     write_queue::{WriteQueue, WriteQueueConfig},
//! };
//! use wireline_testing::CompletionRecorder;
//!
//! let queue = WriteQueue::new(ConnectionId::new(1), WriteQueueConfig::default());
//! let recorder = CompletionRecorder::new();
//! queue.enqueue(recorder.request("a", "hello")).expect("enqueue");
//! queue.cancel_all(wireline::CloseReason::Local);
//! assert_eq!(recorder.tags(), vec!["a"]);
//! ```

mod completions;
mod integration_helpers;
pub mod logging;
mod metrics;
mod probe;
mod stages;

pub use completions::{Completion, CompletionRecorder};
pub use integration_helpers::{TestResult, unused_listener};
pub use logging::{LoggerHandle, logger};
pub use metrics::{MetricsCapture, capture_metrics};
pub use probe::{ProbeEvent, RecordingProbe};
pub use stages::{EchoStage, TraceStage};
