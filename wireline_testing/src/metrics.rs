//! Metric capture with a local debugging recorder.

use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder},
};

/// Metrics recorded while a closure ran.
#[derive(Debug)]
pub struct MetricsCapture {
    entries: Vec<(CompositeKey, DebugValue)>,
}

impl MetricsCapture {
    /// Sum of every counter named `name` whose labels include all of
    /// `labels`.
    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.matching(name, labels)
            .filter_map(|value| match value {
                DebugValue::Counter(c) => Some(*c),
                _ => None,
            })
            .sum()
    }

    /// Last value of the gauge named `name` with all of `labels`.
    #[must_use]
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.matching(name, labels)
            .filter_map(|value| match value {
                DebugValue::Gauge(g) => Some(g.into_inner()),
                _ => None,
            })
            .last()
    }

    fn matching<'a>(&'a self, name: &'a str, labels: &'a [(&'a str, &'a str)]) -> impl Iterator<Item = &'a DebugValue> {
        self.entries
            .iter()
            .filter(move |(key, _)| {
                key.key().name() == name
                    && labels.iter().all(|(k, v)| {
                        key.key()
                            .labels()
                            .any(|label| label.key() == *k && label.value() == *v)
                    })
            })
            .map(|(_, value)| value)
    }
}

/// Run `f` with a thread-local debugging recorder installed and return what
/// it recorded.
pub fn capture_metrics<F: FnOnce()>(f: F) -> MetricsCapture {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    metrics::with_local_recorder(&recorder, f);
    let entries = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(key, _, _, value)| (key, value))
        .collect();
    MetricsCapture { entries }
}
