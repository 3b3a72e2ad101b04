//! Serializable point-in-time views.

use std::collections::BTreeMap;

use serde::Serialize;

/// One monitored attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MonitoredValue {
    /// A flag such as `enabled` or `paused`.
    Flag(bool),
    /// A counter or size.
    Count(u64),
    /// Free-form text such as a host name.
    Text(String),
}

impl From<bool> for MonitoredValue {
    fn from(value: bool) -> Self { Self::Flag(value) }
}

impl From<u64> for MonitoredValue {
    fn from(value: u64) -> Self { Self::Count(value) }
}

impl From<u32> for MonitoredValue {
    fn from(value: u32) -> Self { Self::Count(u64::from(value)) }
}

impl From<u16> for MonitoredValue {
    fn from(value: u16) -> Self { Self::Count(u64::from(value)) }
}

impl From<usize> for MonitoredValue {
    fn from(value: usize) -> Self { Self::Count(u64::try_from(value).unwrap_or(u64::MAX)) }
}

impl From<&str> for MonitoredValue {
    fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}

impl From<String> for MonitoredValue {
    fn from(value: String) -> Self { Self::Text(value) }
}

/// Named attributes describing one monitored object.
///
/// # Examples
///
/// ```
/// use wireline::monitoring::{MonitoredValue, MonitoringSnapshot};
///
/// let snapshot = MonitoringSnapshot::new("cache")
///     .with("enabled", true)
///     .with("hits", 3_u64);
/// assert_eq!(snapshot.get("hits"), Some(&MonitoredValue::Count(3)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MonitoringSnapshot {
    /// Kind of object, for example `"listener"` or `"cache"`.
    pub kind: String,
    /// Attribute values keyed by name.
    pub attributes: BTreeMap<String, MonitoredValue>,
}

impl MonitoringSnapshot {
    /// Start an empty snapshot of `kind`.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<MonitoredValue>) -> Self {
        self.attributes.insert(name.to_owned(), value.into());
        self
    }

    /// Look up an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MonitoredValue> { self.attributes.get(name) }

    /// Look up a counter attribute.
    #[must_use]
    pub fn count(&self, name: &str) -> Option<u64> {
        match self.attributes.get(name) {
            Some(MonitoredValue::Count(n)) => Some(*n),
            _ => None,
        }
    }
}
