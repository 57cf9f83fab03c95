//! Canonical label sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An unordered set of `name=value` labels.
///
/// Stored sorted by name, so two label sets with the same pairs compare and
/// hash equal no matter the order they were built in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// An empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one label.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Value of one label.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Labels {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={:?}", name, value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_independent() {
        let a = Labels::new().with("method", "GET").with("status", "200");
        let b = Labels::from([("status", "200"), ("method", "GET")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_replace_value() {
        let labels = Labels::new().with("status", "200").with("status", "500");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("status"), Some("500"));
    }

    #[test]
    fn test_display() {
        let labels = Labels::from([("route", "/api"), ("method", "GET")]);
        assert_eq!(labels.to_string(), r#"{method="GET",route="/api"}"#);
        assert_eq!(Labels::new().to_string(), "{}");
    }

    #[test]
    fn test_serializes_as_map() {
        let labels = Labels::from([("b", "2"), ("a", "1")]);
        assert_eq!(serde_json::to_string(&labels).unwrap(), r#"{"a":"1","b":"2"}"#);
    }
}
