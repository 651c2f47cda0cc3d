// ── Topic keys ──

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::envelope::MessageKind;

const METRICS_PREFIX: &str = "metrics:";
const CONTAINERS_PREFIX: &str = "containers:";
const ALERTS: &str = "alerts";

/// Key of one logical stream on the shared connection.
///
/// Opaque to the registry; the helpers below only encode the naming
/// convention the server uses (`metrics:<device>`, `containers:<device>`,
/// `alerts`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(Arc<str>);

impl Topic {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Arc::from(key.into()))
    }

    pub fn metrics(device_id: &str) -> Self {
        Self::new(format!("{METRICS_PREFIX}{device_id}"))
    }

    pub fn containers(device_id: &str) -> Self {
        Self::new(format!("{CONTAINERS_PREFIX}{device_id}"))
    }

    pub fn alerts() -> Self {
        Self::new(ALERTS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Which message kind this topic carries, if it follows the convention.
    pub fn kind(&self) -> Option<MessageKind> {
        if self.0.starts_with(METRICS_PREFIX) {
            Some(MessageKind::Metrics)
        } else if self.0.starts_with(CONTAINERS_PREFIX) {
            Some(MessageKind::Container)
        } else if &*self.0 == ALERTS {
            Some(MessageKind::Alert)
        } else {
            None
        }
    }

    /// Device part of a per-device topic.
    pub fn device_id(&self) -> Option<&str> {
        self.0
            .strip_prefix(METRICS_PREFIX)
            .or_else(|| self.0.strip_prefix(CONTAINERS_PREFIX))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_device_topics() {
        let t = Topic::metrics("dev-a");
        assert_eq!(t.as_str(), "metrics:dev-a");
        assert_eq!(t.kind(), Some(MessageKind::Metrics));
        assert_eq!(t.device_id(), Some("dev-a"));

        let t = Topic::containers("dev-b");
        assert_eq!(t.to_string(), "containers:dev-b");
        assert_eq!(t.kind(), Some(MessageKind::Container));
        assert_eq!(t.device_id(), Some("dev-b"));
    }

    #[test]
    fn alerts_topic_has_no_device() {
        let t = Topic::alerts();
        assert_eq!(t.kind(), Some(MessageKind::Alert));
        assert_eq!(t.device_id(), None);
    }

    #[test]
    fn foreign_topics_are_opaque() {
        let t = Topic::from("zfs:tank");
        assert_eq!(t.kind(), None);
        assert_eq!(t.device_id(), None);
        assert_eq!(t, Topic::new("zfs:tank".to_string()));
    }
}
