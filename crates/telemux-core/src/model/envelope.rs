// ── Envelopes ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Alert, ContainerEvent, MetricSample, Topic};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    Metrics,
    Container,
    Alert,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Metrics(MetricSample),
    Container(ContainerEvent),
    Alert(Alert),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Metrics(_) => MessageKind::Metrics,
            Self::Container(_) => MessageKind::Container,
            Self::Alert(_) => MessageKind::Alert,
        }
    }

    /// The topic this message is published on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Metrics(m) => Topic::metrics(&m.device_id),
            Self::Container(c) => Topic::containers(&c.device_id),
            Self::Alert(_) => Topic::alerts(),
        }
    }
}

/// One routed message. Immutable once built; shared as `Arc<Envelope>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    topic: Topic,
    payload: Message,
    received_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(payload: Message, received_at: DateTime<Utc>) -> Self {
        Self {
            topic: payload.topic(),
            payload,
            received_at,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Message {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn as_metrics(&self) -> Option<&MetricSample> {
        match &self.payload {
            Message::Metrics(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&ContainerEvent> {
        match &self.payload {
            Message::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_alert(&self) -> Option<&Alert> {
        match &self.payload {
            Message::Alert(a) => Some(a),
            _ => None,
        }
    }
}
