// ── Domain model ──
//
// Typed forms of everything that flows through the multiplexer. Wire
// frames from `telemux-api` are converted into these at the dispatch
// boundary (see `crate::convert`), so downstream code never touches
// untyped JSON.

pub mod alert;
pub mod container;
pub mod device;
pub mod envelope;
pub mod metrics;
pub mod topic;

pub use alert::{Alert, AlertSeverity};
pub use container::{ContainerEvent, ContainerState, ContainerStatus};
pub use device::{DeviceState, DeviceStatus};
pub use envelope::{Envelope, Message, MessageKind};
pub use metrics::MetricSample;
pub use topic::Topic;
