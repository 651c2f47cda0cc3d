// telemux-core: topic multiplexing over one shared telemetry connection
// (subscription registry, dispatcher, stream adapters, dashboard aggregation)

pub mod aggregate;
pub mod color;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod hub;
pub mod model;
pub mod registry;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use aggregate::{AggregateSummary, Aggregator, Health, SummaryTracker, compute_summary};
pub use color::{ColorAssigner, PALETTE, Rgb};
pub use config::{DEFAULT_ALERT_CAPACITY, DEFAULT_HISTORY_CAPACITY, HubConfig};
pub use dispatch::{Dispatcher, ListenerFailure};
pub use error::{CoreError, DecodeError, ListenerError};
pub use history::HistoryBuffer;
pub use hub::Hub;
pub use registry::{CommandSink, Listener, ListenerId, Registry, Subscription};
pub use stream::{AlertsStream, ContainerStream, MetricsStream, StreamContext, TopicStream};

// ── Model re-exports ────────────────────────────────────────────────
pub use model::{
    Alert, AlertSeverity, ContainerEvent, ContainerState, ContainerStatus, DeviceState,
    DeviceStatus, Envelope, Message, MessageKind, MetricSample, Topic,
};

// ── Wire-level re-exports consumers need ────────────────────────────
pub use telemux_api::{
    ConnectionState, ConnectionStatus, InventoryClient, InventoryResponse, Jitter, ReconnectConfig,
};
