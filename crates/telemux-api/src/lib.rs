// telemux-api: wire-level transport for the telemetry multiplexer
// (WebSocket connection with reconnect, frame types, REST inventory client)

pub mod error;
pub mod frame;
pub mod rest;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use frame::{AlertData, ContainerData, ControlAction, ControlMessage, InboundFrame, MetricsData};
pub use rest::{InventoryClient, InventoryContainer, InventoryDevice, InventoryResponse};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    Connection, ConnectionConfig, ConnectionState, ConnectionStatus, Jitter, ReconnectConfig,
    TransportEvent,
};
