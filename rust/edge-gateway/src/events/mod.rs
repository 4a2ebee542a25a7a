//! Real-time event delivery to WebSocket clients.

pub mod hub;
pub mod relay;

pub use hub::{ClientConnection, ClientId, NotificationHub};
pub use relay::BroadcastRelay;
