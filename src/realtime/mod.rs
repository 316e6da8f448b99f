pub mod chat_hub;
pub mod connection;
pub mod notification_hub;
pub mod websocket;

pub use chat_hub::ChatHubHandle;
pub use connection::{ConnectionHandle, OutboundEvent};
pub use notification_hub::NotificationHubHandle;
