//! WebSocket infrastructure for real-time communication.
//!
//! Provides the connection registry, heartbeat monitoring, the message
//! protocol spoken with clients, and the HTTP upgrade handler.

mod handler;
mod heartbeat;
pub mod manager;
pub mod messages;
pub mod protocol;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::ConnectionRegistry;
