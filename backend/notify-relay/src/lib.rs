//! Real-time notification relay
//!
//! Clients hold a WebSocket open, authenticate with a checksum handshake, and
//! receive every broker message routed to their uid (`user.<uid>`) for as long
//! as they stay connected.

pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod state;
pub mod tls;
pub mod websocket;

pub use error::{AppError, AppResult};
pub use state::AppState;
