//! WebSocket connection layer.
//!
//! This module provides the building blocks the [`Session`](crate::Session)
//! is made of:
//! - [`ConnectionManager`]: Owns one socket, reconnects with backoff and
//!   routes inbound frames to pending requests
//! - [`RequestCorrelator`]: Matches responses to in-flight requests by id
//! - [`Connector`]: Pluggable socket implementation ([`TungsteniteConnector`]
//!   by default)
//!
//! # Connection Management
//!
//! The venue drops connections periodically (at the latest after 24 hours) and
//! the network may fail at any time. The manager reconnects automatically,
//! waiting between [`ReconnectConfig::initial_delay`] and
//! [`ReconnectConfig::max_delay`] between attempts. Requests that were in
//! flight when the socket dropped are rejected with
//! [`Error::ConnectionClosed`](crate::Error::ConnectionClosed); requests
//! submitted while reconnecting fail fast with
//! [`Error::NotConnected`](crate::Error::NotConnected).
//!
//! # Example: Raw Connection
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use binance_ws_api::types::{OutboundFrame, Params, SessionEvent};
//! use binance_ws_api::websocket::{
//!     ConnectionConfig, ConnectionManager, ReconnectConfig, TungsteniteConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (events, _) = tokio::sync::broadcast::channel::<SessionEvent>(64);
//!     let config = ConnectionConfig {
//!         url: "wss://ws-api.binance.com:443/ws-api/v3".to_string(),
//!         connector: Arc::new(TungsteniteConnector),
//!         reconnect: ReconnectConfig::default(),
//!         connection_timeout: Duration::from_secs(4),
//!     };
//!
//!     let connection = ConnectionManager::spawn(config, events);
//!     connection.connect()?;
//!     connection.wait_open().await?;
//!
//!     let time = connection.request(OutboundFrame::new("time", Params::new())).await?;
//!     println!("Server time: {}", time["serverTime"]);
//!     Ok(())
//! }
//! ```

mod connection;
mod correlator;
mod reconnect;
mod transport;

pub use connection::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState, EventSink,
};
pub use correlator::{Completion, RequestCorrelator};
pub use reconnect::ReconnectConfig;
pub use transport::{Connector, FrameSink, FrameStream, Link, TungsteniteConnector};

// Re-export the frame type used by `Connector` implementations
pub use tokio_tungstenite::tungstenite::Message;
