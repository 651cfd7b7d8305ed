//! Client for the Binance WebSocket API.
//!
//! A [`Session`] keeps one WebSocket API connection open across network
//! churn, correlates responses to requests, signs private requests and
//! tracks the venue's rate limit counters. It can also run a user data
//! stream: a listen key kept alive in the background, with its events
//! delivered as [`UserStreamEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use binance_ws_api::{Credentials, Session, SessionConfig, UserStreamEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::new("api-key", "api-secret");
//!     let session = Session::new(SessionConfig::new(credentials));
//!     session.wait_connected().await?;
//!
//!     println!("Server time: {}", session.time().await?);
//!     let account = session.account_info().await?;
//!     println!("Balances: {}", account["balances"]);
//!
//!     let mut events = session.user_events();
//!     session.start_user_stream().await?;
//!     while let Ok(event) = events.recv().await {
//!         if let UserStreamEvent::Data(data) = event {
//!             println!("{}: {}", data.event_type, data.payload);
//!         }
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
mod schedule;
pub mod session;
pub mod types;
pub mod user_stream;
pub mod websocket;

pub use auth::{Auth, Authenticator, Credentials};
pub use config::{SessionConfig, UserStreamConfig};
pub use error::{Error, Result};
pub use rate_limit::RateLimit;
pub use session::Session;
pub use types::{Params, SessionEvent, UserData, UserStreamEvent};
pub use user_stream::{StreamApi, UserStreamHandle, UserStreamStatus};
pub use websocket::{ConnectionState, ReconnectConfig};
