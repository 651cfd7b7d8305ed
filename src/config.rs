//! Session configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::Credentials;
use crate::websocket::{ConnectionConfig, Connector, ReconnectConfig, TungsteniteConnector};

/// WebSocket API endpoint.
pub const DEFAULT_API_URL: &str = "wss://ws-api.binance.com:443/ws-api/v3";
/// Base of user data stream endpoints; the listen key is appended as a path segment.
pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";

/// Everything a [`Session`](crate::Session) needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_url: String,
    pub stream_url: String,
    /// Required for signed and API-key requests.
    pub credentials: Option<Credentials>,
    pub connector: Arc<dyn Connector>,
    pub reconnect: ReconnectConfig,
    /// Bound on a single socket opening attempt.
    pub connection_timeout: Duration,
    /// Capacity of the lifecycle event channels.
    pub event_capacity: usize,
    /// Connect as soon as the session is created.
    pub auto_connect: bool,
    pub user_stream: UserStreamConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            credentials: None,
            connector: Arc::new(TungsteniteConnector),
            reconnect: ReconnectConfig::default(),
            connection_timeout: Duration::from_secs(4),
            event_capacity: 256,
            auto_connect: true,
            user_stream: UserStreamConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    #[must_use]
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = url.into();
        self
    }

    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_user_stream(mut self, user_stream: UserStreamConfig) -> Self {
        self.user_stream = user_stream;
        self
    }

    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub(crate) fn api_connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.api_url.clone(),
            connector: Arc::clone(&self.connector),
            reconnect: self.reconnect,
            connection_timeout: self.connection_timeout,
        }
    }

    /// Template for user stream sockets; the url is the stream base.
    pub(crate) fn stream_connection(&self) -> ConnectionConfig {
        self.api_connection().with_url(self.stream_url.clone())
    }
}

/// User data stream timing and notification opt-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStreamConfig {
    /// Period of `userDataStream.ping`; the venue expires keys after 60 minutes.
    pub keepalive_interval: Duration,
    /// Wait before re-acquiring a key after a failure.
    pub renew_delay: Duration,
    /// Bound on `userDataStream.stop` when releasing a key.
    pub stop_timeout: Duration,
    pub emit_socket_opens: bool,
    pub emit_socket_errors: bool,
    pub emit_socket_closes: bool,
    /// Emit keepalive and renewal failures as [`UserStreamEvent::Error`](crate::UserStreamEvent::Error).
    pub emit_stream_errors: bool,
}

impl Default for UserStreamConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(50),
            renew_delay: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
            emit_socket_opens: false,
            emit_socket_errors: false,
            emit_socket_closes: false,
            emit_stream_errors: false,
        }
    }
}

impl UserStreamConfig {
    /// Opt into every notification.
    #[must_use]
    pub fn verbose(self) -> Self {
        Self {
            emit_socket_opens: true,
            emit_socket_errors: true,
            emit_socket_closes: true,
            emit_stream_errors: true,
            ..self
        }
    }
}
