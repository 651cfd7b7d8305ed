//! Session facade.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use log::warn;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::auth::{now_millis, Auth, Authenticator, Credentials};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimit;
use crate::types::{OutboundFrame, Params, RequestId, SessionEvent, UserStreamEvent};
use crate::user_stream::{StreamApi, UserStreamHandle, UserStreamManager, UserStreamStatus};
use crate::websocket::{Completion, ConnectionHandle, ConnectionManager, ConnectionState};

/// Parameter asking for the venue clock instead of the local one.
const USE_SERVER_TIME_PARAM: &str = "useServerTime";

/// Authenticates and sends requests over the API connection.
#[derive(Debug, Clone)]
pub(crate) struct Requester {
    connection: ConnectionHandle,
    credentials: Option<Credentials>,
}

impl Requester {
    pub(crate) async fn call(&self, method: &str, params: Params, auth: Auth) -> Result<Value> {
        let params = self.prepare(method, params, auth).await?;
        self.connection
            .request(OutboundFrame::new(method, params))
            .await
    }

    async fn prepare(&self, method: &str, mut params: Params, auth: Auth) -> Result<Params> {
        match auth {
            Auth::None => Ok(params),
            Auth::ApiKey => {
                let credentials = self.credentials(method)?;
                Ok(Authenticator::with_api_key(&params, credentials.api_key()))
            }
            Auth::Signed => {
                let credentials = self.credentials(method)?;
                let use_server_time =
                    params.remove(USE_SERVER_TIME_PARAM) == Some(Value::Bool(true));
                let timestamp = if use_server_time {
                    self.server_time().await?
                } else {
                    now_millis()
                };
                Authenticator::signed(&params, credentials, timestamp)
            }
        }
    }

    fn credentials(&self, method: &str) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| Error::MissingCredentials(method.to_string()))
    }

    pub(crate) async fn server_time(&self) -> Result<u64> {
        let result = self
            .connection
            .request(OutboundFrame::new("time", Params::new()))
            .await?;
        result
            .get("serverTime")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::MalformedFrame("time result has no serverTime".to_string()))
    }
}

fn listen_key_params(listen_key: String) -> Params {
    let mut params = Params::new();
    params.insert("listenKey".to_string(), Value::String(listen_key));
    params
}

impl StreamApi for Requester {
    fn start_stream(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let result = self
                .call("userDataStream.start", Params::new(), Auth::ApiKey)
                .await?;
            result
                .get("listenKey")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Stream("userDataStream.start returned no listenKey".to_string()))
        })
    }

    fn keepalive(&self, listen_key: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.call("userDataStream.ping", listen_key_params(listen_key), Auth::ApiKey)
                .await
                .map(drop)
        })
    }

    fn stop_stream(&self, listen_key: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.call("userDataStream.stop", listen_key_params(listen_key), Auth::ApiKey)
                .await
                .map(drop)
        })
    }
}

/// A WebSocket API session: one API connection plus an optional user data
/// stream.
///
/// Clones share the same connection and stream. The background tasks stop
/// once every clone is dropped; [`Session::close`] stops them right away and
/// waits for it.
#[derive(Debug, Clone)]
pub struct Session {
    requester: Requester,
    user_stream: UserStreamHandle,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Spawn the session's tasks, connecting right away unless
    /// [`SessionConfig::auto_connect`] is off.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let connection = ConnectionManager::spawn(config.api_connection(), events.clone());
        let requester = Requester {
            connection,
            credentials: config.credentials.clone(),
        };
        let user_stream = UserStreamManager::spawn(
            Arc::new(requester.clone()),
            config.stream_connection(),
            config.user_stream,
            config.event_capacity,
        );

        let session = Self {
            requester,
            user_stream,
            events,
        };
        if config.auto_connect {
            if let Err(e) = session.connect() {
                warn!("Could not start connecting: {e}");
            }
        }
        session
    }

    /// Open the API connection. Emits [`SessionEvent::Error`] when it is
    /// already connecting or open.
    pub fn connect(&self) -> Result<()> {
        self.requester.connection.connect()
    }

    /// Send `method` and wait for its result.
    pub async fn request(&self, method: &str, params: Params, auth: Auth) -> Result<Value> {
        self.requester.call(method, params, auth).await
    }

    /// Unauthenticated request.
    pub async fn public_request(&self, method: &str, params: Params) -> Result<Value> {
        self.request(method, params, Auth::None).await
    }

    /// Signed request. A `useServerTime: true` parameter is removed and the
    /// timestamp taken from the venue's `time` instead of the local clock.
    pub async fn private_request(&self, method: &str, params: Params) -> Result<Value> {
        self.request(method, params, Auth::Signed).await
    }

    /// Send `method` without waiting. `callback` runs once with the result,
    /// or with `None` when the request fails.
    pub fn notify(
        &self,
        method: &str,
        params: Params,
        callback: impl FnOnce(Option<Value>) + Send + 'static,
    ) -> Result<RequestId> {
        let frame = OutboundFrame::new(method, params);
        let id = frame.id.clone();
        self.requester
            .connection
            .send(frame, Completion::callback(callback))?;
        Ok(id)
    }

    /// Start the user data stream, or return its listen key if running.
    pub async fn start_user_stream(&self) -> Result<String> {
        self.user_stream.start().await
    }

    pub async fn close_user_stream(&self) {
        self.user_stream.close().await;
    }

    pub fn user_stream_status(&self) -> UserStreamStatus {
        self.user_stream.status()
    }

    pub fn user_stream(&self) -> &UserStreamHandle {
        &self.user_stream
    }

    pub fn user_events(&self) -> broadcast::Receiver<UserStreamEvent> {
        self.user_stream.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Latest rate limit usage reported by the venue.
    pub fn rate_limit(&self) -> RateLimit {
        self.requester.connection.rate_limit()
    }

    pub fn state(&self) -> ConnectionState {
        self.requester.connection.state()
    }

    /// Watch API connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.requester.connection.state_changes()
    }

    /// Wait until the API connection is open.
    pub async fn wait_connected(&self) -> Result<()> {
        self.requester.connection.wait_open().await
    }

    /// Close the user data stream, then the API connection. Pending
    /// requests are rejected with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        self.user_stream.close().await;
        self.requester.connection.close().await;
    }

    pub(crate) fn requester(&self) -> &Requester {
        &self.requester
    }
}
