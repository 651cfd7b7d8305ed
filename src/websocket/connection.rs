//! Connection actor.
//!
//! A [`ConnectionManager`] runs in its own task and exclusively owns the
//! socket, the pending request table and the rate limit tracker. Handles
//! talk to it over a command channel, so all state transitions happen on one
//! logical thread of control.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Reconnecting -> Open ...
//!        \             \          \          \
//!         `-------------`----------`----------`--> Closed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;

use super::correlator::{Completion, RequestCorrelator};
use super::reconnect::ReconnectConfig;
use super::transport::{Connector, FrameSink, Link};
use crate::error::{Error, Result};
use crate::rate_limit::{RateLimit, RateLimitTracker};
use crate::types::{InboundFrame, OutboundFrame, ResponseFrame, SessionEvent};

/// Transport lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Receives lifecycle events and pushes from a connection.
pub trait EventSink: Send + 'static {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for broadcast::Sender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.send(event);
    }
}

/// Settings for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub connector: Arc<dyn Connector>,
    pub reconnect: ReconnectConfig,
    pub connection_timeout: Duration,
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }
}

enum Command {
    Connect,
    Send {
        frame: OutboundFrame,
        completion: Completion,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle to a running [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    rate_limit_rx: watch::Receiver<RateLimit>,
}

impl ConnectionHandle {
    /// Ask the manager to open the transport.
    ///
    /// If it is already connecting or open, an [`SessionEvent::Error`] is
    /// emitted instead.
    pub fn connect(&self) -> Result<()> {
        self.cmd_tx.send(Command::Connect).map_err(|_| Error::Shutdown)
    }

    /// Hand a frame to the manager; `completion` fires with its outcome.
    ///
    /// Frames submitted while the connection is not open are rejected with
    /// [`Error::NotConnected`] rather than queued.
    pub fn send(&self, frame: OutboundFrame, completion: Completion) -> Result<()> {
        self.cmd_tx
            .send(Command::Send { frame, completion })
            .map_err(|_| Error::Shutdown)
    }

    /// Send a frame and wait for the correlated response's `result`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The connection is not open ([`Error::NotConnected`])
    /// - The venue answers with a non-200 status ([`Error::Api`])
    /// - The reply does not decode ([`Error::MalformedFrame`])
    /// - The socket drops before the reply arrives ([`Error::ConnectionClosed`])
    pub async fn request(&self, frame: OutboundFrame) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.send(frame, Completion::Reply(tx))?;
        rx.await
            .map_err(|_| Error::connection_closed("connection manager stopped"))?
    }

    /// Close the transport for good and wait until it is down.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { reply }).is_ok() {
            let _ = done.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the connection is open.
    pub async fn wait_open(&self) -> Result<()> {
        let mut rx = self.state_rx.clone();
        let state = *rx
            .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed))
            .await
            .map_err(|_| Error::Shutdown)?;
        match state {
            ConnectionState::Open => Ok(()),
            other => Err(Error::NotConnected(other)),
        }
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn rate_limit(&self) -> RateLimit {
        *self.rate_limit_rx.borrow()
    }
}

/// Owns one socket and everything that depends on it.
pub struct ConnectionManager<S: EventSink> {
    config: ConnectionConfig,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    correlator: RequestCorrelator,
    rate_limits: RateLimitTracker,
    events: S,
    /// Consecutive failed or pending reconnection attempts.
    attempt: u32,
}

impl<S: EventSink> ConnectionManager<S> {
    /// Start the actor in the `Disconnected` state.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: ConnectionConfig, events: S) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let rate_limits = RateLimitTracker::new();
        let rate_limit_rx = rate_limits.reader();

        let manager = Self {
            config,
            cmd_rx,
            state_tx,
            correlator: RequestCorrelator::new(),
            rate_limits,
            events,
            attempt: 0,
        };
        tokio::spawn(manager.run());

        ConnectionHandle {
            cmd_tx,
            state_rx,
            rate_limit_rx,
        }
    }

    async fn run(mut self) {
        debug!("Connection manager for {} started", self.config.url);
        loop {
            match self.state() {
                ConnectionState::Closed => break,
                ConnectionState::Disconnected => self.idle().await,
                _ => {
                    if let Some(link) = self.establish().await {
                        self.serve(link).await;
                    }
                }
            }
        }
        self.correlator.drain_all("connection closed");
        debug!("Connection manager for {} stopped", self.config.url);
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            debug!("{}: {prev} -> {next}", self.config.url);
        }
    }

    async fn idle(&mut self) {
        let cmd = self.cmd_rx.recv().await;
        self.handle_offline(cmd);
    }

    /// Commands received while no socket is open.
    fn handle_offline(&mut self, cmd: Option<Command>) {
        match cmd {
            Some(Command::Connect) => {
                if self.state() == ConnectionState::Disconnected {
                    self.set_state(ConnectionState::Connecting);
                } else {
                    self.reject_connect();
                }
            }
            Some(Command::Send { completion, .. }) => {
                completion.reject(Error::NotConnected(self.state()));
            }
            Some(Command::Close { reply }) => {
                info!("Closing connection to {}", self.config.url);
                self.set_state(ConnectionState::Closed);
                let _ = reply.send(());
            }
            None => self.set_state(ConnectionState::Closed),
        }
    }

    fn reject_connect(&self) {
        warn!("Connect requested for {} while {}", self.config.url, self.state());
        self.events
            .emit(SessionEvent::Error("websocket already connected".to_string()));
    }

    /// One connection attempt, preceded by the backoff delay when retrying.
    async fn establish(&mut self) -> Option<Link> {
        if self.attempt > 0 {
            let delay = self.config.reconnect.delay_for(self.attempt - 1);
            debug!(
                "Reconnecting to {} in {delay:?} (attempt {})",
                self.config.url, self.attempt
            );
            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    _ = &mut backoff => break,
                    cmd = self.cmd_rx.recv() => {
                        self.handle_offline(cmd);
                        if self.state() == ConnectionState::Closed {
                            return None;
                        }
                    }
                }
            }
        }

        let connector = Arc::clone(&self.config.connector);
        let url = self.config.url.clone();
        let timeout = self.config.connection_timeout;
        let connect = async move {
            match tokio::time::timeout(timeout, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectTimeout(timeout)),
            }
        };
        tokio::pin!(connect);

        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                cmd = self.cmd_rx.recv() => {
                    self.handle_offline(cmd);
                    if self.state() == ConnectionState::Closed {
                        return None;
                    }
                }
            }
        };

        match result {
            Ok(link) => {
                info!("Connected to {}", self.config.url);
                self.attempt = 0;
                self.set_state(ConnectionState::Open);
                self.events.emit(SessionEvent::Connected);
                Some(link)
            }
            Err(e) => {
                warn!("Connection to {} failed: {e}", self.config.url);
                self.events.emit(SessionEvent::ConnectionError(e.to_string()));
                self.attempt = self.attempt.saturating_add(1);
                if self.config.reconnect.exhausted(self.attempt) {
                    error!(
                        "Giving up on {} after {} failed attempts",
                        self.config.url, self.attempt
                    );
                    self.set_state(ConnectionState::Closed);
                } else {
                    self.set_state(ConnectionState::Reconnecting);
                }
                None
            }
        }
    }

    /// Pump commands and inbound frames until the socket goes away.
    async fn serve(&mut self, link: Link) {
        let Link {
            mut sink,
            mut stream,
        } = link;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send { frame, completion }) => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                completion.reject(e.into());
                                continue;
                            }
                        };
                        if self.correlator.register(frame.id.clone(), completion).is_err() {
                            continue;
                        }
                        debug!("-> {} {}", frame.method, frame.id);
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("Write to {} failed: {e}", self.config.url);
                            self.events.emit(SessionEvent::ConnectionError(e.to_string()));
                            break;
                        }
                    }
                    Some(Command::Connect) => self.reject_connect(),
                    Some(Command::Close { reply }) => {
                        self.shutdown(&mut sink).await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        self.shutdown(&mut sink).await;
                        return;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Unexpected binary frame from {}", self.config.url);
                        self.events
                            .emit(SessionEvent::Error("unexpected binary frame".to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("{} closed by peer: {frame:?}", self.config.url);
                        break;
                    }
                    // Ping/pong are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Read from {} failed: {e}", self.config.url);
                        self.events.emit(SessionEvent::ConnectionError(e.to_string()));
                        break;
                    }
                    None => break,
                },
            }
        }

        let dropped = self.correlator.drain_all("connection lost");
        if dropped > 0 {
            warn!("Rejected {dropped} pending requests after losing {}", self.config.url);
        }
        self.attempt = 1;
        self.set_state(ConnectionState::Reconnecting);
        self.events.emit(SessionEvent::Disconnected);
    }

    async fn shutdown(&mut self, sink: &mut FrameSink) {
        info!("Closing connection to {}", self.config.url);
        // Best effort: the peer may already be gone.
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
        self.correlator.drain_all("connection closed by client");
        self.set_state(ConnectionState::Closed);
        self.events.emit(SessionEvent::Disconnected);
    }

    fn handle_text(&mut self, text: &str) {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Response(response)) => self.handle_response(response),
            Ok(InboundFrame::Push(value)) => self.events.emit(SessionEvent::Push(value)),
            Ok(InboundFrame::Invalid { id, reason }) => {
                warn!("Dropping frame from {}: {reason}", self.config.url);
                if let Some(id) = id {
                    self.correlator.reject(&id, Error::MalformedFrame(reason.clone()));
                }
                self.events.emit(SessionEvent::Error(reason));
            }
            Err(e) => {
                warn!("Dropping frame from {}: {e}", self.config.url);
                self.events.emit(SessionEvent::Error(e.to_string()));
            }
        }
    }

    fn handle_response(&mut self, response: ResponseFrame) {
        // Only the venue's first entry is mirrored; an undecodable first
        // entry leaves the tracker untouched.
        match response.rate_limits.first() {
            Some(Some(entry)) => {
                self.rate_limits.update(entry.count, entry.limit);
            }
            Some(None) => warn!("Ignoring undecodable first rateLimits entry"),
            None => {}
        }

        let success = response.is_success();
        let ResponseFrame {
            id, status, result, error, ..
        } = response;
        let error = error.unwrap_or(Value::Null);

        let Some(id) = id else {
            if !success {
                warn!("Venue error without request id (status {status}): {error}");
                self.events.emit(SessionEvent::Error(format!(
                    "request failed with status {status}: {error}"
                )));
            }
            return;
        };

        let known = if success {
            self.correlator.resolve(&id, result.unwrap_or(Value::Null))
        } else {
            self.correlator.reject(&id, Error::Api { status, error })
        };
        if known {
            debug!("<- {id} ({status})");
        } else {
            debug!("Ignoring response for unknown request {id}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestId;
    use crate::websocket::transport::TungsteniteConnector;
    use serde_json::json;

    fn manager() -> (
        ConnectionManager<broadcast::Sender<SessionEvent>>,
        broadcast::Receiver<SessionEvent>,
    ) {
        let (events, events_rx) = broadcast::channel(16);
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Open);
        let manager = ConnectionManager {
            config: ConnectionConfig {
                url: "wss://example.invalid/ws".to_string(),
                connector: Arc::new(TungsteniteConnector),
                reconnect: ReconnectConfig::default(),
                connection_timeout: Duration::from_secs(4),
            },
            cmd_rx,
            state_tx,
            correlator: RequestCorrelator::new(),
            rate_limits: RateLimitTracker::new(),
            events,
            attempt: 0,
        };
        (manager, events_rx)
    }

    fn pending(
        manager: &mut ConnectionManager<broadcast::Sender<SessionEvent>>,
        id: &str,
    ) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        manager
            .correlator
            .register(RequestId::from(id), Completion::Reply(tx))
            .unwrap();
        rx
    }

    #[test]
    fn test_success_response_resolves_with_result() {
        let (mut manager, _events) = manager();
        let mut rx = pending(&mut manager, "a");
        manager.handle_text(r#"{"id":"a","status":200,"result":{"serverTime":5}}"#);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"serverTime": 5}));
        assert!(!manager.correlator.contains(&RequestId::from("a")));
    }

    #[test]
    fn test_error_response_rejects_with_payload() {
        let (mut manager, _events) = manager();
        let mut rx = pending(&mut manager, "a");
        manager.handle_text(r#"{"id":"a","status":418,"error":{"code":-1003,"msg":"teapot"}}"#);
        match rx.try_recv().unwrap() {
            Err(Error::Api { status, error }) => {
                assert_eq!(status, 418);
                assert_eq!(error, json!({"code": -1003, "msg": "teapot"}));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limits_use_first_entry() {
        let (mut manager, _events) = manager();
        manager.handle_text(
            r#"{"id":"x","status":200,"result":null,"rateLimits":[
                {"rateLimitType":"REQUEST_WEIGHT","count":7,"limit":6000},
                {"rateLimitType":"ORDERS","count":1,"limit":50}]}"#,
        );
        assert_eq!(manager.rate_limits.snapshot(), RateLimit::new(7, 6000));
    }

    #[test]
    fn test_unknown_id_and_push_do_not_disturb_pending() {
        let (mut manager, mut events) = manager();
        let mut rx = pending(&mut manager, "a");
        manager.handle_text(r#"{"id":"stale","status":200,"result":{}}"#);
        manager.handle_text(r#"{"event":{"e":"outboundAccountPosition"}}"#);
        assert!(manager.correlator.contains(&RequestId::from("a")));
        assert!(rx.try_recv().is_err());
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Push(_)));
    }

    #[test]
    fn test_malformed_frame_emits_error() {
        let (mut manager, mut events) = manager();
        manager.handle_text("{not json");
        manager.handle_text(r#"{"id":"a"}"#);
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Error(_)));
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Error(_)));
    }

    #[test]
    fn test_undecodable_response_rejects_its_request() {
        let (mut manager, mut events) = manager();
        let mut rx = pending(&mut manager, "a");
        manager.handle_text(r#"{"id":"a","result":{}}"#);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::MalformedFrame(_))));
        assert!(!manager.correlator.contains(&RequestId::from("a")));
        assert!(matches!(events.try_recv().unwrap(), SessionEvent::Error(_)));
    }

    #[test]
    fn test_odd_rate_limit_entry_does_not_poison_response() {
        let (mut manager, _events) = manager();
        let mut rx = pending(&mut manager, "a");
        manager.handle_text(
            r#"{"id":"a","status":200,"result":{},
                "rateLimits":[{"rateLimitType":"ORDERS","interval":"DAY"}]}"#,
        );
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({}));
        assert_eq!(manager.rate_limits.snapshot(), RateLimit::default());
    }

    #[test]
    fn test_undecodable_first_rate_limit_is_not_replaced_by_second() {
        let (mut manager, _events) = manager();
        manager.handle_text(
            r#"{"id":"a","status":200,"result":{},"rateLimits":[{"count":2,"limit":100}]}"#,
        );
        manager.handle_text(
            r#"{"id":"b","status":200,"result":{},"rateLimits":[
                {"rateLimitType":"REQUEST_WEIGHT","interval":"MINUTE"},
                {"rateLimitType":"ORDERS","count":1,"limit":50}]}"#,
        );
        assert_eq!(manager.rate_limits.snapshot(), RateLimit::new(2, 100));
    }

    #[test]
    fn test_error_without_id_is_surfaced() {
        let (mut manager, mut events) = manager();
        manager.handle_text(r#"{"id":null,"status":400,"error":{"code":-1000}}"#);
        match events.try_recv().unwrap() {
            SessionEvent::Error(msg) => assert!(msg.contains("400")),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
