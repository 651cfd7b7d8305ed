//! User data stream lifecycle.
//!
//! A listen key identifies a private event stream and lapses on the venue
//! unless it is pinged regularly. The [`UserStreamManager`] acquires a key,
//! opens a second socket on `<stream_url>/<listenKey>`, pings the key every
//! [`UserStreamConfig::keepalive_interval`] and, when a ping fails, tears the
//! stream down and acquires a fresh key after
//! [`UserStreamConfig::renew_delay`], retrying for as long as the stream is
//! not closed. A stream socket that runs out of reconnection attempts is
//! handled the same way.
//!
//! Like the connection layer, the manager is an actor: one task owns the
//! stream state and [`UserStreamHandle`]s talk to it over channels. Timer
//! firings and venue replies come back as messages tagged with the
//! generation that produced them; anything from an older generation is
//! dropped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::UserStreamConfig;
use crate::error::{Error, Result};
use crate::schedule::ScheduledTask;
use crate::types::{SessionEvent, UserData, UserStreamEvent};
use crate::websocket::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState, EventSink,
};

/// Venue operations backing a user data stream.
pub trait StreamApi: Send + Sync + 'static {
    /// `userDataStream.start`: obtain a new listen key.
    fn start_stream(&self) -> BoxFuture<'_, Result<String>>;
    /// `userDataStream.ping`: extend the key's validity.
    fn keepalive(&self, listen_key: String) -> BoxFuture<'_, Result<()>>;
    /// `userDataStream.stop`: invalidate the key.
    fn stop_stream(&self, listen_key: String) -> BoxFuture<'_, Result<()>>;
}

/// Published view of the stream state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStreamStatus {
    pub listen_key: Option<String>,
    pub closing: bool,
    /// Whether the stream socket is currently open.
    pub connected: bool,
}

enum Command {
    Start { reply: oneshot::Sender<Result<String>> },
    Close { reply: oneshot::Sender<()> },
}

enum Internal {
    Acquired { renewal: bool, result: Result<String> },
    Tick { generation: u64 },
    Keepalive { generation: u64, result: Result<()> },
    Renew { generation: u64 },
    Socket { generation: u64, connected: bool },
    /// The stream socket exhausted its reconnection attempts.
    SocketLost { generation: u64 },
}

/// Cloneable handle to a running [`UserStreamManager`].
#[derive(Debug, Clone)]
pub struct UserStreamHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<UserStreamStatus>,
    events: broadcast::Sender<UserStreamEvent>,
}

impl UserStreamHandle {
    /// Return the active listen key, starting the stream if necessary.
    ///
    /// Concurrent calls share one acquisition.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `userDataStream.start` fails; when this call took over a pending
    ///   renewal, the renewal keeps retrying in the background
    /// - The stream was closed while the key was being acquired
    ///   ([`Error::StreamClosed`])
    /// - The manager has stopped ([`Error::Shutdown`])
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use binance_ws_api::{Credentials, Session, SessionConfig};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = Session::new(SessionConfig::new(Credentials::new("key", "secret")));
    /// session.wait_connected().await?;
    ///
    /// let listen_key = session.user_stream().start().await?;
    /// println!("Listening on {listen_key}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(&self) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start { reply })
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Stop keepalive and renewal, close the stream socket and invalidate the
    /// key. Safe to call repeatedly.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { reply }).is_ok() {
            let _ = done.await;
        }
    }

    pub fn status(&self) -> UserStreamStatus {
        self.status_rx.borrow().clone()
    }

    pub fn status_changes(&self) -> watch::Receiver<UserStreamStatus> {
        self.status_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserStreamEvent> {
        self.events.subscribe()
    }
}

/// Translates stream socket events into [`UserStreamEvent`]s.
struct StreamSink {
    events: broadcast::Sender<UserStreamEvent>,
    config: UserStreamConfig,
    generation: u64,
    internal: mpsc::UnboundedSender<Internal>,
}

impl StreamSink {
    fn socket(&self, connected: bool) {
        let _ = self.internal.send(Internal::Socket {
            generation: self.generation,
            connected,
        });
    }
}

impl EventSink for StreamSink {
    fn emit(&self, event: SessionEvent) {
        let forwarded = match event {
            SessionEvent::Connected => {
                self.socket(true);
                self.config.emit_socket_opens.then_some(UserStreamEvent::Open)
            }
            SessionEvent::Disconnected => {
                self.socket(false);
                self.config.emit_socket_closes.then_some(UserStreamEvent::Close)
            }
            SessionEvent::ConnectionError(msg) | SessionEvent::Error(msg) => {
                self.config
                    .emit_socket_errors
                    .then_some(UserStreamEvent::Error(msg))
            }
            SessionEvent::Push(value) => match UserData::from_value(value) {
                Ok(data) => Some(UserStreamEvent::Data(data)),
                Err(e) => {
                    warn!("Dropping user data frame: {e}");
                    self.config
                        .emit_socket_errors
                        .then(|| UserStreamEvent::Error(e.to_string()))
                }
            },
        };
        if let Some(event) = forwarded {
            let _ = self.events.send(event);
        }
    }
}

/// Owns one user data stream.
pub struct UserStreamManager {
    api: Arc<dyn StreamApi>,
    /// Template for stream sockets; `url` is the stream base.
    connection: ConnectionConfig,
    config: UserStreamConfig,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    status_tx: watch::Sender<UserStreamStatus>,
    events: broadcast::Sender<UserStreamEvent>,

    listen_key: Option<String>,
    secondary: Option<ConnectionHandle>,
    connected: bool,
    keepalive: Option<ScheduledTask>,
    renewal: Option<ScheduledTask>,
    /// Callers waiting on the in-flight acquisition, if any.
    acquiring: Option<Vec<oneshot::Sender<Result<String>>>>,
    closing: bool,
    generation: u64,
}

impl UserStreamManager {
    /// Start the actor with no active stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        api: Arc<dyn StreamApi>,
        connection: ConnectionConfig,
        config: UserStreamConfig,
        event_capacity: usize,
    ) -> UserStreamHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(UserStreamStatus::default());
        let (events, _) = broadcast::channel(event_capacity.max(1));

        let manager = Self {
            api,
            connection,
            config,
            cmd_rx,
            internal_tx,
            internal_rx,
            status_tx,
            events: events.clone(),
            listen_key: None,
            secondary: None,
            connected: false,
            keepalive: None,
            renewal: None,
            acquiring: None,
            closing: false,
            generation: 0,
        };
        tokio::spawn(manager.run());

        UserStreamHandle {
            cmd_tx,
            status_rx,
            events,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Start { reply }) => self.start(reply),
                    Some(Command::Close { reply }) => self.close(reply),
                    None => break,
                },
                Some(msg) = self.internal_rx.recv() => self.handle_internal(msg),
            }
        }

        self.closing = true;
        self.renewal = None;
        self.teardown();
        debug!("User stream manager stopped");
    }

    fn publish(&self) {
        self.status_tx.send_replace(UserStreamStatus {
            listen_key: self.listen_key.clone(),
            closing: self.closing,
            connected: self.connected,
        });
    }

    fn emit_stream_error(&self, message: String) {
        if self.config.emit_stream_errors {
            let _ = self.events.send(UserStreamEvent::Error(message));
        }
    }

    fn start(&mut self, reply: oneshot::Sender<Result<String>>) {
        if let Some(key) = &self.listen_key {
            if !self.closing {
                let _ = reply.send(Ok(key.clone()));
                return;
            }
        }
        self.closing = false;
        // A caller arriving during the renewal backoff takes over the pending
        // renewal, so a failure keeps the retry loop alive.
        let renewing = self.renewal.take().is_some();
        self.publish();
        match &mut self.acquiring {
            Some(waiters) => waiters.push(reply),
            None => self.acquire(renewing, Some(reply)),
        }
    }

    fn acquire(&mut self, renewal: bool, waiter: Option<oneshot::Sender<Result<String>>>) {
        debug!("Requesting listen key (renewal: {renewal})");
        self.acquiring = Some(waiter.into_iter().collect());
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.start_stream().await;
            let _ = tx.send(Internal::Acquired { renewal, result });
        });
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Acquired { renewal, result } => self.on_acquired(renewal, result),
            Internal::Tick { generation } => self.on_tick(generation),
            Internal::Keepalive { generation, result } => self.on_keepalive(generation, result),
            Internal::Renew { generation } => self.on_renew(generation),
            Internal::Socket {
                generation,
                connected,
            } => {
                if generation == self.generation && self.secondary.is_some() {
                    self.connected = connected;
                    self.publish();
                }
            }
            Internal::SocketLost { generation } => {
                if generation == self.generation {
                    self.fail("user data stream socket closed".to_string());
                }
            }
        }
    }

    fn on_acquired(&mut self, renewal: bool, result: Result<String>) {
        let waiters = self.acquiring.take().unwrap_or_default();

        if self.closing {
            if let Ok(key) = result {
                debug!("Stream closed during acquisition, releasing listen key");
                self.stop_key(key);
            }
            for waiter in waiters {
                let _ = waiter.send(Err(Error::StreamClosed));
            }
            return;
        }

        match result {
            Ok(key) => {
                self.arm(key.clone());
                for waiter in waiters {
                    let _ = waiter.send(Ok(key.clone()));
                }
            }
            Err(e) => {
                warn!("Listen key acquisition failed: {e}");
                let message = e.to_string();
                let mut waiters = waiters.into_iter();
                if renewal {
                    self.emit_stream_error(message.clone());
                    self.schedule_renewal();
                } else if let Some(first) = waiters.next() {
                    let _ = first.send(Err(e));
                }
                for waiter in waiters {
                    let _ = waiter.send(Err(Error::Stream(message.clone())));
                }
            }
        }
    }

    /// Open the stream socket for `key` and start pinging it.
    fn arm(&mut self, key: String) {
        self.generation += 1;
        let generation = self.generation;

        let url = format!("{}/{key}", self.connection.url.trim_end_matches('/'));
        let sink = StreamSink {
            events: self.events.clone(),
            config: self.config,
            generation,
            internal: self.internal_tx.clone(),
        };
        let secondary = ConnectionManager::spawn(self.connection.with_url(url), sink);
        if let Err(e) = secondary.connect() {
            warn!("Could not open user data stream socket: {e}");
        }
        let mut state = secondary.state_changes();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            if state.wait_for(|s| *s == ConnectionState::Closed).await.is_ok() {
                let _ = tx.send(Internal::SocketLost { generation });
            }
        });

        let tx = self.internal_tx.clone();
        self.keepalive = Some(ScheduledTask::every(
            self.config.keepalive_interval,
            move || {
                let _ = tx.send(Internal::Tick { generation });
            },
        ));

        info!("User data stream started");
        self.secondary = Some(secondary);
        self.listen_key = Some(key);
        self.connected = false;
        self.renewal = None;
        self.publish();
    }

    fn on_tick(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        let Some(key) = self.listen_key.clone() else {
            return;
        };
        debug!("Pinging listen key");
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.keepalive(key).await;
            let _ = tx.send(Internal::Keepalive { generation, result });
        });
    }

    fn on_keepalive(&mut self, generation: u64, result: Result<()>) {
        if generation != self.generation {
            return;
        }
        let Err(e) = result else {
            return;
        };
        self.fail(format!("listen key keepalive failed: {e}"));
    }

    /// Drop the current stream and renew it after the backoff.
    fn fail(&mut self, reason: String) {
        warn!("User data stream failed, renewing: {reason}");
        self.teardown();
        self.emit_stream_error(reason);
        if !self.closing {
            self.schedule_renewal();
        }
    }

    fn schedule_renewal(&mut self) {
        let generation = self.generation;
        let tx = self.internal_tx.clone();
        debug!("Renewing listen key in {:?}", self.config.renew_delay);
        self.renewal = Some(ScheduledTask::after(self.config.renew_delay, move || {
            let _ = tx.send(Internal::Renew { generation });
        }));
    }

    fn on_renew(&mut self, generation: u64) {
        if generation != self.generation
            || self.closing
            || self.listen_key.is_some()
            || self.acquiring.is_some()
        {
            return;
        }
        self.renewal = None;
        self.acquire(true, None);
    }

    /// Drop the current key and socket. Closing the socket and the
    /// `userDataStream.stop` call complete on the returned task.
    fn teardown(&mut self) -> Option<JoinHandle<()>> {
        self.generation += 1;
        self.keepalive = None;
        self.connected = false;
        let key = self.listen_key.take();
        let secondary = self.secondary.take();
        self.publish();

        if key.is_none() && secondary.is_none() {
            return None;
        }
        let api = Arc::clone(&self.api);
        let stop_timeout = self.config.stop_timeout;
        Some(tokio::spawn(async move {
            if let Some(secondary) = secondary {
                secondary.close().await;
            }
            if let Some(key) = key {
                release_key(api.as_ref(), key, stop_timeout).await;
            }
        }))
    }

    fn stop_key(&self, key: String) {
        let api = Arc::clone(&self.api);
        let stop_timeout = self.config.stop_timeout;
        tokio::spawn(async move { release_key(api.as_ref(), key, stop_timeout).await });
    }

    fn close(&mut self, reply: oneshot::Sender<()>) {
        if !self.closing {
            info!("Closing user data stream");
        }
        self.closing = true;
        self.renewal = None;
        let pending = self.teardown();
        tokio::spawn(async move {
            if let Some(pending) = pending {
                let _ = pending.await;
            }
            let _ = reply.send(());
        });
    }
}

/// Best-effort `userDataStream.stop`; the key lapses on the venue anyway.
async fn release_key(api: &dyn StreamApi, key: String, stop_timeout: Duration) {
    match tokio::time::timeout(stop_timeout, api.stop_stream(key)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Ignoring userDataStream.stop failure: {e}"),
        Err(_) => debug!("userDataStream.stop timed out after {stop_timeout:?}"),
    }
}
