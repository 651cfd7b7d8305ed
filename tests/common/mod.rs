#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use binance_ws_api::websocket::{Connector, Link, Message};
use binance_ws_api::{Error, ReconnectConfig, Result};
use futures_util::future::BoxFuture;
use futures_util::{sink, stream};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};

/// In-memory connector; every accepted socket shows up as a [`ServerConn`].
#[derive(Debug)]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerConn>,
    urls: Mutex<Vec<String>>,
    refuse: AtomicUsize,
    hold: AtomicBool,
    gate: Semaphore,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerConn>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accepted,
            urls: Mutex::new(Vec::new()),
            refuse: AtomicUsize::new(0),
            hold: AtomicBool::new(false),
            gate: Semaphore::new(0),
        });
        (connector, rx)
    }

    /// Fail the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Keep connection attempts pending until [`MockConnector::release`].
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Let held attempts through.
    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.gate.add_permits(1);
    }

    /// Every url a connection was attempted on, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Link>> {
        Box::pin(async move {
            self.urls.lock().unwrap().push(url.to_string());
            if self.hold.load(Ordering::SeqCst) {
                let _ = self.gate.acquire().await;
            }
            let refused = self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(Error::WebSocket("connection refused".to_string()));
            }

            let (client_tx, server_rx) = mpsc::unbounded_channel::<Message>();
            let (server_tx, client_rx) = mpsc::unbounded_channel::<Result<Message>>();
            let sink = sink::unfold(client_tx, |tx, msg: Message| async move {
                tx.send(msg)
                    .map_err(|_| Error::WebSocket("peer gone".to_string()))?;
                Ok::<_, Error>(tx)
            });
            let stream = stream::unfold(client_rx, |mut rx| async move {
                rx.recv().await.map(|msg| (msg, rx))
            });

            self.accepted
                .send(ServerConn {
                    url: url.to_string(),
                    rx: server_rx,
                    tx: server_tx,
                })
                .map_err(|_| Error::WebSocket("no listener".to_string()))?;
            Ok(Link::new(sink, stream))
        })
    }
}

/// Server side of one mock socket. Dropping it drops the connection.
pub struct ServerConn {
    pub url: String,
    rx: mpsc::UnboundedReceiver<Message>,
    tx: mpsc::UnboundedSender<Result<Message>>,
}

impl ServerConn {
    /// Next request frame written by the client.
    pub async fn next_request(&mut self) -> Value {
        loop {
            match self.rx.recv().await {
                Some(Message::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(_) => continue,
                None => panic!("client went away on {}", self.url),
            }
        }
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.tx.send(Ok(Message::Text(text.to_string())));
    }

    pub fn send_json(&self, frame: Value) {
        self.send_text(&frame.to_string());
    }

    pub fn reply(&self, request: &Value, result: Value) {
        self.send_json(json!({"id": request["id"], "status": 200, "result": result}));
    }

    pub fn reply_error(&self, request: &Value, status: u16, error: Value) {
        self.send_json(json!({"id": request["id"], "status": status, "error": error}));
    }

    /// Wait until the client closes the socket.
    pub async fn closed(&mut self) {
        loop {
            match self.rx.recv().await {
                Some(Message::Close(_)) | None => return,
                Some(_) => continue,
            }
        }
    }
}

/// Short, unbounded backoff so reconnects happen promptly.
pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
        max_attempts: None,
    }
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
