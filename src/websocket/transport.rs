//! Pluggable socket implementation.

use std::fmt;
use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{Error, Result};

pub type FrameSink = Pin<Box<dyn Sink<Message, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// An established socket, split into its write and read halves.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    pub fn new<S, T>(sink: S, stream: T) -> Self
    where
        S: Sink<Message, Error = Error> + Send + 'static,
        T: Stream<Item = Result<Message>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens sockets on behalf of the connection manager.
pub trait Connector: Send + Sync + fmt::Debug + 'static {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Link>>;
}

/// Native TLS WebSocket via `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Link>> {
        Box::pin(async move {
            let (ws_stream, _) = connect_async(url).await?;
            let (write, read) = ws_stream.split();
            Ok(Link::new(
                write.sink_map_err(Error::from),
                read.map(|msg| msg.map_err(Error::from)),
            ))
        })
    }
}
