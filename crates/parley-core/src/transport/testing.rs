//! In-memory socket fakes for tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::mpsc as fmpsc;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use super::error::TransportError;
use super::socket::{Connector, FrameSink, FrameStream};

/// Server side of one fake socket
pub(crate) struct FakePeer {
    to_client: fmpsc::UnboundedSender<Result<WsMessage, TransportError>>,
    from_client: fmpsc::UnboundedReceiver<WsMessage>,
}

impl FakePeer {
    pub(crate) fn push_text(&self, text: &str) {
        let _ = self
            .to_client
            .unbounded_send(Ok(WsMessage::Text(text.to_string())));
    }

    /// Next text frame written by the client
    pub(crate) async fn next_text(&mut self) -> Option<String> {
        while let Some(msg) = self.from_client.next().await {
            if let WsMessage::Text(text) = msg {
                return Some(text);
            }
        }
        None
    }

    /// Text frames already written by the client, without waiting
    pub(crate) fn drain_text(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) = self.from_client.try_next() {
            if let WsMessage::Text(text) = msg {
                out.push(text);
            }
        }
        out
    }
}

/// Connector that hands out channel-backed sockets
pub(crate) struct FakeConnector {
    refuse: AtomicBool,
    urls: Mutex<Vec<String>>,
    times: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<FakePeer>,
}

impl FakeConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakePeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            refuse: AtomicBool::new(false),
            urls: Mutex::new(Vec::new()),
            times: Mutex::new(Vec::new()),
            peers,
        };
        (Arc::new(connector), rx)
    }

    pub(crate) fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.times.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>> {
        self.urls.lock().unwrap().push(url);
        self.times.lock().unwrap().push(Instant::now());

        if self.refuse.load(Ordering::SeqCst) {
            return async { Err(TransportError::Socket(tungstenite::Error::ConnectionClosed)) }.boxed();
        }

        let (client_tx, from_client) = fmpsc::unbounded::<WsMessage>();
        let (to_client, client_rx) = fmpsc::unbounded::<Result<WsMessage, TransportError>>();
        let _ = self.peers.send(FakePeer {
            to_client,
            from_client,
        });

        let sink: FrameSink = Box::pin(
            client_tx.sink_map_err(|_| TransportError::Socket(tungstenite::Error::ConnectionClosed)),
        );
        let stream: FrameStream = Box::pin(client_rx);
        async move { Ok((sink, stream)) }.boxed()
    }
}
