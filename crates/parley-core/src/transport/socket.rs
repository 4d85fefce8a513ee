//! Socket seam
//!
//! A [`Connector`] opens one physical socket and hands back its write and
//! read halves. The production connector wraps `tokio-tungstenite`; tests
//! plug in channel-backed fakes.

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use super::error::TransportError;

/// Write half of an open socket
pub type FrameSink = Pin<Box<dyn Sink<WsMessage, Error = TransportError> + Send>>;

/// Read half of an open socket
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WsMessage, TransportError>> + Send>>;

/// Opens sockets to a URL
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>>;
}

/// Connector backed by `tokio_tungstenite::connect_async`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>> {
        async move {
            debug!("Opening socket to {}", redact_token(&url));
            let (ws_stream, _response) = connect_async(url.as_str()).await?;
            let (write, read) = ws_stream.split();

            let sink: FrameSink = Box::pin(write.sink_map_err(TransportError::from));
            let stream: FrameStream = Box::pin(read.map(|item| item.map_err(TransportError::from)));
            Ok((sink, stream))
        }
        .boxed()
    }
}

/// Strip the token query value before a URL reaches the logs
pub(crate) fn redact_token(url: &str) -> String {
    match url.find("token=") {
        Some(pos) => {
            let value_start = pos + "token=".len();
            let value_end = url[value_start..]
                .find('&')
                .map(|i| value_start + i)
                .unwrap_or(url.len());
            format!("{}***{}", &url[..value_start], &url[value_end..])
        }
        None => url.to_string(),
    }
}
