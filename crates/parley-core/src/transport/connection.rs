//! Reconnecting realtime connection
//!
//! A [`Transport`] owns at most one live socket for one endpoint. The socket
//! is driven by a background task that connects, pumps frames, and on close
//! waits out a jittered exponential backoff before trying again. The task
//! keeps retrying for as long as reconnecting is desired and the transport
//! has not been force-closed.
//!
//! Handlers are single-subscriber: each `on_*` call replaces the previous
//! handler for that event.
//!
//! ## Usage
//!
//! ```ignore
//! let transport = Transport::new(TransportConfig::new(endpoint), Arc::new(WsConnector), None);
//! transport.on_message(|frame| println!("{:?}", frame));
//! transport.connect();
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::backoff::{Backoff, BackoffPolicy};
use super::endpoint::connection_url;
use super::error::TransportError;
use super::socket::{redact_token, Connector, FrameSink, FrameStream};
use crate::protocol::{FrameError, InboundFrame, OutboundFrame};

/// Supplies the auth token; called on every connect attempt
pub type TokenSupplier = Arc<dyn Fn() -> Option<String> + Send + Sync>;

type OpenHandler = Arc<dyn Fn() + Send + Sync>;
type CloseHandler = Arc<dyn Fn() + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;
type MessageHandler = Arc<dyn Fn(InboundFrame) + Send + Sync>;

/// Why the connection is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Closed, reconnect may follow
    Retryable,
    /// Closed by `disconnect(true)`, never reconnects on its own
    Forced,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// Opening a socket
    Connecting,
    /// Socket open
    Open,
    /// No socket
    Closed(CloseKind),
}

/// Configuration for a transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Endpoint URL, without the token
    pub endpoint: String,
    /// Reconnect backoff
    pub backoff: BackoffPolicy,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Commands sent to the connection task
#[derive(Debug)]
enum Command {
    /// Write a text frame if the socket is open
    Send(String),
    /// Close the socket; flags decide whether to come back
    Disconnect,
    /// Skip any pending backoff wait
    ConnectNow,
}

#[derive(Default)]
struct Handlers {
    open: Option<OpenHandler>,
    close: Option<CloseHandler>,
    error: Option<ErrorHandler>,
    message: Option<MessageHandler>,
}

#[derive(Debug)]
struct Flags {
    desired_reconnect: bool,
    forced_closed: bool,
    /// A connection task is alive
    running: bool,
    attempts: u32,
}

/// State shared between the handle and its connection task
struct Shared {
    config: TransportConfig,
    token: Option<TokenSupplier>,
    connector: Arc<dyn Connector>,
    handlers: Mutex<Handlers>,
    flags: Mutex<Flags>,
    state: watch::Sender<ConnectionState>,
}

/// Handle to a reconnecting realtime connection
///
/// Cloning yields another handle to the same connection. The background
/// task stops once every handle is dropped.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
    commands: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport {
    /// Create a transport; nothing happens until [`Transport::connect`]
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        token: Option<TokenSupplier>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let shared = Shared {
            config,
            token,
            connector,
            handlers: Mutex::new(Handlers::default()),
            flags: Mutex::new(Flags {
                desired_reconnect: false,
                forced_closed: false,
                running: false,
                attempts: 0,
            }),
            state,
        };

        Self {
            shared: Arc::new(shared),
            commands: Arc::new(Mutex::new(None)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.config.endpoint
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Reconnects scheduled since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.shared.flags).attempts
    }

    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.handlers).open = Some(Arc::new(handler));
    }

    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.handlers).close = Some(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&TransportError) + Send + Sync + 'static) {
        lock(&self.shared.handlers).error = Some(Arc::new(handler));
    }

    pub fn on_message(&self, handler: impl Fn(InboundFrame) + Send + Sync + 'static) {
        lock(&self.shared.handlers).message = Some(Arc::new(handler));
    }

    /// Start connecting
    ///
    /// No-op while a socket is open or opening. If a reconnect is pending,
    /// the wait is cut short. Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let mut flags = lock(&self.shared.flags);
        flags.desired_reconnect = true;
        flags.forced_closed = false;

        let mut commands = lock(&self.commands);
        if flags.running {
            if let Some(tx) = commands.as_ref() {
                let _ = tx.send(Command::ConnectNow);
            }
            return;
        }

        flags.running = true;
        let (tx, rx) = mpsc::unbounded_channel();
        *commands = Some(tx);
        drop(commands);
        drop(flags);

        tokio::spawn(run_connection(self.shared.clone(), rx));
    }

    /// Close the connection
    ///
    /// With `force`, the transport stays closed: any reconnect that is
    /// already scheduled is abandoned. Without it, the socket is dropped and
    /// the usual backoff reconnect follows.
    pub fn disconnect(&self, force: bool) {
        let mut flags = lock(&self.shared.flags);
        flags.desired_reconnect = !force;
        flags.forced_closed = force;

        if flags.running {
            if let Some(tx) = lock(&self.commands).as_ref() {
                let _ = tx.send(Command::Disconnect);
            }
        } else if force {
            self.shared
                .state
                .send_replace(ConnectionState::Closed(CloseKind::Forced));
        }
    }

    /// Send a frame if the socket is open
    ///
    /// Frames sent while closed or connecting are dropped. Returns whether
    /// the frame was handed to the socket task.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        if !self.is_open() {
            debug!("Dropping outbound frame, socket not open");
            return false;
        }

        match lock(&self.commands).as_ref() {
            Some(tx) => tx.send(Command::Send(frame.encode())).is_ok(),
            None => false,
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Decide whether the task keeps going; clears `running` when it stops
    ///
    /// Decided under the flags lock so a concurrent `connect()` either sees
    /// the task running or starts a new one.
    fn keep_running(&self) -> bool {
        let mut flags = lock(&self.flags);
        if flags.desired_reconnect && !flags.forced_closed {
            return true;
        }

        flags.running = false;
        let kind = if flags.forced_closed {
            CloseKind::Forced
        } else {
            CloseKind::Retryable
        };
        self.set_state(ConnectionState::Closed(kind));
        false
    }

    fn stop(&self) {
        lock(&self.flags).running = false;
    }

    fn close_kind(&self) -> CloseKind {
        if lock(&self.flags).forced_closed {
            CloseKind::Forced
        } else {
            CloseKind::Retryable
        }
    }

    fn set_attempts(&self, attempts: u32) {
        lock(&self.flags).attempts = attempts;
    }

    fn token(&self) -> Option<String> {
        self.token.as_ref().and_then(|supply| supply())
    }

    fn emit_open(&self) {
        let handler = lock(&self.handlers).open.clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn emit_close(&self) {
        let handler = lock(&self.handlers).close.clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn emit_error(&self, error: &TransportError) {
        let handler = lock(&self.handlers).error.clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }

    fn dispatch(&self, decoded: Result<InboundFrame, FrameError>) {
        match decoded {
            Ok(frame) => {
                let handler = lock(&self.handlers).message.clone();
                if let Some(handler) = handler {
                    handler(frame);
                }
            }
            Err(e) => {
                let error = TransportError::from(e);
                warn!("Ignoring inbound frame: {}", error);
                self.emit_error(&error);
            }
        }
    }
}

/// Outcome of one step of the connection task
enum Flow {
    /// Proceed with the state machine
    Continue,
    /// Every handle was dropped
    Shutdown,
}

enum Opened {
    Socket(FrameSink, FrameStream),
    Failed(TransportError),
    /// Disconnect requested while opening
    Aborted,
    Shutdown,
}

/// Connection task: connect, pump, back off, repeat
async fn run_connection(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut backoff = Backoff::new(shared.config.backoff.clone());

    loop {
        if !shared.keep_running() {
            break;
        }

        let url = connection_url(&shared.config.endpoint, shared.token().as_deref());
        shared.set_state(ConnectionState::Connecting);

        let flow = match open_socket(&shared, &mut commands, url).await {
            Opened::Socket(sink, stream) => {
                backoff.reset();
                shared.set_attempts(0);
                shared.set_state(ConnectionState::Open);
                info!(endpoint = %shared.config.endpoint, "Realtime connection open");
                shared.emit_open();
                pump(&shared, &mut commands, sink, stream).await
            }
            Opened::Failed(e) => {
                warn!(endpoint = %shared.config.endpoint, "Realtime connection failed: {}", e);
                shared.emit_error(&e);
                Flow::Continue
            }
            Opened::Aborted => Flow::Continue,
            Opened::Shutdown => Flow::Shutdown,
        };

        shared.set_state(ConnectionState::Closed(shared.close_kind()));
        shared.emit_close();

        if matches!(flow, Flow::Shutdown) {
            shared.stop();
            break;
        }
        if !shared.keep_running() {
            break;
        }

        let delay = backoff.next_delay();
        shared.set_attempts(backoff.attempt());
        info!(
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        if let Flow::Shutdown = wait_for_retry(&mut commands, delay).await {
            shared.stop();
            break;
        }
    }

    debug!(endpoint = %shared.config.endpoint, "Connection task stopped");
}

async fn open_socket(
    shared: &Shared,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    url: String,
) -> Opened {
    debug!("Connecting to {}", redact_token(&url));
    let mut connecting = shared.connector.connect(url);

    loop {
        tokio::select! {
            result = &mut connecting => {
                return match result {
                    Ok((sink, stream)) => Opened::Socket(sink, stream),
                    Err(e) => Opened::Failed(e),
                };
            }
            cmd = commands.recv() => match cmd {
                Some(Command::Disconnect) => return Opened::Aborted,
                Some(Command::Send(_)) => debug!("Dropping outbound frame while connecting"),
                Some(Command::ConnectNow) => {}
                None => return Opened::Shutdown,
            }
        }
    }
}

/// Move frames until the socket closes or a disconnect is requested
async fn pump(
    shared: &Shared,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    mut sink: FrameSink,
    mut stream: FrameStream,
) -> Flow {
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        warn!("Failed to write frame: {}", e);
                        shared.emit_error(&e);
                        return Flow::Continue;
                    }
                }
                Some(Command::Disconnect) => {
                    sink.close().await.ok();
                    return Flow::Continue;
                }
                Some(Command::ConnectNow) => {}
                None => {
                    sink.close().await.ok();
                    return Flow::Shutdown;
                }
            },
            item = stream.next() => match item {
                Some(Ok(WsMessage::Text(text))) => shared.dispatch(InboundFrame::decode(&text)),
                Some(Ok(WsMessage::Binary(bytes))) => shared.dispatch(InboundFrame::decode_bytes(&bytes)),
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("Server closed connection: {:?}", frame);
                    return Flow::Continue;
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Realtime socket error: {}", e);
                    shared.emit_error(&e);
                    return Flow::Continue;
                }
                None => return Flow::Continue,
            }
        }
    }
}

/// Sleep out a backoff delay
///
/// Returns early on `ConnectNow` or a disconnect; the caller re-checks the
/// flags before connecting.
async fn wait_for_retry(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    delay: std::time::Duration,
) -> Flow {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return Flow::Continue,
            cmd = commands.recv() => match cmd {
                Some(Command::ConnectNow) | Some(Command::Disconnect) => return Flow::Continue,
                Some(Command::Send(_)) => debug!("Dropping outbound frame while reconnecting"),
                None => return Flow::Shutdown,
            }
        }
    }
}
