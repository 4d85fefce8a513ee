//! Sync orchestrator
//!
//! Binds a [`Transport`] to the active conversation, routes its frames into
//! the [`StateSink`], and runs the two client-side protocols:
//!
//! - **Send**: resolve the conversation id (creating the conversation on
//!   first send, at most once no matter how many sends race), persist the
//!   message over the authoritative API, then append the confirmed message
//!   through the same idempotent path that pushed frames use.
//! - **Typing**: update the record immediately, then emit at most one
//!   outbound typing frame per user per quiet debounce window.
//!
//! Frames and API responses may both deliver the same message; the sink's
//! append-if-absent keeps exactly one copy.
//!
//! The conversation id is tracked apart from the transport: a binding whose
//! socket was shut down, or never came up, still names the conversation
//! that sends go to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ConversationApi};
use crate::debounce::Debouncer;
use crate::models::Message;
use crate::protocol::{ErrorPayload, OutboundFrame, PresencePayload, TypingPayload};
use crate::router::{route, FrameHandler};
use crate::sink::StateSink;
use crate::transport::{
    conversation_endpoint, BackoffPolicy, ConnectionState, Connector, TokenSupplier, Transport,
    TransportConfig,
};

/// Errors returned from [`SyncOrchestrator::send_message`]
#[derive(Error, Debug)]
pub enum SyncError {
    /// Creating the conversation for a first message failed
    #[error("Failed to create conversation: {0}")]
    CreateConversation(#[source] Arc<ApiError>),

    /// The server rejected the message
    #[error("Failed to send message: {0}")]
    SendMessage(#[source] ApiError),

    /// Nothing to send
    #[error("Message is empty")]
    EmptyMessage,
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Realtime base URL; the conversation id is appended per binding
    pub realtime_url: String,
    /// Local user, sent when creating a conversation and used by `start_typing`
    pub user_id: Option<String>,
    /// Quiet period before a typing change is sent
    pub typing_debounce: Duration,
    /// Reconnect backoff for each binding's transport
    pub backoff: BackoffPolicy,
}

impl OrchestratorConfig {
    pub fn new(realtime_url: impl Into<String>) -> Self {
        Self {
            realtime_url: realtime_url.into(),
            user_id: None,
            typing_debounce: Duration::from_millis(200),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

type CreateResult = Result<String, Arc<ApiError>>;
type PendingCreate = Shared<BoxFuture<'static, CreateResult>>;

/// A live transport for the bound conversation
struct Binding {
    generation: u64,
    transport: Transport,
}

#[derive(Default)]
struct BindingSlot {
    /// Conversation sends go to, whether or not a socket is up
    conversation_id: Option<String>,
    current: Option<Binding>,
    generation: u64,
}

#[derive(Default)]
struct CreateSlot {
    pending: Option<(u64, PendingCreate)>,
    tickets: u64,
}

struct Inner {
    config: OrchestratorConfig,
    api: Arc<dyn ConversationApi>,
    sink: Arc<dyn StateSink>,
    connector: Arc<dyn Connector>,
    token: Option<TokenSupplier>,
    binding: Mutex<BindingSlot>,
    creating: Mutex<CreateSlot>,
    in_flight: AtomicUsize,
}

/// Keeps a conversation record in sync with the server
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
    /// One debouncer per typing user
    typing: Mutex<HashMap<String, Debouncer<bool>>>,
}

/// Holds the record's pending flag for one send, even if the send is dropped
struct PendingGuard<'a> {
    inner: &'a Inner,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.end_operation();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncOrchestrator {
    /// Create an orchestrator with no bound conversation
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: OrchestratorConfig,
        api: Arc<dyn ConversationApi>,
        sink: Arc<dyn StateSink>,
        connector: Arc<dyn Connector>,
        token: Option<TokenSupplier>,
    ) -> Self {
        let inner = Arc::new(Inner {
            config,
            api,
            sink,
            connector,
            token,
            binding: Mutex::new(BindingSlot::default()),
            creating: Mutex::new(CreateSlot::default()),
            in_flight: AtomicUsize::new(0),
        });

        Self {
            inner,
            typing: Mutex::new(HashMap::new()),
        }
    }

    /// Currently bound conversation id
    pub fn conversation_id(&self) -> Option<String> {
        self.inner.bound_id()
    }

    /// State of the bound conversation's connection, if a socket is bound
    pub fn connection_state(&self) -> Option<ConnectionState> {
        lock(&self.inner.binding)
            .current
            .as_ref()
            .map(|b| b.transport.state())
    }

    /// Switch the active conversation
    ///
    /// Tears down the current binding, resets the record, and binds a fresh
    /// transport to the new id. Setting the id that is already bound does
    /// nothing, except that a binding without a live transport (after
    /// [`SyncOrchestrator::shutdown`]) is reconnected with its record kept.
    pub fn set_conversation(&self, conversation_id: Option<&str>) {
        let mut slot = lock(&self.inner.binding);
        if slot.conversation_id.as_deref() == conversation_id {
            if let Some(id) = conversation_id {
                if slot.current.is_none() {
                    self.inner.bind(&mut slot, id);
                }
            }
            return;
        }

        if let Some(old) = slot.current.take() {
            info!(conversation_id = ?slot.conversation_id, "Unbinding conversation");
            old.transport.disconnect(true);
        }
        self.inner.sink.clear();
        slot.conversation_id = conversation_id.map(str::to_string);

        if let Some(id) = conversation_id {
            self.inner.sink.set_conversation_id(id);
            self.inner.bind(&mut slot, id);
        }
    }

    /// Send a chat message
    ///
    /// Creates the conversation first if none is bound. On failure nothing
    /// unconfirmed is committed to the record; the error is returned to the
    /// caller and no retry is attempted.
    pub async fn send_message(&self, content: &str) -> Result<Message, SyncError> {
        if content.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let result = {
            let _pending = self.inner.begin_operation();
            self.inner.send(content.to_string()).await
        };

        match &result {
            Ok(message) => {
                debug!(message_id = %message.id, "Message sent");
                self.inner.sink.set_error(None);
            }
            Err(e) => {
                warn!("Send failed: {}", e);
                self.inner.sink.set_error(Some(e.to_string()));
            }
        }
        result
    }

    /// Record a local typing change and schedule the outbound signal
    ///
    /// Changes are debounced per user, so bursts from different users do not
    /// cancel each other.
    pub fn set_typing_status(&self, user_id: &str, is_typing: bool) {
        self.inner.sink.set_typing(user_id, is_typing);

        let mut typing = lock(&self.typing);
        let debouncer = typing.entry(user_id.to_string()).or_insert_with(|| {
            let weak = Arc::downgrade(&self.inner);
            let user_id = user_id.to_string();
            Debouncer::new(self.inner.config.typing_debounce, move |is_typing| {
                if let Some(inner) = weak.upgrade() {
                    inner.send_typing(&user_id, is_typing);
                }
            })
        });
        debouncer.push(is_typing);
    }

    /// `set_typing_status(true)` for the configured user
    pub fn start_typing(&self) {
        if let Some(user_id) = self.inner.config.user_id.clone() {
            self.set_typing_status(&user_id, true);
        }
    }

    /// `set_typing_status(false)` for the configured user
    pub fn stop_typing(&self) {
        if let Some(user_id) = self.inner.config.user_id.clone() {
            self.set_typing_status(&user_id, false);
        }
    }

    /// Force-close the bound connection
    ///
    /// The record and the conversation id are kept, so later sends still go
    /// to the same conversation.
    pub fn shutdown(&self) {
        let binding = lock(&self.inner.binding).current.take();
        if let Some(binding) = binding {
            info!(generation = binding.generation, "Shutting down binding");
            binding.transport.disconnect(true);
        }
        self.inner.sink.set_connected(false);
    }
}

impl Inner {
    fn bound_id(&self) -> Option<String> {
        lock(&self.binding).conversation_id.clone()
    }

    fn is_bound_to(&self, conversation_id: &str) -> bool {
        lock(&self.binding).conversation_id.as_deref() == Some(conversation_id)
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.binding)
            .current
            .as_ref()
            .is_some_and(|b| b.generation == generation)
    }

    fn begin_operation(&self) -> PendingGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.sink.set_pending(true);
        PendingGuard { inner: self }
    }

    fn end_operation(&self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.sink.set_pending(remaining > 0);
    }

    /// Create and connect a transport for `conversation_id`
    ///
    /// On an unusable endpoint the conversation stays bound without a socket.
    fn bind(self: &Arc<Self>, slot: &mut BindingSlot, conversation_id: &str) {
        let endpoint = match conversation_endpoint(&self.config.realtime_url, conversation_id) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(conversation_id, "Cannot connect conversation: {}", e);
                self.sink.set_error(Some(e.to_string()));
                return;
            }
        };

        slot.generation += 1;
        let generation = slot.generation;
        let config = TransportConfig::new(endpoint).with_backoff(self.config.backoff.clone());
        let transport = Transport::new(config, self.connector.clone(), self.token.clone());
        self.register_handlers(&transport, generation);

        info!(conversation_id, "Binding conversation");
        transport.connect();

        slot.current = Some(Binding {
            generation,
            transport,
        });
    }

    fn register_handlers(self: &Arc<Self>, transport: &Transport, generation: u64) {
        let weak = Arc::downgrade(self);

        let open = weak.clone();
        transport.on_open(move || {
            if let Some(inner) = live(&open, generation) {
                inner.sink.set_connected(true);
            }
        });

        let close = weak.clone();
        transport.on_close(move || {
            if let Some(inner) = live(&close, generation) {
                inner.sink.set_connected(false);
            }
        });

        transport.on_error(move |e| {
            debug!(generation, "Transport error: {}", e);
        });

        transport.on_message(move |frame| {
            if let Some(inner) = live(&weak, generation) {
                route(frame, inner.as_ref());
            }
        });
    }

    /// Adopt a freshly created conversation id unless another one got bound meanwhile
    fn adopt(self: &Arc<Self>, conversation_id: &str) {
        let mut slot = lock(&self.binding);
        match slot.conversation_id.clone() {
            None => {
                info!(conversation_id, "Adopting created conversation");
                slot.conversation_id = Some(conversation_id.to_string());
                self.sink.set_conversation_id(conversation_id);
                self.bind(&mut slot, conversation_id);
            }
            Some(bound) if bound == conversation_id => {}
            Some(bound) => {
                info!(
                    created = conversation_id,
                    bound = %bound,
                    "Conversation changed during creation, not adopting"
                );
            }
        }
    }

    /// Resolve the conversation id, sharing a single in-flight create
    async fn resolve_conversation_id(self: &Arc<Self>) -> Result<String, SyncError> {
        let (ticket, pending) = {
            let mut creating = lock(&self.creating);
            if let Some(id) = self.bound_id() {
                return Ok(id);
            }

            match creating.pending.as_ref() {
                Some((ticket, pending)) => (*ticket, pending.clone()),
                None => {
                    creating.tickets += 1;
                    let ticket = creating.tickets;
                    debug!(ticket, "Creating conversation for first message");
                    let pending = self
                        .api
                        .create_conversation(self.config.user_id.clone())
                        .map(|result| result.map_err(Arc::new))
                        .boxed()
                        .shared();
                    creating.pending = Some((ticket, pending.clone()));
                    (ticket, pending)
                }
            }
        };

        let result = pending.await;

        // The first waiter to finish adopts and clears the slot under the
        // same lock new callers check, so none of them can start a second create
        let mut creating = lock(&self.creating);
        if matches!(creating.pending.as_ref(), Some((t, _)) if *t == ticket) {
            creating.pending = None;
            if let Ok(id) = &result {
                self.adopt(id);
            }
        }
        drop(creating);

        result.map_err(SyncError::CreateConversation)
    }

    async fn send(self: &Arc<Self>, content: String) -> Result<Message, SyncError> {
        let conversation_id = self.resolve_conversation_id().await?;

        let message = self
            .api
            .send_message(conversation_id.clone(), content)
            .await
            .map_err(SyncError::SendMessage)?;

        if self.is_bound_to(&conversation_id) {
            self.sink.append_message_if_absent(message.clone());
        } else {
            info!(
                conversation_id = %conversation_id,
                "Conversation changed while sending, not applying response"
            );
        }
        Ok(message)
    }

    fn send_typing(&self, user_id: &str, is_typing: bool) {
        let slot = lock(&self.binding);
        match (slot.conversation_id.as_deref(), slot.current.as_ref()) {
            (Some(conversation_id), Some(binding)) => {
                let frame = OutboundFrame::typing(conversation_id, user_id, is_typing);
                if !binding.transport.send(&frame) {
                    debug!("Typing signal dropped, socket not open");
                }
            }
            _ => debug!("Typing signal dropped, no conversation connected"),
        }
    }
}

/// Upgrade a handler's back-reference if its binding is still the current one
fn live(weak: &Weak<Inner>, generation: u64) -> Option<Arc<Inner>> {
    weak.upgrade().filter(|inner| inner.is_current(generation))
}

impl FrameHandler for Inner {
    fn on_message(&self, message: Message) {
        if !self.sink.append_message_if_absent(message) {
            debug!("Ignoring duplicate message");
        }
    }

    fn on_typing(&self, typing: TypingPayload) {
        self.sink.set_typing(&typing.user_id, typing.is_typing);
    }

    fn on_presence(&self, presence: PresencePayload) {
        self.sink.set_presence(&presence.user_id, presence.status);
    }

    fn on_error(&self, error: ErrorPayload) {
        warn!(code = ?error.code, "Server error: {}", error.message);
        self.sink.set_error(Some(error.message));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use futures_util::future::join_all;

    use super::*;
    use crate::models::{ConversationRecord, PresenceStatus};
    use crate::sink::ConversationStore;
    use crate::transport::testing::{FakeConnector, FakePeer};

    /// Scripted authoritative API
    #[derive(Default)]
    struct FakeApi {
        create_calls: AtomicUsize,
        send_calls: AtomicUsize,
        create_delay: Duration,
        send_delay: Duration,
        fail_creates: AtomicUsize,
        fail_sends: bool,
        sent_to: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn creates(&self) -> usize {
            self.create_calls.load(Ordering::SeqCst)
        }
    }

    impl ConversationApi for FakeApi {
        fn create_conversation(
            &self,
            _user_id: Option<String>,
        ) -> BoxFuture<'static, Result<String, ApiError>> {
            let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fail = self
                .fail_creates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
                .is_ok();
            let delay = self.create_delay;
            async move {
                tokio::time::sleep(delay).await;
                if fail {
                    Err(ApiError::Status {
                        status: 500,
                        body: "create failed".to_string(),
                    })
                } else {
                    Ok(format!("c{}", n))
                }
            }
            .boxed()
        }

        fn send_message(
            &self,
            conversation_id: String,
            content: String,
        ) -> BoxFuture<'static, Result<Message, ApiError>> {
            let n = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.sent_to.lock().unwrap().push(conversation_id.clone());
            let delay = self.send_delay;
            let fail = self.fail_sends;
            async move {
                tokio::time::sleep(delay).await;
                if fail {
                    return Err(ApiError::Status {
                        status: 422,
                        body: "rejected".to_string(),
                    });
                }
                Ok(Message {
                    id: format!("m{}", n),
                    conversation_id,
                    author: "u1".to_string(),
                    content,
                    created_at: Utc::now(),
                })
            }
            .boxed()
        }
    }

    struct Harness {
        orchestrator: Arc<SyncOrchestrator>,
        store: Arc<ConversationStore>,
        api: Arc<FakeApi>,
        connector: Arc<FakeConnector>,
        peers: tokio::sync::mpsc::UnboundedReceiver<FakePeer>,
    }

    fn harness(api: FakeApi) -> Harness {
        harness_at("ws://chat.test/ws", api)
    }

    fn harness_at(realtime_url: &str, api: FakeApi) -> Harness {
        let (connector, peers) = FakeConnector::new();
        let api = Arc::new(api);
        let store = Arc::new(ConversationStore::new());
        let config = OrchestratorConfig::new(realtime_url).with_user_id("u1");
        let orchestrator = SyncOrchestrator::new(
            config,
            api.clone(),
            store.clone(),
            connector.clone(),
            None,
        );
        Harness {
            orchestrator: Arc::new(orchestrator),
            store,
            api,
            connector,
            peers,
        }
    }

    async fn wait_until(store: &ConversationStore, check: impl Fn(&ConversationRecord) -> bool) {
        let mut rx = store.subscribe();
        loop {
            if check(&rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.unwrap();
        }
    }

    fn message_frame(id: &str, conversation_id: &str) -> String {
        serde_json::json!({
            "type": "message",
            "payload": {
                "id": id,
                "conversationId": conversation_id,
                "author": "u2",
                "content": "pushed",
                "createdAt": "2024-01-01T00:00:00Z"
            }
        })
        .to_string()
    }

    fn typing_frame(conversation_id: &str, user_id: &str, is_typing: bool) -> String {
        OutboundFrame::typing(conversation_id, user_id, is_typing).encode()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_send_creates_then_dedups_pushed_echo() {
        let mut h = harness(FakeApi::default());

        let message = h.orchestrator.send_message("hi").await.unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.conversation_id, "c1");

        let record = h.store.snapshot();
        assert_eq!(record.conversation_id.as_deref(), Some("c1"));
        assert_eq!(record.messages, vec![message.clone()]);
        assert_eq!(h.orchestrator.conversation_id().as_deref(), Some("c1"));

        let peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;
        assert_eq!(h.connector.urls(), vec!["ws://chat.test/ws/c1"]);

        peer.push_text(&message_frame("m1", "c1"));
        peer.push_text(&typing_frame("c1", "u2", true));
        wait_until(&h.store, |r| r.typing.get("u2") == Some(&true)).await;

        assert_eq!(h.store.snapshot().messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushed_frame_before_response_is_not_duplicated() {
        let mut h = harness(FakeApi {
            send_delay: Duration::from_millis(100),
            ..FakeApi::default()
        });
        h.orchestrator.set_conversation(Some("c9"));
        let peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        let orchestrator = h.orchestrator.clone();
        let send = tokio::spawn(async move { orchestrator.send_message("hi").await });

        // Server pushes the echo before the POST returns
        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.push_text(&message_frame("m1", "c9"));
        wait_until(&h.store, |r| r.messages.len() == 1).await;

        let sent = send.await.unwrap().unwrap();
        assert_eq!(sent.id, "m1");
        assert_eq!(h.store.snapshot().messages.len(), 1);
        assert_eq!(h.store.snapshot().messages[0].content, "pushed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_sends_create_once() {
        let mut h = harness(FakeApi {
            create_delay: Duration::from_millis(50),
            ..FakeApi::default()
        });

        let sends = (0..5).map(|i| {
            let orchestrator = h.orchestrator.clone();
            async move { orchestrator.send_message(&format!("msg {}", i)).await }
        });
        let results = join_all(sends).await;

        assert_eq!(h.api.creates(), 1);
        for result in &results {
            assert_eq!(result.as_ref().unwrap().conversation_id, "c1");
        }
        assert!(h.api.sent_to.lock().unwrap().iter().all(|id| id == "c1"));
        assert_eq!(h.store.snapshot().messages.len(), 5);

        let _peer = h.peers.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_commits_nothing() {
        let h = harness(FakeApi {
            fail_creates: AtomicUsize::new(1),
            ..FakeApi::default()
        });

        let err = h.orchestrator.send_message("hi").await.unwrap_err();
        assert!(matches!(err, SyncError::CreateConversation(_)));

        let record = h.store.snapshot();
        assert!(record.conversation_id.is_none());
        assert!(record.messages.is_empty());
        assert!(!record.pending);
        assert!(record.last_error.is_some());
        assert_eq!(h.connector.attempts(), 0);

        // The next send tries again
        let message = h.orchestrator.send_message("hi").await.unwrap();
        assert_eq!(h.api.creates(), 2);
        assert_eq!(message.conversation_id, "c2");
        assert!(h.store.snapshot().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_appends_nothing() {
        let h = harness(FakeApi {
            fail_sends: true,
            ..FakeApi::default()
        });
        h.orchestrator.set_conversation(Some("c1"));

        let err = h.orchestrator.send_message("hi").await.unwrap_err();
        assert!(matches!(err, SyncError::SendMessage(_)));
        assert!(h.store.snapshot().messages.is_empty());
        assert_eq!(h.api.creates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_message_rejected_locally() {
        let h = harness(FakeApi::default());

        let err = h.orchestrator.send_message("   ").await.unwrap_err();
        assert!(matches!(err, SyncError::EmptyMessage));
        assert_eq!(h.api.creates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_burst_sends_one_frame() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let mut peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        for _ in 0..5 {
            h.orchestrator.set_typing_status("u1", true);
            assert_eq!(h.store.snapshot().typing.get("u1"), Some(&true));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        let frames = peer.drain_text();
        assert_eq!(frames, vec![typing_frame("c1", "u1", true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_sends_last_state_of_window() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let mut peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        h.orchestrator.start_typing();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.orchestrator.stop_typing();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(peer.drain_text(), vec![typing_frame("c1", "u1", false)]);
        assert_eq!(h.store.snapshot().typing.get("u1"), Some(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_typing_presence_and_error() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        peer.push_text(&typing_frame("c1", "u2", true));
        peer.push_text(&typing_frame("c1", "u2", false));
        peer.push_text(
            r#"{"type":"presence","payload":{"conversationId":"c1","userId":"u2","status":"away"}}"#,
        );
        peer.push_text(r#"{"type":"error","payload":{"message":"slow down","code":"RATE"}}"#);
        wait_until(&h.store, |r| r.last_error.is_some()).await;

        let record = h.store.snapshot();
        assert_eq!(record.typing.get("u2"), Some(&false));
        assert_eq!(record.presence.get("u2"), Some(&PresenceStatus::Away));
        assert_eq!(record.last_error.as_deref(), Some("slow down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_malformed_frames_change_nothing() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;
        let before = h.store.snapshot();

        peer.push_text(r#"{"type":"reaction","payload":{"emoji":"+1"}}"#);
        peer.push_text("garbage");
        peer.push_text(&typing_frame("c1", "u2", true));
        wait_until(&h.store, |r| r.typing.contains_key("u2")).await;

        let mut after = h.store.snapshot();
        after.typing.remove("u2");
        assert_eq!(after, before);
        assert!(h.store.snapshot().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebinding_tears_down_old_connection() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let _old = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;
        h.store.append_message_if_absent(Message::new("m1", "c1", "u2", "old"));

        h.orchestrator.set_conversation(Some("c2"));
        let record = h.store.snapshot();
        assert_eq!(record.conversation_id.as_deref(), Some("c2"));
        assert!(record.messages.is_empty());

        let _new = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(
            h.connector.urls(),
            vec!["ws://chat.test/ws/c1", "ws://chat.test/ws/c2"]
        );
        assert!(h.store.snapshot().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_conversation_does_not_rebind() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let _peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        h.orchestrator.set_conversation(Some("c1"));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.connector.attempts(), 1);
        assert!(h.store.snapshot().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_for_unbound_conversation_is_not_applied() {
        let h = harness(FakeApi {
            send_delay: Duration::from_millis(100),
            ..FakeApi::default()
        });
        h.orchestrator.set_conversation(Some("c1"));

        let orchestrator = h.orchestrator.clone();
        let send = tokio::spawn(async move { orchestrator.send_message("hi").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.orchestrator.set_conversation(Some("c2"));

        let sent = send.await.unwrap().unwrap();
        assert_eq!(sent.conversation_id, "c1");

        let record = h.store.snapshot();
        assert_eq!(record.conversation_id.as_deref(), Some("c2"));
        assert!(record.messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_flips_connectivity() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        drop(peer);
        wait_until(&h.store, |r| !r.connected).await;

        // Backoff brings it back
        let _peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;
        assert_eq!(h.connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reconnecting() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let _peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        h.orchestrator.shutdown();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(h.connector.attempts(), 1);
        assert!(!h.store.snapshot().connected);
        assert!(h.orchestrator.connection_state().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_shutdown_uses_bound_conversation() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let _peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        h.orchestrator.shutdown();
        let message = h.orchestrator.send_message("hi").await.unwrap();

        assert_eq!(h.api.creates(), 0);
        assert_eq!(message.conversation_id, "c1");
        assert_eq!(h.orchestrator.conversation_id().as_deref(), Some("c1"));
        assert_eq!(h.store.snapshot().messages, vec![message]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_conversation_after_shutdown_reconnects() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let _first = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;
        h.store.append_message_if_absent(Message::new("m1", "c1", "u2", "kept"));

        h.orchestrator.shutdown();
        h.orchestrator.set_conversation(Some("c1"));
        let _second = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        assert_eq!(h.connector.attempts(), 2);
        assert_eq!(h.store.snapshot().messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_endpoint_keeps_chosen_conversation() {
        let h = harness_at("localhost:3000/ws", FakeApi::default());

        h.orchestrator.set_conversation(Some("c42"));
        let record = h.store.snapshot();
        assert_eq!(record.conversation_id.as_deref(), Some("c42"));
        assert!(record.last_error.is_some());
        assert!(h.orchestrator.connection_state().is_none());

        let message = h.orchestrator.send_message("hi").await.unwrap();

        assert_eq!(h.api.creates(), 0);
        assert_eq!(*h.api.sent_to.lock().unwrap(), vec!["c42".to_string()]);
        let record = h.store.snapshot();
        assert_eq!(record.conversation_id.as_deref(), Some("c42"));
        assert_eq!(record.messages, vec![message]);
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_send_clears_pending() {
        let h = harness(FakeApi {
            send_delay: Duration::from_millis(100),
            ..FakeApi::default()
        });
        h.orchestrator.set_conversation(Some("c1"));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            h.orchestrator.send_message("hi"),
        )
        .await;
        assert!(cancelled.is_err());
        tokio::time::sleep(Duration::from_secs(5)).await;

        let record = h.store.snapshot();
        assert!(!record.pending);
        assert!(record.messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_from_two_users_is_debounced_separately() {
        let mut h = harness(FakeApi::default());
        h.orchestrator.set_conversation(Some("c1"));
        let mut peer = h.peers.recv().await.unwrap();
        wait_until(&h.store, |r| r.connected).await;

        h.orchestrator.set_typing_status("u1", true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.orchestrator.set_typing_status("u2", true);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut frames = peer.drain_text();
        frames.sort();
        let mut expected = vec![
            typing_frame("c1", "u1", true),
            typing_frame("c1", "u2", true),
        ];
        expected.sort();
        assert_eq!(frames, expected);
    }
}
