//! Parley Core Library
//!
//! Client-side synchronization for a realtime chat conversation: one
//! conversation record kept in step with the server over an HTTP API and
//! a per-conversation WebSocket.
//!
//! # Architecture
//!
//! - **HTTP API**: source of truth. Conversations are created and messages
//!   persisted here.
//! - **Realtime socket**: pushes messages, typing and presence. A message may
//!   arrive both ways; the record keeps one copy per id.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Arc::new(ConversationStore::new());
//! let api = HttpConversationApi::new(&config.api_url)?;
//! let sync = SyncOrchestrator::new(
//!     config.orchestrator_config(),
//!     Arc::new(api),
//!     store.clone(),
//!     Arc::new(WsConnector),
//!     config.token_supplier(),
//! );
//!
//! sync.send_message("hello").await?;
//! ```
//!
//! # Modules
//!
//! - `orchestrator`: binds a conversation, send and typing protocols
//! - `transport`: reconnecting WebSocket
//! - `protocol`: wire frames
//! - `router`: inbound frame dispatch
//! - `sink`: conversation record mutations
//! - `api`: HTTP client
//! - `debounce`: trailing debounce used for typing signals
//! - `models`: messages and the conversation record
//! - `config`: Application configuration

pub mod api;
pub mod config;
pub mod debounce;
pub mod models;
pub mod orchestrator;
pub mod protocol;
pub mod router;
pub mod sink;
pub mod transport;

pub use api::{ApiError, ConversationApi, HttpConversationApi};
pub use config::Config;
pub use models::{ConversationRecord, Message, PresenceStatus};
pub use orchestrator::{OrchestratorConfig, SyncError, SyncOrchestrator};
pub use protocol::{FrameError, InboundFrame, OutboundFrame};
pub use sink::{ConversationStore, StateSink};
pub use transport::{ConnectionState, Connector, Transport, TransportError, WsConnector};
