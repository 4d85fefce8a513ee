//! Authoritative request/response channel
//!
//! [`ConversationApi`] is the contract the orchestrator needs from the
//! server: create a conversation and persist a message. The realtime socket
//! only mirrors what this channel has already committed.
//!
//! [`HttpConversationApi`] implements it over HTTP:
//! - `POST {base}conversations` `{"userId": ...}` -> `{"id": ...}`
//! - `POST {base}conversations/{id}/messages` `{"content": ...}` -> message

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::models::Message;
use crate::transport::TokenSupplier;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONVERSATIONS_ENDPOINT: &str = "conversations";

/// Errors from the authoritative channel
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request could not be sent or the response could not be read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Base URL or a joined path is not a valid URL
    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Response body did not have the expected shape
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Server operations the orchestrator depends on
pub trait ConversationApi: Send + Sync + 'static {
    /// Create a conversation, returning its id
    fn create_conversation(
        &self,
        user_id: Option<String>,
    ) -> BoxFuture<'static, Result<String, ApiError>>;

    /// Persist a message, returning it as stored
    fn send_message(
        &self,
        conversation_id: String,
        content: String,
    ) -> BoxFuture<'static, Result<Message, ApiError>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct CreateConversationResponse {
    id: String,
}

#[derive(Serialize)]
struct SendMessageRequest {
    content: String,
}

/// HTTP implementation of [`ConversationApi`]
#[derive(Clone)]
pub struct HttpConversationApi {
    base_url: Url,
    client: Client,
    token: Option<TokenSupplier>,
}

impl HttpConversationApi {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            base_url,
            client,
            token: None,
        })
    }

    /// Attach a bearer token supplier, consulted per request
    pub fn with_token_supplier(mut self, token: TokenSupplier) -> Self {
        self.token = Some(token);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.as_ref().and_then(|supply| supply()) {
            Some(token) if !token.is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }

    fn conversations_url(&self) -> Result<Url, ApiError> {
        Ok(self.base_url.join(CONVERSATIONS_ENDPOINT)?)
    }

    fn messages_url(&self, conversation_id: &str) -> Result<Url, ApiError> {
        let mut url = self.conversations_url()?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .push(conversation_id)
            .push("messages");
        Ok(url)
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(ApiError::Status {
        status: response.status().as_u16(),
        body: response.text().await.unwrap_or_default(),
    })
}

impl ConversationApi for HttpConversationApi {
    fn create_conversation(
        &self,
        user_id: Option<String>,
    ) -> BoxFuture<'static, Result<String, ApiError>> {
        let api = self.clone();
        async move {
            let url = api.conversations_url()?;
            debug!("Creating conversation at {}", url);

            let request = api
                .authorize(api.client.post(url))
                .json(&CreateConversationRequest { user_id });
            let response = check_status(request.send().await?).await?;
            let body = response.bytes().await?;
            let created: CreateConversationResponse = serde_json::from_slice(&body)?;
            Ok(created.id)
        }
        .boxed()
    }

    fn send_message(
        &self,
        conversation_id: String,
        content: String,
    ) -> BoxFuture<'static, Result<Message, ApiError>> {
        let api = self.clone();
        async move {
            let url = api.messages_url(&conversation_id)?;
            debug!("Sending message to {}", url);

            let request = api
                .authorize(api.client.post(url))
                .json(&SendMessageRequest { content });
            let response = check_status(request.send().await?).await?;
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        }
        .boxed()
    }
}
