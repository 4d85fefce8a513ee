//! Realtime endpoint URLs and the auth token query

use url::form_urlencoded::byte_serialize;
use url::Url;

use super::error::TransportError;

/// Endpoint for one conversation: the base URL with the id appended as a path segment
pub fn conversation_endpoint(base: &str, conversation_id: &str) -> Result<String, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidEndpoint {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidEndpoint {
            url: base.to_string(),
            reason: "URL cannot carry a path".to_string(),
        })?
        .pop_if_empty()
        .push(conversation_id);

    Ok(url.into())
}

/// Append `token=<encoded>` to an endpoint when a non-empty token is given
pub fn connection_url(endpoint: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => {
            let separator = if endpoint.contains('?') { '&' } else { '?' };
            let encoded: String = byte_serialize(token.as_bytes()).collect();
            format!("{}{}token={}", endpoint, separator, encoded)
        }
        _ => endpoint.to_string(),
    }
}
