//! Outbound request layer
//!
//! This module provides:
//! - Session-consistent synthetic client headers
//! - A single-producer handle for auth tokens that become ready later
//! - The retrying executor that rotates endpoints and classifies failures

pub mod delay;
pub mod executor;
pub mod headers;
pub mod token;

pub use delay::DelayRange;
pub use executor::{RetryingRequestExecutor, StatusPolicy};
pub use headers::SessionHeaderFactory;
pub use token::{TokenHandle, TokenProducer};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use serde_json::Value;

use crate::error::Result;
use crate::models::{AuthToken, Endpoint};

/// One logical outbound call, independent of the endpoint it ends up on
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    /// Session whose synthetic identity is presented
    pub session_id: String,
    pub auth: Option<AuthToken>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
            session_id: session_id.into(),
            auth: None,
        }
    }

    pub fn post(url: impl Into<String>, session_id: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: Some(body),
            session_id: session_id.into(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthToken) -> Self {
        self.auth = Some(auth);
        self
    }
}

/// Response as seen on the wire, before classification
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, truncated for log and error messages
    pub fn body_excerpt(&self) -> String {
        const LIMIT: usize = 512;
        let text = String::from_utf8_lossy(&self.body);
        if text.len() > LIMIT {
            let mut cut = LIMIT;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &text[..cut])
        } else {
            text.into_owned()
        }
    }
}

/// Sends one request through one endpoint
///
/// Implementations perform exactly one network exchange; retries, rotation
/// and classification belong to the executor.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &OutboundRequest,
        headers: HeaderMap,
    ) -> Result<RawResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_response_success_range() {
        let mut response = RawResponse {
            status: 204,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(response.is_success());

        response.status = 302;
        assert!(!response.is_success());
        response.status = 199;
        assert!(!response.is_success());
    }

    #[test]
    fn test_body_excerpt_truncates_on_char_boundary() {
        let response = RawResponse {
            status: 500,
            headers: HeaderMap::new(),
            body: Bytes::from("é".repeat(400)),
        };
        let excerpt = response.body_excerpt();
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.len() <= 515);
    }

    #[test]
    fn test_outbound_request_builders() {
        let request = OutboundRequest::post(
            "https://api.example/comment",
            "session-1",
            serde_json::json!({"text": "gm"}),
        )
        .with_auth(AuthToken::new("abc"));

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.session_id, "session-1");
        assert!(request.body.is_some());
        assert_eq!(request.auth.unwrap().token, "abc");
    }
}
