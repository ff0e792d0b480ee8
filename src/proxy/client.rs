//! Cached HTTP clients, one per endpoint
//!
//! Building a `reqwest::Client` sets up a connection pool and TLS config, so
//! clients are built once per endpoint identity and reused.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use http::HeaderMap;
use tracing::{debug, instrument};

use crate::error::{Result, RotorError};
use crate::models::Endpoint;
use crate::request::{HttpSender, OutboundRequest, RawResponse};

/// Per-endpoint `reqwest::Client` cache
pub struct ClientCache {
    clients: DashMap<String, reqwest::Client>,
    direct: reqwest::Client,
    timeout: Duration,
}

impl ClientCache {
    pub fn new(timeout: Duration) -> Result<Self> {
        let direct = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| RotorError::Http(format!("Failed to build direct client: {}", e)))?;

        Ok(Self {
            clients: DashMap::new(),
            direct,
            timeout,
        })
    }

    /// Client that talks straight to the target, bypassing every proxy
    pub fn direct(&self) -> reqwest::Client {
        self.direct.clone()
    }

    /// Client routed through `endpoint`, built on first use
    pub fn client_for(&self, endpoint: &Endpoint) -> Result<reqwest::Client> {
        let entry = self
            .clients
            .entry(endpoint.identity())
            .or_try_insert_with(|| self.build(endpoint))?;
        Ok(entry.value().clone())
    }

    /// Client for `endpoint`, or the direct client when there is none
    pub fn resolve(&self, endpoint: Option<&Endpoint>) -> Result<reqwest::Client> {
        match endpoint {
            Some(endpoint) => self.client_for(endpoint),
            None => Ok(self.direct()),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn build(&self, endpoint: &Endpoint) -> Result<reqwest::Client> {
        debug!("Building client for {}", endpoint);

        // A scheme the client rejects is a failure of this endpoint only
        let proxy = reqwest::Proxy::all(endpoint.url()).map_err(|e| {
            RotorError::Transport(format!("HTTP client cannot route through {}: {}", endpoint, e))
        })?;

        reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| RotorError::Http(format!("Failed to build client for {}: {}", endpoint, e)))
    }
}

/// `HttpSender` backed by the client cache
pub struct ReqwestSender {
    cache: std::sync::Arc<ClientCache>,
}

impl ReqwestSender {
    pub fn new(cache: std::sync::Arc<ClientCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    #[instrument(skip(self, endpoint, request, headers), fields(endpoint = %endpoint, url = %request.url))]
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &OutboundRequest,
        headers: HeaderMap,
    ) -> Result<RawResponse> {
        let client = self.cache.client_for(endpoint)?;

        let mut builder = client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let response_headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(RawResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}
