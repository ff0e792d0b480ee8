//! Retrying request executor
//!
//! One logical operation runs as a bounded loop:
//! select endpoint, send, classify, then finish, retry on a fresh endpoint, or fail.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};

use crate::config::ExecutorConfig;
use crate::error::{Result, RotorError};
use crate::models::Endpoint;
use crate::proxy::pool::ProxyPool;
use crate::request::delay;
use crate::request::headers::SessionHeaderFactory;
use crate::request::token::TokenHandle;
use crate::request::{HttpSender, OutboundRequest, RawResponse};

/// What to do with a non-success status other than 402/407
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Every such status is retried on another endpoint
    #[default]
    Retry,
    /// Every such status ends the operation
    FailFast,
    /// Only the listed statuses are retried, the rest end the operation
    RetryOn(Vec<u16>),
}

impl StatusPolicy {
    pub fn retries(&self, status: u16) -> bool {
        match self {
            StatusPolicy::Retry => true,
            StatusPolicy::FailFast => false,
            StatusPolicy::RetryOn(statuses) => statuses.contains(&status),
        }
    }
}

enum Failure {
    Retryable(RotorError),
    Fatal(RotorError),
}

/// Runs outbound operations over the endpoint pool
pub struct RetryingRequestExecutor {
    pool: Arc<ProxyPool>,
    headers: Arc<SessionHeaderFactory>,
    sender: Arc<dyn HttpSender>,
    config: ExecutorConfig,
}

impl RetryingRequestExecutor {
    pub fn new(
        pool: Arc<ProxyPool>,
        headers: Arc<SessionHeaderFactory>,
        sender: Arc<dyn HttpSender>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            pool,
            headers,
            sender,
            config,
        }
    }

    /// Run `request` and decode the 2xx body as JSON
    ///
    /// A 2xx whose body does not decode counts as a failed attempt.
    #[instrument(skip(self, request, policy), fields(method = %request.method, url = %request.url, session = %request.session_id))]
    pub async fn execute_json<T>(&self, request: &OutboundRequest, policy: StatusPolicy) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        self.run(request, &policy, |response| {
            serde_json::from_slice(&response.body).map_err(|e| {
                RotorError::InvalidResponse(format!(
                    "undecodable body ({}): {}",
                    e,
                    response.body_excerpt()
                ))
            })
        })
        .await
    }

    /// Run `request` and return the 2xx response as received
    #[instrument(skip(self, request, policy), fields(method = %request.method, url = %request.url, session = %request.session_id))]
    pub async fn execute(
        &self,
        request: &OutboundRequest,
        policy: StatusPolicy,
    ) -> Result<RawResponse> {
        self.run(request, &policy, |response| Ok(response.clone())).await
    }

    /// Wait for the auth token, then run `request` with it attached
    pub async fn execute_authorized<T>(
        &self,
        request: &OutboundRequest,
        token: &TokenHandle,
        policy: StatusPolicy,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        let auth = token.wait().await?;
        let request = request.clone().with_auth(auth);
        self.execute_json(&request, policy).await
    }

    async fn run<T, F>(&self, request: &OutboundRequest, policy: &StatusPolicy, decode: F) -> Result<T>
    where
        F: Fn(&RawResponse) -> Result<T> + Send + Sync,
        T: Send,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        let mut reached_endpoint = false;

        for attempt in 1..=max_attempts {
            let Some(endpoint) = self.pool.acquire() else {
                warn!("No proxy available (attempt {}/{})", attempt, max_attempts);
                last_error = Some(RotorError::ProxyUnavailable);
                if attempt < max_attempts {
                    tokio::time::sleep(self.config.empty_pool_wait.sample()).await;
                }
                continue;
            };
            reached_endpoint = true;

            debug!("Attempt {}/{} via {}", attempt, max_attempts, endpoint);

            match self.attempt(&endpoint, request, policy, &decode).await {
                Ok(value) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(value);
                }
                Err(Failure::Fatal(e)) => {
                    error!("Request failed via {}: {}", endpoint, e);
                    return Err(e);
                }
                Err(Failure::Retryable(e)) => {
                    warn!(
                        "Attempt {}/{} via {} failed: {}",
                        attempt, max_attempts, endpoint, e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                let pause = delay::backoff(self.config.backoff, attempt, self.config.backoff_cap);
                debug!("Backing off for {:?}", pause);
                tokio::time::sleep(pause).await;
            }
        }

        if !reached_endpoint {
            error!("Proxy pool was empty on all {} attempts", max_attempts);
            return Err(RotorError::ProxyUnavailable);
        }

        let source = last_error.unwrap_or(RotorError::ProxyUnavailable);
        error!("Giving up after {} attempts: {}", max_attempts, source);
        Err(RotorError::ExhaustedRetries {
            attempts: max_attempts,
            source: Box::new(source),
        })
    }

    async fn attempt<T, F>(
        &self,
        endpoint: &Endpoint,
        request: &OutboundRequest,
        policy: &StatusPolicy,
        decode: &F,
    ) -> std::result::Result<T, Failure>
    where
        F: Fn(&RawResponse) -> Result<T> + Send + Sync,
    {
        let headers = self
            .headers
            .headers_for(&request.session_id, request.auth.as_ref())
            .map_err(Failure::Fatal)?;

        tokio::time::sleep(delay::humanized(
            self.config.humanized_delay,
            self.config.jitter,
        ))
        .await;

        let response = match tokio::time::timeout(
            self.config.request_timeout,
            self.sender.send(endpoint, request, headers),
        )
        .await
        {
            Err(_) => return Err(Failure::Retryable(RotorError::Timeout)),
            Ok(Err(e)) if e.is_retryable() => return Err(Failure::Retryable(e)),
            Ok(Err(e)) => return Err(Failure::Fatal(e)),
            Ok(Ok(response)) => response,
        };

        match response.status {
            200..=299 => decode(&response).map_err(Failure::Retryable),
            status @ (402 | 407) => Err(Failure::Retryable(RotorError::ProxyAuthFailure { status })),
            status => {
                let err = RotorError::UpstreamStatus {
                    status,
                    body: response.body_excerpt(),
                };
                if policy.retries(status) {
                    Err(Failure::Retryable(err))
                } else {
                    Err(Failure::Fatal(err))
                }
            }
        }
    }
}
