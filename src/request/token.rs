//! Single-producer handle for a value that becomes ready later
//!
//! A login flow produces the auth token once; any number of operations await
//! the same handle. If the producer fails or goes away without producing, every
//! waiter gets `TokenUnavailable` instead of waiting forever.

use std::future::Future;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, RotorError};
use crate::models::AuthToken;

type Outcome = std::result::Result<AuthToken, String>;

/// Write side: resolves the token exactly once
pub struct TokenProducer {
    tx: oneshot::Sender<Outcome>,
}

/// Read side: cheap to clone, every clone observes the same outcome
#[derive(Clone)]
pub struct TokenHandle {
    inner: Shared<BoxFuture<'static, Outcome>>,
}

/// Create a connected producer/handle pair
pub fn channel() -> (TokenProducer, TokenHandle) {
    let (tx, rx) = oneshot::channel::<Outcome>();
    let inner = rx
        .map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err("producer dropped before resolving".to_string()),
        })
        .boxed()
        .shared();

    (TokenProducer { tx }, TokenHandle { inner })
}

impl TokenProducer {
    pub fn fulfill(self, token: AuthToken) {
        debug!("Auth token ready");
        let _ = self.tx.send(Ok(token));
    }

    pub fn fail(self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Auth token production failed: {}", reason);
        let _ = self.tx.send(Err(reason));
    }
}

impl TokenHandle {
    /// Handle whose token is produced by `producer` on a spawned task
    pub fn spawn<F>(producer: F) -> Self
    where
        F: Future<Output = Result<AuthToken>> + Send + 'static,
    {
        let (tx, handle) = channel();
        tokio::spawn(async move {
            match producer.await {
                Ok(token) => tx.fulfill(token),
                Err(e) => tx.fail(e.to_string()),
            }
        });
        handle
    }

    /// Handle that is already resolved
    pub fn ready(token: AuthToken) -> Self {
        let (tx, handle) = channel();
        tx.fulfill(token);
        handle
    }

    /// Wait until the token is produced
    pub async fn wait(&self) -> Result<AuthToken> {
        self.inner
            .clone()
            .await
            .map_err(RotorError::TokenUnavailable)
    }

    /// Wait at most `limit` for the token
    pub async fn wait_timeout(&self, limit: Duration) -> Result<AuthToken> {
        match tokio::time::timeout(limit, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(RotorError::TokenUnavailable(format!(
                "not ready after {:?}",
                limit
            ))),
        }
    }

    /// Outcome if already resolved, without waiting
    pub fn peek(&self) -> Option<Result<AuthToken>> {
        self.inner
            .clone()
            .now_or_never()
            .map(|outcome| outcome.map_err(RotorError::TokenUnavailable))
    }
}
