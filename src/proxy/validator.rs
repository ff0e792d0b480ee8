//! Endpoint validation against external IP-echo services
//!
//! An endpoint is usable when a probe sent through it reaches an echo service
//! and the IP the service reports is not the host's own. Results are kept for
//! the lifetime of the process.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ValidatorConfig;
use crate::error::{Result, RotorError};
use crate::models::{Endpoint, ValidationRecord};

/// Fields echo services use for the caller's address
const IP_FIELDS: &[&str] = &["ip", "origin", "query", "address"];

const TUNNEL_PREFIX: &str = "tunnel+";

/// One way of asking an echo service for the caller's IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// Raw HTTP/1.1 exchange over a tunnel opened by the transport layer.
    /// Plain `http` targets only.
    Tunnel { url: String },
    /// JSON request through the regular HTTP client, `http` or `https`
    Json { url: String },
}

impl ProbeStrategy {
    /// Built-in chain: a raw tunnel probe first, then client probes against
    /// three independent echo services
    pub fn default_chain() -> Vec<Self> {
        vec![
            ProbeStrategy::Tunnel {
                url: "http://api.ipify.org/?format=json".to_string(),
            },
            ProbeStrategy::Json {
                url: "https://api.ipify.org?format=json".to_string(),
            },
            ProbeStrategy::Json {
                url: "https://httpbin.org/ip".to_string(),
            },
            ProbeStrategy::Json {
                url: "http://ip-api.com/json".to_string(),
            },
        ]
    }

    /// Parse `[tunnel+]<url>`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (tunnel, url) = match raw.strip_prefix(TUNNEL_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let parsed = Url::parse(url)
            .map_err(|e| RotorError::InvalidConfig(format!("bad probe url '{}': {}", url, e)))?;
        if parsed.host_str().is_none() {
            return Err(RotorError::InvalidConfig(format!(
                "probe url '{}' has no host",
                url
            )));
        }

        match (tunnel, parsed.scheme()) {
            (true, "http") => Ok(ProbeStrategy::Tunnel {
                url: url.to_string(),
            }),
            (true, scheme) => Err(RotorError::InvalidConfig(format!(
                "tunnel probes speak plain http, got {}",
                scheme
            ))),
            (false, "http" | "https") => Ok(ProbeStrategy::Json {
                url: url.to_string(),
            }),
            (false, scheme) => Err(RotorError::UnsupportedProtocol(scheme.to_string())),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ProbeStrategy::Tunnel { url } | ProbeStrategy::Json { url } => url,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProbeStrategy::Tunnel { .. } => "tunnel",
            ProbeStrategy::Json { .. } => "json",
        }
    }
}

/// Status and body of one probe exchange
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Performs one probe request, through `via` or directly when `None`
#[async_trait]
pub trait Prober: Send + Sync {
    async fn fetch(&self, strategy: &ProbeStrategy, via: Option<&Endpoint>)
        -> Result<ProbeResponse>;
}

/// Memoizing endpoint validator
pub struct ProxyValidator {
    prober: Arc<dyn Prober>,
    config: ValidatorConfig,
    records: DashMap<String, Arc<OnceCell<ValidationRecord>>>,
    direct_ip: OnceCell<Option<String>>,
}

impl ProxyValidator {
    pub fn new(config: ValidatorConfig, prober: Arc<dyn Prober>) -> Self {
        Self {
            prober,
            config,
            records: DashMap::new(),
            direct_ip: OnceCell::new(),
        }
    }

    /// Whether `endpoint` routes traffic through a different IP
    ///
    /// Probes at most once per endpoint identity, also when called
    /// concurrently; later calls return the stored outcome.
    pub async fn validate(&self, endpoint: &Endpoint) -> bool {
        self.record(endpoint).await.valid
    }

    /// Full validation record for `endpoint`, probing on first use
    pub async fn record(&self, endpoint: &Endpoint) -> ValidationRecord {
        let cell = self
            .records
            .entry(endpoint.identity())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        cell.get_or_init(|| self.probe_endpoint(endpoint))
            .await
            .clone()
    }

    /// Stored record, without probing
    pub fn cached(&self, endpoint: &Endpoint) -> Option<ValidationRecord> {
        self.records
            .get(&endpoint.identity())
            .and_then(|cell| cell.get().cloned())
    }

    /// Keep the endpoints that pass validation, in input order
    ///
    /// Validates `batch_size` endpoints concurrently and pauses between batches.
    #[instrument(skip(self, endpoints), fields(total = endpoints.len()))]
    pub async fn filter_valid(&self, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        let total = endpoints.len();
        let batch_size = self.config.batch_size.max(1);
        let mut valid = Vec::with_capacity(total);

        info!("Validating {} proxies in batches of {}", total, batch_size);

        for (index, batch) in endpoints.chunks(batch_size).enumerate() {
            if index > 0 && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }

            let outcomes = join_all(batch.iter().map(|endpoint| self.validate(endpoint))).await;
            valid.extend(
                batch
                    .iter()
                    .zip(outcomes)
                    .filter(|(_, ok)| *ok)
                    .map(|(endpoint, _)| endpoint.clone()),
            );

            debug!("Batch {} done, {} valid so far", index + 1, valid.len());
        }

        info!("Found {} valid proxies out of {}", valid.len(), total);
        valid
    }

    /// Host's own IP as seen by the echo services, looked up once
    pub async fn direct_ip(&self) -> Option<String> {
        self.direct_ip
            .get_or_init(|| async {
                for strategy in &self.config.strategies {
                    match self.run_strategy(strategy, None).await {
                        Ok(ip) => {
                            info!("Direct IP is {}", ip);
                            return Some(ip);
                        }
                        Err(e) => debug!("Direct IP lookup via {} failed: {}", strategy.url(), e),
                    }
                }
                warn!("Could not determine direct IP; any echoed IP will count as proxied");
                None
            })
            .await
            .clone()
    }

    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint))]
    async fn probe_endpoint(&self, endpoint: &Endpoint) -> ValidationRecord {
        let direct_ip = self.direct_ip().await;
        let mut observed_ip = None;

        for strategy in &self.config.strategies {
            match self.run_strategy(strategy, Some(endpoint)).await {
                Ok(ip) if direct_ip.as_deref() == Some(ip.as_str()) => {
                    debug!("{} probe echoed the direct IP {}", strategy.name(), ip);
                    observed_ip = Some(ip);
                }
                Ok(ip) => {
                    info!("Proxy {} valid via {} probe (IP: {})", endpoint, strategy.name(), ip);
                    return ValidationRecord {
                        endpoint: endpoint.clone(),
                        valid: true,
                        observed_ip: Some(ip),
                        checked_at: chrono::Utc::now(),
                    };
                }
                Err(e) => {
                    debug!("{} probe via {} failed: {}", strategy.name(), strategy.url(), e);
                }
            }
        }

        warn!(
            "{}",
            RotorError::ValidationFailure {
                endpoint: endpoint.to_string()
            }
        );
        ValidationRecord {
            endpoint: endpoint.clone(),
            valid: false,
            observed_ip,
            checked_at: chrono::Utc::now(),
        }
    }

    /// Run one strategy and return the echoed IP
    async fn run_strategy(
        &self,
        strategy: &ProbeStrategy,
        via: Option<&Endpoint>,
    ) -> Result<String> {
        let response = tokio::time::timeout(
            self.config.probe_timeout,
            self.prober.fetch(strategy, via),
        )
        .await
        .map_err(|_| RotorError::Timeout)??;

        match response.status {
            402 | 407 => Err(RotorError::ProxyAuthFailure {
                status: response.status,
            }),
            200..=299 => extract_ip(&response.body),
            status => Err(RotorError::UpstreamStatus {
                status,
                body: String::from_utf8_lossy(&response.body).chars().take(200).collect(),
            }),
        }
    }
}

/// First IP-like field of a JSON echo body
///
/// `origin` may carry a forwarding chain (`"a, b"`); the first hop is the caller.
fn extract_ip(body: &[u8]) -> Result<String> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| RotorError::InvalidResponse(format!("echo body is not JSON: {}", e)))?;

    IP_FIELDS
        .iter()
        .filter_map(|field| value.get(*field).and_then(Value::as_str))
        .filter_map(|raw| raw.split(',').next().map(str::trim))
        .find(|ip| !ip.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RotorError::InvalidResponse("echo body has no IP field".to_string()))
}
