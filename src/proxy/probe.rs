//! Network-backed probe execution
//!
//! `Json` probes go through the cached reqwest clients. `Tunnel` probes write
//! a raw HTTP/1.1 request over a connection opened by `ProxyTransport`, which
//! also exercises endpoints the HTTP client cannot route through.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{ACCEPT, HOST, PROXY_AUTHORIZATION, USER_AGENT};
use hyper::{Request, Uri};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, RotorError};
use crate::models::Endpoint;
use crate::proxy::client::ClientCache;
use crate::proxy::transport::ProxyTransport;
use crate::proxy::validator::{ProbeResponse, ProbeStrategy, Prober};

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// `Prober` that talks to the real echo services
pub struct NetworkProber {
    clients: Arc<ClientCache>,
}

impl NetworkProber {
    pub fn new(clients: Arc<ClientCache>) -> Self {
        Self { clients }
    }

    async fn fetch_json(&self, url: &str, via: Option<&Endpoint>) -> Result<ProbeResponse> {
        let client = self.clients.resolve(via)?;
        let response = client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, PROBE_USER_AGENT)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(ProbeResponse { status, body })
    }

    async fn fetch_tunnel(&self, url: &str, via: Option<&Endpoint>) -> Result<ProbeResponse> {
        let uri: Uri = url
            .parse()
            .map_err(|e| RotorError::InvalidConfig(format!("bad probe url '{}': {}", url, e)))?;
        let (host, port) = ProxyTransport::parse_target(&uri)?;
        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| host.clone());

        // HTTP proxies take the absolute URI; tunnels and direct sockets take origin-form
        let (stream, target, proxy_auth) = match via {
            None => {
                let stream = TcpStream::connect((host.as_str(), port)).await?;
                (stream, origin_form(&uri), None)
            }
            Some(endpoint) if endpoint.protocol.is_http() => {
                let stream = ProxyTransport::dial(endpoint).await?;
                (
                    stream,
                    uri.to_string(),
                    ProxyTransport::proxy_authorization(endpoint),
                )
            }
            Some(endpoint) => {
                let stream = ProxyTransport::connect(endpoint, &host, port).await?;
                (stream, origin_form(&uri), None)
            }
        };

        let mut builder = Request::builder()
            .method("GET")
            .uri(target)
            .header(HOST, authority)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, PROBE_USER_AGENT);
        if let Some(value) = proxy_auth {
            builder = builder.header(PROXY_AUTHORIZATION, value);
        }
        let request = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| RotorError::Http(format!("Failed to build probe request: {}", e)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Probe connection ended: {}", e);
            }
        });

        let response = sender.send_request(request).await?;
        let status = response.status().as_u16();
        let body = response.into_body().collect().await?.to_bytes();

        Ok(ProbeResponse { status, body })
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn fetch(
        &self,
        strategy: &ProbeStrategy,
        via: Option<&Endpoint>,
    ) -> Result<ProbeResponse> {
        match strategy {
            ProbeStrategy::Json { url } => self.fetch_json(url, via).await,
            ProbeStrategy::Tunnel { url } => self.fetch_tunnel(url, via).await,
        }
    }
}

fn origin_form(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}
