//! Rotor - Resilient Outbound Requests
//!
//! An outbound-request layer that spreads traffic over a pool of proxies.
//!
//! ## Features
//!
//! - Cooldown-based endpoint rotation with least-recently-used fallback
//! - HTTP, HTTPS, SOCKS4, SOCKS4a and SOCKS5 proxy support
//! - Endpoint validation against IP-echo services, memoized per endpoint
//! - Consistent synthetic client headers per session
//! - Bounded retries with endpoint rotation, humanized delays and backoff

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod request;

pub use config::Config;
pub use error::{Result, RotorError};
pub use models::{AuthToken, Endpoint, EndpointProtocol, Session, ValidationRecord};
pub use proxy::{ClientCache, NetworkProber, ProxyPool, ProxyValidator, ReqwestSender};
pub use request::{
    OutboundRequest, RawResponse, RetryingRequestExecutor, SessionHeaderFactory, StatusPolicy,
    TokenHandle,
};
