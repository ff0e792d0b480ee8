//! Egress endpoint management
//!
//! This module provides:
//! - Raw proxy tunnels over HTTP CONNECT and SOCKS
//! - Cached HTTP clients per endpoint
//! - Endpoint validation against IP-echo services
//! - The cooldown-based endpoint pool

pub mod client;
pub mod pool;
pub mod probe;
pub mod transport;
pub mod validator;

pub use client::{ClientCache, ReqwestSender};
pub use pool::{ProxyPool, SlotSnapshot};
pub use probe::NetworkProber;
pub use transport::ProxyTransport;
pub use validator::{ProbeResponse, ProbeStrategy, Prober, ProxyValidator};
