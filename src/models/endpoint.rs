use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::{Result, RotorError};

/// Bytes escaped when credentials go back into URL userinfo
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Egress endpoint protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProtocol {
    Http,
    Https,
    Socks4,
    Socks4a,
    Socks5,
    Socks5h,
}

impl EndpointProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointProtocol::Http => "http",
            EndpointProtocol::Https => "https",
            EndpointProtocol::Socks4 => "socks4",
            EndpointProtocol::Socks4a => "socks4a",
            EndpointProtocol::Socks5 => "socks5",
            EndpointProtocol::Socks5h => "socks5h",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(EndpointProtocol::Http),
            "https" => Some(EndpointProtocol::Https),
            "socks4" => Some(EndpointProtocol::Socks4),
            "socks4a" => Some(EndpointProtocol::Socks4a),
            "socks5" => Some(EndpointProtocol::Socks5),
            "socks5h" => Some(EndpointProtocol::Socks5h),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        !self.is_http()
    }

    pub fn is_socks4(&self) -> bool {
        matches!(self, EndpointProtocol::Socks4 | EndpointProtocol::Socks4a)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, EndpointProtocol::Http | EndpointProtocol::Https)
    }

    fn default_port(&self) -> u16 {
        match self {
            EndpointProtocol::Http => 80,
            EndpointProtocol::Https => 443,
            _ => 1080,
        }
    }
}

impl std::fmt::Display for EndpointProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Username/password pair presented to the proxy, stored decoded
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A single egress point (proxy)
///
/// Identity is `address` plus `credentials`: the same host reached with two
/// different accounts counts as two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// `host:port`, IPv6 hosts bracketed
    pub address: String,
    pub host: String,
    pub port: u16,
    pub protocol: EndpointProtocol,
    pub credentials: Option<Credentials>,
}

impl Endpoint {
    /// Parse `protocol://[user:pass@]host:port`
    ///
    /// Also accepts a bare `host:port` (http) and the `host:port:user:pass`
    /// line format used by most proxy vendors.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RotorError::InvalidProxyAddress("empty entry".to_string()));
        }

        if raw.contains("://") {
            return Self::parse_url(raw);
        }

        // Vendor credentials are taken verbatim, they are not URL-escaped
        let parts: Vec<&str> = raw.splitn(4, ':').collect();
        match parts.as_slice() {
            [host, port] => Self::from_parts(host, port, None),
            [host, port, user, pass] if !user.is_empty() => Self::from_parts(
                host,
                port,
                Some(Credentials {
                    username: user.to_string(),
                    password: pass.to_string(),
                }),
            ),
            _ => Err(RotorError::InvalidProxyAddress(format!(
                "unrecognised proxy format: {}",
                redact_vendor(raw)
            ))),
        }
    }

    fn from_parts(host: &str, port: &str, credentials: Option<Credentials>) -> Result<Self> {
        let host = match url::Host::parse(host.trim()) {
            Ok(url::Host::Ipv6(_)) | Err(_) => {
                return Err(RotorError::InvalidProxyAddress(format!(
                    "invalid host '{}'",
                    host
                )))
            }
            Ok(parsed) => parsed.to_string(),
        };
        let port: u16 = port.trim().parse().map_err(|_| {
            RotorError::InvalidProxyAddress(format!("invalid port '{}'", port))
        })?;

        Ok(Endpoint {
            address: format_tcp_addr(&host, port),
            host,
            port,
            protocol: EndpointProtocol::Http,
            credentials,
        })
    }

    fn parse_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)?;

        let protocol = EndpointProtocol::from_str(url.scheme())
            .ok_or_else(|| RotorError::UnsupportedProtocol(url.scheme().to_string()))?;

        let host = url.host_str().ok_or_else(|| {
            RotorError::InvalidProxyAddress(format!("missing host in '{}'", raw))
        })?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .to_string();

        let port = url.port().unwrap_or_else(|| protocol.default_port());

        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(Credentials {
                username: decode_userinfo(url.username())?,
                password: decode_userinfo(url.password().unwrap_or(""))?,
            })
        };

        Ok(Endpoint {
            address: format_tcp_addr(&host, port),
            host,
            port,
            protocol,
            credentials,
        })
    }

    /// Parse a list of raw entries, dropping the ones that do not parse
    pub fn parse_list<S: AsRef<str>>(raw: &[S]) -> Vec<Endpoint> {
        raw.iter()
            .filter_map(|entry| {
                let entry = entry.as_ref();
                match Endpoint::parse(entry) {
                    Ok(endpoint) => Some(endpoint),
                    Err(e) => {
                        warn!("Dropping proxy entry '{}': {}", redact(entry), e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Parse a newline separated list, skipping blank lines and `#` comments
    pub fn parse_lines(content: &str) -> Vec<Endpoint> {
        Self::parse_list(&list_entries(content))
    }

    /// Stable identity used for memoization and de-duplication
    pub fn identity(&self) -> String {
        match &self.credentials {
            Some(c) => format!("{}:{}@{}", c.username, c.password, self.address),
            None => self.address.clone(),
        }
    }

    /// Proxy URL with optional authentication, in the form HTTP clients expect
    pub fn url(&self) -> String {
        let scheme = match self.protocol {
            EndpointProtocol::Http | EndpointProtocol::Https => "http",
            other => other.as_str(),
        };

        match &self.credentials {
            Some(c) => format!(
                "{}://{}:{}@{}",
                scheme,
                utf8_percent_encode(&c.username, USERINFO),
                utf8_percent_encode(&c.password, USERINFO),
                self.address
            ),
            None => format!("{}://{}", scheme, self.address),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.credentials {
            Some(c) => write!(f, "{}://{}@{}", self.protocol, c.username, self.address),
            None => write!(f, "{}://{}", self.protocol, self.address),
        }
    }
}

/// Outcome of validating one endpoint, kept for the lifetime of the process
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRecord {
    pub endpoint: Endpoint,
    pub valid: bool,
    /// IP reported by the echo service through the endpoint, when one answered
    pub observed_ip: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Entries of a newline separated proxy list, without blank lines and `#` comments
pub fn list_entries(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn decode_userinfo(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| RotorError::InvalidProxyAddress("credentials are not valid UTF-8".to_string()))
}

/// `host:port:user:***` for log lines about vendor entries
fn redact_vendor(raw: &str) -> String {
    let mut parts = raw.splitn(4, ':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), Some(user), Some(_)) => format!("{}:{}:{}:***", host, port, user),
        _ => raw.to_string(),
    }
}

/// Strip the password from a raw entry before it reaches the logs
fn redact(raw: &str) -> String {
    match (raw.find("://"), raw.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let userinfo = &raw[scheme_end + 3..at];
            let user = userinfo.split(':').next().unwrap_or("");
            format!("{}{}:***{}", &raw[..scheme_end + 3], user, &raw[at..])
        }
        _ if !raw.contains("://") => redact_vendor(raw),
        _ => raw.to_string(),
    }
}
