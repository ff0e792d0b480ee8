use thiserror::Error;

/// Unified error type for the Rotor outbound-request layer
#[derive(Error, Debug)]
pub enum RotorError {
    // Pool errors
    #[error("No proxies available")]
    ProxyUnavailable,

    #[error("Proxy rejected the request with status {status}")]
    ProxyAuthFailure { status: u16 },

    #[error("Proxy failed every validation probe: {endpoint}")]
    ValidationFailure { endpoint: String },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    // Terminal
    #[error("Gave up after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<RotorError>,
    },

    // Request building
    #[error("Invalid header value for {name}")]
    InvalidHeader { name: &'static str },

    #[error("Auth token unavailable: {0}")]
    TokenUnavailable(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for Rotor operations
pub type Result<T> = std::result::Result<T, RotorError>;

impl RotorError {
    /// Whether the executor may try again (on a different endpoint) after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RotorError::ProxyUnavailable
                | RotorError::ProxyAuthFailure { .. }
                | RotorError::Transport(_)
                | RotorError::Timeout
                | RotorError::InvalidResponse(_)
                | RotorError::Http(_)
                | RotorError::Io(_)
        )
    }

    /// Whether the error was caused by the proxy itself rather than the target
    pub fn is_proxy_failure(&self) -> bool {
        matches!(
            self,
            RotorError::ProxyAuthFailure { .. }
                | RotorError::ProxyUnavailable
                | RotorError::ValidationFailure { .. }
        )
    }

    /// Status code carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            RotorError::ProxyAuthFailure { status } | RotorError::UpstreamStatus { status, .. } => {
                Some(*status)
            }
            RotorError::ExhaustedRetries { source, .. } => source.status(),
            _ => None,
        }
    }
}

impl From<hyper::Error> for RotorError {
    fn from(err: hyper::Error) -> Self {
        RotorError::Http(err.to_string())
    }
}

impl From<reqwest::Error> for RotorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RotorError::Timeout
        } else if err.is_decode() {
            RotorError::InvalidResponse(err.to_string())
        } else {
            RotorError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for RotorError {
    fn from(err: url::ParseError) -> Self {
        RotorError::InvalidProxyAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retry_classification() {
        assert!(RotorError::ProxyAuthFailure { status: 407 }.is_retryable());
        assert!(RotorError::ProxyAuthFailure { status: 402 }.is_retryable());
        assert!(RotorError::Transport("reset".to_string()).is_retryable());
        assert!(RotorError::Timeout.is_retryable());
        assert!(RotorError::ProxyUnavailable.is_retryable());

        assert!(!RotorError::UpstreamStatus {
            status: 500,
            body: String::new()
        }
        .is_retryable());
        assert!(!RotorError::InvalidConfig("bad".to_string()).is_retryable());
        assert!(!RotorError::ExhaustedRetries {
            attempts: 3,
            source: Box::new(RotorError::Timeout)
        }
        .is_retryable());
    }

    #[test]
    fn test_error_proxy_failure_helper() {
        assert!(RotorError::ProxyAuthFailure { status: 407 }.is_proxy_failure());
        assert!(RotorError::ProxyUnavailable.is_proxy_failure());
        assert!(!RotorError::Timeout.is_proxy_failure());
    }

    #[test]
    fn test_error_status_passthrough() {
        let err = RotorError::ExhaustedRetries {
            attempts: 3,
            source: Box::new(RotorError::ProxyAuthFailure { status: 407 }),
        };
        assert_eq!(err.status(), Some(407));
        assert_eq!(RotorError::Timeout.status(), None);
        assert_eq!(
            RotorError::UpstreamStatus {
                status: 503,
                body: "down".to_string()
            }
            .status(),
            Some(503)
        );
    }

    #[test]
    fn test_exhausted_retries_message_carries_last_error() {
        let err = RotorError::ExhaustedRetries {
            attempts: 5,
            source: Box::new(RotorError::Transport("connection reset".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("5 attempts"));
        assert!(msg.contains("connection reset"));
    }
}
