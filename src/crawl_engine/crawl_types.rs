//! Work items and the failure taxonomy shared by the retry engine, the
//! circuit breaker and the feedback store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Categorizes request failures for retry decisions
///
/// Different failure kinds have different retry characteristics:
/// - Network errors are usually transient → full retry budget
/// - Rate limits recover with a longer backoff
/// - Client errors and malformed URLs are permanent → never retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The URL could not be canonicalized; the candidate is dropped
    MalformedUrl,
    /// Timeout, connection refused/reset, 5xx
    TransientNetwork,
    /// HTTP 429 or an explicit rate-limit signal
    RateLimited,
    /// 4xx other than 429
    PermanentClient,
    /// TLS handshake or certificate failure
    Tls,
    /// Name resolution failure
    Dns,
    /// Unknown/unclassified error
    Unknown,
}

impl ErrorKind {
    /// Stable name used as the `failure_types` key in the feedback file
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedUrl => "malformed_url",
            Self::TransientNetwork => "transient_network",
            Self::RateLimited => "rate_limited",
            Self::PermanentClient => "permanent_client",
            Self::Tls => "tls",
            Self::Dns => "dns",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this kind may ever be retried
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::MalformedUrl | Self::PermanentClient)
    }

    /// Classify an HTTP status code; `None` for statuses that are not failures
    #[must_use]
    pub fn classify_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimited),
            408 => Some(Self::TransientNetwork),
            400..=499 => Some(Self::PermanentClient),
            500..=599 => Some(Self::TransientNetwork),
            _ => None,
        }
    }

    /// Classify an error based on message patterns
    #[must_use]
    pub fn classify_message(message: &str) -> Self {
        let msg = message.to_lowercase();

        // Rate limiting (highest priority check)
        if msg.contains("429") || msg.contains("too many requests") || msg.contains("rate limit") {
            return Self::RateLimited;
        }

        if msg.contains("certificate") || msg.contains("tls") || msg.contains("ssl") ||
           msg.contains("handshake") {
            return Self::Tls;
        }

        if msg.contains("dns") || msg.contains("resolve") || msg.contains("name or service not known") ||
           msg.contains("no such host") || msg.contains("lookup") {
            return Self::Dns;
        }

        if msg.contains("timeout") || msg.contains("timed out") ||
           msg.contains("connection refused") || msg.contains("connection reset") ||
           msg.contains("connection closed") || msg.contains("broken pipe") ||
           msg.contains("network") || msg.contains("unreachable") || msg.contains("eof") {
            return Self::TransientNetwork;
        }

        Self::Unknown
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request attempt as reported by a fetcher
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    /// Server-provided `Retry-After` hint
    pub retry_after: Option<Duration>,
}

impl FetchError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Build from a failing HTTP status; non-failure statuses become `Unknown`
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        let kind = ErrorKind::classify_status(status).unwrap_or(ErrorKind::Unknown);
        Self {
            kind,
            message: format!("HTTP {status}"),
            status: Some(status),
            retry_after: None,
        }
    }

    /// Classify a free-form error message
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::classify_message(&message), message)
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// One unit of validation work
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Position in the stage input; the checkpoint resume key
    pub index: u64,
    pub url: String,
    /// Lower-cased host, the circuit breaker key
    pub domain: String,
    /// Discovery technique that produced the URL
    pub source: String,
    pub confidence: f64,
    /// Retries already issued; survives parking behind an open circuit
    pub retries: u32,
    /// Failure that scheduled the next (not yet issued) retry
    pub last_error: Option<FetchError>,
}

impl WorkItem {
    #[must_use]
    pub fn new(
        index: u64,
        url: impl Into<String>,
        domain: impl Into<String>,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            index,
            url: url.into(),
            domain: domain.into(),
            source: source.into(),
            confidence,
            retries: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(ErrorKind::classify_status(200), None);
        assert_eq!(ErrorKind::classify_status(301), None);
        assert_eq!(ErrorKind::classify_status(404), Some(ErrorKind::PermanentClient));
        assert_eq!(ErrorKind::classify_status(429), Some(ErrorKind::RateLimited));
        assert_eq!(ErrorKind::classify_status(408), Some(ErrorKind::TransientNetwork));
        assert_eq!(ErrorKind::classify_status(503), Some(ErrorKind::TransientNetwork));
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(ErrorKind::classify_message("Too Many Requests"), ErrorKind::RateLimited);
        assert_eq!(
            ErrorKind::classify_message("invalid peer certificate: UnknownIssuer"),
            ErrorKind::Tls
        );
        assert_eq!(
            ErrorKind::classify_message("failed to lookup address information"),
            ErrorKind::Dns
        );
        assert_eq!(ErrorKind::classify_message("operation timed out"), ErrorKind::TransientNetwork);
        assert_eq!(ErrorKind::classify_message("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(!ErrorKind::MalformedUrl.is_retryable());
        assert!(!ErrorKind::PermanentClient.is_retryable());
        assert!(ErrorKind::TransientNetwork.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Tls.is_retryable());
        assert!(ErrorKind::Dns.is_retryable());
        assert!(ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::TransientNetwork).unwrap(),
            "\"transient_network\""
        );
    }
}
