//! Outbound request seam of the validation stage

use log::debug;
use std::time::Duration;

use crate::crawl_engine::{ErrorKind, FetchError};

/// A successful (2xx/3xx) response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
}

/// Trait for fetch clients (to allow scripted fetchers in tests)
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue one request; failures are classified into an [`ErrorKind`]
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// `reqwest` backed fetcher issuing plain GET requests
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

/// Seconds form of `Retry-After`; HTTP-date values are ignored
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn classify_transport(err: &reqwest::Error) -> FetchError {
    let kind = transport_kind(err.is_timeout(), err.is_connect(), &source_chain(err));
    FetchError::new(kind, err.to_string())
}

/// Messages of the underlying causes (hyper, rustls, resolver)
///
/// The top-level message names the request URL, whose path or port could
/// match a classification keyword, so it is left out.
fn source_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = Vec::new();
    let mut cause = err.source();
    while let Some(e) = cause {
        parts.push(e.to_string());
        cause = e.source();
    }
    parts.join(": ")
}

fn transport_kind(is_timeout: bool, is_connect: bool, chain: &str) -> ErrorKind {
    if is_timeout {
        return ErrorKind::TransientNetwork;
    }
    match ErrorKind::classify_message(chain) {
        kind @ (ErrorKind::Tls | ErrorKind::Dns) => kind,
        _ if is_connect => ErrorKind::TransientNetwork,
        kind => kind,
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status().as_u16();
        debug!("GET {url} -> {status}");
        if ErrorKind::classify_status(status).is_some() {
            let mut error = FetchError::from_status(status);
            if let Some(hint) = retry_after(response.headers()) {
                error = error.with_retry_after(hint);
            }
            return Err(error);
        }

        Ok(FetchResponse {
            status,
            final_url: response.url().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_retry_after_seconds_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(120)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_transport_kind_from_flags_and_causes() {
        assert_eq!(transport_kind(true, false, ""), ErrorKind::TransientNetwork);
        assert_eq!(
            transport_kind(false, true, "tcp connect error: Connection refused (os error 111)"),
            ErrorKind::TransientNetwork
        );
        // Digits in a connect cause are not a rate-limit status
        assert_eq!(
            transport_kind(false, true, "tcp connect error: 10.0.0.7:4290"),
            ErrorKind::TransientNetwork
        );
        assert_eq!(
            transport_kind(false, true, "invalid peer certificate: Expired"),
            ErrorKind::Tls
        );
        assert_eq!(
            transport_kind(false, true, "dns error: failed to lookup address information"),
            ErrorKind::Dns
        );
        assert_eq!(transport_kind(false, false, "body write aborted"), ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn test_url_text_does_not_drive_classification() {
        let fetcher = HttpFetcher::new("crawlkeeper-test", Duration::from_secs(5)).unwrap();
        // Nothing listens on port 1; the path is full of classifier keywords
        let err = fetcher
            .fetch("http://127.0.0.1:1/news/4290/tls-handshake/dns-lookup")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientNetwork);
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpFetcher::new("crawlkeeper-test", Duration::from_secs(5)).is_ok());
    }
}
