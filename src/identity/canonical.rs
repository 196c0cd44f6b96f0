//! URL canonicalization and content hashing.
//!
//! The canonical string is what we compare and display. The content hash is
//! the record key: it is computed over a fully case-folded form that keeps the
//! fragment, so `/Page` and `/page` collide while `/p#a` and `/p#b` do not.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Length of a content hash in hex characters (160-bit SHA-1)
pub const CONTENT_HASH_LEN: usize = 40;

/// Errors raised by the identity layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// The input has no resolvable scheme and host
    #[error("Malformed URL '{url}': {reason}")]
    Malformed { url: String, reason: String },
}

impl UrlError {
    fn malformed(url: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// An immutable, canonicalized URL together with its content hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalUrl {
    scheme: String,
    /// Lower-cased host, without port
    host: String,
    /// Non-default port, if any
    port: Option<u16>,
    userinfo: Option<String>,
    path: String,
    query: Option<String>,
    /// Fragment of the raw URL; never part of `canonical`
    fragment: Option<String>,
    canonical: String,
    content_hash: String,
}

impl CanonicalUrl {
    /// Canonicalize a raw URL
    ///
    /// # Errors
    ///
    /// Returns [`UrlError::Malformed`] when no scheme or host can be found, or
    /// the port is not a number.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let raw_trimmed = raw.trim();
        let parts = split_url(raw_trimmed)?;

        let scheme = parts.scheme.to_ascii_lowercase();
        let host = parts.host.to_lowercase();
        let port = match parts.port {
            Some(p) if Some(p) == default_port(&scheme) => None,
            other => other,
        };
        let path = remove_dot_segments(parts.path);
        let query = parts.query.and_then(sort_query);
        let fragment = parts.fragment.filter(|f| !f.is_empty()).map(str::to_string);
        let userinfo = parts.userinfo.map(str::to_string);

        let canonical = assemble(
            &scheme,
            userinfo.as_deref(),
            &host,
            port,
            &path,
            query.as_deref(),
        );
        let content_hash = content_hash_of(
            &scheme,
            userinfo.as_deref(),
            &host,
            port,
            &path,
            parts.query,
            fragment.as_deref(),
        );

        Ok(Self {
            scheme,
            host,
            port,
            userinfo,
            path,
            query,
            fragment,
            canonical,
            content_hash,
        })
    }

    /// The canonical string (no fragment)
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// 40-character lowercase hex digest identifying this URL
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Lower-cased host without port; the circuit breaker's domain key
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Consume into `(canonical_string, content_hash)`
    #[must_use]
    pub fn into_parts(self) -> (String, String) {
        (self.canonical, self.content_hash)
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl std::str::FromStr for CanonicalUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonicalize `raw` into `(canonical_string, content_hash)`
///
/// # Errors
///
/// Returns [`UrlError::Malformed`] when the input has no resolvable scheme
/// and host.
pub fn canonicalize(raw: &str) -> Result<(String, String), UrlError> {
    CanonicalUrl::parse(raw).map(CanonicalUrl::into_parts)
}

/// Host of a URL, lower-cased, as used for per-domain state
///
/// # Errors
///
/// Returns [`UrlError::Malformed`] like [`canonicalize`].
pub fn extract_domain(raw: &str) -> Result<String, UrlError> {
    let parts = split_url(raw.trim())?;
    Ok(parts.host.to_lowercase())
}

struct UrlParts<'a> {
    scheme: &'a str,
    userinfo: Option<&'a str>,
    host: &'a str,
    port: Option<u16>,
    path: &'a str,
    query: Option<&'a str>,
    fragment: Option<&'a str>,
}

fn split_url(raw: &str) -> Result<UrlParts<'_>, UrlError> {
    if raw.is_empty() {
        return Err(UrlError::malformed(raw, "empty input"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(UrlError::malformed(raw, "contains whitespace"));
    }

    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| UrlError::malformed(raw, "missing scheme"))?;
    if !is_valid_scheme(scheme) {
        return Err(UrlError::malformed(raw, "invalid scheme"));
    }

    let (before_fragment, fragment) = match rest.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (rest, None),
    };
    let (before_query, query) = match before_fragment.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (before_fragment, None),
    };
    let (authority, path) = match before_query.find('/') {
        Some(idx) => before_query.split_at(idx),
        None => (before_query, ""),
    };

    let (userinfo, host_port) = match authority.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, authority),
    };
    let (host, port) = split_host_port(raw, host_port)?;
    if host.is_empty() {
        return Err(UrlError::malformed(raw, "missing host"));
    }

    Ok(UrlParts {
        scheme,
        userinfo,
        host,
        port,
        path,
        query,
        fragment,
    })
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn split_host_port<'a>(raw: &str, host_port: &'a str) -> Result<(&'a str, Option<u16>), UrlError> {
    // IPv6 literal: the port separator is after the closing bracket
    let port_sep = if host_port.starts_with('[') {
        let close = host_port
            .find(']')
            .ok_or_else(|| UrlError::malformed(raw, "unterminated IPv6 literal"))?;
        host_port[close..].find(':').map(|i| close + i)
    } else {
        host_port.rfind(':')
    };

    match port_sep {
        None => Ok((host_port, None)),
        Some(idx) => {
            let (host, port) = (&host_port[..idx], &host_port[idx + 1..]);
            if port.is_empty() {
                return Ok((host, None));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| UrlError::malformed(raw, format!("invalid port '{port}'")))?;
            Ok((host, Some(port)))
        }
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

/// RFC 3986 §5.2.4 dot-segment removal
///
/// Keeps an explicit trailing slash and leaves an empty path empty.
fn remove_dot_segments(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let mut output: Vec<&str> = Vec::new();
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    let last = segments.len().saturating_sub(1);
    let mut trailing_slash = false;

    for (i, segment) in segments.iter().enumerate() {
        match *segment {
            "." => trailing_slash = i == last,
            ".." => {
                output.pop();
                trailing_slash = i == last;
            }
            s => {
                output.push(s);
                trailing_slash = false;
            }
        }
    }

    let mut result = String::with_capacity(path.len());
    for segment in &output {
        result.push('/');
        result.push_str(segment);
    }
    if trailing_slash || result.is_empty() {
        result.push('/');
    }
    result
}

/// Stable lexicographic sort of query parameters by key; values untouched
fn sort_query(query: &str) -> Option<String> {
    let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    if params.is_empty() {
        return None;
    }
    params.sort_by_key(|p| query_key(p));
    Some(params.join("&"))
}

/// Case-folded query with parameters fully sorted, for hashing only
///
/// Sorting whole parameters makes the result independent of input order even
/// when keys differ only in case.
fn fold_query(query: &str) -> Option<String> {
    let folded = query.to_lowercase();
    let mut params: Vec<&str> = folded.split('&').filter(|p| !p.is_empty()).collect();
    if params.is_empty() {
        return None;
    }
    params.sort_unstable();
    Some(params.join("&"))
}

fn query_key(param: &str) -> &str {
    param.split_once('=').map_or(param, |(k, _)| k)
}

fn assemble(
    scheme: &str,
    userinfo: Option<&str>,
    host: &str,
    port: Option<u16>,
    path: &str,
    query: Option<&str>,
) -> String {
    let mut out = String::with_capacity(scheme.len() + host.len() + path.len() + 16);
    out.push_str(scheme);
    out.push_str("://");
    if let Some(userinfo) = userinfo {
        out.push_str(userinfo);
        out.push('@');
    }
    out.push_str(host);
    if let Some(port) = port {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(path);
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    out
}

fn content_hash_of(
    scheme: &str,
    userinfo: Option<&str>,
    host: &str,
    port: Option<u16>,
    path: &str,
    raw_query: Option<&str>,
    fragment: Option<&str>,
) -> String {
    let folded_query = raw_query.and_then(fold_query);
    let folded_userinfo = userinfo.map(str::to_lowercase);
    let mut repr = assemble(
        scheme,
        folded_userinfo.as_deref(),
        host,
        port,
        &path.to_lowercase(),
        folded_query.as_deref(),
    );
    if let Some(fragment) = fragment {
        repr.push('#');
        repr.push_str(&fragment.to_lowercase());
    }

    let mut hasher = Sha1::new();
    hasher.update(repr.as_bytes());
    hex::encode(hasher.finalize())
}
