//! Discovery pattern generalization
//!
//! `https://Uconn.edu/news/2024/7f3c9a21-0b6e-4d2f-9a7e-3c1d2b4a5f60?page=3&q=x`
//! becomes `uconn.edu/news/{num}/{uuid}?page={num}&q={param}`. The scheme is
//! dropped so http and https variants share statistics.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::identity::CanonicalUrl;

/// Pattern recorded for inputs that do not parse as URLs
pub const MALFORMED_PATTERN: &str = "{malformed}";

static NUMERIC_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+$").expect("Invalid numeric segment regex"));

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("Invalid uuid segment regex")
});

// Any run of 8 or more alphanumerics, words included
static ID_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{8,}$").expect("Invalid id segment regex"));

fn generalize_segment(segment: &str) -> &str {
    if NUMERIC_SEGMENT.is_match(segment) {
        "{num}"
    } else if UUID_SEGMENT.is_match(segment) {
        "{uuid}"
    } else if ID_SEGMENT.is_match(segment) {
        "{id}"
    } else {
        segment
    }
}

fn generalize_value(value: &str) -> &'static str {
    if NUMERIC_SEGMENT.is_match(value) {
        "{num}"
    } else {
        "{param}"
    }
}

fn generalize_query(query: &str) -> String {
    let mut pairs: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => format!("{key}={}", generalize_value(value)),
            None => pair.to_string(),
        })
        .collect();
    pairs.sort();
    pairs.join("&")
}

/// Generalize an already parsed URL
#[must_use]
pub fn pattern_of(url: &CanonicalUrl) -> String {
    let mut pattern = String::with_capacity(url.as_str().len());
    pattern.push_str(url.host());
    if let Some(port) = url.port() {
        pattern.push(':');
        pattern.push_str(&port.to_string());
    }

    let path = url
        .path()
        .split('/')
        .map(generalize_segment)
        .collect::<Vec<_>>()
        .join("/");
    pattern.push_str(&path);

    if let Some(query) = url.query()
        && !query.is_empty()
    {
        pattern.push('?');
        pattern.push_str(&generalize_query(query));
    }
    pattern
}

/// Generalize a raw URL; unparseable input maps to [`MALFORMED_PATTERN`]
#[must_use]
pub fn generalize(raw: &str) -> String {
    CanonicalUrl::parse(raw).map_or_else(|_| MALFORMED_PATTERN.to_string(), |url| pattern_of(&url))
}
