//! URL identity: canonical form, content hash and the dedup index.

pub mod canonical;
pub mod dedup;

pub use canonical::{CONTENT_HASH_LEN, CanonicalUrl, UrlError, canonicalize, extract_domain};
pub use dedup::DedupIndex;
