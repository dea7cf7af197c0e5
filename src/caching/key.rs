//! Cache key derivation.
//!
//! A key is the hex SHA-256 digest of `"METHOD path?query"`. A fixed-width
//! digest keeps keys bounded for arbitrarily long query strings and avoids
//! leaking the original request into the key itself; determinism is what
//! the read-through cache actually relies on.

use sha2::{Digest, Sha256};

/// Derive the cache key for a request identity.
///
/// Pure function: identical `(method, path, query)` triples always produce
/// the identical key.
pub fn cache_key(method: &str, path: &str, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b" ");
    hasher.update(path.as_bytes());
    hasher.update(b"?");
    hasher.update(query.as_bytes());
    hex::encode(hasher.finalize())
}
