//! Request fingerprints used as cache keys.

use sha2::{Digest, Sha256};

use crate::http::HttpRequest;

/// Canonicalize a URL for fingerprinting.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Lowercase scheme and host (done by the URL parser)
/// 3. Remove fragment (#...)
/// 4. Sort query pairs by key, then value
///
/// Unparseable input is returned trimmed so that fingerprinting stays total.
pub fn canonical_url(input: &str) -> String {
    let trimmed = input.trim();
    let Ok(mut parsed) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    parsed.set_fragment(None);

    if parsed.query().is_some() {
        let mut pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        pairs.sort();
        if pairs.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    parsed.into()
}

/// Compute the fingerprint of a request.
///
/// Covers method, canonical URL and body. Headers are deliberately left out
/// so that cookies or user agents do not split a key's version chain.
pub fn fingerprint(request: &HttpRequest) -> String {
    compute_cache_key(&request.method, &request.url, &request.body)
}

/// Compute the hex SHA-256 key for the given request parts.
pub fn compute_cache_key(method: &str, url: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_url(url).as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hex::encode(hasher.finalize())
}
