//! Locator normalization and hashing.

use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that only track the referrer and never change content.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "source", "share"];

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Normalize a locator so equivalent URLs compare equal.
///
/// - `http` becomes `https`; scheme and host are lowercased (by `url`)
/// - the fragment is dropped
/// - tracking parameters are removed and the rest sorted
/// - a trailing `/` is removed from non-root paths
///
/// Text that does not parse as a URL is returned trimmed.
pub fn normalize_locator(locator: &str) -> String {
    let trimmed = locator.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    if url.scheme() == "http" {
        // http and https are both special schemes, so this cannot fail.
        let _ = url.set_scheme("https");
    }
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let stripped = path.trim_end_matches('/');
        url.set_path(if stripped.is_empty() { "/" } else { stripped });
    }

    url.to_string()
}

/// SHA-256 (lowercase hex) of the normalized locator; the dedup hash.
pub fn locator_hash(locator: &str) -> String {
    let normalized = normalize_locator(locator);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}
