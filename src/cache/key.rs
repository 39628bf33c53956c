//! Request fingerprints.

use std::fmt;
use url::form_urlencoded;

/// Identifies a cacheable request.
///
/// With `sort_params`, equivalent query strings in a different order share
/// a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn fingerprint(method: &str, url: &str, sort_params: bool) -> Self {
        let url = url.split_once('#').map_or(url, |(head, _)| head);
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        if sort_params {
            pairs.sort();
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();

        let mut key = format!("{} {}", method.to_ascii_uppercase(), path);
        if !query.is_empty() {
            key.push('?');
            key.push_str(&query);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_params_share_a_fingerprint() {
        let a = CacheKey::fingerprint("get", "https://api.test/pets?b=2&a=1", true);
        let b = CacheKey::fingerprint("GET", "https://api.test/pets?a=1&b=2", true);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GET https://api.test/pets?a=1&b=2");
    }

    #[test]
    fn unsorted_params_keep_their_order() {
        let a = CacheKey::fingerprint("GET", "/pets?b=2&a=1", false);
        let b = CacheKey::fingerprint("GET", "/pets?a=1&b=2", false);
        assert_ne!(a, b);
    }

    #[test]
    fn method_is_part_of_the_key() {
        assert_ne!(
            CacheKey::fingerprint("GET", "/pets", true),
            CacheKey::fingerprint("POST", "/pets", true)
        );
        assert_eq!(CacheKey::fingerprint("GET", "/pets", true).as_str(), "GET /pets");
    }
}
