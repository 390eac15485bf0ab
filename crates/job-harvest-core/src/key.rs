//! Natural-key derivation.
//!
//! After a card is activated the page location carries the posting's
//! identifier in a query parameter (`currentJobId=4247086503`). That value
//! is the natural key, and the canonical location is rebuilt from it so
//! that the same posting always maps to the same row regardless of the
//! search context it was found in.

use url::Url;

/// Where to find the identifier and how to rebuild a canonical location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRule {
    /// Query parameter holding the identifier.
    pub param: String,
    /// Base path of the canonical view, e.g. `https://www.linkedin.com/jobs/view`.
    pub view_base: String,
}

impl KeyRule {
    pub fn new(param: impl Into<String>, view_base: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            view_base: view_base.into(),
        }
    }

    /// Canonical `{view_base}/{key}/` location.
    pub fn canonical_location(&self, key: &str) -> String {
        format!("{}/{}/", self.view_base.trim_end_matches('/'), key)
    }
}

/// Result of deriving a key from a resolved location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub natural_key: String,
    pub location: String,
    /// `false` when the identifier parameter was absent and the raw
    /// location stands in as a weaker key.
    pub from_param: bool,
}

/// Derive the natural key and canonical location from `raw`.
///
/// Parameter order and surrounding parameters never affect the result.
pub fn derive_key(raw: &str, rule: &KeyRule) -> DerivedKey {
    match find_param(raw, &rule.param) {
        Some(id) => DerivedKey {
            location: rule.canonical_location(&id),
            natural_key: id,
            from_param: true,
        },
        None => DerivedKey {
            natural_key: raw.to_string(),
            location: raw.to_string(),
            from_param: false,
        },
    }
}

fn find_param(raw: &str, param: &str) -> Option<String> {
    if let Ok(url) = Url::parse(raw) {
        return url
            .query_pairs()
            .find(|(k, v)| k == param && !v.is_empty())
            .map(|(_, v)| v.into_owned());
    }

    // Relative or malformed locations: scan the query string by hand.
    let query = raw.split_once('?').map(|(_, q)| q)?;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, v)| *k == param && !v.is_empty())
        .map(|(_, v)| v.to_string())
}
