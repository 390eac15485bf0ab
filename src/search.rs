//! Search-page addressing.
//!
//! A run navigates straight to a results URL instead of typing into the
//! search form: `keywords`, `location` and the recency filter (`f_TPR`) are
//! query parameters, and further result pages are reached with `start=N`.

use anyhow::{Context, Result};
use url::Url;

use job_harvest_core::models::SearchRequest;

/// Results URL for the first page of `request`.
pub fn search_url(base: &str, request: &SearchRequest) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid site.search_url: {}", base))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("keywords", request.query());
        if !request.location().trim().is_empty() {
            pairs.append_pair("location", request.location());
        }
        if let Some(tpr) = request.recency().url_param() {
            pairs.append_pair("f_TPR", tpr);
        }
    }
    Ok(url)
}

/// The results page starting at offset `start`.
///
/// Any existing `start` parameter is replaced; offset 0 yields the URL
/// without one.
pub fn page_url(search: &Url, start: usize) -> Url {
    let kept: Vec<(String, String)> = search
        .query_pairs()
        .filter(|(k, _)| k != "start")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = search.clone();
    url.set_query(None);
    if kept.is_empty() && start == 0 {
        return url;
    }
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        if start > 0 {
            pairs.append_pair("start", &start.to_string());
        }
    }
    url
}
