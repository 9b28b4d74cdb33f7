//! Shared HTTP plumbing for the REST backends

use reqwest::Url;
use std::time::Duration;

use crate::errors::SearchError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_http_client() -> Result<reqwest::Client, SearchError> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("charted-search-indexer/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

pub(crate) fn parse_base(raw: &str) -> Result<Url, SearchError> {
    let url = Url::parse(raw).map_err(|err| SearchError::InvalidEndpoint(format!("{raw}: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(SearchError::InvalidEndpoint(format!("{raw}: not a base URL")));
    }
    Ok(url)
}

/// Append path segments to `base`, percent-encoding each one
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, SearchError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SearchError::InvalidEndpoint(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
