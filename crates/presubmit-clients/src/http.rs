//! Shared plumbing for the Gerrit and Jenkins clients.

use std::time::Duration;

use reqwest::{Client, Response, Url};

use crate::error::{ClientError, Result};

const USER_AGENT: &str = concat!("presubmit/", env!("CARGO_PKG_VERSION"));

/// HTTP client with the user agent and per-request timeout applied.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Parse `host` into a base URL that path segments can be appended to.
pub(crate) fn base_url(host: &str) -> Result<Url> {
    let url = Url::parse(host.trim()).map_err(|_| ClientError::InvalidHost(host.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidHost(host.to_string()));
    }
    Ok(url)
}

/// `base` with `segments` appended, each percent-encoded.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Turn a non-success response into [`ClientError::Status`].
pub(crate) async fn check_status(method: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        method,
        url,
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}
