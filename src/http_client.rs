use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};

const CLIENT_USER_AGENT: &str = concat!("replay_ingest/", env!("CARGO_PKG_VERSION"));

/// Blocking client that sends the upstream token on every request.
pub fn http_client(api_key: &str, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(api_key).context("api key is not a valid header value")?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .context("failed to build http client")
}
