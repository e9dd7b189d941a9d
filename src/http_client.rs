use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("hkpl-analytics/", env!("CARGO_PKG_VERSION"));
const ACCEPT_PAYLOADS: &str = "text/csv, application/json;q=0.9, */*;q=0.1";

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Builder with the defaults every season download uses: timeouts, user
/// agent and an `Accept` that prefers CSV over JSON.
pub fn client_builder() -> ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_PAYLOADS));
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .default_headers(headers)
}

/// Process-wide client for the season source.
pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        client_builder()
            .build()
            .context("failed to build season source http client")
    })
}
