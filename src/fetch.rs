use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::FetchError;
use crate::http_client::http_client;
use crate::raw::{PayloadFormat, RawRecord, parse_payload};

pub const DEFAULT_BASE_URL: &str = "https://raw.githubusercontent.com/griffisben/Wyscout_Prospect_Research/adabd2a3f30e739aa8a048aaf51c08cda248e5fe/Main%20App";

/// Seasons published by the remote dataset, newest first.
pub const SEASONS: &[&str] = &[
    "2024-25", "2023-24", "2022-23", "2021-22", "2020-21", "2019-20", "2018-19",
];

/// Remote file name for a season ("2024-25" -> "Hong Kong Premier League 24-25.csv").
pub fn season_file_name(season: &str) -> Option<String> {
    if !SEASONS.contains(&season) {
        return None;
    }
    let (start, end) = season.split_once('-')?;
    let short_start = start.get(2..)?;
    Some(format!("Hong Kong Premier League {short_start}-{end}.csv"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceId {
    Season(String),
    Url(String),
}

impl SourceId {
    pub fn season(season: impl Into<String>) -> Self {
        SourceId::Season(season.into())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Season(season) => write!(f, "season {season}"),
            SourceId::Url(url) => f.write_str(url),
        }
    }
}

/// A downloaded body together with its parsed rows.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub url: String,
    pub format: PayloadFormat,
    pub body: String,
    pub sha256: String,
    pub fetched_at: DateTime<Utc>,
    pub records: Vec<RawRecord>,
}

impl RawPayload {
    /// Parses `body`; the error is a human-readable reason.
    pub fn from_body(
        url: impl Into<String>,
        format: PayloadFormat,
        body: String,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, String> {
        let records = parse_payload(&body, format)?;
        Ok(Self {
            url: url.into(),
            format,
            sha256: sha256_hex(body.as_bytes()),
            body,
            fetched_at,
            records,
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub struct RemoteFetcher {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteFetcher {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Ok(Self::with_client(http_client()?.clone(), base_url, token))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base = settings
            .data_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if settings.github_token.is_none() {
            warn!("GITHUB_TOKEN not set, using anonymous requests");
        }
        Self::new(base, settings.github_token.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resolve(&self, source: &SourceId) -> Result<String, FetchError> {
        match source {
            SourceId::Url(url) => Ok(url.clone()),
            SourceId::Season(season) => {
                let file = season_file_name(season)
                    .ok_or_else(|| FetchError::UnknownSource(season.clone()))?;
                Ok(format!("{}/{}", self.base_url, file.replace(' ', "%20")))
            }
        }
    }

    /// Single GET of the source; no retries.
    pub fn fetch(&self, source: &SourceId) -> Result<RawPayload, FetchError> {
        let url = self.resolve(source)?;

        let mut req = self.client.get(&url);
        if let Some(token) = self.token.as_deref() {
            req = req.header(AUTHORIZATION, format!("token {token}"));
        }

        let resp = req.send().map_err(|source| FetchError::Network {
            url: url.clone(),
            source,
        })?;
        let status = resp.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "fetch rejected");
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let bytes = resp.bytes().map_err(|source| FetchError::Network {
            url: url.clone(),
            source,
        })?;
        let body = String::from_utf8(bytes.to_vec()).map_err(|err| FetchError::Malformed {
            url: url.clone(),
            reason: format!("body is not utf-8: {err}"),
        })?;

        let format = PayloadFormat::from_path(&url);
        let payload = RawPayload::from_body(url.clone(), format, body, Utc::now())
            .map_err(|reason| FetchError::Malformed {
                url: url.clone(),
                reason,
            })?;
        info!(
            url = %url,
            rows = payload.records.len(),
            bytes = payload.body.len(),
            "fetched source"
        );
        Ok(payload)
    }
}
