//! Shared request plumbing for the channel clients.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use omnidesk_core::AppConfig;

use crate::error::ChannelError;

const USER_AGENT: &str = concat!("omnidesk/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Timeout and retry policy applied to every outbound channel call.
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    /// Additional attempts after the first failure, for transient errors only.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl HttpSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            timeout_secs: config.http_timeout_secs,
            max_retries: config.http_max_retries,
            backoff_base_ms: config.http_backoff_base_ms,
        }
    }

    pub(crate) fn build_client(&self) -> Result<Client, ChannelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(client)
    }
}

/// Joins `path` onto `base` (which may itself carry a path such as `/api`).
pub(crate) fn endpoint(base: &str, path: &str) -> Result<Url, ChannelError> {
    let raw = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&raw).map_err(|e| ChannelError::InvalidUrl {
        url: raw,
        reason: e.to_string(),
    })
}

/// Maps a non-2xx response onto the matching [`ChannelError`] variant.
pub(crate) fn check_status(channel: &str, response: Response) -> Result<Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => ChannelError::RateLimited {
            channel: channel.to_owned(),
            retry_after_secs: response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChannelError::Unauthorized {
            channel: channel.to_owned(),
            status: status.as_u16(),
        },
        StatusCode::NOT_FOUND => ChannelError::NotFound { url },
        _ => ChannelError::UnexpectedStatus {
            status: status.as_u16(),
            url,
        },
    })
}

/// Reads the body as JSON. An empty body decodes as `null` so endpoints that
/// answer `204 No Content` can share the path.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: Response,
    context: &str,
) -> Result<T, ChannelError> {
    let body = response.text().await?;
    let body = if body.trim().is_empty() { "null" } else { &body };
    serde_json::from_str(body).map_err(|source| ChannelError::Deserialize {
        context: context.to_owned(),
        source,
    })
}
