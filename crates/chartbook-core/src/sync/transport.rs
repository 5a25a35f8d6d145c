//! HTTP transport for the sync endpoints.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url};

use super::protocol::{PullRequest, PullResponse, PushRequest, PushResponse};

/// Capability boundary for talking to the sync server. Cycle tests script
/// this trait instead of standing up HTTP.
pub trait SyncTransport {
    fn push(
        &self,
        token: &str,
        request: &PushRequest,
    ) -> impl std::future::Future<Output = Result<PushResponse>> + Send;
    fn pull(
        &self,
        token: &str,
        request: &PullRequest,
    ) -> impl std::future::Future<Output = Result<PullResponse>> + Send;
}

/// JSON-over-HTTP transport against `{base}/v1/sync/push` and
/// `{base}/v1/sync/pull`.
#[derive(Clone)]
pub struct HttpSyncTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSyncTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().build()?,
        })
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(parse_api_error(status, &body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Protocol(parse_api_error(status, &body)));
        }

        Ok(response.json::<R>().await?)
    }
}

impl SyncTransport for HttpSyncTransport {
    async fn push(&self, token: &str, request: &PushRequest) -> Result<PushResponse> {
        self.post_json("/v1/sync/push", token, request).await
    }

    async fn pull(&self, token: &str, request: &PullRequest) -> Result<PullResponse> {
        self.post_json("/v1/sync/pull", token, request).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(
            "Server URL must not be empty".to_string(),
        ));
    }
    if is_http_url(trimmed) {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "Server URL must include http:// or https://".to_string(),
        ))
    }
}
