//! HTTP client core: base URL, bearer tokens, 401 recovery and response decoding.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::models::AuthTokens;
use crate::error::{ApiError, ApiResult};

/// Settings supplied when an [`ApiClient`] is constructed
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Backend root, e.g. `http://localhost:8000` (no trailing slash)
    pub base_url: String,
    /// Per-request timeout for REST calls (streaming calls are not bounded)
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Client for the They Might Say REST API.
///
/// Constructed explicitly and passed by reference; holds the current session
/// tokens. A 401 is answered with one refresh + retry; if that fails the
/// tokens are dropped and [`ApiError::Unauthorized`] is returned so the caller
/// can decide how to re-authenticate.
#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    timeout: Duration,
    tokens: RwLock<Option<AuthTokens>>,
}

impl ApiClient {
    /// Create a client without a session.
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        let http = Client::builder().connect_timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            tokens: RwLock::new(None),
        })
    }

    /// Create a client that resumes a stored session.
    pub fn with_tokens(config: ApiConfig, tokens: Option<AuthTokens>) -> ApiResult<Self> {
        let client = Self::new(config)?;
        Ok(Self {
            tokens: RwLock::new(tokens),
            ..client
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API path (`path` starts with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Snapshot of the current session tokens.
    pub async fn tokens(&self) -> Option<AuthTokens> {
        self.tokens.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    pub async fn set_tokens(&self, tokens: AuthTokens) {
        *self.tokens.write().await = Some(tokens);
    }

    pub async fn clear_tokens(&self) {
        *self.tokens.write().await = None;
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) async fn access_token(&self) -> ApiResult<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(ApiError::NotLoggedIn)
    }

    pub(crate) async fn refresh_token(&self) -> ApiResult<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .ok_or(ApiError::NotLoggedIn)
    }

    /// Send an authenticated REST request built by `build`.
    ///
    /// `build` may run twice (original attempt and post-refresh retry).
    pub(crate) async fn send_authed<F>(&self, build: F) -> ApiResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.execute(|http| Ok(build(http)), Some(self.timeout)).await
    }

    /// Like [`send_authed`](Self::send_authed) for requests whose body can
    /// fail to build (multipart parts).
    pub(crate) async fn try_send_authed<F>(&self, build: F) -> ApiResult<Response>
    where
        F: Fn(&Client) -> ApiResult<RequestBuilder>,
    {
        self.execute(build, Some(self.timeout)).await
    }

    /// Like [`send_authed`](Self::send_authed) but without a total-request
    /// timeout, for response bodies that stream for as long as a reply takes.
    pub(crate) async fn send_authed_streaming<F>(&self, build: F) -> ApiResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.execute(|http| Ok(build(http)), None).await
    }

    async fn execute<F>(&self, build: F, timeout: Option<Duration>) -> ApiResult<Response>
    where
        F: Fn(&Client) -> ApiResult<RequestBuilder>,
    {
        let token = self.access_token().await?;
        let response = with_timeout(build(&self.http)?, timeout)
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Access token rejected, attempting refresh");
        match self.refresh().await {
            Ok(_) => {}
            Err(e) if e.is_auth() => {
                self.clear_tokens().await;
                return Err(ApiError::Unauthorized);
            }
            Err(e) => return Err(e),
        }

        let token = self.access_token().await?;
        let response = with_timeout(build(&self.http)?, timeout)
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Request rejected again after token refresh, clearing session");
            self.clear_tokens().await;
            return Err(ApiError::Unauthorized);
        }

        Ok(response)
    }

    /// Check status and decode a JSON body.
    pub(crate) async fn parse<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Map non-success statuses to [`ApiError`], using FastAPI's `detail` field.
    pub(crate) async fn ensure_success(response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        let text = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status,
            detail: extract_detail(&text),
        })
    }
}

fn with_timeout(builder: RequestBuilder, timeout: Option<Duration>) -> RequestBuilder {
    match timeout {
        Some(t) => builder.timeout(t),
        None => builder,
    }
}

/// Pull a readable message out of an error body.
fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value.get("detail") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        Err(_) if body.is_empty() => "no response body".to_string(),
        Err(_) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_detail_string() {
        assert_eq!(
            extract_detail(r#"{"detail":"Episode not found"}"#),
            "Episode not found"
        );
    }

    #[test]
    fn test_extract_detail_validation_list() {
        let detail = extract_detail(r#"{"detail":[{"loc":["body","title"],"msg":"too short"}]}"#);
        assert!(detail.contains("too short"));
    }

    #[test]
    fn test_extract_detail_plain_text() {
        assert_eq!(extract_detail("Bad Gateway"), "Bad Gateway");
        assert_eq!(extract_detail(""), "no response body");
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = ApiClient::new(ApiConfig {
            base_url: "http://localhost:8000/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/auth/me"), "http://localhost:8000/auth/me");
    }

    #[tokio::test]
    async fn test_not_logged_in_without_tokens() {
        let client = ApiClient::new(ApiConfig::default()).unwrap();
        assert!(!client.is_logged_in().await);
        assert!(matches!(
            client.access_token().await,
            Err(ApiError::NotLoggedIn)
        ));
    }
}
