//! Auth endpoints: login, refresh, current user, logout.

use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::client::ApiClient;
use super::models::{Ack, AuthTokens, LoginRequest, User};
use crate::error::{ApiError, ApiResult};

impl ApiClient {
    /// Log in with username/password (`POST /auth/login-json`) and keep the tokens.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<AuthTokens> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ApiError::Invalid(
                "username and password are required".to_string(),
            ));
        }

        let body = LoginRequest {
            username: username.trim().to_string(),
            password: password.to_string(),
        };
        let response = self
            .http()
            .post(self.url("/auth/login-json"))
            .json(&body)
            .send()
            .await?;

        // Bad credentials are a user error here, not an expired session
        if response.status() == StatusCode::UNAUTHORIZED {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: StatusCode::UNAUTHORIZED,
                detail: serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
                    .unwrap_or_else(|| "Incorrect username or password".to_string()),
            });
        }

        let tokens: AuthTokens = Self::parse(response).await?;
        info!(user = %tokens.user.username, role = %tokens.user.role, "Logged in");
        self.set_tokens(tokens.clone()).await;
        Ok(tokens)
    }

    /// Exchange the refresh token for a new token pair (`POST /auth/refresh`).
    ///
    /// Returns [`ApiError::Unauthorized`] when the refresh token itself is rejected.
    pub async fn refresh(&self) -> ApiResult<AuthTokens> {
        let refresh_token = self.refresh_token().await?;
        let response = self
            .http()
            .post(self.url("/auth/refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let tokens: AuthTokens = Self::parse(response).await?;
        debug!(user = %tokens.user.username, "Access token refreshed");
        self.set_tokens(tokens.clone()).await;
        Ok(tokens)
    }

    /// Fetch the authenticated user (`GET /auth/me`).
    pub async fn me(&self) -> ApiResult<User> {
        let url = self.url("/auth/me");
        let response = self.send_authed(|http| http.get(&url)).await?;
        Self::parse(response).await
    }

    /// Log out (`POST /auth/logout`). Local tokens are dropped even if the call fails.
    pub async fn logout(&self) -> ApiResult<()> {
        let url = self.url("/auth/logout");
        let result = match self.send_authed(|http| http.post(&url)).await {
            Ok(response) => Self::parse::<Ack>(response).await.map(|ack| {
                debug!(message = %ack.message, "Logout acknowledged");
            }),
            Err(e) => Err(e),
        };
        self.clear_tokens().await;

        match result {
            // Already logged out server-side
            Err(ApiError::Unauthorized) | Err(ApiError::NotLoggedIn) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Logout request failed; local session cleared anyway");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::ApiConfig;
    use super::*;
    use crate::test_helpers::{tokens, tokens_json, user_json};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(ApiConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_login_stores_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login-json"))
            .and(body_json(json!({ "username": "host", "password": "Secret123" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tokens_json("a1", "r1")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let tokens = client.login(" host ", "Secret123").await.unwrap();
        assert_eq!(tokens.access_token, "a1");
        assert_eq!(client.tokens().await.unwrap().refresh_token, "r1");
    }

    #[tokio::test]
    async fn test_login_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login-json"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "detail": "Incorrect username or password" })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.login("host", "wrong").await.unwrap_err();
        match err {
            ApiError::Status { status, detail } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(detail, "Incorrect username or password");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_login_rejects_blank_input() {
        let client = ApiClient::new(ApiConfig::default()).unwrap();
        assert!(matches!(
            client.login("  ", "pw").await,
            Err(ApiError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_me_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.set_tokens(tokens("a1", "r1")).await;

        let user = client.me().await.unwrap();
        assert_eq!(user.id, "user-1");
    }

    #[tokio::test]
    async fn test_401_refreshes_and_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({ "refresh_token": "r1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tokens_json("fresh", "r2")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.set_tokens(tokens("stale", "r1")).await;

        let user = client.me().await.unwrap();
        assert_eq!(user.username, "host");
        assert_eq!(client.tokens().await.unwrap().refresh_token, "r2");
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "detail": "Invalid or expired refresh token" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.set_tokens(tokens("stale", "r1")).await;

        let err = client.me().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(!client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_logout_clears_tokens_even_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "detail": "boom" })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.set_tokens(tokens("a1", "r1")).await;

        assert!(client.logout().await.is_err());
        assert!(!client.is_logged_in().await);
    }
}
