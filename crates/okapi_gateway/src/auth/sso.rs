use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::token_store::Token;
use crate::error::{AuthError, TokenError};

const LOGIN_PATH: &str = "login";
const TOKEN_PATH: &str = "token";

/// Opaque credential returned by a successful SSO login
///
/// Authorizes subsequent token fetches for the lifetime of the session.
#[derive(Clone, PartialEq, Eq)]
pub struct SsoSession(String);

impl SsoSession {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SsoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SsoSession(<redacted>)")
    }
}

/// Identity provider used by the session manager
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Perform the user/password/MFA handshake
    async fn login(&self, user: &str, password: &str, mfa: &str) -> Result<SsoSession, AuthError>;

    /// Exchange an SSO session for a downstream API token
    async fn fetch_token(&self, session: &SsoSession) -> Result<Token, TokenError>;
}

/// HTTP client for the SSO endpoint
pub struct SsoClient {
    login_url: Url,
    token_url: Url,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    mfa: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    session_token: String,
}

#[derive(Deserialize, Default)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl SsoClient {
    pub fn new(sso_endpoint: &Url, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(sso_endpoint, http_client))
    }

    pub fn with_client(sso_endpoint: &Url, http_client: reqwest::Client) -> Self {
        Self {
            login_url: endpoint_url(sso_endpoint, LOGIN_PATH),
            token_url: endpoint_url(sso_endpoint, TOKEN_PATH),
            http_client,
        }
    }
}

/// Append `path` to the endpoint, keeping any path prefix it already has
fn endpoint_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!("{}/{}", base.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url
}

/// Map a rejected login to the reason the SSO provider gave
fn classify_login_rejection(status: StatusCode, body: &str) -> AuthError {
    let code = serde_json::from_str::<ErrorResponse>(body)
        .unwrap_or_default()
        .error
        .unwrap_or_default();

    match (status, code.as_str()) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, "mfa_required") => AuthError::MfaRequired,
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, "mfa_invalid") => AuthError::MfaInvalid,
        (StatusCode::UNAUTHORIZED, _) => AuthError::InvalidCredentials,
        _ => AuthError::UpstreamUnavailable(format!("SSO login failed: {} - {}", status, body)),
    }
}

#[async_trait]
impl IdentityProvider for SsoClient {
    async fn login(&self, user: &str, password: &str, mfa: &str) -> Result<SsoSession, AuthError> {
        tracing::debug!("SSO login for user '{}' at {}", user, self.login_url);

        let response = self
            .http_client
            .post(self.login_url.clone())
            .json(&LoginRequest {
                username: user,
                password,
                mfa,
            })
            .send()
            .await
            .map_err(|e| AuthError::UpstreamUnavailable(format!("SSO login request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_login_rejection(status, &body));
        }

        let login: LoginResponse = response.json().await.map_err(|e| {
            AuthError::UpstreamUnavailable(format!("Failed to parse SSO login response: {}", e))
        })?;

        Ok(SsoSession::new(login.session_token))
    }

    async fn fetch_token(&self, session: &SsoSession) -> Result<Token, TokenError> {
        tracing::debug!("Fetching API token from {}", self.token_url);

        let response = self
            .http_client
            .post(self.token_url.clone())
            .bearer_auth(session.as_str())
            .send()
            .await
            .map_err(|e| TokenError::UpstreamUnavailable(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TokenError::ExpiredSession);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::UpstreamUnavailable(format!(
                "Token fetch failed: {} - {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            TokenError::UpstreamUnavailable(format!("Failed to parse token response: {}", e))
        })?;

        Ok(Token::from_provider(token.access_token, token.expires_in))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    async fn client_for(server: &mockito::ServerGuard) -> SsoClient {
        let endpoint = Url::parse(&server.url()).unwrap();
        SsoClient::new(&endpoint, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_url_keeps_prefix() {
        let base = Url::parse("https://sso.example.com/auth/").unwrap();
        assert_eq!(
            endpoint_url(&base, "login").as_str(),
            "https://sso.example.com/auth/login"
        );

        let bare = Url::parse("https://sso.example.com").unwrap();
        assert_eq!(endpoint_url(&bare, "token").as_str(), "https://sso.example.com/token");
    }

    #[test]
    fn test_classify_login_rejection() {
        assert_eq!(
            classify_login_rejection(StatusCode::UNAUTHORIZED, ""),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            classify_login_rejection(StatusCode::UNAUTHORIZED, r#"{"error":"mfa_required"}"#),
            AuthError::MfaRequired
        );
        assert_eq!(
            classify_login_rejection(StatusCode::FORBIDDEN, r#"{"error":"mfa_invalid"}"#),
            AuthError::MfaInvalid
        );
        assert_eq!(
            classify_login_rejection(StatusCode::BAD_GATEWAY, "down").reason(),
            "upstream-unavailable"
        );
    }

    #[tokio::test]
    async fn test_login_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/login")
            .match_body(Matcher::Json(serde_json::json!({
                "username": "alice",
                "password": "pw1",
                "mfa": "123456",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"session_token":"sso-session-1"}"#)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let session = client.login("alice", "pw1", "123456").await.unwrap();

        mock.assert_async().await;
        assert_eq!(session.as_str(), "sso-session-1");
    }

    #[tokio::test]
    async fn test_login_bad_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(401)
            .with_body(r#"{"error":"invalid_credentials"}"#)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let err = client.login("bob", "bad", "000000").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_login_unreachable() {
        let endpoint = Url::parse("http://127.0.0.1:1").unwrap();
        let client = SsoClient::new(&endpoint, Duration::from_secs(1)).unwrap();

        let err = client.login("alice", "pw1", "123456").await.unwrap_err();
        assert_eq!(err.reason(), "upstream-unavailable");
    }

    #[tokio::test]
    async fn test_fetch_token_with_expires_in() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("authorization", "Bearer sso-session-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"api-token","expires_in":3600}"#)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let token = client
            .fetch_token(&SsoSession::new("sso-session-1"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(token.value, "api-token");
        let lifetime = token.expires_at.unwrap() - token.fetched_at;
        assert_eq!(lifetime.num_seconds(), 3600);
    }

    #[tokio::test]
    async fn test_fetch_token_without_expiry() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"opaque"}"#)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let token = client.fetch_token(&SsoSession::new("s")).await.unwrap();
        assert!(token.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_fetch_token_rejected_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let err = client.fetch_token(&SsoSession::new("old")).await.unwrap_err();
        assert_eq!(err, TokenError::ExpiredSession);
    }

    #[tokio::test]
    async fn test_fetch_token_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = client_for(&server).await;
        let err = client.fetch_token(&SsoSession::new("s")).await.unwrap_err();
        assert_eq!(err.reason(), "upstream-unavailable");
    }
}
