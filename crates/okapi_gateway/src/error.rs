//! Error taxonomy for the gateway
//!
//! Authentication and token errors are reported to clients in-band as short
//! reason strings (see [`AuthError::reason`] and [`TokenError::reason`]); the
//! `Display` impls carry the full detail for server-side logs.

use thiserror::Error;

/// Failure of an `authenticate` attempt against the SSO provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid-credentials")]
    InvalidCredentials,

    #[error("mfa-required")]
    MfaRequired,

    #[error("mfa-invalid")]
    MfaInvalid,

    #[error("upstream-unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl AuthError {
    /// Stable reason string sent back to clients
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid-credentials",
            AuthError::MfaRequired => "mfa-required",
            AuthError::MfaInvalid => "mfa-invalid",
            AuthError::UpstreamUnavailable(_) => "upstream-unavailable",
        }
    }
}

/// Failure to produce a usable downstream token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("not-authenticated")]
    NotAuthenticated,

    #[error("upstream-unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("expired-session")]
    ExpiredSession,
}

impl TokenError {
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::NotAuthenticated => "not-authenticated",
            TokenError::UpstreamUnavailable(_) => "upstream-unavailable",
            TokenError::ExpiredSession => "expired-session",
        }
    }
}

// The initial token fetch is part of the login handshake, so its failures
// surface to the caller of `authenticate` as authentication failures.
impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotAuthenticated | TokenError::ExpiredSession => {
                AuthError::InvalidCredentials
            }
            TokenError::UpstreamUnavailable(detail) => AuthError::UpstreamUnavailable(detail),
        }
    }
}

/// Failure to reach the backend API gateway
///
/// Non-2xx answers from the gateway are not errors; they are passed through.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("upstream timeout: {0}")]
    Timeout(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

// The request URL can carry the token as a query parameter, so it is
// stripped before the error is logged or shown to the client.
impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            ProxyError::Timeout(err.to_string())
        } else if err.is_builder() {
            ProxyError::InvalidRequest(err.to_string())
        } else {
            ProxyError::Unreachable(err.to_string())
        }
    }
}

/// Invalid startup configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {field} URL '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid base path '{0}': must not contain '?' or '#'")]
    InvalidBasePath(String),

    #[error("Invalid token parameter name '{0}'")]
    InvalidTokenParam(String),
}
