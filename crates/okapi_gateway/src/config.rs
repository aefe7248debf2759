//! Gateway configuration
//!
//! The four values the process supervisor hands over at startup (port, SSO
//! endpoint, API gateway endpoint, base path) plus a few tuning knobs.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 54545;
pub const DEFAULT_TOKEN_MAX_AGE_SECS: u64 = 1800;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Command-line / environment arguments for the server
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(short, long, env = "OKAPI_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SSO identity provider endpoint
    #[arg(long = "sso", env = "OKAPI_SSO_ENDPOINT")]
    pub sso_endpoint: String,

    /// API gateway endpoint that /api calls are forwarded to
    #[arg(long = "api", env = "OKAPI_API_ENDPOINT")]
    pub api_endpoint: String,

    /// Path prefix prepended to every proxied request
    #[arg(long = "path", env = "OKAPI_BASE_PATH", default_value = "")]
    pub base_path: String,

    /// Address to bind to
    #[arg(long, env = "OKAPI_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Lifetime in seconds of tokens issued without an expiry
    #[arg(long = "token-max-age", env = "OKAPI_TOKEN_MAX_AGE", default_value_t = DEFAULT_TOKEN_MAX_AGE_SECS)]
    pub token_max_age_secs: u64,

    /// Timeout in seconds for calls to the SSO provider and the API gateway
    #[arg(long = "timeout", env = "OKAPI_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Send the token as this query parameter instead of a bearer header
    #[arg(long = "token-param", env = "OKAPI_TOKEN_PARAM")]
    pub token_param: Option<String>,
}

/// Arguments of the detached launcher
#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Directory receiving the background server's out.log
    #[arg(long = "log-dir", env = "OKAPI_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

/// How the downstream token is attached to proxied requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlacement {
    /// `Authorization: Bearer <token>`
    BearerHeader,
    /// `?<name>=<token>` appended to the query string
    QueryParam(String),
}

/// Validated gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub sso_endpoint: Url,
    pub api_endpoint: Url,
    /// Empty, or `/segment[/segment...]` without a trailing slash
    pub base_path: String,
    pub token_max_age: Duration,
    pub upstream_timeout: Duration,
    pub token_placement: TokenPlacement,
}

impl GatewayConfig {
    pub fn new(
        port: u16,
        sso_endpoint: &str,
        api_endpoint: &str,
        base_path: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            host: "127.0.0.1".to_string(),
            port,
            sso_endpoint: parse_url("SSO", sso_endpoint)?,
            api_endpoint: parse_url("API gateway", api_endpoint)?,
            base_path: normalize_base_path(base_path)?,
            token_max_age: Duration::from_secs(DEFAULT_TOKEN_MAX_AGE_SECS),
            upstream_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            token_placement: TokenPlacement::BearerHeader,
        })
    }

    pub fn from_args(args: &ServerArgs) -> Result<Self, ConfigError> {
        let mut config = Self::new(
            args.port,
            &args.sso_endpoint,
            &args.api_endpoint,
            &args.base_path,
        )?;
        config.host = args.host.clone();
        config.token_max_age = Duration::from_secs(args.token_max_age_secs);
        config.upstream_timeout = Duration::from_secs(args.timeout_secs);
        if let Some(param) = &args.token_param {
            if param.is_empty() || param.contains(['&', '=', '#']) {
                return Err(ConfigError::InvalidTokenParam(param.clone()));
            }
            config.token_placement = TokenPlacement::QueryParam(param.clone());
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn token_max_age_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.token_max_age)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_TOKEN_MAX_AGE_SECS as i64))
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

fn normalize_base_path(path: &str) -> Result<String, ConfigError> {
    if path.contains(['?', '#']) {
        return Err(ConfigError::InvalidBasePath(path.to_string()));
    }

    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        Ok(String::new())
    } else if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{}", trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServerArgs {
        ServerArgs {
            port: 8080,
            sso_endpoint: "https://sso.example.com".to_string(),
            api_endpoint: "https://gw.example.com".to_string(),
            base_path: "/v1".to_string(),
            host: "0.0.0.0".to_string(),
            token_max_age_secs: 60,
            timeout_secs: 5,
            token_param: None,
        }
    }

    #[test]
    fn test_base_path_normalization() {
        assert_eq!(normalize_base_path("").unwrap(), "");
        assert_eq!(normalize_base_path("/").unwrap(), "");
        assert_eq!(normalize_base_path("v1").unwrap(), "/v1");
        assert_eq!(normalize_base_path("/v1/").unwrap(), "/v1");
        assert_eq!(normalize_base_path("/a/b").unwrap(), "/a/b");
        assert!(normalize_base_path("/v1?x=1").is_err());
    }

    #[test]
    fn test_from_args() {
        let config = GatewayConfig::from_args(&args()).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.base_path, "/v1");
        assert_eq!(config.token_max_age, Duration::from_secs(60));
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert_eq!(config.token_placement, TokenPlacement::BearerHeader);
        assert_eq!(config.token_max_age_chrono().num_seconds(), 60);
    }

    #[test]
    fn test_token_param() {
        let mut with_param = args();
        with_param.token_param = Some("apikey".to_string());
        let config = GatewayConfig::from_args(&with_param).unwrap();
        assert_eq!(config.token_placement, TokenPlacement::QueryParam("apikey".to_string()));

        with_param.token_param = Some("a=b".to_string());
        assert!(GatewayConfig::from_args(&with_param).is_err());
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(GatewayConfig::new(1, "not a url", "https://gw.example.com", "").is_err());
        assert!(GatewayConfig::new(1, "https://sso.example.com", "ftp://gw.example.com", "").is_err());
    }
}
