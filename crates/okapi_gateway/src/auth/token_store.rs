use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Downstream access token issued by the SSO/API provider
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    /// Absolute expiry, when the provider supplied one
    pub expires_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
            fetched_at: Utc::now(),
        }
    }

    /// Build a token from a provider response, falling back to the JWT `exp`
    /// claim when no lifetime was sent alongside it
    pub fn from_provider(value: String, expires_in: Option<i64>) -> Self {
        let fetched_at = Utc::now();
        let expires_at = match expires_in {
            Some(secs) => Some(fetched_at + Duration::seconds(secs)),
            None => jwt_expiry(&value),
        };

        Self {
            value,
            expires_at,
            fetched_at,
        }
    }

    /// Instant after which the token must not be handed out any more
    pub fn expiry(&self, max_age: Duration) -> DateTime<Utc> {
        self.expires_at.unwrap_or(self.fetched_at + max_age)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now >= self.expiry(max_age)
    }
}

// Token values are credentials; keep them out of logs.
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

/// Read the `exp` claim of a JWT without verifying its signature
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp?, 0).single()
}

/// Single-slot token cache
///
/// Holds no synchronization of its own: the session manager keeps it inside
/// the same lock as the session status so both change together.
#[derive(Debug, Clone)]
pub struct TokenStore {
    token: Option<Token>,
    max_age: Duration,
}

impl TokenStore {
    /// `max_age` bounds the lifetime of tokens that carry no expiry
    pub fn new(max_age: Duration) -> Self {
        Self {
            token: None,
            max_age,
        }
    }

    pub fn set(&mut self, token: Token) {
        self.token = Some(token);
    }

    pub fn get(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn clear(&mut self) {
        self.token = None;
    }

    /// Whether the cached token can be used right now
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.token
            .as_ref()
            .is_some_and(|token| !token.is_expired_at(now, self.max_age))
    }

    /// The cached token, only if it is still valid
    pub fn valid_token(&self) -> Option<&Token> {
        if self.is_valid() {
            self.token.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_get_returns_what_was_set() {
        let mut store = TokenStore::new(Duration::minutes(30));
        assert!(store.get().is_none());
        assert!(!store.is_valid());

        let token = Token::new("abc", Some(Utc::now() + Duration::minutes(5)));
        store.set(token.clone());

        assert_eq!(store.get(), Some(&token));
        assert!(store.is_valid());
        assert_eq!(store.valid_token(), Some(&token));
    }

    #[test]
    fn test_explicit_expiry_in_the_past() {
        let mut store = TokenStore::new(Duration::minutes(30));
        store.set(Token::new("stale", Some(Utc::now() - Duration::seconds(1))));

        assert!(store.get().is_some());
        assert!(!store.is_valid());
        assert!(store.valid_token().is_none());
    }

    #[test]
    fn test_max_age_applies_without_expiry() {
        let mut store = TokenStore::new(Duration::minutes(10));
        let token = Token::new("no-expiry", None);
        let fetched_at = token.fetched_at;
        store.set(token);

        assert!(store.is_valid_at(fetched_at + Duration::minutes(9)));
        assert!(!store.is_valid_at(fetched_at + Duration::minutes(10)));
    }

    #[test]
    fn test_clear() {
        let mut store = TokenStore::new(Duration::minutes(10));
        store.set(Token::new("abc", None));
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_jwt_expiry_from_exp_claim() {
        let jwt = jwt_with_payload(r#"{"sub":"alice","exp":1893456000}"#);
        let expiry = jwt_expiry(&jwt).unwrap();
        assert_eq!(expiry.timestamp(), 1_893_456_000);
    }

    #[test]
    fn test_jwt_expiry_ignores_opaque_tokens() {
        assert!(jwt_expiry("opaque-token").is_none());
        assert!(jwt_expiry("a.b.c.d").is_none());
        assert!(jwt_expiry(&jwt_with_payload(r#"{"sub":"alice"}"#)).is_none());
    }

    #[test]
    fn test_from_provider_prefers_expires_in() {
        let jwt = jwt_with_payload(r#"{"exp":1893456000}"#);
        let token = Token::from_provider(jwt, Some(60));
        let expires_at = token.expires_at.unwrap();
        assert_eq!((expires_at - token.fetched_at).num_seconds(), 60);
    }

    #[test]
    fn test_debug_redacts_value() {
        let token = Token::new("super-secret", None);
        assert!(!format!("{:?}", token).contains("super-secret"));
    }
}
