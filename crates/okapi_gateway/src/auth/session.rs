//! Shared authentication session
//!
//! One [`SessionManager`] exists per process. All state lives behind a single
//! `parking_lot::Mutex` that is only held for synchronous transitions; network
//! calls to the identity provider always happen with the lock released.

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::sso::{IdentityProvider, SsoSession};
use super::token_store::{Token, TokenStore};
use crate::error::{AuthError, TokenError};

/// Authentication state of the process-wide session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    Authenticating,
    Ready,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Unauthenticated => write!(f, "unauthenticated"),
            SessionStatus::Authenticating => write!(f, "authenticating"),
            SessionStatus::Ready => write!(f, "ready"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

/// Token fetch shared by every caller that arrives while it is in flight
type PendingFetch = Shared<BoxFuture<'static, Result<Token, TokenError>>>;

struct SessionState {
    status: SessionStatus,
    sso_session: Option<SsoSession>,
    last_error: Option<String>,
    tokens: TokenStore,
    pending: Option<PendingFetch>,
    /// Bumped on every authentication attempt so that results of work
    /// started under an older session are dropped
    generation: u64,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    state: Mutex<SessionState>,
}

/// Owner of the session state machine and the cached downstream token
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager in the `Unauthenticated` state
    ///
    /// `max_token_age` bounds tokens the provider hands out without an expiry.
    pub fn new(provider: Arc<dyn IdentityProvider>, max_token_age: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                state: Mutex::new(SessionState {
                    status: SessionStatus::Unauthenticated,
                    sso_session: None,
                    last_error: None,
                    tokens: TokenStore::new(max_token_age),
                    pending: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    /// Run the SSO handshake and fetch an initial token
    ///
    /// Always re-attempts, whatever the current state. Credentials are only
    /// borrowed for the duration of the call.
    ///
    /// A Ready session keeps serving its current token until the new
    /// handshake completes, then switches to the new session or to Error.
    pub async fn authenticate(&self, user: &str, password: &str, mfa: &str) -> Result<(), AuthError> {
        let generation = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            debug!("Starting SSO handshake from state {}", state.status);
            if state.status != SessionStatus::Ready {
                state.status = SessionStatus::Authenticating;
                state.sso_session = None;
                state.pending = None;
                state.tokens.clear();
            }
            state.generation
        };

        info!("[INFO] Authenticating user '{}' against SSO", user);

        let result = self.handshake(user, password, mfa).await;

        let mut state = self.inner.state.lock();
        if state.generation != generation {
            debug!("Authentication for '{}' superseded by a newer attempt", user);
            return result.map(|_| ());
        }
        // fetches started against the previous session during the handshake
        // must not be applied on top of the new one
        state.generation += 1;
        state.pending = None;

        match result {
            Ok((sso_session, token)) => {
                state.status = SessionStatus::Ready;
                state.sso_session = Some(sso_session);
                state.tokens.set(token);
                state.last_error = None;
                info!("[OK] Session ready for user '{}'", user);
                Ok(())
            }
            Err(err) => {
                state.status = SessionStatus::Error;
                state.sso_session = None;
                state.tokens.clear();
                state.last_error = Some(err.to_string());
                warn!("[WARN] Authentication failed for user '{}': {}", user, err);
                Err(err)
            }
        }
    }

    async fn handshake(
        &self,
        user: &str,
        password: &str,
        mfa: &str,
    ) -> Result<(SsoSession, Token), AuthError> {
        let sso_session = self.inner.provider.login(user, password, mfa).await?;
        let token = self.inner.provider.fetch_token(&sso_session).await?;
        Ok((sso_session, token))
    }

    /// Current downstream token, refreshed first if it has expired
    ///
    /// Concurrent callers during a refresh all await the same upstream fetch.
    pub async fn get_token(&self) -> Result<Token, TokenError> {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.status != SessionStatus::Ready {
                return Err(TokenError::NotAuthenticated);
            }

            if let Some(token) = state.tokens.valid_token() {
                return Ok(token.clone());
            }

            if let Some(pending) = state.pending.clone() {
                pending
            } else {
                let sso_session = state
                    .sso_session
                    .clone()
                    .ok_or(TokenError::NotAuthenticated)?;
                let pending = self.start_fetch(sso_session, state.generation);
                state.pending = Some(pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Spawn the upstream fetch so that no single caller going away can
    /// cancel it for the others
    fn start_fetch(&self, sso_session: SsoSession, generation: u64) -> PendingFetch {
        debug!("Token missing or expired, fetching a new one");

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.provider.fetch_token(&sso_session).await;
            inner.apply_fetch_result(generation, &result);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(TokenError::UpstreamUnavailable(format!(
                    "Token fetch task failed: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    fn apply_fetch_result(&self, generation: u64, result: &Result<Token, TokenError>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!("Discarding token fetched for a previous session");
            return;
        }
        state.pending = None;

        match result {
            Ok(token) => {
                state.tokens.set(token.clone());
                state.last_error = None;
                info!("[OK] API token refreshed");
            }
            Err(TokenError::ExpiredSession) => {
                state.status = SessionStatus::Error;
                state.sso_session = None;
                state.tokens.clear();
                state.last_error = Some(TokenError::ExpiredSession.to_string());
                warn!("[WARN] SSO session rejected by provider, re-authentication required");
            }
            Err(err) => {
                state.last_error = Some(err.to_string());
                warn!("[WARN] API token fetch failed: {}", err);
            }
        }
    }
}
