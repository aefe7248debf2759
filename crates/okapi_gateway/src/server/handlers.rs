//! Request handlers
//!
//! Every outcome, failures included, is reported as a plain-text body with
//! status 200. Clients of this gateway read the body, not the status code.

use axum::extract::{Query, Request, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::router::{self, Route};
use super::AppState;
use crate::auth::SessionStatus;

const READY_MESSAGE: &str = "Server is ready";
const NOT_AUTHENTICATED_MESSAGE: &str = "Server is running but not authenticated";
const AUTHENTICATED_MESSAGE: &str = "You are now authenticated";
const NOT_FOUND_MESSAGE: &str = "404";

/// Query parameters of `/authenticate`
#[derive(Debug, Default, Deserialize)]
pub struct AuthenticateQuery {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pwd: Option<String>,
    #[serde(default)]
    pub mfa: Option<String>,
}

fn text(body: impl Into<String>) -> Response {
    (StatusCode::OK, body.into()).into_response()
}

pub fn status_message(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Ready => READY_MESSAGE,
        _ => NOT_AUTHENTICATED_MESSAGE,
    }
}

/// Single entry point: classify the path and run the matching handler
pub async fn dispatch(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let route = router::classify(request.uri().path());
    match route {
        Route::StopServer => stop_server(&state),
        Route::Status => text(status_message(state.session.status())),
        Route::Token => token(&state).await,
        Route::Authenticate => authenticate(&state, request.uri()).await,
        Route::Proxy => proxy(&state, request).await,
        Route::NotFound => text(NOT_FOUND_MESSAGE),
    }
}

fn stop_server(state: &AppState) -> Response {
    let message = format!(
        "Server at port: {} was terminated at {}",
        state.config.port,
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    info!("[INFO] {}", message);
    state.shutdown.trigger();
    text(message)
}

async fn token(state: &AppState) -> Response {
    match state.session.get_token().await {
        Ok(token) => text(token.value),
        Err(err) => {
            warn!("[WARN] Token request failed: {}", err);
            text(err.reason())
        }
    }
}

async fn authenticate(state: &AppState, uri: &Uri) -> Response {
    let query = Query::<AuthenticateQuery>::try_from_uri(uri)
        .map(|Query(query)| query)
        .unwrap_or_default();

    let user = query.user.unwrap_or_default();
    let result = state
        .session
        .authenticate(
            &user,
            query.pwd.as_deref().unwrap_or_default(),
            query.mfa.as_deref().unwrap_or_default(),
        )
        .await;

    match result {
        Ok(()) => text(AUTHENTICATED_MESSAGE),
        Err(err) => {
            error!("[ERROR] Error during authentication for '{}': {} ({:?})", user, err, err);
            text(format!("We got an error: {}\n", err.reason()))
        }
    }
}

async fn proxy(state: &AppState, request: Request) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| request.uri().path());
    let path_and_query = router::strip_api_prefix(target).to_string();

    let token = match state.session.get_token().await {
        Ok(token) => token,
        Err(err) => {
            warn!("[WARN] Not proxying {}: {}", path_and_query, err);
            return text(format!("Error: {}\n", err.reason()));
        }
    };

    match state
        .proxy
        .forward(
            request,
            &path_and_query,
            &state.config.api_endpoint,
            &state.config.base_path,
            &token,
        )
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!("[WARN] Proxying {} failed: {}", path_and_query, err);
            text(format!("Error: {}\n", err))
        }
    }
}
