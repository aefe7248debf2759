//! Forwarding of `/api` calls to the backend API gateway
//!
//! The proxy is transparent: upstream status, headers and body are streamed
//! back as-is, including non-2xx answers. Only transport failures surface as
//! [`ProxyError`].

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::Request;
use axum::response::Response;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use url::Url;

use crate::auth::Token;
use crate::config::TokenPlacement;
use crate::error::ProxyError;

/// Largest request body buffered before forwarding
const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

// Connection-scoped headers that must not be forwarded (RFC 9110 section 7.6.1)
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct ProxyForwarder {
    client: reqwest::Client,
    placement: TokenPlacement,
    /// Deadline for the upstream response headers; the body is not bounded
    response_timeout: Duration,
}

impl ProxyForwarder {
    pub fn new(timeout: Duration, placement: TokenPlacement) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self::with_client(client, placement, timeout))
    }

    pub fn with_client(
        client: reqwest::Client,
        placement: TokenPlacement,
        response_timeout: Duration,
    ) -> Self {
        Self {
            client,
            placement,
            response_timeout,
        }
    }

    /// Build `backend_endpoint + base_path + path_and_query`, attaching the
    /// token when it travels as a query parameter
    ///
    /// Only the path and query of the endpoint are replaced, so nothing in
    /// `path_and_query` can change the scheme, host or port.
    pub fn target_url(
        &self,
        backend_endpoint: &Url,
        base_path: &str,
        path_and_query: &str,
        token: &Token,
    ) -> Url {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        let separator = if path.is_empty() || path.starts_with('/') { "" } else { "/" };

        let mut url = backend_endpoint.clone();
        url.set_path(&format!(
            "{}{}{}{}",
            backend_endpoint.path().trim_end_matches('/'),
            base_path,
            separator,
            path
        ));
        url.set_query(query);
        url.set_fragment(None);

        if let TokenPlacement::QueryParam(name) = &self.placement {
            url.query_pairs_mut().append_pair(name, &token.value);
        }

        url
    }

    /// Send `request` to the backend and stream the answer back
    ///
    /// `path_and_query` is the request target with the `/api` prefix already
    /// removed.
    pub async fn forward(
        &self,
        request: Request<Body>,
        path_and_query: &str,
        backend_endpoint: &Url,
        base_path: &str,
        token: &Token,
    ) -> Result<Response, ProxyError> {
        let url = self.target_url(backend_endpoint, base_path, path_and_query, token);
        let (parts, body) = request.into_parts();

        let mut headers = forwardable_headers(&parts.headers);
        headers.remove(header::HOST);
        if self.placement == TokenPlacement::BearerHeader {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.value))
                .map_err(|e| ProxyError::InvalidRequest(format!("Token is not a valid header value: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
            .await
            .map_err(|e| ProxyError::InvalidRequest(format!("Failed to read request body: {}", e)))?;

        debug!("Proxying {} {}{}{}", parts.method, backend_endpoint, base_path, path_and_query);

        let send = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send();
        let upstream = tokio::time::timeout(self.response_timeout, send)
            .await
            .map_err(|_| {
                ProxyError::Timeout(format!(
                    "no response within {}s",
                    self.response_timeout.as_secs_f64()
                ))
            })??;

        debug!("Upstream answered {}", upstream.status());
        stream_response(upstream)
    }
}

/// Copy of `headers` without hop-by-hop entries
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP {
        forwarded.remove(*name);
    }
    forwarded
}

/// Relay an upstream response to the client through a channel
///
/// When the client goes away the receiver is dropped, the relay task stops
/// and the upstream body is released with it.
fn stream_response(upstream: reqwest::Response) -> Result<Response, ProxyError> {
    let mut response_builder = axum::http::Response::builder().status(upstream.status());
    if let Some(headers) = response_builder.headers_mut() {
        for (name, value) in forwardable_headers(upstream.headers()).iter() {
            headers.append(name, value.clone());
        }
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, reqwest::Error>>(16);

    tokio::spawn(async move {
        let mut byte_stream = upstream.bytes_stream();

        while let Some(item) = byte_stream.next().await {
            let failed = item.is_err();
            if let Err(err) = &item {
                warn!("Error receiving upstream chunk: {}", err);
            }
            if tx.send(item).await.is_err() {
                debug!("Client went away, dropping upstream stream");
                break;
            }
            if failed {
                break;
            }
        }
    });

    response_builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ProxyError::InvalidRequest(format!("Failed to build response: {}", e)))
}
