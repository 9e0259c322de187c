// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API
//!
//! | route                        | handler                                  |
//! |------------------------------|------------------------------------------|
//! | `POST /v1/{agent}/{intent}`  | dispatch, agent and intent from the path |
//! | `POST /{agent}/{intent}`     | same, legacy unversioned path            |
//! | `POST /v1/dispatch`          | dispatch, agent and intent from the body |
//! | `POST /dispatch`             | same, legacy unversioned path            |
//! | `GET /health`                | liveness                                 |
//! | `GET /ready`                 | readiness, 503 while starting/unhealthy  |
//! | `GET /metrics`               | Prometheus exposition                    |
//! | `GET /v1/agents`             | registry with breaker and bulkhead state |

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::application::dispatcher::{DispatchRequest, DispatchResponse};
use crate::application::services::GatewayServices;
use crate::domain::envelope::{EnvelopeError, EnvelopeRequest, ResponseEnvelope};
use crate::domain::error::{retry_after_secs, GatewayError};
use crate::infrastructure::metrics::MetricsHandle;
use crate::infrastructure::rate_limiter::ClientIdentity;

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_USER_ID: &str = "x-user-id";
const X_API_KEY: &str = "x-api-key";
const X_REQUEST_TIMEOUT_MS: &str = "x-request-timeout-ms";

pub struct AppState {
    pub services: GatewayServices,
    pub metrics: Option<MetricsHandle>,
}

pub fn app(state: Arc<AppState>, metrics_path: &str) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/v1/agents", get(list_agents))
        .route("/v1/dispatch", post(dispatch_envelope))
        .route("/dispatch", post(dispatch_envelope))
        .route("/v1/{agent}/{intent}", post(dispatch_routed))
        .route("/{agent}/{intent}", post(dispatch_routed));

    if state.metrics.is_some() {
        router = router.route(metrics_path, get(render_metrics));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.services.health.liveness())
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.services.health.readiness();
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.services.health.agents())
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn dispatch_envelope(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let dispatch = read_dispatch(request).await;
    state.services.dispatcher.handle(dispatch).await.into_response()
}

async fn dispatch_routed(
    State(state): State<Arc<AppState>>,
    Path((agent, intent)): Path<(String, String)>,
    request: Request,
) -> Response {
    let dispatch = read_dispatch(request).await.with_route(agent, intent);
    state.services.dispatcher.handle(dispatch).await.into_response()
}

/// Turn the raw HTTP request into a [`DispatchRequest`]. Decoding problems
/// travel with it so the dispatcher reports them after admission.
async fn read_dispatch(request: Request) -> DispatchRequest {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let identity = client_identity(&parts.headers, peer);
    let timeout = header_str(&parts.headers, X_REQUEST_TIMEOUT_MS)
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);

    let dispatch = match decode_body(body).await {
        Ok(mut envelope) => {
            if envelope.request_id.is_none() {
                envelope.request_id = header_str(&parts.headers, X_REQUEST_ID.as_str()).map(str::to_string);
            }
            DispatchRequest::new(envelope)
        }
        Err(e) => DispatchRequest::undecodable(e),
    };

    let dispatch = dispatch.with_identity(identity).with_path(path);
    match timeout {
        Some(timeout) => dispatch.with_timeout(timeout),
        None => dispatch,
    }
}

async fn decode_body(body: Body) -> Result<EnvelopeRequest, EnvelopeError> {
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| EnvelopeError::Malformed(format!("unreadable body: {}", e)))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(EnvelopeRequest::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
}

/// Client IP is the first `X-Forwarded-For` hop, else the socket peer.
pub fn client_identity(headers: &HeaderMap, peer: Option<String>) -> ClientIdentity {
    let forwarded = header_str(headers, X_FORWARDED_FOR)
        .and_then(|raw| raw.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string);
    ClientIdentity {
        ip: forwarded.or(peer),
        user_id: header_str(headers, X_USER_ID).map(str::to_string),
        api_key: header_str(headers, X_API_KEY).map(str::to_string),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn status_of(error: &GatewayError) -> StatusCode {
    StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn set_retry_after(headers: &mut HeaderMap, error: &GatewayError) {
    if let Some(retry_after) = error.retry_after() {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = (status_of(&self), Json(self.to_response(None))).into_response();
        set_retry_after(response.headers_mut(), &self);
        response
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        let request_id = self.request_id.as_deref();
        let mut response = match &self.result {
            Ok(dispatched) => {
                let body = ResponseEnvelope::from(dispatched.reply.clone());
                (StatusCode::OK, Json(body)).into_response()
            }
            Err(error) => {
                let mut response =
                    (status_of(error), Json(error.to_response(request_id))).into_response();
                set_retry_after(response.headers_mut(), error);
                response
            }
        };

        let headers = response.headers_mut();
        if let Some(id) = request_id.and_then(|id| HeaderValue::from_str(id).ok()) {
            headers.insert(X_REQUEST_ID, id);
        }
        if let Some(rate_limit) = self.rate_limit {
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(rate_limit.limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(rate_limit.remaining));
        }
        response
    }
}
