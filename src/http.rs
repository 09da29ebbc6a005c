use crate::config::StreamConfig;
use crate::engine::Collector;
use crate::metrics::Metrics;
use crate::snapshot::{ApiResponse, FieldFailure, Snapshot};
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpAppState {
    pub collector: Collector,
    pub metrics: Arc<Metrics>,
    pub secret: Arc<str>,
    pub stream: Arc<StreamConfig>,
}

pub fn build_router(state: HttpAppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/metrics", get(all_metrics))
        .route("/api/v1/metrics/cpu", get(cpu_metrics))
        .route("/api/v1/metrics/memory", get(memory_metrics))
        .route("/api/v1/metrics/disk", get(disk_metrics))
        .route("/api/v1/metrics/host", get(host_metrics))
        .route("/api/v1/ws/metrics", get(stream_metrics))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn require_bearer(State(state): State<HttpAppState>, request: Request, next: Next) -> Response {
    let rejection = match bearer_token(request.headers()) {
        None => Some((StatusCode::UNAUTHORIZED, "missing or malformed bearer token")),
        Some(t) if !tokens_match(t.as_bytes(), state.secret.as_bytes()) => {
            debug!(path = %request.uri().path(), "rejected request with wrong token");
            Some((StatusCode::FORBIDDEN, "invalid token"))
        }
        Some(_) => None,
    };

    match rejection {
        Some(rejection) => rejection.into_response(),
        None => next.run(request).await,
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty() && !t.contains(char::is_whitespace))
}

// Comparison time depends only on the lengths.
fn tokens_match(given: &[u8], expected: &[u8]) -> bool {
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Full success only when nothing failed; any failure downgrades to partial success.
fn respond<T: Serialize>(data: T, errors: Vec<FieldFailure>) -> Response {
    let status = if errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    (status, Json(ApiResponse { data, errors })).into_response()
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    timestamp: String,
}

async fn health() -> impl IntoResponse {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
    })
}

async fn collect_recorded(state: &HttpAppState) -> (Snapshot, Vec<FieldFailure>) {
    let started = Instant::now();
    let (snapshot, failures) = state.collector.collect().await;
    state
        .metrics
        .update_from_snapshot(&snapshot, &failures, started.elapsed());
    (snapshot, failures)
}

async fn all_metrics(State(state): State<HttpAppState>) -> Response {
    let (snapshot, failures) = collect_recorded(&state).await;
    respond(snapshot, failures)
}

async fn cpu_metrics(State(state): State<HttpAppState>) -> Response {
    let probed = state.collector.cpu().await;
    respond(probed.value, probed.failures)
}

async fn memory_metrics(State(state): State<HttpAppState>) -> Response {
    let probed = state.collector.memory().await;
    respond(probed.value, probed.failures)
}

async fn disk_metrics(State(state): State<HttpAppState>) -> Response {
    let probed = state.collector.disk().await;
    respond(probed.value, probed.failures)
}

async fn host_metrics(State(state): State<HttpAppState>) -> Response {
    let probed = state.collector.host().await;
    respond(probed.value, probed.failures)
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

/// `"*"` admits every client, including ones that send no `Origin`.
/// Otherwise the origin must be listed exactly.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.iter().any(|o| o == "*") {
        return true;
    }
    origin.is_some_and(|origin| allowed.iter().any(|o| o == origin))
}

async fn stream_metrics(
    State(state): State<HttpAppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.stream.allowed_origins, origin) {
        warn!(origin = ?origin, "rejected stream subscriber");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    ws.on_upgrade(move |socket| push_snapshots(socket, state))
}

async fn push_snapshots(mut socket: WebSocket, state: HttpAppState) {
    debug!("stream subscriber connected");
    let mut ticker = tokio::time::interval(state.stream.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (data, errors) = collect_recorded(&state).await;
                let text = match serde_json::to_string(&ApiResponse { data, errors }) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to encode stream frame");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("stream subscriber gone");
}
