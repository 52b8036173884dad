//! Request routing and the JSON endpoint handlers.

use crate::sse::sse_body;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use reef_kv::{Node, NodeError};
use reef_raft::ReplicatedLog;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

type ApiBody = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to bind API listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// Serve the KV API on `addr` until the listener fails. Spawn this on the
/// runtime; each connection gets its own task.
pub async fn serve<L: ReplicatedLog>(
    addr: SocketAddr,
    node: Arc<Node<L>>,
    watch_buffer: usize,
) -> Result<(), ApiError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ApiError::Bind { addr, source })?;
    tracing::info!("API listening on http://{}", addr);

    loop {
        let (stream, peer) = listener.accept().await.map_err(ApiError::Accept)?;
        let io = TokioIo::new(stream);
        let node = node.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let node = node.clone();
                async move { Ok::<_, Infallible>(handle(node, watch_buffer, req).await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(peer = %peer, error = %e, "connection ended with error");
            }
        });
    }
}

/// Route one request. Generic over the body type so tests can drive it
/// with in-memory bodies.
pub async fn handle<L, B>(
    node: Arc<Node<L>>,
    watch_buffer: usize,
    req: Request<B>,
) -> Response<ApiBody>
where
    L: ReplicatedLog,
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match (method, path.as_str()) {
        (Method::GET, "/health") => health(),
        (Method::POST, "/v1/kv/put") => put(node, req).await,
        (Method::GET, "/v1/kv/get") => get(node, req.uri()),
        (Method::DELETE, "/v1/kv/delete") => delete(node, req.uri()).await,
        (Method::GET, "/v1/watch") => watch(node, watch_buffer, req.uri()),
        _ => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            "no such route; see /health, /v1/kv/*, /v1/watch",
        ),
    }
}

// ────────────────────────── Handlers ──────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    time: u64,
}

fn health() -> Response<ApiBody> {
    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    json_response(
        StatusCode::OK,
        &HealthResponse {
            status: "ok",
            time,
        },
    )
}

#[derive(Deserialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct AckResponse {
    message: &'static str,
    key: String,
}

async fn put<L, B>(node: Arc<Node<L>>, req: Request<B>) -> Response<ApiBody>
where
    L: ReplicatedLog,
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let _timer = reef_metrics::start_kv_timer("put");
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("failed to read body: {}", e),
            )
        }
    };
    let request: PutRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("expected JSON {{key, value}}: {}", e),
            )
        }
    };

    match node.put(request.key.as_bytes(), request.value.as_bytes()).await {
        Ok(()) => {
            reef_metrics::metrics().kv_puts.inc();
            json_response(
                StatusCode::OK,
                &AckResponse {
                    message: "ok",
                    key: request.key,
                },
            )
        }
        Err(e) => node_error_response(&e),
    }
}

#[derive(Serialize)]
struct GetResponse {
    key: String,
    value: String,
}

fn get<L: ReplicatedLog>(node: Arc<Node<L>>, uri: &Uri) -> Response<ApiBody> {
    let _timer = reef_metrics::start_kv_timer("get");
    let Some(key) = query_param(uri, "key") else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request", "key is required");
    };

    match node.get(key.as_bytes()) {
        Ok(value) => {
            reef_metrics::metrics().kv_gets.inc();
            json_response(
                StatusCode::OK,
                &GetResponse {
                    key,
                    value: String::from_utf8_lossy(&value).into_owned(),
                },
            )
        }
        Err(e) => node_error_response(&e),
    }
}

async fn delete<L: ReplicatedLog>(node: Arc<Node<L>>, uri: &Uri) -> Response<ApiBody> {
    let _timer = reef_metrics::start_kv_timer("delete");
    let Some(key) = query_param(uri, "key") else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request", "key is required");
    };

    match node.delete(key.as_bytes()).await {
        Ok(()) => {
            reef_metrics::metrics().kv_deletes.inc();
            json_response(
                StatusCode::OK,
                &AckResponse {
                    message: "ok",
                    key,
                },
            )
        }
        Err(e) => node_error_response(&e),
    }
}

fn watch<L: ReplicatedLog>(
    node: Arc<Node<L>>,
    watch_buffer: usize,
    uri: &Uri,
) -> Response<ApiBody> {
    let prefix = query_param(uri, "prefix").unwrap_or_default();
    let subscriber = node.watch(prefix.clone(), watch_buffer);
    reef_metrics::metrics().watch_subscribers.inc();
    tracing::info!(prefix = %prefix, "watch stream opened");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(sse_body(subscriber))
        .expect("valid SSE response")
}

// ────────────────────────── Helpers ──────────────────────────

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
    message: String,
}

fn json_response(status: StatusCode, value: &impl Serialize) -> Response<ApiBody> {
    let body = serde_json::to_vec(value).expect("response structs serialize");
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)).boxed_unsync())
        .expect("valid JSON response")
}

fn error_response(
    status: StatusCode,
    kind: &str,
    message: impl Into<String>,
) -> Response<ApiBody> {
    json_response(
        status,
        &ErrorResponse {
            error: kind,
            message: message.into(),
        },
    )
}

fn node_error_response(e: &NodeError) -> Response<ApiBody> {
    reef_metrics::metrics()
        .kv_errors
        .with_label_values(&[e.kind()])
        .inc();

    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else if e.is_not_leader() {
        // Retryable against the current leader.
        StatusCode::SERVICE_UNAVAILABLE
    } else if e.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    error_response(status, e.kind(), e.to_string())
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == name).then(|| v.to_string())
    })
}
