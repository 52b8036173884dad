//! Metrics and tracing setup for reefkv.
//!
//! Provides a global [`NodeMetrics`] singleton backed by the `prometheus`
//! crate, plus a lightweight HTTP server for Prometheus scraping.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<NodeMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static NodeMetrics {
    METRICS.get_or_init(NodeMetrics::new)
}

/// All Prometheus metrics for a reefkv node.
pub struct NodeMetrics {
    pub registry: Registry,

    // ── KV operation counters ──
    pub kv_puts: IntCounter,
    pub kv_gets: IntCounter,
    pub kv_deletes: IntCounter,
    pub kv_errors: IntCounterVec,

    // ── KV operation latency ──
    pub kv_latency_secs: HistogramVec,

    // ── Watch fan-out ──
    pub watch_subscribers: IntCounter,
    pub watch_events_dropped: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for NodeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for KV latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

impl NodeMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let kv_puts = IntCounter::with_opts(Opts::new("reefkv_puts_total", "KV PUT operations"))
            .expect("kv_puts counter");
        let kv_gets = IntCounter::with_opts(Opts::new("reefkv_gets_total", "KV GET operations"))
            .expect("kv_gets counter");
        let kv_deletes =
            IntCounter::with_opts(Opts::new("reefkv_deletes_total", "KV DELETE operations"))
                .expect("kv_deletes counter");
        let kv_errors = IntCounterVec::new(
            Opts::new("reefkv_errors_total", "KV operations that failed, by kind"),
            &["kind"],
        )
        .expect("kv_errors counter vec");

        let kv_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "reefkv_op_latency_seconds",
                "KV operation latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op_type"],
        )
        .expect("kv_latency_secs histogram");

        let watch_subscribers = IntCounter::with_opts(Opts::new(
            "reefkv_watch_subscribers_total",
            "Watch subscriptions accepted",
        ))
        .expect("watch_subscribers counter");
        let watch_events_dropped = IntCounter::with_opts(Opts::new(
            "reefkv_watch_events_dropped_total",
            "Watch events dropped on full subscriber queues",
        ))
        .expect("watch_events_dropped counter");

        for collector in [&kv_puts, &kv_gets, &kv_deletes] {
            registry
                .register(Box::new(collector.clone()))
                .expect("register kv counter");
        }
        registry
            .register(Box::new(kv_errors.clone()))
            .expect("register kv_errors");
        registry
            .register(Box::new(kv_latency_secs.clone()))
            .expect("register kv_latency_secs");
        registry
            .register(Box::new(watch_subscribers.clone()))
            .expect("register watch_subscribers");
        registry
            .register(Box::new(watch_events_dropped.clone()))
            .expect("register watch_events_dropped");

        Self {
            registry,
            kv_puts,
            kv_gets,
            kv_deletes,
            kv_errors,
            kv_latency_secs,
            watch_subscribers,
            watch_events_dropped,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Helper: start a KV operation latency timer. Records elapsed time on drop.
pub fn start_kv_timer(op_type: &str) -> prometheus::HistogramTimer {
    metrics()
        .kv_latency_secs
        .with_label_values(&[op_type])
        .start_timer()
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
