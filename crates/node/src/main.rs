//! reef-node: entry point for a reefkv node.
//!
//! Loads config, opens the storage engine (replaying segments into the
//! index and bloom filter), starts the local replicated-log runtime over
//! the KV state machine, then serves the HTTP API until ctrl-c.

use reef_config::NodeConfig;
use reef_kv::Node;
use reef_raft::{KvStateMachine, LocalLog};
use reef_storage::{Engine, EngineOptions, IndexKind};
use reef_storage::index::TieredOptions;
use reef_watch::WatchBus;
use std::sync::Arc;
use std::time::Duration;

fn engine_options(config: &NodeConfig) -> EngineOptions {
    let storage = &config.storage;
    let mut opts = EngineOptions::new(&storage.data_dir);
    opts.segment_size_limit = storage.segment_size_limit;
    // Validation already rejected unknown index names.
    opts.index = IndexKind::from_config_str(&storage.index).unwrap_or_default();
    opts.filter_fp = storage.filter_fp;
    opts.filter_capacity = storage.filter_capacity;
    opts.tiered = TieredOptions {
        hot_capacity: storage.hot_capacity,
        warm_capacity: storage.warm_capacity,
        promote_threshold: storage.promote_threshold,
        demote_threshold: storage.demote_threshold,
        maintenance_interval: Duration::from_millis(storage.maintenance_interval_ms),
    };
    opts
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    reef_metrics::init_tracing();

    // Load config: first CLI arg is the YAML config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config =
        reef_config::load_from_file(std::path::Path::new(&config_path)).unwrap_or_else(|e| {
            tracing::warn!(
                "failed to load config from {}: {}, using defaults",
                config_path,
                e
            );
            reef_config::load_from_str("listen: \"127.0.0.1:7600\"\n")
                .expect("hardcoded default config must parse")
        });

    // Open the engine; recovery rebuilds index and filter from segments.
    let engine = Arc::new(Engine::open(engine_options(&config))?);
    tracing::info!(
        keys = engine.key_count(),
        segments = engine.segment_count(),
        "storage ready"
    );

    // Wire the watch bus and the replicated-log runtime.
    let bus = WatchBus::new();
    let state_machine = Arc::new(KvStateMachine::new(engine.clone(), bus.clone()));
    let log = Arc::new(LocalLog::spawn(state_machine));

    let node = Arc::new(Node::new(
        log.clone(),
        engine,
        bus,
        Duration::from_millis(config.replication.apply_timeout_ms),
    ));

    // Spawn metrics HTTP server if configured.
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr: std::net::SocketAddr = format!("0.0.0.0:{}", metrics_port)
            .parse()
            .expect("valid metrics address");
        tokio::spawn(async move {
            if let Err(e) = reef_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    // Serve with graceful shutdown on ctrl-c.
    tokio::select! {
        result = reef_api::serve(config.listen, node.clone(), config.watch.buffer) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    log.shutdown().await;
    node.close()?;
    Ok(())
}
