//! Core shared utilities for the inference gateway: tracing, layered config,
//! readiness/health endpoints, prediction metrics and the model registry client.

use anyhow::Result;
use tracing::info;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use axum::{routing::get, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use opentelemetry::metrics::{Counter, Histogram, Meter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod model_registry;
pub use model_registry::{FsModelRegistry, ModelManifest, ModelReference, ModelRegistry, ModelUri, RegistryError, ResolvedModel};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static CONFIG_SNAPSHOT: OnceCell<RwLock<GatewayConfig>> = OnceCell::new();

/// Registry URI served when nothing else is configured.
pub const DEFAULT_MODEL_URI: &str = "models:/raymond_zhou.mlflow3.openai/1";

// --- Prediction metrics ---
#[derive(Clone, Debug)]
pub struct GatewayMetrics {
    pub model_loads_total: Counter<u64>,
    pub predictions_total: Counter<u64>,
    pub prediction_failures_total: Counter<u64>,
    pub malformed_outputs_total: Counter<u64>,
    pub predict_latency_ms: Histogram<f64>,
}

static GATEWAY_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("inference_gateway"));
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);
pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn mark_not_live() { NODE_LIVENESS.store(false, Ordering::SeqCst); }
pub fn is_ready() -> bool { NODE_READINESS.load(Ordering::SeqCst) }
pub fn is_live() -> bool { NODE_LIVENESS.load(Ordering::SeqCst) }

pub static GATEWAY_METRICS: Lazy<GatewayMetrics> = Lazy::new(|| {
    GatewayMetrics {
        model_loads_total: GATEWAY_METER.u64_counter("gateway_model_loads_total")
            .with_description("Successful model initializations")
            .build(),
        predictions_total: GATEWAY_METER.u64_counter("gateway_predictions_total")
            .with_description("Prediction calls served")
            .build(),
        prediction_failures_total: GATEWAY_METER.u64_counter("gateway_prediction_failures_total")
            .with_description("Prediction calls where the predictor itself failed")
            .build(),
        malformed_outputs_total: GATEWAY_METER.u64_counter("gateway_malformed_outputs_total")
            .with_description("Predictor outputs that were not a non-empty sequence of text")
            .build(),
        predict_latency_ms: GATEWAY_METER.f64_histogram("gateway_predict_latency_ms")
            .with_description("Predictor invocation latency (ms)")
            .with_unit("ms")
            .build(),
    }
});

/// Installs the global subscriber once. `RUST_LOG` wins over `default_level`;
/// `GATEWAY_JSON_LOG=1|true` switches to flattened JSON lines.
pub fn init_tracing(service: &str, default_level: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("GATEWAY_JSON_LOG").ok().map(|v| v=="1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry.with(tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false))
                .try_init()?;
        } else {
            registry.with(tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true))
                .try_init()?;
        }
        Ok(())
    })?;
    info!(target: "gateway-core", service, "tracing initialized");
    Ok(())
}

/// Serves `/live`, `/ready` and `/status` on a background task.
pub async fn start_health_server(port: u16) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/live", get(|| async { axum::Json(serde_json::json!({"live": is_live()})) }))
        .route("/ready", get(|| async { axum::Json(serde_json::json!({"ready": is_ready()})) }))
        .route("/status", get(|| async {
            axum::Json(serde_json::json!({
                "live": is_live(),
                "ready": is_ready(),
                "model_uri": current_config().map(|c| c.model_uri),
            }))
        }));
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0,0,0,0], port))).await?;
    let addr = listener.local_addr()?;
    tracing::info!(?addr, "Health server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error=?e, "Health server failed");
        }
    });
    Ok(addr)
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OpenAiSettings {
    pub api_base: String,
    pub api_key_env: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self { Self { api_base: "https://api.openai.com/v1".into(), api_key_env: "OPENAI_API_KEY".into() } }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GatewayConfig {
    pub service_name: String,
    pub model_uri: String,
    pub registry_root: String,
    pub log_level: String,
    /// 0 disables the health server.
    pub health_port: u16,
    #[serde(default)]
    pub openai: OpenAiSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service_name: "inference-gateway".into(),
            model_uri: DEFAULT_MODEL_URI.into(),
            registry_root: "registry".into(),
            log_level: "info".into(),
            health_port: 0,
            openai: OpenAiSettings::default(),
        }
    }
}

/// Defaults, then the file named by `GATEWAY_CONFIG_FILE`, then `GATEWAY__*` env vars.
pub fn load_config(service: &str) -> Result<GatewayConfig> {
    let defaults = GatewayConfig::default();
    let mut builder = config::Config::builder()
        .set_default("service_name", service)?
        .set_default("model_uri", defaults.model_uri)?
        .set_default("registry_root", defaults.registry_root)?
        .set_default("log_level", defaults.log_level)?
        .set_default("health_port", defaults.health_port as i64)?
        .set_default("openai.api_base", defaults.openai.api_base)?
        .set_default("openai.api_key_env", defaults.openai.api_key_env)?;

    if let Ok(file) = std::env::var("GATEWAY_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("GATEWAY").separator("__"));
    let cfg: GatewayConfig = builder.build()?.try_deserialize()?;
    let lock = CONFIG_SNAPSHOT.get_or_init(|| RwLock::new(cfg.clone()));
    *lock.write() = cfg.clone();
    Ok(cfg)
}

/// Most recently loaded config, as reported by `/status`.
pub fn current_config() -> Option<GatewayConfig> {
    CONFIG_SNAPSHOT.get().map(|c| c.read().clone())
}
