//! Inference gateway: loads one registry model at startup and answers
//! questions against it.

use anyhow::{Context, Result};
use gateway_core::{init_tracing, load_config, mark_ready, start_health_server, FsModelRegistry};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

pub mod flavors;
pub mod gateway;
pub mod predictor;
pub mod runtime;

pub use gateway::{GatewayError, MalformedOutput, PredictionGateway, PredictionResponse};
pub use predictor::{Predictor, PredictorError};
pub use runtime::{FlavorLoader, ModelLoadError, ModelRuntime};

pub const SERVICE: &str = "inference-gateway";

/// Startup sequence for the binary. A model that fails to load aborts here,
/// before readiness is ever reported.
pub async fn run() -> Result<()> {
    let cfg = load_config(SERVICE)?;
    init_tracing(&cfg.service_name, &cfg.log_level)?;
    info!(?cfg, "config loaded");

    if cfg.health_port != 0 {
        start_health_server(cfg.health_port).await?;
    }

    let registry = FsModelRegistry::new(&cfg.registry_root);
    let runtime = ModelRuntime::with_default_flavors(&cfg.openai);
    let gateway = PredictionGateway::initialize(&cfg.model_uri, &registry, &runtime)
        .with_context(|| format!("loading {} from {}", cfg.model_uri, cfg.registry_root))?;
    mark_ready();
    info!(uri = %gateway.model_uri(), "service ready");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve_lines(&gateway, stdin, tokio::io::stdout()).await?;
    info!("input closed, shutting down");
    Ok(())
}

/// One question per input line, one JSON object per output line. Prediction
/// errors and undecodable lines are reported in-band as `{"error": ...}` and do
/// not stop the loop.
pub async fn serve_lines<R, W>(gateway: &PredictionGateway, mut input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf).await? == 0 { break; }
        let reply = match String::from_utf8(std::mem::take(&mut buf)) {
            Err(_) => {
                warn!("input line is not valid UTF-8");
                json!({"error": "input is not valid UTF-8"}).to_string()
            }
            Ok(line) => {
                let line = line.strip_suffix('\n').unwrap_or(&line);
                let line = line.strip_suffix('\r').unwrap_or(line);
                if line.trim().is_empty() { continue; }
                match gateway.predict(line).await {
                    Ok(resp) => serde_json::to_string(&resp)?,
                    Err(e) => {
                        warn!(error = %e, "question failed");
                        json!({"error": e.to_string()}).to_string()
                    }
                }
            }
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}
