//! Predictor abstraction: an in-memory model that maps a text input to an
//! ordered sequence of outputs.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("undecodable backend response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(String),
}

/// Implementations must tolerate concurrent `predict` calls; the gateway never
/// mutates a predictor after it is loaded.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, input: &str) -> Result<Vec<Value>, PredictorError>;
}
