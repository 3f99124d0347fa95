//! Prediction Gateway: a model handle loaded once, then queried many times.
//!
//! A `PredictionGateway` value only exists after a successful load, so holding
//! one means the model is ready. Predictions never touch the registry again.

use crate::predictor::{Predictor, PredictorError};
use crate::runtime::{ModelLoadError, ModelRuntime};
use gateway_core::{ModelRegistry, ModelUri, GATEWAY_METRICS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub content: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedOutput {
    #[error("predictor returned an empty sequence")]
    Empty,
    #[error("first predictor output is {kind}, expected a string")]
    NotText { kind: &'static str },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Prediction(PredictorError),
    #[error(transparent)]
    MalformedOutput(#[from] MalformedOutput),
}

pub struct PredictionGateway {
    uri: ModelUri,
    version: Option<u64>,
    predictor: Arc<dyn Predictor>,
}

impl std::fmt::Debug for PredictionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionGateway").field("uri", &self.uri).field("version", &self.version).finish_non_exhaustive()
    }
}

impl PredictionGateway {
    /// Resolves `uri` and materializes its predictor. Meant to run once at startup.
    pub fn initialize(uri: &str, registry: &dyn ModelRegistry, runtime: &ModelRuntime) -> Result<Self, ModelLoadError> {
        let uri: ModelUri = uri.parse()?;
        let resolved = registry.resolve(&uri)?;
        let predictor = runtime.load(&resolved)?;
        GATEWAY_METRICS.model_loads_total.add(1, &[]);
        info!(%uri, version = resolved.version, path = %resolved.path.display(), "model loaded");
        Ok(Self { uri, version: Some(resolved.version), predictor })
    }

    /// Wraps an already materialized predictor.
    pub fn from_predictor(uri: ModelUri, predictor: Arc<dyn Predictor>) -> Self {
        Self { uri, version: None, predictor }
    }

    pub fn model_uri(&self) -> &ModelUri { &self.uri }

    /// Registry version the predictor was loaded from; `None` when injected.
    pub fn model_version(&self) -> Option<u64> { self.version }

    pub async fn predict(&self, question: &str) -> Result<PredictionResponse, GatewayError> {
        GATEWAY_METRICS.predictions_total.add(1, &[]);
        let started = Instant::now();
        let outputs = self.predictor.predict(question).await;
        GATEWAY_METRICS.predict_latency_ms.record(started.elapsed().as_secs_f64() * 1000.0, &[]);
        let outputs = outputs.map_err(|e| {
            GATEWAY_METRICS.prediction_failures_total.add(1, &[]);
            warn!(uri = %self.uri, error = %e, "predictor failed");
            GatewayError::Prediction(e)
        })?;
        let response = normalize(outputs).map_err(|e| {
            GATEWAY_METRICS.malformed_outputs_total.add(1, &[]);
            warn!(uri = %self.uri, error = %e, "malformed predictor output");
            e
        })?;
        debug!(uri = %self.uri, chars = response.content.len(), "prediction served");
        Ok(response)
    }
}

/// First output, trimmed of leading and trailing whitespace.
pub fn normalize(outputs: Vec<Value>) -> Result<PredictionResponse, MalformedOutput> {
    match outputs.into_iter().next() {
        None => Err(MalformedOutput::Empty),
        Some(Value::String(s)) => Ok(PredictionResponse { content: s.trim().to_string() }),
        Some(other) => Err(MalformedOutput::NotText { kind: kind_of(&other) }),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Failing;

    #[async_trait]
    impl Predictor for Failing {
        async fn predict(&self, _input: &str) -> Result<Vec<Value>, PredictorError> {
            Err(PredictorError::Backend("upstream returned 429".into()))
        }
    }

    #[test]
    fn trims_only_the_edges() {
        let r = normalize(vec![json!("  hello world  "), json!("ignored")]).unwrap();
        assert_eq!(r, PredictionResponse { content: "hello world".into() });
        let r = normalize(vec![json!("\n\t a  b\u{00a0}c \r\n")]).unwrap();
        assert_eq!(r.content, "a  b\u{00a0}c");
        assert_eq!(normalize(vec![json!("   ")]).unwrap().content, "");
    }

    #[test]
    fn empty_and_non_text_outputs_are_malformed() {
        assert_eq!(normalize(vec![]), Err(MalformedOutput::Empty));
        assert_eq!(normalize(vec![json!(42), json!("text")]), Err(MalformedOutput::NotText { kind: "a number" }));
        assert_eq!(normalize(vec![Value::Null]), Err(MalformedOutput::NotText { kind: "null" }));
        assert_eq!(normalize(vec![json!({"content": "x"})]), Err(MalformedOutput::NotText { kind: "an object" }));
    }

    #[test]
    fn response_serializes_to_single_content_key() {
        let body = serde_json::to_value(PredictionResponse { content: "hi".into() }).unwrap();
        assert_eq!(body, json!({"content": "hi"}));
    }

    #[tokio::test]
    async fn prediction_error_chain_names_cause_once() {
        let gateway = PredictionGateway::from_predictor("models:/qa/1".parse().unwrap(), Arc::new(Failing));
        let err = gateway.predict("q").await.unwrap_err();
        assert!(matches!(err, GatewayError::Prediction(PredictorError::Backend(_))));
        let chain = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chain.matches("upstream returned 429").count(), 1, "{chain}");
    }
}
