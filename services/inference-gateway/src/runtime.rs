//! Flavor runtime: turns a resolved registry entry into a callable predictor.

use crate::flavors::openai::OpenAiChatLoader;
use crate::predictor::Predictor;
use gateway_core::{OpenAiSettings, RegistryError, ResolvedModel};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("model `{name}` v{version} has no loadable flavor (manifest: [{available}], runtime: [{supported}])")]
    UnsupportedFlavor { name: String, version: u64, available: String, supported: String },
    #[error("flavor `{flavor}` failed to load model `{name}` v{version}")]
    Flavor { flavor: String, name: String, version: u64, #[source] source: BoxError },
}

/// Materializes predictors for one manifest flavor.
pub trait FlavorLoader: Send + Sync {
    fn flavor(&self) -> &str;
    fn load(&self, model: &ResolvedModel, conf: &serde_yaml::Value) -> Result<Arc<dyn Predictor>, BoxError>;
}

/// Loaders are tried in registration order; the first one whose flavor the
/// manifest declares wins.
#[derive(Default, Clone)]
pub struct ModelRuntime {
    loaders: Vec<Arc<dyn FlavorLoader>>,
}

impl ModelRuntime {
    pub fn new() -> Self { Self::default() }

    pub fn with_default_flavors(openai: &OpenAiSettings) -> Self {
        Self::new().with_loader(Arc::new(OpenAiChatLoader::new(openai.clone())))
    }

    pub fn with_loader(mut self, loader: Arc<dyn FlavorLoader>) -> Self {
        self.register(loader);
        self
    }

    pub fn register(&mut self, loader: Arc<dyn FlavorLoader>) {
        debug!(flavor = loader.flavor(), "flavor loader registered");
        self.loaders.push(loader);
    }

    pub fn flavors(&self) -> Vec<&str> { self.loaders.iter().map(|l| l.flavor()).collect() }

    pub fn load(&self, model: &ResolvedModel) -> Result<Arc<dyn Predictor>, ModelLoadError> {
        let hit = self.loaders.iter()
            .find_map(|l| model.manifest.flavors.get(l.flavor()).map(|conf| (l, conf)));
        let Some((loader, conf)) = hit else {
            return Err(ModelLoadError::UnsupportedFlavor {
                name: model.name.clone(),
                version: model.version,
                available: model.manifest.flavors.keys().cloned().collect::<Vec<_>>().join(", "),
                supported: self.flavors().join(", "),
            });
        };
        let predictor = loader.load(model, conf).map_err(|source| ModelLoadError::Flavor {
            flavor: loader.flavor().to_string(),
            name: model.name.clone(),
            version: model.version,
            source,
        })?;
        info!(model = %model.name, version = model.version, flavor = loader.flavor(), "predictor materialized");
        Ok(predictor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::PredictorError;
    use async_trait::async_trait;
    use gateway_core::ModelManifest;
    use serde_json::Value;
    use std::path::PathBuf;

    struct Fixed(&'static str);

    #[async_trait]
    impl Predictor for Fixed {
        async fn predict(&self, _input: &str) -> Result<Vec<Value>, PredictorError> {
            Ok(vec![Value::String(self.0.to_string())])
        }
    }

    struct NamedLoader { flavor: &'static str, fail: bool }

    impl FlavorLoader for NamedLoader {
        fn flavor(&self) -> &str { self.flavor }
        fn load(&self, _model: &ResolvedModel, _conf: &serde_yaml::Value) -> Result<Arc<dyn Predictor>, BoxError> {
            if self.fail { return Err("missing native library".into()); }
            Ok(Arc::new(Fixed(self.flavor)))
        }
    }

    fn model_with(flavors: &[&str]) -> ResolvedModel {
        let manifest = flavors.iter().fold(ModelManifest::default(), |m, f| m.with_flavor(f, serde_yaml::Value::Null));
        ResolvedModel { name: "qa".into(), version: 3, path: PathBuf::from("/registry/qa/3"), manifest }
    }

    #[tokio::test]
    async fn first_registered_matching_flavor_wins() {
        let runtime = ModelRuntime::new()
            .with_loader(Arc::new(NamedLoader { flavor: "onnx", fail: false }))
            .with_loader(Arc::new(NamedLoader { flavor: "python_function", fail: false }))
            .with_loader(Arc::new(NamedLoader { flavor: "openai", fail: false }));
        let predictor = runtime.load(&model_with(&["openai", "python_function"])).unwrap();
        assert_eq!(predictor.predict("q").await.unwrap(), vec![Value::String("python_function".into())]);
    }

    #[test]
    fn unsupported_flavor_lists_both_sides() {
        let runtime = ModelRuntime::new().with_loader(Arc::new(NamedLoader { flavor: "openai", fail: false }));
        let err = runtime.load(&model_with(&["sklearn"])).err().unwrap();
        let msg = err.to_string();
        assert!(matches!(err, ModelLoadError::UnsupportedFlavor { version: 3, .. }));
        assert!(msg.contains("sklearn") && msg.contains("openai"), "{msg}");
    }

    #[test]
    fn loader_failure_keeps_source() {
        let runtime = ModelRuntime::new().with_loader(Arc::new(NamedLoader { flavor: "openai", fail: true }));
        match runtime.load(&model_with(&["openai"])) {
            Err(ModelLoadError::Flavor { flavor, source, .. }) => {
                assert_eq!(flavor, "openai");
                assert_eq!(source.to_string(), "missing native library");
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn flavor_error_chain_names_cause_once() {
        let runtime = ModelRuntime::new().with_loader(Arc::new(NamedLoader { flavor: "openai", fail: true }));
        let err = runtime.load(&model_with(&["openai"])).err().unwrap();
        let chain = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chain.matches("missing native library").count(), 1, "{chain}");
        assert!(chain.starts_with("flavor `openai` failed to load model `qa` v3"), "{chain}");
    }
}
