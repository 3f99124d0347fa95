//! `run()` against an empty registry: startup must fail before readiness is
//! ever reported.

#[tokio::test]
async fn missing_model_aborts_startup_before_ready() {
    let registry = tempfile::tempdir().unwrap();
    std::env::set_var("GATEWAY__REGISTRY_ROOT", registry.path());
    std::env::set_var("GATEWAY__MODEL_URI", "models:/missing/1");
    std::env::set_var("GATEWAY__HEALTH_PORT", "0");

    let err = inference_gateway::run().await.err().unwrap();
    assert!(format!("{err:#}").contains("model `missing` not found in registry"), "{err:#}");
    assert!(!gateway_core::is_ready());
}
