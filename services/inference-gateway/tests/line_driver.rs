use async_trait::async_trait;
use inference_gateway::{serve_lines, PredictionGateway, Predictor, PredictorError};
use serde_json::{json, Value};
use std::sync::Arc;

struct Echo;

#[async_trait]
impl Predictor for Echo {
    async fn predict(&self, input: &str) -> Result<Vec<Value>, PredictorError> {
        match input {
            "boom" => Err(PredictorError::Api { status: 503, body: "unavailable".into() }),
            "nothing" => Ok(vec![]),
            _ => Ok(vec![json!(format!("  echo: {input}  "))]),
        }
    }
}

#[tokio::test]
async fn answers_each_line_and_reports_errors_in_band() {
    let gateway = PredictionGateway::from_predictor("models:/echo/1".parse().unwrap(), Arc::new(Echo));
    let input: &[u8] = b"hello\n\n   \nboom\nnothing\nlast line";
    let mut out = Vec::new();
    serve_lines(&gateway, input, &mut out).await.unwrap();

    let lines: Vec<Value> = String::from_utf8(out).unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], json!({"content": "echo: hello"}));
    assert!(lines[1]["error"].as_str().unwrap().contains("503"));
    assert!(lines[2]["error"].as_str().unwrap().contains("empty sequence"));
    assert_eq!(lines[3], json!({"content": "echo: last line"}));
}

#[tokio::test]
async fn empty_input_writes_nothing() {
    let gateway = PredictionGateway::from_predictor("models:/echo/1".parse().unwrap(), Arc::new(Echo));
    let mut out = Vec::new();
    serve_lines(&gateway, &b""[..], &mut out).await.unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn invalid_utf8_line_is_reported_and_loop_continues() {
    let gateway = PredictionGateway::from_predictor("models:/echo/1".parse().unwrap(), Arc::new(Echo));
    let input: &[u8] = b"first\n\xff\xfe bad\r\nthird\r\n";
    let mut out = Vec::new();
    serve_lines(&gateway, input, &mut out).await.unwrap();

    let lines: Vec<Value> = String::from_utf8(out).unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines, vec![
        json!({"content": "echo: first"}),
        json!({"error": "input is not valid UTF-8"}),
        json!({"content": "echo: third"}),
    ]);
}
