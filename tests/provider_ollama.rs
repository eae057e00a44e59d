use std::time::Duration;

use pixelbench::provider::ollama::OllamaProvider;
use pixelbench::provider::{GenerateRequest, ModelProvider, ProviderError};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> OllamaProvider {
    OllamaProvider::new(server.uri(), Duration::from_secs(5)).unwrap()
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "message": { "role": "assistant", "content": content },
        "prompt_eval_count": 5,
        "eval_count": 9
    }))
}

#[tokio::test]
async fn generate_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply("<html></html>"))
        .mount(&server)
        .await;

    let resp = provider(&server)
        .generate(&GenerateRequest::new("llava:13b", "build a page"))
        .await
        .unwrap();
    assert_eq!(resp.content, "<html></html>");
    assert_eq!(resp.input_tokens, Some(5));
    assert_eq!(resp.output_tokens, Some(9));
}

#[tokio::test]
async fn history_accumulates_per_model_and_clears() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply("reply"))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let mut req = GenerateRequest::new("llava:13b", "first");
    req.use_history = true;
    provider.generate(&req).await.unwrap();

    let mut req = GenerateRequest::new("llava:13b", "second");
    req.use_history = true;
    provider.generate(&req).await.unwrap();

    let received = server.received_requests().await.unwrap();
    let first: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let second: serde_json::Value = serde_json::from_slice(&received[1].body).unwrap();
    assert_eq!(first["messages"].as_array().unwrap().len(), 1);
    // Second call replays the stored user/assistant pair before the new turn.
    assert_eq!(second["messages"].as_array().unwrap().len(), 3);
    assert_eq!(second["messages"][0]["content"], "first");
    assert_eq!(second["messages"][1]["role"], "assistant");

    provider.clear_history(Some("llava:13b")).await;
    let mut req = GenerateRequest::new("llava:13b", "third");
    req.use_history = true;
    provider.generate(&req).await.unwrap();
    let received = server.received_requests().await.unwrap();
    let third: serde_json::Value = serde_json::from_slice(&received[2].body).unwrap();
    assert_eq!(third["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn json_mode_sets_the_format_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply("{\"score\": 5}"))
        .mount(&server)
        .await;

    let mut req = GenerateRequest::new("llava:13b", "score it");
    req.json_mode = true;
    provider(&server).generate(&req).await.unwrap();

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["format"], "json");
}

#[tokio::test]
async fn server_error_carries_status_and_retryability() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let err = provider(&server)
        .generate(&GenerateRequest::new("llava:13b", "p"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Provider { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn lists_local_models_from_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "llava:13b" }, { "name": "qwen2.5-coder:14b" }]
        })))
        .mount(&server)
        .await;

    let p = provider(&server);
    assert!(p.is_available().await);
    let models = p.list_models().await.unwrap();
    assert_eq!(models, vec!["llava:13b", "qwen2.5-coder:14b"]);
}
