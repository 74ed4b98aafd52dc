use super::*;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer) -> OllamaConfig {
    let address = server.address();
    OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        model: "test-model".to_string(),
        batch_size: 2,
        embedding_dimension: 3,
        ..OllamaConfig::default()
    }
}

fn test_client(server: &MockServer) -> OllamaClient {
    OllamaClient::new(&test_config(server))
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(5))
        .with_retry_attempts(1)
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        embedding_dimension: 384,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.dimensions, 384);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(client.model_name(), "test-model");
    assert_eq!(EmbeddingModel::dimensions(&client), 384);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);
    assert_eq!(client.retry_attempts, 5);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);
}

#[tokio::test]
async fn embed_chunks_batches_with_document_prefix() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(json!({
            "model": "test-model",
            "input": ["search_document: a", "search_document: b"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(json!({
            "model": "test-model",
            "input": ["search_document: c"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.0, 0.0, 1.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let vectors = client
        .embed_chunks(&texts)
        .await
        .expect("embedding should succeed");

    assert_eq!(
        vectors,
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0]
        ]
    );
}

#[tokio::test]
async fn embed_query_uses_query_prefix() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({
            "input": ["search_query: where is the cat"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.5, 0.5, 0.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let vector = client
        .embed_query("where is the cat")
        .await
        .expect("query embedding should succeed");

    assert_eq!(vector, vec![0.5, 0.5, 0.0]);
}

#[tokio::test]
async fn empty_input_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let vectors = client
        .embed_chunks(&[])
        .await
        .expect("empty input should succeed");

    assert!(vectors.is_empty());
}

#[tokio::test]
async fn wrong_dimensions_are_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0]]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let error = client
        .embed_chunk("text")
        .await
        .expect_err("short vector should be rejected");

    assert!(format!("{error:#}").contains("dimension mismatch"));
}

#[tokio::test]
async fn response_count_mismatch_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[1.0, 0.0, 0.0]]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let texts = vec!["a".to_string(), "b".to_string()];
    let error = client
        .embed_chunks(&texts)
        .await
        .expect_err("missing vector should be rejected");

    assert!(format!("{error:#}").contains("Mismatch"));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server).with_retry_attempts(3);
    let result = client.embed_chunk("text").await;

    assert!(result.is_err());
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.0, 1.0, 0.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server).with_retry_attempts(2);
    let vector = client
        .embed_chunk("text")
        .await
        .expect("second attempt should succeed");

    assert_eq!(vector, vec![0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn health_check_finds_model() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "test-model", "size": 1024, "digest": "abc"},
                {"name": "llama3.2:latest"}
            ]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let result = tokio::task::spawn_blocking(move || {
        client.health_check()?;
        client.validate_model("missing-model")
    })
    .await
    .expect("blocking task should not panic");

    let error = result.expect_err("missing model should fail validation");
    assert!(error.to_string().contains("missing-model"));
}

#[tokio::test]
async fn generate_returns_trimmed_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llama3.2:latest",
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.2:latest",
            "response": "  This chunk describes cats.\n",
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let generated = tokio::task::spawn_blocking(move || {
        client.generate("llama3.2:latest", "Describe the chunk")
    })
    .await
    .expect("blocking task should not panic")
    .expect("generation should succeed");

    assert_eq!(generated, "This chunk describes cats.");
}
