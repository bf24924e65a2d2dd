//! End-to-end tests for the broker HTTP surface
//!
//! Each test serves the real router on an ephemeral port with a scripted
//! backend and drives it with an HTTP client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use broker_core::{
    BackendError, BackendKind, BackendSelector, FragmentStream, GenerationParams, Generator,
    Prompt, SessionBroker, SessionToken, TextBackend,
};
use broker_daemon::{serve, AppState};

// =============================================================================
// Scripted backend
// =============================================================================

enum Script {
    /// Stream these fragments, complete with their concatenation
    Fragments(Vec<&'static str>),
    /// Stream whatever the test pushes through the channel
    Live(Mutex<Option<mpsc::Receiver<Result<String, BackendError>>>>),
    /// Fail every call
    Fail(BackendError),
}

struct ScriptedBackend {
    script: Script,
    seen: Mutex<Vec<GenerationParams>>,
}

#[async_trait]
impl TextBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn health_check(&self) -> bool {
        !matches!(self.script, Script::Fail(_))
    }

    async fn complete(
        &self,
        _prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        self.seen.lock().await.push(params.clone());
        match &self.script {
            Script::Fragments(fragments) => Ok(fragments.concat()),
            Script::Live(_) => Ok(String::new()),
            Script::Fail(e) => Err(e.clone()),
        }
    }

    async fn stream(
        &self,
        _prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<FragmentStream, BackendError> {
        self.seen.lock().await.push(params.clone());
        match &self.script {
            Script::Fragments(fragments) => {
                let items: Vec<Result<String, BackendError>> =
                    fragments.iter().map(|f| Ok((*f).to_string())).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Script::Live(rx) => {
                let rx = rx
                    .lock()
                    .await
                    .take()
                    .ok_or_else(|| BackendError::Unavailable("already streamed".to_string()))?;
                Ok(Box::pin(channel_stream(rx)))
            }
            Script::Fail(e) => Err(e.clone()),
        }
    }
}

fn channel_stream(
    mut rx: mpsc::Receiver<Result<String, BackendError>>,
) -> impl futures::Stream<Item = Result<String, BackendError>> + Send + Sync {
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
}

struct TestServer {
    base: String,
    broker: SessionBroker,
    backend: Arc<ScriptedBackend>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(script: Script) -> Self {
        let backend = Arc::new(ScriptedBackend {
            script,
            seen: Mutex::new(Vec::new()),
        });
        let broker = SessionBroker::new();
        let selector = BackendSelector::with_backend(backend.clone());
        let state = AppState::new(Generator::new(selector), broker.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, std::future::pending()));

        Self {
            base: format!("http://{addr}"),
            broker,
            backend,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn start_stream(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/generate/start_stream"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn open_token(&self) -> String {
        let response = self.start_stream(standard_request()).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    async fn get_stream(&self, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/generate/stream_response/{token}")))
            .send()
            .await
            .unwrap()
    }
}

fn standard_request() -> serde_json::Value {
    serde_json::json!({
        "prompt": "Write three learning outcomes",
        "options": { "uiLevel": "Standard", "topic": "fractions" }
    })
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_start_then_drain_stream() {
    let server = TestServer::start(Script::Fragments(vec!["Hel", "lo", " world"])).await;

    let token = server.open_token().await;
    assert!(server.broker.contains(&SessionToken::from(token.as_str())));

    let response = server.get_stream(&token).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    let body = response.text().await.unwrap();

    assert_eq!(body, "data: Hel\n\ndata: lo\n\ndata:  world\n\n");
    assert!(server.broker.is_empty());
}

#[tokio::test]
async fn test_second_drain_is_not_found() {
    let server = TestServer::start(Script::Fragments(vec!["once"])).await;
    let token = server.open_token().await;

    let first = server.get_stream(&token).await;
    assert_eq!(first.text().await.unwrap(), "data: once\n\n");

    let second = server.get_stream(&token).await;
    assert_eq!(second.status(), 404);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["kind"], "unknown_token");
}

#[tokio::test]
async fn test_never_issued_token_is_not_found() {
    let server = TestServer::start(Script::Fragments(vec![])).await;

    let response = server.get_stream("not-a-token").await;

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_payloads_flush_as_produced() {
    let (tx, rx) = mpsc::channel(8);
    let server = TestServer::start(Script::Live(Mutex::new(Some(rx)))).await;
    let token = server.open_token().await;

    let response = server.get_stream(&token).await;
    let mut body = response.bytes_stream();

    tx.send(Ok("first".to_string())).await.unwrap();
    let mut received = Vec::new();
    while !received.ends_with(b"data: first\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("first payload not flushed")
            .unwrap()
            .unwrap();
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"data: first\n\n");

    tx.send(Ok("second".to_string())).await.unwrap();
    drop(tx);
    while let Some(chunk) = body.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, b"data: first\n\ndata: second\n\n");
}

#[tokio::test]
async fn test_client_disconnect_retires_session() {
    let (tx, rx) = mpsc::channel(8);
    let server = TestServer::start(Script::Live(Mutex::new(Some(rx)))).await;
    let token = server.open_token().await;
    let session = SessionToken::from(token.as_str());

    let response = server.get_stream(&token).await;
    tx.send(Ok("partial".to_string())).await.unwrap();
    drop(response);

    // The server notices the closed connection on a later write
    let retired = tokio::time::timeout(Duration::from_secs(5), async {
        while server.broker.contains(&session) {
            let _ = tx.send(Ok("more".to_string())).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    assert!(retired.is_ok(), "session still present after disconnect");
    assert_eq!(server.get_stream(&token).await.status(), 404);
}

#[tokio::test]
async fn test_start_stream_backend_failure() {
    let server = TestServer::start(Script::Fail(BackendError::Unavailable(
        "connection refused".to_string(),
    )))
    .await;

    let response = server.start_stream(standard_request()).await;

    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "backend_unavailable");
    assert!(server.broker.is_empty());
}

// =============================================================================
// Completed generations
// =============================================================================

#[tokio::test]
async fn test_generate_response_returns_text() {
    let server = TestServer::start(Script::Fragments(vec!["Outcome ", "one."])).await;

    let response = server
        .client
        .post(server.url("/generate/generate_response"))
        .json(&standard_request())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["text"], "Outcome one.");
    assert_eq!(
        server.backend.seen.lock().await.as_slice(),
        &[GenerationParams::default()]
    );
}

#[tokio::test]
async fn test_ample_settings_reach_backend() {
    let server = TestServer::start(Script::Fragments(vec!["ok"])).await;
    let request = serde_json::json!({
        "prompt": "p",
        "options": {
            "uiLevel": "Ample",
            "topic": "fractions",
            "llmSettings": { "maxTokens": 400, "temperature": 0.5 }
        }
    });

    let response = server
        .client
        .post(server.url("/generate/generate_response"))
        .json(&request)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let expected = GenerationParams::default()
        .with_max_output_units(400)
        .with_temperature(0.5);
    assert_eq!(server.backend.seen.lock().await.as_slice(), &[expected]);
}

#[tokio::test]
async fn test_generate_response_protocol_error() {
    let server =
        TestServer::start(Script::Fail(BackendError::Protocol("garbled".to_string()))).await;

    let response = server
        .client
        .post(server.url("/generate/generate_response"))
        .json(&standard_request())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "backend_protocol_error");
}

#[tokio::test]
async fn test_unknown_ui_level_is_rejected() {
    let server = TestServer::start(Script::Fragments(vec![])).await;

    let response = server
        .start_stream(serde_json::json!({ "prompt": "p", "options": { "uiLevel": "Expert" } }))
        .await;

    assert_eq!(response.status(), 422);
    assert!(server.broker.is_empty());
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_reports_backend_and_sessions() {
    let server = TestServer::start(Script::Fragments(vec!["x"])).await;
    server.open_token().await;

    let body: serde_json::Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "local");
    assert_eq!(body["healthy"], true);
    assert_eq!(body["active_sessions"], 1);
}
