//! Ollama Backend Implementation
//!
//! Local backend for a locally hosted Ollama model server.
//!
//! # Ollama API
//!
//! - `/api/generate` - Generate completions (streaming or batch)
//! - `/api/tags` - List available models (used for health checks)
//!
//! Streaming responses are newline-delimited JSON objects, each carrying a
//! `response` text field. The sequence ends at the first object with
//! `done: true`, or when the transport closes.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::lines::LineBuffer;
use super::traits::{
    escape_newlines, fragment_channel, BackendError, BackendKind, FragmentStream,
    GenerationParams, TextBackend,
};
use crate::config::BrokerConfig;
use crate::options::Prompt;

/// One object of an `/api/generate` response
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    response: Option<String>,
    #[serde(default)]
    done: bool,
    /// Set instead of `response` when the server fails mid-generation
    error: Option<String>,
}

impl GenerateChunk {
    /// Generated text carried by this object
    fn into_text(self) -> Result<String, BackendError> {
        if let Some(error) = self.error {
            return Err(BackendError::Protocol(format!("Ollama reported an error: {error}")));
        }
        self.response.ok_or_else(|| {
            BackendError::Protocol("Ollama object has no response field".to_string())
        })
    }
}

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// Model to generate with
    model: String,
    /// System prompt sent with every request
    system_prompt: String,
    /// Total time allowed for a completed (non-streaming) call
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// `timeout` bounds connecting, each read of a streamed body, and the
    /// whole of a completed call. A stream may run longer in total as long as
    /// the server keeps producing.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            host: host.into(),
            port,
            model: model.into(),
            system_prompt: system_prompt.into(),
            request_timeout: timeout,
            http_client,
        })
    }

    /// Create from broker configuration
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BackendError> {
        Self::new(
            config.ollama_host.clone(),
            config.ollama_port,
            config.local_model.clone(),
            config.system_prompt.clone(),
            config.request_timeout(),
        )
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get generate endpoint URL
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the `/api/generate` request body
    fn request_body(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        stream: bool,
    ) -> serde_json::Value {
        let mut options = params.extra.clone();
        if let Some(temperature) = params.temperature {
            options.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        // Inserted last so pass-through keys cannot lift the ceiling
        options.insert(
            "num_predict".to_string(),
            serde_json::json!(params.effective_max_output()),
        );

        serde_json::json!({
            "model": self.model,
            "prompt": prompt.as_str(),
            "system": self.system_prompt,
            "stream": stream,
            "options": options,
        })
    }

    async fn post_generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let body = self.request_body(prompt, params, stream);

        let mut request = self.http_client.post(self.generate_url()).json(&body);
        if !stream {
            request = request.timeout(self.request_timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        Ok(response)
    }
}

/// Read newline-delimited generate objects and forward each `response` field
pub(crate) async fn pump_ndjson<S, B, E>(chunks: S, tx: mpsc::Sender<Result<String, BackendError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    futures::pin_mut!(chunks);
    let mut lines = LineBuffer::new();

    loop {
        let (pending, closed): (Vec<String>, bool) = match chunks.next().await {
            Some(Ok(bytes)) => {
                lines.push(bytes.as_ref());
                (std::iter::from_fn(|| lines.next_line()).collect(), false)
            }
            Some(Err(e)) => {
                let _ = tx
                    .send(Err(BackendError::Unavailable(format!(
                        "Ollama stream interrupted: {e}"
                    ))))
                    .await;
                return;
            }
            None => (lines.finish().into_iter().collect(), true),
        };

        for line in pending {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let decoded = serde_json::from_str::<GenerateChunk>(line)
                .map_err(|e| BackendError::Protocol(format!("invalid Ollama stream object: {e}")))
                .and_then(|chunk| {
                    let done = chunk.done;
                    chunk.into_text().map(|text| (text, done))
                });

            let (text, done) = match decoded {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(error = %e, "Ollama stream ended with a bad object");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            if !text.is_empty() && tx.send(Ok(escape_newlines(&text))).await.is_err() {
                debug!("Fragment consumer went away, abandoning Ollama stream");
                return;
            }

            if done {
                return;
            }
        }

        if closed {
            return;
        }
    }
}

#[async_trait]
impl TextBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let response = self.post_generate(prompt, params, false).await?;

        let chunk: GenerateChunk = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(format!("invalid Ollama response: {e}")))?;

        chunk.into_text()
    }

    async fn stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<FragmentStream, BackendError> {
        let response = self.post_generate(prompt, params, true).await?;
        let (tx, stream) = fragment_channel();

        tokio::spawn(pump_ndjson(response.bytes_stream(), tx));

        Ok(stream)
    }
}
