//! OpenAI Backend Implementation
//!
//! Cloud backend for an OpenAI-compatible chat-completion API.
//!
//! Streaming responses arrive as Server-Sent-Events lines (`data: {json}`).
//! Each chunk exposes an optional `choices[0].delta.content`; the first chunk
//! without content ends the sequence even if the transport has more to send.

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

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Option<Vec<ChunkChoice>>,
    /// Set instead of `choices` when the API fails mid-stream
    error: Option<serde_json::Value>,
}

impl ChatChunk {
    /// Content of the first choice; `None` marks the end of content
    fn into_content(self) -> Result<Option<String>, BackendError> {
        if let Some(error) = self.error {
            let message = error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            return Err(BackendError::Protocol(format!("OpenAI reported an error: {message}")));
        }
        let choices = self
            .choices
            .ok_or_else(|| BackendError::Protocol("OpenAI chunk has no choices field".to_string()))?;

        Ok(choices.into_iter().next().and_then(|choice| choice.delta.content))
    }
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible backend client
#[derive(Clone)]
pub struct OpenAiBackend {
    /// API base URL, without the `/v1` suffix
    base_url: String,
    /// Bearer credential
    api_key: String,
    /// Model to generate with
    model: String,
    /// System prompt sent with every request
    system_prompt: String,
    /// Total time allowed for a completed (non-streaming) call
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a new OpenAI backend
    ///
    /// `timeout` bounds connecting, each read of a streamed body, and the
    /// whole of a completed call.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
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
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            request_timeout: timeout,
            http_client,
        })
    }

    /// Create from broker configuration
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BackendError> {
        Self::new(
            config.openai_base_url.clone(),
            config.api_key.clone().unwrap_or_default(),
            config.cloud_model.clone(),
            config.system_prompt.clone(),
            config.request_timeout(),
        )
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }

    /// Build the chat-completion request body
    fn request_body(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = params.extra.clone();
        if let Some(temperature) = params.temperature {
            body.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        body.insert("model".to_string(), serde_json::json!(self.model));
        body.insert(
            "messages".to_string(),
            serde_json::json!([
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt.as_str() },
            ]),
        );
        body.insert("stream".to_string(), serde_json::json!(stream));
        body.insert(
            "max_tokens".to_string(),
            serde_json::json!(params.effective_max_output()),
        );

        serde_json::Value::Object(body)
    }

    async fn post_completion(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let body = self.request_body(prompt, params, stream);

        let mut request = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body);
        if !stream {
            request = request.timeout(self.request_timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        Ok(response)
    }
}

/// Read chat-completion event lines and forward each content delta
///
/// Stops at the first chunk whose delta carries no content, or at `[DONE]`.
pub(crate) async fn pump_sse<S, B, E>(chunks: S, tx: mpsc::Sender<Result<String, BackendError>>)
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
                        "OpenAI stream interrupted: {e}"
                    ))))
                    .await;
                return;
            }
            None => (lines.finish().into_iter().collect(), true),
        };

        for line in pending {
            let Some(data) = line.trim().strip_prefix("data:") else {
                // Blank separators, comments and other SSE fields
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                return;
            }

            let decoded = serde_json::from_str::<ChatChunk>(data)
                .map_err(|e| BackendError::Protocol(format!("invalid OpenAI stream chunk: {e}")))
                .and_then(ChatChunk::into_content);

            let content = match decoded {
                Ok(content) => content,
                Err(e) => {
                    warn!(error = %e, "OpenAI stream ended with a bad chunk");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let Some(content) = content else {
                debug!("OpenAI signalled end of content");
                return;
            };

            if !content.is_empty() && tx.send(Ok(escape_newlines(&content))).await.is_err() {
                debug!("Fragment consumer went away, abandoning OpenAI stream");
                return;
            }
        }

        if closed {
            return;
        }
    }
}

#[async_trait]
impl TextBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.models_url())
            .bearer_auth(&self.api_key)
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
        let response = self.post_completion(prompt, params, false).await?;

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(format!("invalid OpenAI response: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| BackendError::Protocol("OpenAI response has no choices".to_string()))
    }

    async fn stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<FragmentStream, BackendError> {
        let response = self.post_completion(prompt, params, true).await?;
        let (tx, stream) = fragment_channel();

        tokio::spawn(pump_sse(response.bytes_stream(), tx));

        Ok(stream)
    }
}
