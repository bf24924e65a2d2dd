//! Backend Traits
//!
//! Trait definitions for text-generation backends. This abstraction lets the
//! generation facade and the session broker work against a cloud provider or
//! a locally hosted model server without changing core logic.
//!
//! # Design Philosophy
//!
//! The [`TextBackend`] trait provides one capability in two shapes:
//! - A completed text for a prompt (`complete`)
//! - A lazy, forward-only sequence of fragments for a prompt (`stream`)
//!
//! Implementations handle provider-specific details (API formats, auth,
//! framing of incremental responses). Every streamed fragment is passed
//! through [`escape_newlines`] before it leaves the adapter.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::options::Prompt;

/// Hard ceiling on output length, enforced by every adapter.
pub const FAILSAFE_MAX_OUTPUT: u32 = 2000;

/// Fragments buffered between a backend reader task and its consumer.
const FRAGMENT_CHANNEL_CAPACITY: usize = 100;

/// Ordered, single-pass sequence of text fragments from one generation.
///
/// An `Err` item ends the sequence; nothing follows it.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send + Sync>>;

/// Errors surfaced by backend adapters
///
/// Neither kind is retried inside this crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached or refused the call
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered in a shape that could not be decoded
    #[error("backend protocol error: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Short machine-readable name for the error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "backend_unavailable",
            Self::Protocol(_) => "backend_protocol_error",
        }
    }
}

/// Which family of backend serves generations for this process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote hosted chat-completion API
    Cloud,
    /// Locally hosted model server
    Local,
}

impl BackendKind {
    /// Lowercase identifier used in logs and health reports
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning settings forwarded to a backend
///
/// Deserializes from the `llmSettings` object of an Ample request. Keys the
/// adapter does not recognise are kept in `extra` and passed through.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Requested output length; capped at [`FAILSAFE_MAX_OUTPUT`]
    #[serde(default, rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_output_units: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Provider-specific sampling controls, forwarded opaquely
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenerationParams {
    /// Set requested output length
    #[must_use]
    pub fn with_max_output_units(mut self, max_output_units: u32) -> Self {
        self.max_output_units = Some(max_output_units);
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Add a pass-through sampling control
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Output length actually sent to the backend
    #[must_use]
    pub fn effective_max_output(&self) -> u32 {
        self.max_output_units
            .map_or(FAILSAFE_MAX_OUTPUT, |requested| requested.min(FAILSAFE_MAX_OUTPUT))
    }
}

/// Escape literal newlines so a fragment fits in a single-line event payload
#[must_use]
pub fn escape_newlines(fragment: &str) -> String {
    fragment.replace('\n', "\\n")
}

/// Create the channel a backend reader task feeds fragments into
pub(crate) fn fragment_channel() -> (mpsc::Sender<Result<String, BackendError>>, FragmentStream) {
    let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
    (tx, Box::pin(ReceiverStream::new(rx)))
}

/// Text-generation backend
///
/// Implement this trait to add support for another provider.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Backend name (e.g., "OpenAI", "Ollama")
    fn name(&self) -> &str;

    /// Which family this backend belongs to
    fn kind(&self) -> BackendKind;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Generate a complete response for `prompt`
    async fn complete(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<String, BackendError>;

    /// Start a streaming generation for `prompt`
    ///
    /// Returns once the backend has accepted the call. Fragments arrive
    /// through the returned stream in the order the backend produced them.
    /// Dropping the stream abandons the backend call.
    async fn stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<FragmentStream, BackendError>;
}
