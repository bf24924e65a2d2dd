//! Generation Facade
//!
//! Single entry point for callers. Dispatches a pre-built prompt to the
//! selected backend, forwarding tuning settings only for Ample requests.
//! No retry, no caching, no fallback between backends.

use tracing::debug;

use crate::backend::{BackendError, BackendKind, FragmentStream};
use crate::options::{GenerationOptions, Prompt};
use crate::selector::BackendSelector;
use crate::session::{SessionBroker, SessionToken};

/// Dispatches generations to the process's backend
#[derive(Clone, Debug)]
pub struct Generator {
    selector: BackendSelector,
}

impl Generator {
    /// Create a generator over a backend selection
    #[must_use]
    pub fn new(selector: BackendSelector) -> Self {
        Self { selector }
    }

    /// Which backend family serves this generator
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.selector.kind()
    }

    /// Check if the selected backend is reachable
    pub async fn health_check(&self) -> bool {
        self.selector.select().health_check().await
    }

    /// Generate a complete response
    pub async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        let backend = self.selector.select();
        let params = options.generation_params();

        debug!(
            backend = backend.name(),
            ui_level = options.ui_level(),
            max_output = params.effective_max_output(),
            "Generating response"
        );

        backend.complete(prompt, &params).await
    }

    /// Start a streaming generation
    pub async fn generate_stream(
        &self,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<FragmentStream, BackendError> {
        let backend = self.selector.select();
        let params = options.generation_params();

        debug!(
            backend = backend.name(),
            ui_level = options.ui_level(),
            max_output = params.effective_max_output(),
            "Starting streaming response"
        );

        backend.stream(prompt, &params).await
    }

    /// Start a streaming generation and park it in `broker`
    ///
    /// Returns the token a later caller drains the stream with.
    pub async fn start_stream(
        &self,
        broker: &SessionBroker,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<SessionToken, BackendError> {
        let stream = self.generate_stream(prompt, options).await?;
        Ok(broker.open(stream))
    }
}
