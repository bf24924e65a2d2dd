//! Backend Selection
//!
//! Chooses which backend serves generations for this process. The choice is
//! made once, from configuration, when the selector is built:
//!
//! - cloud credential present and non-empty: [`OpenAiBackend`]
//! - otherwise: [`OllamaBackend`]
//!
//! There is no fallback between the two at runtime. A cloud failure is
//! surfaced, never retried against the local server.

use std::sync::Arc;

use tracing::info;

use crate::backend::{BackendError, BackendKind, OllamaBackend, OpenAiBackend, TextBackend};
use crate::config::BrokerConfig;

/// Process-wide backend choice
#[derive(Clone)]
pub struct BackendSelector {
    kind: BackendKind,
    backend: Arc<dyn TextBackend>,
}

impl BackendSelector {
    /// Decide the backend from configuration and build it
    pub fn new(config: &BrokerConfig) -> Result<Self, BackendError> {
        let backend: Arc<dyn TextBackend> = if config.has_cloud_credential() {
            Arc::new(OpenAiBackend::from_config(config)?)
        } else {
            Arc::new(OllamaBackend::from_config(config)?)
        };

        info!(
            backend = backend.name(),
            kind = %backend.kind(),
            "Selected generation backend"
        );

        Ok(Self::with_backend(backend))
    }

    /// Use an already constructed backend
    #[must_use]
    pub fn with_backend(backend: Arc<dyn TextBackend>) -> Self {
        Self {
            kind: backend.kind(),
            backend,
        }
    }

    /// The backend serving this process
    ///
    /// Every call returns a handle to the same instance.
    #[must_use]
    pub fn select(&self) -> Arc<dyn TextBackend> {
        Arc::clone(&self.backend)
    }

    /// Which family was selected
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSelector")
            .field("kind", &self.kind)
            .field("backend", &self.backend.name())
            .finish()
    }
}
