//! Text-Generation Backend Integration
//!
//! This module provides abstracted access to text-generation backends
//! through a common trait interface.
//!
//! # Available Backends
//!
//! - **OpenAI**: Hosted chat-completion API (cloud)
//! - **Ollama**: Local model server
//!
//! # Usage
//!
//! ```ignore
//! use broker_core::backend::{OllamaBackend, TextBackend, GenerationParams};
//! use broker_core::{BrokerConfig, Prompt};
//!
//! let backend = OllamaBackend::from_config(&BrokerConfig::default())?;
//! let stream = backend
//!     .stream(&Prompt::new("Hello!"), &GenerationParams::default())
//!     .await?;
//! ```

mod lines;
mod ollama;
mod openai;
mod traits;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use traits::{
    escape_newlines, BackendError, BackendKind, FragmentStream, GenerationParams, TextBackend,
    FAILSAFE_MAX_OUTPUT,
};
