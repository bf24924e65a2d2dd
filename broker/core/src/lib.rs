//! Broker Core - Generation Session Broker
//!
//! This crate turns a pre-built prompt into generated text, either as one
//! completed response or as a stream of fragments parked under an opaque
//! session token until a client drains it. It has no HTTP server
//! dependency; the daemon crate wires it to the network.
//!
//! # Architecture
//!
//! ```text
//!   validated request ──► Generator ──► BackendSelector ──► TextBackend
//!                            │                              (OpenAI | Ollama)
//!                            │ generate()        ◄── text
//!                            │ generate_stream() ◄── FragmentStream
//!                            ▼
//!                      SessionBroker
//!                   open(stream) ──► SessionToken
//!                   consume(token) ──► "data: <fragment>\n\n" ...
//! ```
//!
//! # Key Types
//!
//! - [`Generator`]: The facade callers use for both call shapes
//! - [`BackendSelector`]: Process-wide choice between the cloud and local backend
//! - [`TextBackend`]: Trait every backend adapter implements
//! - [`SessionBroker`]: Owner of in-flight streaming sessions
//! - [`GenerationOptions`]: Validated request, tagged by UI level
//!
//! # Quick Start
//!
//! ```ignore
//! use broker_core::{BackendSelector, BrokerConfig, Generator, SessionBroker};
//! use futures::StreamExt;
//!
//! let config = BrokerConfig::from_env();
//! let generator = Generator::new(BackendSelector::new(&config)?);
//! let broker = SessionBroker::new();
//!
//! let token = generator.start_stream(&broker, &prompt, &options).await?;
//! let mut payloads = broker.consume(&token)?;
//! while let Some(payload) = payloads.next().await {
//!     // flush payload to the client
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Backend trait and the OpenAI / Ollama adapters
//! - [`config`]: Layered configuration (defaults, TOML file, environment)
//! - [`generator`]: The generation facade
//! - [`options`]: Request options and prompt types
//! - [`selector`]: Backend selection
//! - [`session`]: Streaming session broker

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod generator;
pub mod options;
pub mod selector;
pub mod session;

// Re-exports for convenience
pub use backend::{
    escape_newlines, BackendError, BackendKind, FragmentStream, GenerationParams, OllamaBackend,
    OpenAiBackend, TextBackend, FAILSAFE_MAX_OUTPUT,
};
pub use config::{default_config_path, load_config_from_path, BrokerConfig, ConfigError};
pub use generator::Generator;
pub use options::{AmpleOptions, BasicOptions, GenerationOptions, Prompt, Selections};
pub use selector::BackendSelector;
pub use session::{frame_event, SessionBroker, SessionError, SessionStream, SessionToken};
