//! OpenAI-compatible inference backend.
//!
//! Works with any endpoint that speaks the chat completions API, including
//! OpenAI, OpenRouter, vLLM and Ollama in compatibility mode. Used as the
//! deep extraction tier.
//!
//! # Example
//!
//! ```rust,no_run
//! use focus_inference::openai::{OpenAIBackend, OpenAIConfig};
//!
//! let backend = OpenAIBackend::new(OpenAIConfig {
//!     base_url: "http://localhost:11434/v1".to_string(),
//!     api_key: None,
//!     gen_model: "llama3".to_string(),
//!     ..OpenAIConfig::default()
//! })
//! .unwrap();
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig, DEFAULT_GEN_MODEL, DEFAULT_OPENAI_URL, DEFAULT_TIMEOUT_SECS};
pub use error::{to_focus_error, OpenAIErrorCode};
pub use types::*;
