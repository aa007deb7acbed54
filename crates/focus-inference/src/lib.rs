//! # focus-inference
//!
//! Classification and extraction capabilities for focus.
//!
//! This crate provides:
//! - Ollama backend (default local classifier model)
//! - OpenAI-compatible backend (deep extraction, feature `openai`)
//! - Zero-cost heuristic pre-classification for bulk and no-reply mail
//! - Model-driven [`ModelClassifier`] and [`ModelExtractor`]
//! - Regex-based [`PatternExtractor`] for automated mail (no external call)
//! - Lenient parsing of model JSON output
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable Ollama backend
//! - `openai` (default): Enable OpenAI-compatible backend
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use focus_inference::{ModelClassifier, OllamaBackend, TieredClassifier};
//!
//! let backend = Arc::new(OllamaBackend::from_env());
//! let classifier = TieredClassifier::new(ModelClassifier::new(backend));
//! ```

pub mod classifier;
pub mod extractor;
pub mod heuristics;
pub mod parsing;
pub mod patterns;
pub mod prompts;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

// Re-export core types
pub use focus_core::*;

pub use classifier::{ModelClassifier, TieredClassifier};
pub use extractor::ModelExtractor;
pub use heuristics::pre_classify;
pub use patterns::PatternExtractor;

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};
