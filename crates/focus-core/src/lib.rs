//! # focus-core
//!
//! Core types, traits, and pure logic for focus.
//!
//! This crate provides the data model shared by every other crate, the
//! repository and capability traits that storage and model adapters
//! implement, the priority engine, and the name matching used by entity
//! resolution. With the `mock` feature it also provides an in-memory store
//! and scripted capabilities for tests.

pub mod archive;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod matching;
pub mod models;
pub mod priority;
pub mod traits;
pub mod uuid_utils;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export commonly used types at crate root
pub use archive::{content_hash, unprocessed_stream};
pub use config::{FocusConfig, ResolverThresholds};
pub use error::{Error, Result};
pub use models::*;
pub use priority::{
    effective_priority, rank, PriorityContext, PriorityItem, PriorityItemKind, PrioritySnapshot,
    RankedItem, RankingScope,
};
pub use traits::*;
pub use uuid_utils::new_v7;
