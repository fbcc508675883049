//! Model caching system for optimizing model lifecycle.
//!
//! This module keeps loaded models resident between requests, serializes
//! loads per model category and unloads models that have been idle for
//! longer than the configured TTL.

pub mod cache;
pub mod config;
pub mod locks;
pub mod types;

pub use cache::{LoadOutcome, ModelCache};
pub use config::{CacheConfig, CacheConfigError};
pub use locks::ModelLocks;
pub use types::{CacheEntry, CacheStats, ModelKey};
