//! Core data types for model caching.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tessera_abstraction::{InferenceModel, ModelOptions, ModelType};
use tokio::time::Instant;

/// Cache key for identifying cached models.
///
/// Models are cached by name, category and the subset of options that change
/// what gets loaded. Inference-time options never produce a separate entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    /// The model name.
    pub model_name: String,
    /// The model category.
    pub model_type: ModelType,
    /// Normalized load-affecting options.
    pub load_options: BTreeMap<String, String>,
}

impl ModelKey {
    /// Create a new cache key from request parameters.
    ///
    /// # Arguments
    /// * `model_name` - The model name
    /// * `model_type` - The model category
    /// * `options` - Request options; only load-affecting keys are kept
    pub fn new(model_name: impl Into<String>, model_type: ModelType, options: &ModelOptions) -> Self {
        Self {
            model_name: model_name.into(),
            model_type,
            load_options: options.load_options(model_type),
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.model_type, self.model_name)?;
        for (key, value) in &self.load_options {
            write!(f, ";{key}={value}")?;
        }
        Ok(())
    }
}

/// A cached model entry with metadata.
pub struct CacheEntry {
    key: ModelKey,
    model: Arc<dyn InferenceModel>,
    last_accessed: Mutex<Instant>,
    access_count: AtomicU64,
    created_at: Instant,
}

impl CacheEntry {
    /// Create a new cache entry around an unloaded model.
    pub fn new(key: ModelKey, model: Arc<dyn InferenceModel>) -> Self {
        let now = Instant::now();
        Self {
            key,
            model,
            last_accessed: Mutex::new(now),
            access_count: AtomicU64::new(1),
            created_at: now,
        }
    }

    /// The key this entry is stored under.
    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    /// The wrapped model.
    pub fn model(&self) -> &Arc<dyn InferenceModel> {
        &self.model
    }

    /// Whether the wrapped model is loaded.
    pub fn is_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    /// Update the last accessed timestamp and increment access count.
    ///
    /// This should be called whenever the entry is handed out.
    pub fn touch(&self) {
        *self.last_accessed.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Restarts the idle clock without counting an access.
    pub fn refresh(&self) {
        *self.last_accessed.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Timestamp of last access.
    pub fn last_accessed(&self) -> Instant {
        *self.last_accessed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since last access, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_accessed())
    }

    /// Number of times this entry has been handed out.
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Timestamp when the entry was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("loaded", &self.is_loaded())
            .field("last_accessed", &self.last_accessed())
            .field("access_count", &self.access_count())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total number of `get` calls that found an entry.
    pub total_hits: u64,
    /// Total number of `get` calls that created an entry.
    pub total_misses: u64,
    /// Total number of entries removed by the sweep or `remove`.
    pub total_evictions: u64,
    /// Total number of successful loads.
    pub total_loads: u64,
    /// Total number of load attempts retried after clearing artifacts.
    pub total_load_retries: u64,
    /// Current number of entries.
    pub cache_size: usize,
}
