//! Shared test utilities for Tessera Core integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use tessera_core::{Config, InferenceService};
use tessera_models::MockBackend;

/// Configuration pointing the artifact folder at `cache_folder`.
pub fn test_config(cache_folder: &Path, request_threads: usize, ttl_secs: u64) -> Config {
    let mut config = Config::new();
    config.models.cache_folder = cache_folder.to_path_buf();
    config.dispatch.request_threads = request_threads;
    config.cache.ttl_secs = ttl_secs;
    config
}

/// Builds a service over a fresh mock backend.
///
/// # Panics
/// Panics if the configuration is invalid.
pub fn test_service(config: Config) -> (InferenceService, Arc<MockBackend>) {
    let backend = Arc::new(MockBackend::new());
    let service = InferenceService::new(config, backend.clone()).expect("valid test config");
    (service, backend)
}

/// A row of `dims` copies of `value`.
pub fn row(value: f32, dims: usize) -> Vec<f32> {
    vec![value; dims]
}
