//! Tessera Core - inference service state for embedding and vision models.
//!
//! This crate provides the process-scoped pieces a transport layer needs:
//! - The [`InferenceService`] with predict, pipeline and index operations
//! - Named vector indexes over string ids
//! - Configuration loading and tracing setup
//! - Error handling with transport status codes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tessera_core::{Config, InferenceService, PredictRequest, telemetry};
//! use tessera_models::MockBackend;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> tessera_core::Result<()> {
//!     let config = Config::load()?;
//!     telemetry::init_tracing(&config.logging)?;
//!
//!     let service = InferenceService::new(config, Arc::new(MockBackend::new()))?;
//!     service.start();
//!     service.warm_up().await?;
//!
//!     let output = service
//!         .predict(PredictRequest::text("ViT-B-32__openai", "clip", "a photo of a cat"))
//!         .await?;
//!     println!("{output:?}");
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod service;
pub mod telemetry;
pub mod vector;

pub use config::{Config, DispatchConfig, LogFormat, LoggingConfig, ModelsConfig, PreloadModel};
pub use error::{Result, ServiceError};
pub use service::{
    DEFAULT_SEARCH_K, InferenceService, PipelineOutput, PipelineRequest, PredictRequest,
};
pub use vector::{
    AnnIndex, Embeddings, FlatIndex, MIN_EMBEDDING_DIMS, NO_MATCH, VectorError, VectorIndex,
    VectorStore,
};
