//! Model implementations for Tessera.
//!
//! This crate provides the concrete model variants behind the
//! `InferenceModel` trait, the factory that picks a variant by category, the
//! dispatcher that moves blocking work off the scheduler and the model cache.
//!
//! # Supported Categories
//!
//! - **CLIP**: text and image embeddings
//! - **Facial recognition**: face boxes with recognition embeddings
//! - **Image classification**: thresholded labels
//!
//! [`MockBackend`] stands in for the inference engine in tests and
//! development setups.

mod base;
pub mod cache;
pub mod classification;
pub mod clip;
pub mod dispatch;
pub mod facial;
pub mod factory;
pub mod mock;

pub use cache::{
    CacheConfig, CacheConfigError, CacheEntry, CacheStats, LoadOutcome, ModelCache, ModelKey,
    ModelLocks,
};
pub use classification::{DEFAULT_MIN_LABEL_SCORE, ImageClassificationModel};
pub use clip::{ClipMode, ClipModel};
pub use dispatch::{DispatchError, Dispatcher};
pub use facial::{DEFAULT_MIN_FACE_SCORE, FacialRecognitionModel};
pub use factory::ModelFactory;
pub use mock::{MOCK_EMBEDDING_DIMS, MockBackend, MockSession, mock_embedding};
