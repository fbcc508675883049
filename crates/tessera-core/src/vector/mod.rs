//! Named nearest-neighbor indexes over string-identified embeddings.

mod embeddings;
mod flat;
mod store;

use thiserror::Error;

pub use embeddings::{Embeddings, MIN_EMBEDDING_DIMS};
pub use flat::{AnnIndex, FlatIndex, NO_MATCH};
pub use store::{VectorIndex, VectorStore};

/// Errors raised by the vector store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorError {
    /// Malformed embeddings, id/embedding count mismatch or duplicate ids.
    #[error("{0}")]
    BadInput(String),

    /// No index with this name and dimensionality.
    #[error("Index '{0}' not found")]
    NotFound(String),
}
