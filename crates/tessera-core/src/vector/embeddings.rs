//! Validated embedding matrices.

use serde_json::Value;

use super::VectorError;

/// Smallest accepted embedding width.
pub const MIN_EMBEDDING_DIMS: usize = 10;

/// A row-major matrix of embeddings with at least [`MIN_EMBEDDING_DIMS`] columns.
///
/// Construction is the shared precondition of every index operation: the
/// input must be a one- or two-axis numeric array, a single vector becomes a
/// one-row matrix, and all rows must have the same width.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    dims: usize,
    data: Vec<f32>,
}

impl Embeddings {
    /// Builds a matrix from rows.
    ///
    /// # Errors
    /// Returns `VectorError::BadInput` for ragged rows or too few columns.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, VectorError> {
        let dims = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().find(|row| row.len() != dims) {
            return Err(VectorError::BadInput(format!(
                "All embeddings must have the same dimension; got {} and {}",
                dims,
                row.len()
            )));
        }
        check_dims(dims)?;
        Ok(Self { dims, data: rows.into_iter().flatten().collect() })
    }

    /// Builds a one-row matrix.
    ///
    /// # Errors
    /// Returns `VectorError::BadInput` if the vector is too short.
    pub fn from_vector(row: Vec<f32>) -> Result<Self, VectorError> {
        check_dims(row.len())?;
        Ok(Self { dims: row.len(), data: row })
    }

    /// Parses a JSON array of numbers or of equal-length number arrays.
    ///
    /// # Errors
    /// Returns `VectorError::BadInput` for anything else.
    pub fn from_json(value: &Value) -> Result<Self, VectorError> {
        match axes(value) {
            1 => Self::from_vector(numbers(value)?),
            2 => {
                let rows = value
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(numbers)
                    .collect::<Result<Vec<_>, _>>()?;
                Self::from_rows(rows)
            }
            n => Err(VectorError::BadInput(format!(
                "Expected one or two axes for embeddings; got {n}"
            ))),
        }
    }

    /// Width of every row.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.len() / self.dims
    }

    /// Iterates over rows.
    pub fn iter_rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.dims)
    }

    /// All values, row-major.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl TryFrom<&Value> for Embeddings {
    type Error = VectorError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

impl TryFrom<Vec<Vec<f32>>> for Embeddings {
    type Error = VectorError;

    fn try_from(rows: Vec<Vec<f32>>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

fn check_dims(dims: usize) -> Result<(), VectorError> {
    if dims < MIN_EMBEDDING_DIMS {
        return Err(VectorError::BadInput(format!(
            "Dimension size must be at least {MIN_EMBEDDING_DIMS}; got {dims}"
        )));
    }
    Ok(())
}

/// Number of nested array levels, following the first element.
fn axes(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.first().map_or(0, axes),
        _ => 0,
    }
}

fn numbers(value: &Value) -> Result<Vec<f32>, VectorError> {
    let items = value
        .as_array()
        .ok_or_else(|| VectorError::BadInput(format!("Expected an array of numbers; got {value}")))?;
    items
        .iter()
        .map(|item| {
            item.as_f64().map(|number| number as f32).ok_or_else(|| {
                VectorError::BadInput(format!("Embeddings must be numeric; got {item}"))
            })
        })
        .collect()
}
