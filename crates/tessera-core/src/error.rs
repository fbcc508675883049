//! Error types for Tessera Core.

use tessera_abstraction::ModelError;
use tessera_models::{CacheConfigError, DispatchError};
use thiserror::Error;

use crate::vector::VectorError;

/// Core error type for service operations.
///
/// Transports map these onto their own status codes with
/// [`ServiceError::status_code`].
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed request: bad options JSON, missing payload, embedding shape
    /// violations, id/embedding count mismatch. Never retried.
    #[error("Bad input: {0}")]
    BadInput(String),

    /// The referenced index does not exist or has another dimensionality.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The model could not be loaded, even after the retry for artifact errors.
    #[error("Failed to load model: {0}")]
    LoadFailure(#[source] ModelError),

    /// The model was loaded but inference failed.
    #[error("Prediction failed: {0}")]
    PredictFailure(#[source] ModelError),

    /// The worker pool failed to run the request.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    /// HTTP-style status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::BadInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::LoadFailure(_) | Self::PredictFailure(_) | Self::Dispatch(_) | Self::Config(_) => {
                500
            }
        }
    }

    /// Whether the caller is at fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::BadInput(_) | Self::NotFound(_))
    }

    /// Classifies an error raised by `predict`.
    ///
    /// Payloads the model cannot accept are the caller's fault; everything
    /// else is a server-side failure.
    #[must_use]
    pub fn from_predict(error: ModelError) -> Self {
        match error {
            ModelError::InvalidInput(message) => Self::BadInput(message),
            other => Self::PredictFailure(other),
        }
    }
}

impl From<VectorError> for ServiceError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::BadInput(message) => Self::BadInput(message),
            VectorError::NotFound(name) => Self::NotFound(format!("Index '{name}' not found")),
        }
    }
}

impl From<CacheConfigError> for ServiceError {
    fn from(err: CacheConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ServiceError::BadInput("x".to_string()).status_code(), 400);
        assert_eq!(ServiceError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(ServiceError::LoadFailure(ModelError::Io("x".to_string())).status_code(), 500);
        assert_eq!(
            ServiceError::PredictFailure(ModelError::Inference("x".to_string())).status_code(),
            500
        );
        assert_eq!(ServiceError::Dispatch(DispatchError::Closed).status_code(), 500);
    }

    #[test]
    fn test_client_errors() {
        assert!(ServiceError::BadInput("x".to_string()).is_client_error());
        assert!(ServiceError::NotFound("x".to_string()).is_client_error());
        assert!(!ServiceError::Config("x".to_string()).is_client_error());
    }

    #[test]
    fn test_predict_error_classification() {
        let bad = ServiceError::from_predict(ModelError::InvalidInput("text to vision".to_string()));
        assert!(matches!(bad, ServiceError::BadInput(_)));

        let failed = ServiceError::from_predict(ModelError::Inference("oom".to_string()));
        assert!(matches!(failed, ServiceError::PredictFailure(_)));
    }

    #[test]
    fn test_vector_error_conversion() {
        let err: ServiceError = VectorError::NotFound("faces".to_string()).into();
        assert_eq!(err.to_string(), "Not found: Index 'faces' not found");

        let err: ServiceError = VectorError::BadInput("too short".to_string()).into();
        assert!(matches!(err, ServiceError::BadInput(_)));
    }

    #[test]
    fn test_cache_config_error_conversion() {
        let err: ServiceError = CacheConfigError::InvalidSweepInterval.into();
        let msg = format!("{}", err);
        assert!(msg.contains("Configuration error"));
        assert!(msg.contains("sweep interval"));
    }
}
