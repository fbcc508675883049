//! Tracing setup for processes embedding the service.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, ServiceError};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured directives.
///
/// # Errors
///
/// Returns `ServiceError::Config` if the directives do not parse or a global
/// subscriber is already installed.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.directives)
            .map_err(|e| ServiceError::Config(format!("Invalid log directives: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match logging.format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|e| ServiceError::Config(format!("Failed to initialize tracing: {e}")))
}
