//! Configuration module for Tessera Core.
//!
//! Values come from an optional TOML file layered under `TESSERA_`-prefixed
//! environment variables, with `__` separating nested keys:
//!
//! ```toml
//! [cache]
//! ttl_secs = 300
//!
//! [dispatch]
//! request_threads = 8
//!
//! [models]
//! cache_folder = "/cache"
//!
//! [[models.preload]]
//! model_name = "ViT-B-32__openai"
//! model_type = "clip"
//! options = { mode = "text" }
//! ```
//!
//! `TESSERA_CACHE__TTL_SECS=0` disables eviction.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tessera_abstraction::{ModelOptions, ModelType, validate_model_name};
use tessera_models::CacheConfig;

use crate::error::{Result, ServiceError};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "TESSERA_CONFIG";

/// Base name of the config file looked up in the working directory.
const DEFAULT_CONFIG_NAME: &str = "tessera";

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Size of the blocking worker pool. Zero runs work inline.
    #[serde(default = "default_request_threads")]
    pub request_threads: usize,
}

fn default_request_threads() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { request_threads: default_request_threads() }
    }
}

/// A model loaded eagerly by `warm_up`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PreloadModel {
    pub model_name: String,
    pub model_type: ModelType,
    #[serde(default)]
    pub options: ModelOptions,
}

/// Model artifact configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelsConfig {
    /// Root of the per-model artifact directories.
    #[serde(default = "default_cache_folder")]
    pub cache_folder: PathBuf,
    /// Models to load at startup.
    #[serde(default)]
    pub preload: Vec<PreloadModel>,
}

fn default_cache_folder() -> PathBuf {
    PathBuf::from("/cache")
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self { cache_folder: default_cache_folder(), preload: Vec::new() }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset.
    #[serde(default = "default_directives")]
    pub directives: String,
}

fn default_directives() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: LogFormat::default(), directives: default_directives() }
    }
}

/// Root configuration for Tessera.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the file named by `TESSERA_CONFIG` (or
    /// `tessera.toml` in the working directory, if present) and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the merged values are
    /// invalid.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load configuration from `path` (required when given) and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the merged values are
    /// invalid.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config: Self = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("TESSERA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ServiceError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if self.models.cache_folder.as_os_str().is_empty() {
            return Err(ServiceError::Config("models.cache_folder must not be empty".to_string()));
        }
        for model in &self.models.preload {
            validate_model_name(&model.model_name).map_err(|e| {
                ServiceError::Config(format!("Preloaded {} model: {e}", model.model_type))
            })?;
        }
        Ok(())
    }
}
