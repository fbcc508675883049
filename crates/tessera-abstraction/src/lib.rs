//! Model abstraction layer for Tessera.
//!
//! This module defines the capability contract shared by every inference model
//! category, the narrow interface to the external inference engine, and the
//! input/output types that flow between them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Represents an error that can occur when loading or running a model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// Reading or writing model artifacts failed.
    #[error("I/O Error: {0}")]
    Io(String),

    /// The model artifact exists but could not be parsed.
    #[error("Invalid Model Artifact: {0}")]
    InvalidArtifact(String),

    /// A file expected inside a model archive is missing.
    #[error("Missing Archive Member: {0}")]
    MissingArchiveMember(String),

    /// Prediction was requested before the model was loaded.
    #[error("Model '{0}' is not loaded")]
    NotLoaded(String),

    /// The payload does not fit this model (e.g. text sent to a vision model).
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// The engine failed while running inference.
    #[error("Inference Error: {0}")]
    Inference(String),

    /// The worker executing the call failed before returning.
    #[error("Worker Error: {0}")]
    Worker(String),

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

impl ModelError {
    /// Whether a failed load may succeed after the on-disk artifacts are cleared.
    ///
    /// Covers I/O failures, corrupt artifacts and missing archive members.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::InvalidArtifact(_) | Self::MissingArchiveMember(_))
    }
}

impl From<std::io::Error> for ModelError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// The closed set of model categories served by Tessera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    /// Joint text/image embedding model.
    Clip,
    /// Face detection and recognition model.
    FacialRecognition,
    /// Image tagging model.
    ImageClassification,
}

impl ModelType {
    /// Every category, in a stable order.
    pub const ALL: [Self; 3] = [Self::Clip, Self::FacialRecognition, Self::ImageClassification];

    /// The wire name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clip => "clip",
            Self::FacialRecognition => "facial-recognition",
            Self::ImageClassification => "image-classification",
        }
    }

    /// Option keys that change which artifact gets loaded.
    ///
    /// Every other option is an inference-time parameter and must not
    /// produce a separate cache entry.
    #[must_use]
    pub const fn load_option_keys(self) -> &'static [&'static str] {
        match self {
            Self::Clip => &["mode"],
            Self::FacialRecognition | Self::ImageClassification => &[],
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "clip" => Ok(Self::Clip),
            "facial-recognition" => Ok(Self::FacialRecognition),
            "image-classification" => Ok(Self::ImageClassification),
            other => Err(ModelError::InvalidInput(format!("Unknown model type: {other}"))),
        }
    }
}

/// Checks that a model name is a single plain path component.
///
/// Names become directory names under the artifact root, so separators,
/// `.`, `..` and absolute paths are rejected.
///
/// # Errors
/// Returns `ModelError::InvalidInput` for any other name.
pub fn validate_model_name(name: &str) -> Result<(), ModelError> {
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if *part == *name
    );
    if plain && !name.contains(['/', '\\']) {
        Ok(())
    } else {
        Err(ModelError::InvalidInput(format!("Invalid model name: {name:?}")))
    }
}

/// Free-form options supplied with a request.
///
/// Always a JSON object. Keys are interpreted by the model category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelOptions(Map<String, Value>);

impl ModelOptions {
    /// Creates an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON string.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidInput` if the text is not a JSON object.
    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(_) | Err(_) => {
                Err(ModelError::InvalidInput(format!("Invalid options JSON: {text}")))
            }
        }
    }

    /// Adds an option, returning the updated set.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns `key` as a float, if present and numeric.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Returns `key` as a string, if present and textual.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Keeps only the options that affect loading for `model_type`.
    ///
    /// Values are rendered as JSON text so the result is hashable and
    /// ordered independently of how the request spelled them.
    #[must_use]
    pub fn load_options(&self, model_type: ModelType) -> BTreeMap<String, String> {
        model_type
            .load_option_keys()
            .iter()
            .filter_map(|key| self.0.get(*key).map(|value| ((*key).to_string(), value.to_string())))
            .collect()
    }

    /// Whether no options were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Payload handed to a model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    /// Encoded image bytes.
    Image(Vec<u8>),
    /// Plain text.
    Text(String),
}

impl ModelInput {
    /// Short name of the payload kind, for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Text(_) => "text",
        }
    }
}

/// A label with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    /// The label text.
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub score: f32,
}

/// A detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Face {
    /// `[x1, y1, x2, y2]` in pixels.
    pub bounding_box: [f32; 4],
    /// Detection confidence in `[0, 1]`.
    pub score: f32,
    /// Recognition embedding.
    pub embedding: Vec<f32>,
}

/// Output of a model, serialized without a tag so transports emit plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelOutput {
    /// A single embedding vector.
    Embedding(Vec<f32>),
    /// Labels above the requested threshold.
    Labels(Vec<String>),
    /// Raw classifier scores, before thresholding.
    Scores(Vec<ScoredLabel>),
    /// Detected faces.
    Faces(Vec<Face>),
}

impl ModelOutput {
    /// Returns the embedding, if this output is one.
    #[must_use]
    pub fn as_embedding(&self) -> Option<&[f32]> {
        match self {
            Self::Embedding(values) => Some(values),
            _ => None,
        }
    }
}

/// Everything the engine needs to locate and open a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// The model name (e.g. "ViT-B-32__openai").
    pub model_name: String,
    /// The model category.
    pub model_type: ModelType,
    /// Directory holding downloaded and derived artifacts.
    pub cache_dir: PathBuf,
    /// Load-affecting options, see [`ModelOptions::load_options`].
    pub load_options: BTreeMap<String, String>,
}

/// A loaded model inside the inference engine.
///
/// Implementations must be reentrant: `run` is called concurrently from
/// several worker threads once loading has completed.
pub trait Session: Send + Sync {
    /// Runs inference on one payload.
    ///
    /// # Errors
    /// Returns a `ModelError` if the engine rejects the input or fails.
    fn run(&self, input: &ModelInput) -> Result<ModelOutput, ModelError>;
}

/// The external inference engine.
///
/// Calls are blocking and are only made from dispatcher worker threads.
pub trait InferenceBackend: Send + Sync {
    /// Opens the model described by `spec`, downloading artifacts if needed.
    ///
    /// # Errors
    /// Returns `ModelError::Io`, `InvalidArtifact` or `MissingArchiveMember`
    /// for artifact problems worth a retry, any other variant otherwise.
    fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn Session>, ModelError>;
}

/// The capability contract shared by every model category.
///
/// Load and unload are only called while the category's load lock is held.
/// `predict` may run concurrently once the model is loaded.
pub trait InferenceModel: Send + Sync {
    /// Returns the name of the model.
    fn model_name(&self) -> &str;

    /// Returns the category of the model.
    fn model_type(&self) -> ModelType;

    /// Whether a session is currently open.
    fn is_loaded(&self) -> bool;

    /// Opens the model session.
    ///
    /// # Errors
    /// Propagates the engine's `ModelError`.
    fn load(&self) -> Result<(), ModelError>;

    /// Drops the model session, if any. In-flight predictions keep their
    /// own reference and finish normally.
    fn unload(&self);

    /// Removes downloaded and derived artifacts from disk.
    ///
    /// # Errors
    /// Returns `ModelError::Io` if the artifacts cannot be removed.
    fn clear_cache(&self) -> Result<(), ModelError>;

    /// Applies inference-time options.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidInput` for malformed option values.
    fn configure(&self, options: &ModelOptions) -> Result<(), ModelError>;

    /// Runs inference.
    ///
    /// # Errors
    /// Returns `ModelError::NotLoaded` before `load`, otherwise propagates
    /// engine errors.
    fn predict(&self, input: &ModelInput) -> Result<ModelOutput, ModelError>;
}
