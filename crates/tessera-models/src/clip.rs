//! CLIP embedding model.
//!
//! A CLIP checkpoint ships a text tower and a vision tower. The `mode`
//! option selects one of them at load time; without it both are loaded and
//! the payload kind picks the tower per request.

use std::sync::Arc;

use tessera_abstraction::{
    InferenceBackend, InferenceModel, ModelError, ModelInput, ModelOptions, ModelOutput, ModelSpec,
    ModelType,
};

use crate::base::ModelState;

/// Which CLIP tower(s) an entry serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipMode {
    /// Text encoder only.
    Text,
    /// Image encoder only.
    Vision,
    /// Both encoders.
    Both,
}

impl ClipMode {
    fn from_spec(spec: &ModelSpec) -> Result<Self, ModelError> {
        match spec.load_options.get("mode").map(String::as_str) {
            None => Ok(Self::Both),
            Some("\"text\"") => Ok(Self::Text),
            Some("\"vision\"") => Ok(Self::Vision),
            Some(other) => Err(ModelError::InvalidInput(format!(
                "CLIP mode must be \"text\" or \"vision\"; got {other}"
            ))),
        }
    }

    fn accepts(self, input: &ModelInput) -> bool {
        match (self, input) {
            (Self::Both, _) | (Self::Text, ModelInput::Text(_)) | (Self::Vision, ModelInput::Image(_)) => {
                true
            }
            (Self::Text | Self::Vision, _) => false,
        }
    }
}

/// CLIP model producing one embedding per payload.
#[derive(Debug)]
pub struct ClipModel {
    state: ModelState,
    mode: ClipMode,
}

impl ClipModel {
    /// Creates an unloaded CLIP model.
    ///
    /// An unrecognized `mode` falls back to serving both towers; requests are
    /// still checked against the payload kind at predict time.
    pub fn new(spec: ModelSpec, backend: Arc<dyn InferenceBackend>) -> Self {
        let mode = ClipMode::from_spec(&spec).unwrap_or(ClipMode::Both);
        Self { state: ModelState::new(spec, backend), mode }
    }

    /// Returns the tower selection.
    pub const fn mode(&self) -> ClipMode {
        self.mode
    }
}

impl InferenceModel for ClipModel {
    fn model_name(&self) -> &str {
        self.state.model_name()
    }

    fn model_type(&self) -> ModelType {
        ModelType::Clip
    }

    fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    fn load(&self) -> Result<(), ModelError> {
        ClipMode::from_spec(self.state.spec())?;
        self.state.load()
    }

    fn unload(&self) {
        self.state.unload();
    }

    fn clear_cache(&self) -> Result<(), ModelError> {
        self.state.clear_cache()
    }

    fn configure(&self, _options: &ModelOptions) -> Result<(), ModelError> {
        // All CLIP options are load-time options and are part of the cache key.
        Ok(())
    }

    fn predict(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        if !self.mode.accepts(input) {
            return Err(ModelError::InvalidInput(format!(
                "CLIP model '{}' loaded in {:?} mode cannot encode {}",
                self.state.model_name(),
                self.mode,
                input.kind()
            )));
        }

        match self.state.run(input)? {
            output @ ModelOutput::Embedding(_) => Ok(output),
            other => Err(ModelError::Inference(format!(
                "CLIP engine returned a non-embedding output: {other:?}"
            ))),
        }
    }
}
