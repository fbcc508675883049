//! Facial recognition model.

use std::sync::{Arc, PoisonError, RwLock};

use tessera_abstraction::{
    InferenceBackend, InferenceModel, ModelError, ModelInput, ModelOptions, ModelOutput, ModelSpec,
    ModelType,
};

use crate::base::{ModelState, score_option};

/// Detections below this confidence are dropped unless `minScore` says otherwise.
pub const DEFAULT_MIN_FACE_SCORE: f32 = 0.7;

/// Face detector + recognizer.
#[derive(Debug)]
pub struct FacialRecognitionModel {
    state: ModelState,
    min_score: RwLock<f32>,
}

impl FacialRecognitionModel {
    /// Creates an unloaded facial recognition model.
    pub fn new(spec: ModelSpec, backend: Arc<dyn InferenceBackend>) -> Self {
        Self { state: ModelState::new(spec, backend), min_score: RwLock::new(DEFAULT_MIN_FACE_SCORE) }
    }

    /// Current detection threshold.
    pub fn min_score(&self) -> f32 {
        *self.min_score.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InferenceModel for FacialRecognitionModel {
    fn model_name(&self) -> &str {
        self.state.model_name()
    }

    fn model_type(&self) -> ModelType {
        ModelType::FacialRecognition
    }

    fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    fn load(&self) -> Result<(), ModelError> {
        self.state.load()
    }

    fn unload(&self) {
        self.state.unload();
    }

    fn clear_cache(&self) -> Result<(), ModelError> {
        self.state.clear_cache()
    }

    fn configure(&self, options: &ModelOptions) -> Result<(), ModelError> {
        let min_score = score_option(options, "minScore", DEFAULT_MIN_FACE_SCORE)?;
        *self.min_score.write().unwrap_or_else(PoisonError::into_inner) = min_score;
        Ok(())
    }

    fn predict(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        if !matches!(input, ModelInput::Image(_)) {
            return Err(ModelError::InvalidInput(format!(
                "facial recognition expects an image; got {}",
                input.kind()
            )));
        }

        let min_score = self.min_score();
        match self.state.run(input)? {
            ModelOutput::Faces(faces) => Ok(ModelOutput::Faces(
                faces.into_iter().filter(|face| face.score >= min_score).collect(),
            )),
            other => Err(ModelError::Inference(format!(
                "facial recognition engine returned unexpected output: {other:?}"
            ))),
        }
    }
}
