//! Image classification model.

use std::sync::{Arc, PoisonError, RwLock};

use tessera_abstraction::{
    InferenceBackend, InferenceModel, ModelError, ModelInput, ModelOptions, ModelOutput, ModelSpec,
    ModelType,
};

use crate::base::{ModelState, score_option};

/// Labels below this confidence are dropped unless `minScore` says otherwise.
pub const DEFAULT_MIN_LABEL_SCORE: f32 = 0.9;

/// Image tagger returning the labels that clear the threshold.
#[derive(Debug)]
pub struct ImageClassificationModel {
    state: ModelState,
    min_score: RwLock<f32>,
}

impl ImageClassificationModel {
    /// Creates an unloaded classifier.
    pub fn new(spec: ModelSpec, backend: Arc<dyn InferenceBackend>) -> Self {
        Self { state: ModelState::new(spec, backend), min_score: RwLock::new(DEFAULT_MIN_LABEL_SCORE) }
    }

    /// Current label threshold.
    pub fn min_score(&self) -> f32 {
        *self.min_score.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InferenceModel for ImageClassificationModel {
    fn model_name(&self) -> &str {
        self.state.model_name()
    }

    fn model_type(&self) -> ModelType {
        ModelType::ImageClassification
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
        let min_score = score_option(options, "minScore", DEFAULT_MIN_LABEL_SCORE)?;
        *self.min_score.write().unwrap_or_else(PoisonError::into_inner) = min_score;
        Ok(())
    }

    fn predict(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        if !matches!(input, ModelInput::Image(_)) {
            return Err(ModelError::InvalidInput(format!(
                "image classification expects an image; got {}",
                input.kind()
            )));
        }

        let min_score = self.min_score();
        match self.state.run(input)? {
            ModelOutput::Scores(scores) => Ok(ModelOutput::Labels(
                scores
                    .into_iter()
                    .filter(|scored| scored.score >= min_score)
                    .map(|scored| scored.label)
                    .collect(),
            )),
            labels @ ModelOutput::Labels(_) => Ok(labels),
            other => Err(ModelError::Inference(format!(
                "classification engine returned unexpected output: {other:?}"
            ))),
        }
    }
}
