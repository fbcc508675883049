//! Model factory for creating model instances by category.
//!
//! The factory owns the engine handle and the artifact root so the cache only
//! has to hand over a name, a category and the request options.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_abstraction::{InferenceBackend, InferenceModel, ModelOptions, ModelSpec, ModelType};
use tracing::debug;

use crate::{ClipModel, FacialRecognitionModel, ImageClassificationModel};

/// Factory for creating model instances.
#[derive(Clone)]
pub struct ModelFactory {
    backend: Arc<dyn InferenceBackend>,
    cache_folder: PathBuf,
}

impl ModelFactory {
    /// Creates a factory.
    ///
    /// # Arguments
    /// * `backend` - The inference engine used to open sessions
    /// * `cache_folder` - Root directory for model artifacts
    pub fn new(backend: Arc<dyn InferenceBackend>, cache_folder: impl Into<PathBuf>) -> Self {
        Self { backend, cache_folder: cache_folder.into() }
    }

    /// Root directory for model artifacts.
    #[must_use]
    pub fn cache_folder(&self) -> &Path {
        &self.cache_folder
    }

    /// Artifact directory for one model: `<cache_folder>/<category>/<name>`.
    #[must_use]
    pub fn cache_dir(&self, model_name: &str, model_type: ModelType) -> PathBuf {
        self.cache_folder.join(model_type.as_str()).join(model_name)
    }

    /// Creates an unloaded model of the variant matching `model_type`.
    ///
    /// # Arguments
    /// * `model_name` - The model name
    /// * `model_type` - The model category
    /// * `options` - Request options; only load-affecting keys are kept
    pub fn create(
        &self,
        model_name: &str,
        model_type: ModelType,
        options: &ModelOptions,
    ) -> Arc<dyn InferenceModel> {
        debug!(
            model = %model_name,
            model_type = %model_type,
            "Creating model instance"
        );

        let spec = ModelSpec {
            model_name: model_name.to_string(),
            model_type,
            cache_dir: self.cache_dir(model_name, model_type),
            load_options: options.load_options(model_type),
        };
        let backend = Arc::clone(&self.backend);

        match model_type {
            ModelType::Clip => Arc::new(ClipModel::new(spec, backend)),
            ModelType::FacialRecognition => Arc::new(FacialRecognitionModel::new(spec, backend)),
            ModelType::ImageClassification => {
                Arc::new(ImageClassificationModel::new(spec, backend))
            }
        }
    }
}

impl std::fmt::Debug for ModelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelFactory")
            .field("cache_folder", &self.cache_folder)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockBackend;
    use tessera_abstraction::{ModelInput, ModelOutput};

    fn factory() -> ModelFactory {
        ModelFactory::new(Arc::new(MockBackend::new()), "/cache")
    }

    #[test]
    fn test_cache_dir_layout() {
        let dir = factory().cache_dir("ViT-B-32__openai", ModelType::Clip);
        assert_eq!(dir, PathBuf::from("/cache/clip/ViT-B-32__openai"));
    }

    #[test]
    fn test_factory_selects_variant_by_category() {
        let factory = factory();
        for model_type in ModelType::ALL {
            let model = factory.create("test-model", model_type, &ModelOptions::new());
            assert_eq!(model.model_type(), model_type);
            assert_eq!(model.model_name(), "test-model");
            assert!(!model.is_loaded());
        }
    }

    #[test]
    fn test_predict_requires_load() {
        let model = factory().create("test-model", ModelType::Clip, &ModelOptions::new());
        let result = model.predict(&ModelInput::Text("a photo of a cat".to_string()));
        assert!(matches!(result, Err(tessera_abstraction::ModelError::NotLoaded(_))));

        model.load().unwrap();
        let output = model.predict(&ModelInput::Text("a photo of a cat".to_string())).unwrap();
        assert!(matches!(output, ModelOutput::Embedding(_)));

        model.unload();
        assert!(!model.is_loaded());
    }

    #[test]
    fn test_clip_text_mode_rejects_images() {
        let options = ModelOptions::new().with("mode", "text");
        let model = factory().create("test-model", ModelType::Clip, &options);
        model.load().unwrap();

        let result = model.predict(&ModelInput::Image(vec![1, 2, 3]));
        assert!(matches!(result, Err(tessera_abstraction::ModelError::InvalidInput(_))));
        assert!(model.predict(&ModelInput::Text("dog".to_string())).is_ok());
    }

    #[test]
    fn test_clip_invalid_mode_fails_load() {
        let options = ModelOptions::new().with("mode", "audio");
        let model = factory().create("test-model", ModelType::Clip, &options);
        assert!(model.load().is_err());
        assert!(!model.is_loaded());
    }

    #[test]
    fn test_classification_thresholds_labels() {
        let model =
            factory().create("microsoft/resnet-50", ModelType::ImageClassification, &ModelOptions::new());
        model.load().unwrap();

        let strict = model.predict(&ModelInput::Image(vec![0; 8])).unwrap();
        assert_eq!(strict, ModelOutput::Labels(vec!["cat".to_string()]));

        model.configure(&ModelOptions::new().with("minScore", 0.1)).unwrap();
        let lenient = model.predict(&ModelInput::Image(vec![0; 8])).unwrap();
        assert_eq!(lenient, ModelOutput::Labels(vec!["cat".to_string(), "tabby".to_string()]));
    }

    #[test]
    fn test_configure_rejects_out_of_range_score() {
        let model =
            factory().create("buffalo_l", ModelType::FacialRecognition, &ModelOptions::new());
        assert!(model.configure(&ModelOptions::new().with("minScore", 3.0)).is_err());
        assert!(model.configure(&ModelOptions::new().with("minScore", "high")).is_err());
        assert!(model.configure(&ModelOptions::new().with("minScore", 0.5)).is_ok());
    }

    #[test]
    fn test_facial_recognition_filters_faces() {
        let model =
            factory().create("buffalo_l", ModelType::FacialRecognition, &ModelOptions::new());
        model.load().unwrap();

        let ModelOutput::Faces(faces) = model.predict(&ModelInput::Image(vec![0; 8])).unwrap() else {
            panic!("expected faces");
        };
        assert_eq!(faces.len(), 1);

        model.configure(&ModelOptions::new().with("minScore", 0.2)).unwrap();
        let ModelOutput::Faces(faces) = model.predict(&ModelInput::Image(vec![0; 8])).unwrap() else {
            panic!("expected faces");
        };
        assert_eq!(faces.len(), 2);

        let text = model.predict(&ModelInput::Text("face".to_string()));
        assert!(text.is_err());
    }
}
