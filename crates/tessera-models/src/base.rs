//! State shared by every model variant.

use std::ffi::OsStr;
use std::path::{Component, Path};
use std::sync::{Arc, PoisonError, RwLock};

use tessera_abstraction::{
    InferenceBackend, ModelError, ModelInput, ModelOutput, ModelSpec, ModelType, Session,
    validate_model_name,
};
use tracing::{debug, info};

/// Session handle plus the identity needed to (re)open it.
pub struct ModelState {
    spec: ModelSpec,
    backend: Arc<dyn InferenceBackend>,
    session: RwLock<Option<Arc<dyn Session>>>,
}

impl ModelState {
    /// Creates an unloaded model state.
    pub fn new(spec: ModelSpec, backend: Arc<dyn InferenceBackend>) -> Self {
        Self { spec, backend, session: RwLock::new(None) }
    }

    pub fn model_name(&self) -> &str {
        &self.spec.model_name
    }

    pub fn model_type(&self) -> ModelType {
        self.spec.model_type
    }

    /// Artifact directory, provided it is a plain child named after the model.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidInput` if the name is not a single path
    /// component or the directory climbs out through `..`.
    pub fn cache_dir(&self) -> Result<&Path, ModelError> {
        validate_model_name(&self.spec.model_name)?;
        let path = self.spec.cache_dir.as_path();
        let climbs = path.components().any(|c| matches!(c, Component::ParentDir));
        if climbs || path.file_name() != Some(OsStr::new(&self.spec.model_name)) {
            return Err(ModelError::InvalidInput(format!(
                "Artifact directory {} does not belong to model {}",
                path.display(),
                self.spec.model_name
            )));
        }
        Ok(path)
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn is_loaded(&self) -> bool {
        self.session.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Opens a session through the backend and stores it.
    pub fn load(&self) -> Result<(), ModelError> {
        let cache_dir = self.cache_dir()?;
        debug!(
            model = %self.spec.model_name,
            model_type = %self.spec.model_type,
            cache_dir = %cache_dir.display(),
            "Loading model"
        );
        let session = self.backend.load(&self.spec)?;
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        info!(
            model = %self.spec.model_name,
            model_type = %self.spec.model_type,
            "Loaded model"
        );
        Ok(())
    }

    pub fn unload(&self) {
        let previous = self.session.write().unwrap_or_else(PoisonError::into_inner).take();
        if previous.is_some() {
            info!(
                model = %self.spec.model_name,
                model_type = %self.spec.model_type,
                "Unloaded model"
            );
        }
    }

    /// Deletes the artifact directory (or stray file) for this model.
    pub fn clear_cache(&self) -> Result<(), ModelError> {
        let path = self.cache_dir()?;
        if path.is_dir() {
            info!(path = %path.display(), "Removing model artifacts");
            std::fs::remove_dir_all(path)?;
        } else if path.exists() {
            info!(path = %path.display(), "Removing stray file at model cache path");
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Runs the engine session without holding the session lock.
    pub fn run(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let session = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ModelError::NotLoaded(self.spec.model_name.clone()))?;
        session.run(input)
    }
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelState")
            .field("spec", &self.spec)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

/// Reads a score threshold option, falling back to `default`.
pub(crate) fn score_option(
    options: &tessera_abstraction::ModelOptions,
    key: &str,
    default: f32,
) -> Result<f32, ModelError> {
    match options.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .filter(|score| (0.0..=1.0).contains(score))
            .map(|score| score as f32)
            .ok_or_else(|| {
                ModelError::InvalidInput(format!("{key} must be a number in [0, 1]; got {value}"))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockBackend;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn state(model_name: &str, cache_dir: PathBuf) -> ModelState {
        let spec = ModelSpec {
            model_name: model_name.to_string(),
            model_type: ModelType::Clip,
            cache_dir,
            load_options: BTreeMap::new(),
        };
        ModelState::new(spec, Arc::new(MockBackend::new()))
    }

    #[test]
    fn test_clear_cache_removes_model_dir() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("clip").join("ViT-B-32__openai");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("model.onnx"), b"bytes").unwrap();

        state("ViT-B-32__openai", dir.clone()).clear_cache().unwrap();
        assert!(!dir.exists());
        assert!(temp.path().join("clip").is_dir());
    }

    #[test]
    fn test_clear_cache_refuses_paths_outside_cache_folder() {
        let temp = tempfile::tempdir().unwrap();
        let cache_folder = temp.path().join("cache");
        std::fs::create_dir_all(cache_folder.join("clip")).unwrap();
        let victim = temp.path().join("victim");
        std::fs::create_dir_all(&victim).unwrap();
        std::fs::write(victim.join("precious.txt"), b"keep").unwrap();

        let model = state("../../victim", cache_folder.join("clip").join("../../victim"));
        assert!(matches!(model.clear_cache(), Err(ModelError::InvalidInput(_))));
        assert!(matches!(model.load(), Err(ModelError::InvalidInput(_))));
        assert!(victim.join("precious.txt").exists());

        // A plain name whose directory was built elsewhere is refused too.
        let model = state("victim", cache_folder.join("clip").join("../..").join("victim"));
        assert!(matches!(model.clear_cache(), Err(ModelError::InvalidInput(_))));
        assert!(victim.join("precious.txt").exists());
    }
}
