//! In-process mock engine for testing and development.
//!
//! Sessions produce deterministic outputs and loads can be delayed or made to
//! fail on demand, which is enough to exercise the cache and the dispatcher
//! without a real inference runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tessera_abstraction::{
    Face, InferenceBackend, ModelError, ModelInput, ModelOutput, ModelSpec, ModelType, ScoredLabel,
    Session,
};
use tracing::debug;

/// Embedding width produced by [`MockBackend`] CLIP sessions.
pub const MOCK_EMBEDDING_DIMS: usize = 16;

/// Artifact file written by [`MockBackend::with_artifacts`].
pub const MOCK_ARTIFACT_FILE: &str = "model.onnx";

/// A mock implementation of `InferenceBackend`.
#[derive(Debug, Default)]
pub struct MockBackend {
    load_delay: Duration,
    write_artifacts: bool,
    failures: Mutex<VecDeque<ModelError>>,
    load_attempts: AtomicUsize,
    loads: AtomicUsize,
    active: Mutex<HashMap<ModelType, usize>>,
    peak: Mutex<HashMap<ModelType, usize>>,
}

impl MockBackend {
    /// Creates a backend that loads instantly and never fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every load block its worker for `delay`.
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Makes successful loads write an artifact into the model's cache dir.
    #[must_use]
    pub fn with_artifacts(mut self) -> Self {
        self.write_artifacts = true;
        self
    }

    /// Queues an error returned by the next load attempt.
    pub fn fail_next_load(&self, error: ModelError) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).push_back(error);
    }

    /// Number of load calls, successful or not.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    /// Number of successful loads.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous loads seen for one category.
    pub fn peak_concurrent_loads(&self, model_type: ModelType) -> usize {
        self.peak.lock().unwrap_or_else(PoisonError::into_inner).get(&model_type).copied().unwrap_or(0)
    }

    fn enter(&self, model_type: ModelType) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let count = active.entry(model_type).or_insert(0);
        *count += 1;
        let mut peak = self.peak.lock().unwrap_or_else(PoisonError::into_inner);
        let highest = peak.entry(model_type).or_insert(0);
        *highest = (*highest).max(*count);
    }

    fn leave(&self, model_type: ModelType) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = active.get_mut(&model_type) {
            *count = count.saturating_sub(1);
        }
    }
}

impl InferenceBackend for MockBackend {
    fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn Session>, ModelError> {
        self.load_attempts.fetch_add(1, Ordering::SeqCst);
        self.enter(spec.model_type);
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        self.leave(spec.model_type);

        let failure = self.failures.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        if let Some(error) = failure {
            debug!(model = %spec.model_name, error = %error, "Mock load failing on request");
            return Err(error);
        }

        if self.write_artifacts {
            std::fs::create_dir_all(&spec.cache_dir)?;
            std::fs::write(spec.cache_dir.join(MOCK_ARTIFACT_FILE), spec.model_name.as_bytes())?;
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession { model_type: spec.model_type }))
    }
}

/// Session returned by [`MockBackend`].
#[derive(Debug)]
pub struct MockSession {
    model_type: ModelType,
}

impl Session for MockSession {
    fn run(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let bytes = match input {
            ModelInput::Image(bytes) => bytes.as_slice(),
            ModelInput::Text(text) => text.as_bytes(),
        };

        Ok(match self.model_type {
            ModelType::Clip => ModelOutput::Embedding(mock_embedding(bytes)),
            ModelType::ImageClassification => ModelOutput::Scores(vec![
                ScoredLabel { label: "cat".to_string(), score: 0.95 },
                ScoredLabel { label: "tabby".to_string(), score: 0.4 },
                ScoredLabel { label: "toaster".to_string(), score: 0.01 },
            ]),
            ModelType::FacialRecognition => ModelOutput::Faces(vec![
                Face {
                    bounding_box: [10.0, 10.0, 42.0, 48.0],
                    score: 0.92,
                    embedding: mock_embedding(bytes),
                },
                Face {
                    bounding_box: [80.0, 12.0, 96.0, 30.0],
                    score: 0.31,
                    embedding: mock_embedding(&[bytes, b"second"].concat()),
                },
            ]),
        })
    }
}

/// Deterministic embedding: byte sums folded into [`MOCK_EMBEDDING_DIMS`] buckets.
#[must_use]
pub fn mock_embedding(bytes: &[u8]) -> Vec<f32> {
    let mut embedding = vec![1.0_f32; MOCK_EMBEDDING_DIMS];
    for (i, byte) in bytes.iter().enumerate() {
        embedding[i % MOCK_EMBEDDING_DIMS] += f32::from(*byte) / 255.0;
    }
    embedding
}
