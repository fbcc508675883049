//! The inference service: process-scoped state shared by request handlers.
//!
//! An [`InferenceService`] is constructed once at startup, handed to the
//! transport layer behind an `Arc`, and torn down with
//! [`InferenceService::shutdown`]. Every blocking call it makes goes through
//! its [`Dispatcher`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_abstraction::{
    InferenceBackend, ModelInput, ModelOptions, ModelOutput, ModelType, validate_model_name,
};
use tessera_models::{Dispatcher, ModelCache, ModelFactory};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::vector::{Embeddings, VectorStore};

/// Number of neighbors returned when a search does not name `k`.
pub const DEFAULT_SEARCH_K: i64 = 10;

fn default_options() -> String {
    "{}".to_string()
}

/// A prediction request as received from a transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictRequest {
    pub model_name: String,
    pub model_type: String,
    /// JSON object of load and inference options.
    #[serde(default = "default_options")]
    pub options: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Encoded image. Takes precedence over `text`.
    #[serde(default)]
    pub image: Option<Vec<u8>>,
}

impl PredictRequest {
    /// A text request with no options.
    #[must_use]
    pub fn text(
        model_name: impl Into<String>,
        model_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_type: model_type.into(),
            options: default_options(),
            text: Some(text.into()),
            image: None,
        }
    }

    /// An image request with no options.
    #[must_use]
    pub fn image(
        model_name: impl Into<String>,
        model_type: impl Into<String>,
        image: Vec<u8>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_type: model_type.into(),
            options: default_options(),
            text: None,
            image: Some(image),
        }
    }

    /// Replaces the options JSON.
    #[must_use]
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    fn parse(self) -> Result<(String, ModelType, ModelOptions, ModelInput)> {
        validate_model_name(&self.model_name).map_err(|e| ServiceError::BadInput(e.to_string()))?;
        let model_type = self
            .model_type
            .parse::<ModelType>()
            .map_err(|e| ServiceError::BadInput(e.to_string()))?;

        let input = match (self.image, self.text) {
            (Some(image), _) => ModelInput::Image(image),
            (None, Some(text)) => ModelInput::Text(text),
            (None, None) => {
                return Err(ServiceError::BadInput(
                    "Either image or text must be provided".to_string(),
                ));
            }
        };

        let options = ModelOptions::from_json_str(&self.options)
            .map_err(|e| ServiceError::BadInput(e.to_string()))?;

        Ok((self.model_name, model_type, options, input))
    }
}

/// A prediction followed by optional index operations on its embedding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    #[serde(flatten)]
    pub predict: PredictRequest,
    #[serde(default)]
    pub index_name: Option<String>,
    /// Stores the embedding under this id after any search.
    #[serde(default)]
    pub embedding_id: Option<String>,
    /// Searches the index for this many neighbors of the embedding.
    #[serde(default)]
    pub k: Option<i64>,
}

/// Result of a pipeline: the model output, or the neighbors found for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PipelineOutput {
    Prediction(ModelOutput),
    Matches(Vec<String>),
}

/// Owns the model cache, the vector store and the worker pool.
pub struct InferenceService {
    config: Config,
    dispatcher: Dispatcher,
    cache: Arc<ModelCache>,
    vectors: Arc<VectorStore>,
}

impl InferenceService {
    /// Builds the service state. Call [`start`](Self::start) from inside the
    /// runtime to begin idle eviction.
    ///
    /// # Errors
    /// Returns `ServiceError::Config` if the configuration is invalid.
    pub fn new(config: Config, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        config.validate()?;

        let dispatcher = Dispatcher::new(config.dispatch.request_threads);
        let factory = ModelFactory::new(backend, config.models.cache_folder.clone());
        let cache = Arc::new(ModelCache::new(config.cache.clone(), factory, dispatcher.clone())?);

        if config.cache.revalidate() {
            info!(
                "Created in-memory cache with unloading after {}s of inactivity.",
                config.cache.ttl_secs
            );
        } else {
            info!("Created in-memory cache with unloading disabled.");
        }
        info!(
            "Initialized request thread pool with {} threads.",
            config.dispatch.request_threads
        );

        Ok(Self { config, dispatcher, cache, vectors: Arc::new(VectorStore::new()) })
    }

    /// Starts background eviction. Returns whether a sweep is running.
    pub fn start(&self) -> bool {
        self.cache.start_sweeper()
    }

    /// Loads every model listed under `models.preload`.
    ///
    /// # Errors
    /// Returns `ServiceError::LoadFailure` for the first model that fails.
    pub async fn warm_up(&self) -> Result<usize> {
        for model in &self.config.models.preload {
            self.cache
                .get_loaded(&model.model_name, model.model_type, &model.options)
                .await
                .map_err(ServiceError::LoadFailure)?;
            info!(model = %model.model_name, model_type = %model.model_type, "Preloaded model");
        }
        Ok(self.config.models.preload.len())
    }

    /// Runs a model on a text or image payload.
    ///
    /// # Errors
    /// `BadInput` for an unknown category, malformed options, a missing
    /// payload or a payload the model cannot take; `LoadFailure` and
    /// `PredictFailure` for model errors.
    pub async fn predict(&self, request: PredictRequest) -> Result<ModelOutput> {
        let (model_name, model_type, options, input) = request.parse()?;

        let entry = self.cache.get(&model_name, model_type, &options).await;
        self.cache.load(&entry).await.map_err(ServiceError::LoadFailure)?;

        let model = Arc::clone(entry.model());
        model.configure(&options).map_err(ServiceError::from_predict)?;

        debug!(model = %model_name, model_type = %model_type, input = input.kind(), "Running prediction");
        self.dispatcher
            .run(move || model.predict(&input))
            .await?
            .map_err(ServiceError::from_predict)
    }

    /// Predicts, then searches and/or extends `index_name` with the
    /// resulting embedding. The search runs before the add.
    ///
    /// # Errors
    /// Same as [`predict`](Self::predict), plus `BadInput` for `k < 1` or a
    /// model whose output is not an embedding, and `NotFound` when
    /// searching an unknown index.
    pub async fn pipeline(&self, request: PipelineRequest) -> Result<PipelineOutput> {
        let k = request.k.map(positive_k).transpose()?;
        let output = self.predict(request.predict).await?;

        let Some(index_name) = request.index_name else {
            return Ok(PipelineOutput::Prediction(output));
        };
        if k.is_none() && request.embedding_id.is_none() {
            return Ok(PipelineOutput::Prediction(output));
        }

        let embedding = output.as_embedding().ok_or_else(|| {
            ServiceError::BadInput("Model output is not an embedding and cannot be indexed".to_string())
        })?;
        let rows = Embeddings::from_vector(embedding.to_vec())?;

        let matches = match k {
            Some(k) => Some(self.search_embeddings(&index_name, rows.clone(), k).await?),
            None => None,
        };
        if let Some(id) = request.embedding_id {
            self.add_embeddings(&index_name, vec![id], rows).await?;
        }

        Ok(matches.map_or(PipelineOutput::Prediction(output), PipelineOutput::Matches))
    }

    /// Returns up to `k` nearest ids per query row, flattened.
    ///
    /// # Errors
    /// `BadInput` for malformed embeddings or `k < 1`; `NotFound` if the
    /// index is missing or has another dimensionality.
    pub async fn search_index(
        &self,
        index_name: &str,
        embeddings: &Value,
        k: i64,
    ) -> Result<Vec<String>> {
        let queries = Embeddings::from_json(embeddings)?;
        let k = positive_k(k)?;
        self.search_embeddings(index_name, queries, k).await
    }

    /// Appends embeddings to an index, creating it if missing or of another
    /// dimensionality.
    ///
    /// # Errors
    /// `BadInput` for malformed embeddings, a count mismatch or repeated ids.
    pub async fn add_to_index(
        &self,
        index_name: &str,
        ids: Vec<String>,
        embeddings: &Value,
    ) -> Result<()> {
        let rows = Embeddings::from_json(embeddings)?;
        self.add_embeddings(index_name, ids, rows).await
    }

    /// Builds a fresh index, replacing any index with the same name.
    ///
    /// # Errors
    /// `BadInput` for malformed embeddings, a count mismatch or repeated ids.
    pub async fn create_index(
        &self,
        index_name: &str,
        ids: Vec<String>,
        embeddings: &Value,
    ) -> Result<()> {
        let rows = Embeddings::from_json(embeddings)?;
        let vectors = Arc::clone(&self.vectors);
        let index_name = index_name.to_string();
        Ok(self.dispatcher.run(move || vectors.create(&index_name, ids, &rows)).await??)
    }

    async fn search_embeddings(
        &self,
        index_name: &str,
        queries: Embeddings,
        k: usize,
    ) -> Result<Vec<String>> {
        let vectors = Arc::clone(&self.vectors);
        let index_name = index_name.to_string();
        Ok(self.dispatcher.run(move || vectors.search(&index_name, &queries, k)).await??)
    }

    async fn add_embeddings(
        &self,
        index_name: &str,
        ids: Vec<String>,
        rows: Embeddings,
    ) -> Result<()> {
        let vectors = Arc::clone(&self.vectors);
        let index_name = index_name.to_string();
        Ok(self.dispatcher.run(move || vectors.add(&index_name, ids, &rows)).await??)
    }

    /// Stops eviction, unloads every model and closes the worker pool.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        self.dispatcher.close();
        info!("Inference service stopped");
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    #[must_use]
    pub fn vectors(&self) -> &Arc<VectorStore> {
        &self.vectors
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("dispatcher", &self.dispatcher)
            .field("vectors", &self.vectors)
            .finish_non_exhaustive()
    }
}

fn positive_k(k: i64) -> Result<usize> {
    usize::try_from(k)
        .ok()
        .filter(|k| *k >= 1)
        .ok_or_else(|| ServiceError::BadInput(format!("k must be a positive integer; got {k}")))
}
