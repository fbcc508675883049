//! ModelCache implementation with lazy loading and TTL eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tessera_abstraction::{InferenceModel, ModelError, ModelOptions, ModelType};
use tokio::sync::{RwLock, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheConfigError};
use super::locks::ModelLocks;
use super::types::{CacheEntry, CacheStats, ModelKey};
use crate::dispatch::Dispatcher;
use crate::factory::ModelFactory;

/// What a load call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Another caller had already loaded the model.
    AlreadyLoaded,
    /// Loaded on the first attempt.
    Loaded,
    /// Loaded after clearing artifacts and retrying once.
    LoadedAfterRetry,
}

/// State shared with the background sweep task.
struct CacheInner {
    entries: RwLock<HashMap<ModelKey, Arc<CacheEntry>>>,
    factory: ModelFactory,
    locks: Arc<ModelLocks>,
    dispatcher: Dispatcher,
    stats: Mutex<CacheStats>,
}

impl CacheInner {
    fn update_stats(&self, update: impl FnOnce(&mut CacheStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Removes every entry idle for longer than `ttl` and unloads it.
    async fn evict_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<CacheEntry>> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<ModelKey> = entries
                .iter()
                .filter(|(_, entry)| entry.idle_for(now) > ttl)
                .map(|(key, _)| key.clone())
                .collect();
            let removed: Vec<Arc<CacheEntry>> =
                keys.iter().filter_map(|key| entries.remove(key)).collect();
            let cache_size = entries.len();
            self.update_stats(|stats| {
                stats.total_evictions += removed.len() as u64;
                stats.cache_size = cache_size;
            });
            removed
        };

        for entry in &expired {
            info!(
                model = %entry.key().model_name,
                model_type = %entry.key().model_type,
                idle_secs = entry.idle_for(now).as_secs(),
                "Evicting idle model"
            );
            self.unload(entry).await;
        }

        expired.len()
    }

    /// Unloads an entry's model under its category lock.
    async fn unload(&self, entry: &Arc<CacheEntry>) {
        let model = Arc::clone(entry.model());
        let locks = Arc::clone(&self.locks);
        let result = self
            .dispatcher
            .run(move || {
                let _guard = locks.acquire(model.model_type());
                model.unload();
            })
            .await;

        if let Err(error) = result {
            warn!(
                model = %entry.key().model_name,
                model_type = %entry.key().model_type,
                error = %error,
                "Failed to unload model"
            );
        }
    }
}

/// Model cache for optimizing model lifecycle.
///
/// Provides construct-or-fetch lookup, serialized loading per category and
/// idle eviction driven by a background sweep.
pub struct ModelCache {
    inner: Arc<CacheInner>,
    config: CacheConfig,
    shutdown_tx: Mutex<Option<watch::Sender<()>>>,
}

impl ModelCache {
    /// Create a new model cache with the given configuration.
    ///
    /// The sweep is not started here; call [`ModelCache::start_sweeper`]
    /// from inside the runtime.
    ///
    /// # Arguments
    /// * `config` - Cache configuration
    /// * `factory` - Creates models for new entries
    /// * `dispatcher` - Runs loads and unloads off the scheduler
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(
        config: CacheConfig,
        factory: ModelFactory,
        dispatcher: Dispatcher,
    ) -> Result<Self, CacheConfigError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                factory,
                locks: Arc::new(ModelLocks::new()),
                dispatcher,
                stats: Mutex::new(CacheStats::default()),
            }),
            config,
            shutdown_tx: Mutex::new(None),
        })
    }

    /// Get the entry for a model, creating an unloaded one if absent.
    ///
    /// Never loads. A new entry is visible to every later `get` before any
    /// load starts, so concurrent callers for the same key share one entry.
    ///
    /// # Arguments
    /// * `model_name` - The model name
    /// * `model_type` - The model category
    /// * `options` - Request options
    pub async fn get(
        &self,
        model_name: &str,
        model_type: ModelType,
        options: &ModelOptions,
    ) -> Arc<CacheEntry> {
        let key = ModelKey::new(model_name, model_type, options);

        {
            let entries = self.inner.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                entry.touch();
                self.inner.update_stats(|stats| stats.total_hits += 1);
                debug!(key = %key, "Cache hit");
                return Arc::clone(entry);
            }
        }

        let mut entries = self.inner.entries.write().await;
        // Another task may have inserted the key while we waited.
        if let Some(entry) = entries.get(&key) {
            entry.touch();
            self.inner.update_stats(|stats| stats.total_hits += 1);
            return Arc::clone(entry);
        }

        let model = self.inner.factory.create(model_name, model_type, options);
        let entry = Arc::new(CacheEntry::new(key.clone(), model));
        entries.insert(key.clone(), Arc::clone(&entry));
        let cache_size = entries.len();
        self.inner.update_stats(|stats| {
            stats.total_misses += 1;
            stats.cache_size = cache_size;
        });

        info!(key = %key, "Created model cache entry");
        entry
    }

    /// Load an entry's model if it is not loaded yet.
    ///
    /// Runs on the dispatcher under the category lock. Recognized artifact
    /// errors trigger one cache clear and one retry; anything else, or a
    /// second failure, is returned and the entry stays unloaded.
    ///
    /// # Errors
    /// Returns the load `ModelError`, or `ModelError::Worker` if the
    /// dispatcher failed.
    pub async fn load(&self, entry: &Arc<CacheEntry>) -> Result<LoadOutcome, ModelError> {
        if entry.is_loaded() {
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let model = Arc::clone(entry.model());
        let locks = Arc::clone(&self.inner.locks);
        let outcome =
            self.inner.dispatcher.run(move || load_serialized(model.as_ref(), &locks)).await??;
        // A slow load must not leave the entry already past its TTL.
        entry.refresh();

        self.inner.update_stats(|stats| match outcome {
            LoadOutcome::AlreadyLoaded => {}
            LoadOutcome::Loaded => stats.total_loads += 1,
            LoadOutcome::LoadedAfterRetry => {
                stats.total_loads += 1;
                stats.total_load_retries += 1;
            }
        });
        Ok(outcome)
    }

    /// Get the entry for a model and make sure it is loaded.
    ///
    /// # Errors
    /// Same as [`ModelCache::load`].
    pub async fn get_loaded(
        &self,
        model_name: &str,
        model_type: ModelType,
        options: &ModelOptions,
    ) -> Result<Arc<CacheEntry>, ModelError> {
        let entry = self.get(model_name, model_type, options).await;
        self.load(&entry).await?;
        Ok(entry)
    }

    /// Start the background sweep that evicts idle entries.
    ///
    /// Does nothing when the TTL is zero or revalidation is disabled; in
    /// that case models stay resident until shutdown.
    ///
    /// # Returns
    /// `true` if a sweep is running after the call.
    pub fn start_sweeper(&self) -> bool {
        let Some(ttl) = self.config.ttl().filter(|_| self.config.revalidate()) else {
            info!("Model cache eviction disabled");
            return false;
        };

        let mut shutdown_tx = self.shutdown_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if shutdown_tx.is_some() {
            return true;
        }

        let (tx, mut rx) = watch::channel(());
        let inner = Arc::clone(&self.inner);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            info!(
                ttl_secs = ttl.as_secs(),
                interval_secs = period.as_secs(),
                "Model cache sweep started"
            );

            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        info!("Model cache sweep stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let evicted = inner.evict_expired(ttl).await;
                        if evicted > 0 {
                            debug!(evicted, "Model cache sweep finished");
                        }
                    }
                }
            }
        });

        *shutdown_tx = Some(tx);
        true
    }

    /// Run one eviction pass now.
    ///
    /// # Returns
    /// Number of evicted entries (always 0 when eviction is disabled).
    pub async fn sweep(&self) -> usize {
        match self.config.ttl() {
            Some(ttl) => self.inner.evict_expired(ttl).await,
            None => 0,
        }
    }

    /// Whether the background sweep is running.
    pub fn is_sweeping(&self) -> bool {
        self.shutdown_tx.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Remove a specific model from the cache and unload it.
    ///
    /// # Returns
    /// `true` if the model was removed, `false` if it was not found.
    pub async fn remove(&self, key: &ModelKey) -> bool {
        let removed = {
            let mut entries = self.inner.entries.write().await;
            let removed = entries.remove(key);
            let cache_size = entries.len();
            if removed.is_some() {
                self.inner.update_stats(|stats| {
                    stats.total_evictions += 1;
                    stats.cache_size = cache_size;
                });
            }
            removed
        };

        match removed {
            Some(entry) => {
                info!(key = %key, "Removed model from cache");
                self.inner.unload(&entry).await;
                true
            }
            None => false,
        }
    }

    /// Whether an entry exists for `key`.
    pub async fn contains(&self, key: &ModelKey) -> bool {
        self.inner.entries.read().await.contains_key(key)
    }

    /// Keys of all current entries, sorted.
    pub async fn keys(&self) -> Vec<ModelKey> {
        let mut keys: Vec<ModelKey> = self.inner.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stop the sweep and unload every entry.
    pub async fn shutdown(&self) {
        let shutdown_tx = self.shutdown_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        let drained = {
            let mut entries = self.inner.entries.write().await;
            let drained: Vec<Arc<CacheEntry>> = entries.drain().map(|(_, entry)| entry).collect();
            self.inner.update_stats(|stats| stats.cache_size = 0);
            drained
        };

        for entry in &drained {
            self.inner.unload(entry).await;
        }
        info!(unloaded = drained.len(), "Model cache shut down");
    }

    /// Get the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The dispatcher used for loads and unloads.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// The blocking load path: lock the category, re-check, load, retry once.
fn load_serialized(model: &dyn InferenceModel, locks: &ModelLocks) -> Result<LoadOutcome, ModelError> {
    let _guard = locks.acquire(model.model_type());
    if model.is_loaded() {
        return Ok(LoadOutcome::AlreadyLoaded);
    }

    match model.load() {
        Ok(()) => Ok(LoadOutcome::Loaded),
        Err(error) if error.is_recoverable() => {
            warn!(
                model = %model.model_name(),
                model_type = %model.model_type(),
                error = %error,
                "Failed to load model. Clearing cache and retrying."
            );
            model.clear_cache()?;
            model.load()?;
            Ok(LoadOutcome::LoadedAfterRetry)
        }
        Err(error) => Err(error),
    }
}
