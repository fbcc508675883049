//! Index registry with build-then-swap mutation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::{AnnIndex, Embeddings, FlatIndex, NO_MATCH, VectorError};

type EngineBuilder = fn(usize) -> Box<dyn AnnIndex>;

struct IndexState {
    ann: Box<dyn AnnIndex>,
    ids: Vec<String>,
    handles: HashMap<String, usize>,
}

/// One named index: the search structure plus the id ↔ handle mapping.
///
/// Handles are contiguous from 0 and `ids[handle]` is the id stored under it.
pub struct VectorIndex {
    name: String,
    dims: usize,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    fn build(
        name: &str,
        ids: Vec<String>,
        embeddings: &Embeddings,
        builder: EngineBuilder,
    ) -> Result<Self, VectorError> {
        check_batch(name, &ids, embeddings, None)?;

        let mut ann = builder(embeddings.dims());
        ann.add(embeddings);
        let handles = ids.iter().enumerate().map(|(handle, id)| (id.clone(), handle)).collect();

        Ok(Self {
            name: name.to_string(),
            dims: embeddings.dims(),
            state: RwLock::new(IndexState { ann, ids, handles }),
        })
    }

    fn append(&self, ids: Vec<String>, embeddings: &Embeddings) -> Result<(), VectorError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        check_batch(&self.name, &ids, embeddings, Some(&state.handles))?;

        state.ann.add(embeddings);
        for id in ids {
            let handle = state.ids.len();
            state.handles.insert(id.clone(), handle);
            state.ids.push(id);
        }
        Ok(())
    }

    fn search(&self, queries: &Embeddings, k: usize) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .ann
            .search(queries, k)
            .into_iter()
            .flatten()
            .filter(|handle| *handle != NO_MATCH)
            .filter_map(|handle| usize::try_from(handle).ok())
            .filter_map(|handle| state.ids.get(handle).cloned())
            .collect()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Internal handle assigned to `id`.
    #[must_use]
    pub fn handle_of(&self, id: &str) -> Option<usize> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).handles.get(id).copied()
    }

    /// Id stored under `handle`.
    #[must_use]
    pub fn id_of(&self, handle: usize) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).ids.get(handle).cloned()
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("name", &self.name)
            .field("dims", &self.dims)
            .field("len", &self.len())
            .finish()
    }
}

/// Rejects count mismatches and ids that are repeated or already indexed.
fn check_batch(
    name: &str,
    ids: &[String],
    embeddings: &Embeddings,
    existing: Option<&HashMap<String, usize>>,
) -> Result<(), VectorError> {
    if ids.len() != embeddings.rows() {
        return Err(VectorError::BadInput(format!(
            "Number of ids ({}) must match number of embeddings ({})",
            ids.len(),
            embeddings.rows()
        )));
    }

    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) || existing.is_some_and(|handles| handles.contains_key(id)) {
            return Err(VectorError::BadInput(format!(
                "Id '{id}' is already present in index '{name}'"
            )));
        }
    }
    Ok(())
}

/// Process-wide registry of named indexes.
///
/// Every structural mutation (create, add, remove) runs under one store-wide
/// lock, across all index names. Searches only take the read lock of the
/// index they query, so a search racing an `add` may or may not see the new
/// vectors. A replacement index is fully built before it is swapped in; a
/// failed `create` leaves the previous index untouched.
///
/// All methods block and are meant to run on the dispatcher.
pub struct VectorStore {
    indexes: RwLock<HashMap<String, Arc<VectorIndex>>>,
    index_lock: Mutex<()>,
    builder: EngineBuilder,
}

impl VectorStore {
    /// Creates an empty store backed by [`FlatIndex`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(FlatIndex::boxed)
    }

    /// Creates an empty store that builds indexes with `builder`.
    #[must_use]
    pub fn with_engine(builder: EngineBuilder) -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            index_lock: Mutex::new(()),
            builder,
        }
    }

    /// Builds a fresh index, replacing any index with the same name.
    ///
    /// # Errors
    /// Returns `VectorError::BadInput` if the id count differs from the row
    /// count or ids repeat.
    pub fn create(
        &self,
        name: &str,
        ids: Vec<String>,
        embeddings: &Embeddings,
    ) -> Result<(), VectorError> {
        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.create_locked(name, ids, embeddings)
    }

    fn create_locked(
        &self,
        name: &str,
        ids: Vec<String>,
        embeddings: &Embeddings,
    ) -> Result<(), VectorError> {
        let index = Arc::new(VectorIndex::build(name, ids, embeddings, self.builder)?);

        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        if indexes.contains_key(name) {
            warn!(index = %name, "Index '{}' already exists. Overwriting.", name);
        }
        info!(index = %name, dims = index.dims(), vectors = index.len(), "Created index");
        indexes.insert(name.to_string(), index);
        Ok(())
    }

    /// Appends vectors to an index.
    ///
    /// If the index does not exist or has another dimensionality this is
    /// the same as [`create`](Self::create).
    ///
    /// # Errors
    /// Returns `VectorError::BadInput` if the id count differs from the row
    /// count or an id is repeated or already indexed.
    pub fn add(
        &self,
        name: &str,
        ids: Vec<String>,
        embeddings: &Embeddings,
    ) -> Result<(), VectorError> {
        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);

        match self.get(name).filter(|index| index.dims() == embeddings.dims()) {
            Some(index) => {
                index.append(ids, embeddings)?;
                debug!(index = %name, vectors = index.len(), "Added to index");
                Ok(())
            }
            None => self.create_locked(name, ids, embeddings),
        }
    }

    /// Returns up to `k` nearest ids for every query row, flattened in row
    /// order.
    ///
    /// # Errors
    /// Returns `VectorError::BadInput` if `k` is 0 and
    /// `VectorError::NotFound` if no index with this name and dimensionality
    /// exists.
    pub fn search(
        &self,
        name: &str,
        queries: &Embeddings,
        k: usize,
    ) -> Result<Vec<String>, VectorError> {
        if k == 0 {
            return Err(VectorError::BadInput("k must be at least 1".to_string()));
        }
        let index = self
            .get(name)
            .filter(|index| index.dims() == queries.dims())
            .ok_or_else(|| VectorError::NotFound(name.to_string()))?;
        Ok(index.search(queries, k))
    }

    /// Drops an index. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self
            .indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            info!(index = %name, "Removed index");
        }
        removed
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<VectorIndex>> {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Index names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.indexes.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore").field("indexes", &self.names()).finish()
    }
}
