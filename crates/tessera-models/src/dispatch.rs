//! Work-offload boundary between the request scheduler and blocking calls.
//!
//! Model loads, predictions and index builds block for a long time. The
//! [`Dispatcher`] is the only place that moves such work off the async
//! scheduler: with a pool size of zero it runs work inline, otherwise it
//! admits at most `request_threads` jobs onto tokio's blocking pool at once.
//! Waiters are admitted in FIFO order. Nothing here times out or cancels.

use std::any::Any;
use std::sync::Arc;

use tessera_abstraction::ModelError;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Errors raised by the dispatcher itself, never by the dispatched work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The work item panicked on its worker thread.
    #[error("Dispatched work panicked: {0}")]
    Panicked(String),

    /// The worker pool was shut down before the work could run.
    #[error("Worker pool is closed")]
    Closed,
}

impl From<DispatchError> for ModelError {
    fn from(err: DispatchError) -> Self {
        Self::Worker(err.to_string())
    }
}

/// Runs blocking work inline or on a bounded worker pool.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Option<Arc<Semaphore>>,
    threads: usize,
}

impl Dispatcher {
    /// Creates a dispatcher with `request_threads` workers (0 = inline).
    #[must_use]
    pub fn new(request_threads: usize) -> Self {
        let pool = (request_threads > 0).then(|| Arc::new(Semaphore::new(request_threads)));
        debug!(request_threads, inline = pool.is_none(), "Created dispatcher");
        Self { pool, threads: request_threads }
    }

    /// Creates a dispatcher that runs everything on the caller.
    #[must_use]
    pub fn inline() -> Self {
        Self::new(0)
    }

    /// Whether work runs on the caller instead of a pool.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.pool.is_none()
    }

    /// Configured pool size (0 when inline).
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `work` and returns its result.
    ///
    /// When pooled, the calling task is suspended until a worker slot frees
    /// up and the work completes; other tasks keep running meanwhile.
    ///
    /// # Errors
    /// Returns `DispatchError::Panicked` if `work` panics on a pooled thread
    /// and `DispatchError::Closed` if the pool has been closed.
    pub async fn run<F, T>(&self, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let Some(pool) = &self.pool else {
            return Ok(work());
        };

        let permit = Arc::clone(pool).acquire_owned().await.map_err(|_| DispatchError::Closed)?;

        tokio::task::spawn_blocking(move || {
            // Held for the lifetime of the work, even if the caller stops awaiting.
            let _permit = permit;
            work()
        })
        .await
        .map_err(|join_error| {
            if join_error.is_panic() {
                let message = panic_message(join_error.into_panic());
                error!(panic = %message, "Dispatched work panicked");
                DispatchError::Panicked(message)
            } else {
                DispatchError::Closed
            }
        })
    }

    /// Stops admitting new work. Queued callers receive `DispatchError::Closed`.
    pub fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close();
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::inline()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
