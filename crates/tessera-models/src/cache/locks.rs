//! Per-category load locks.
//!
//! There is one lock per model category, not per model. Two CLIP models
//! requested at the same time load one after the other even though they are
//! unrelated; a CLIP model and a face model load in parallel. This bounds the
//! memory spike of concurrent cold starts within a category at the cost of
//! head-of-line blocking between models of that category.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tessera_abstraction::ModelType;

/// One mutual-exclusion lock per [`ModelType`].
#[derive(Debug)]
pub struct ModelLocks {
    locks: HashMap<ModelType, Mutex<()>>,
}

impl ModelLocks {
    /// Creates a lock for every category.
    #[must_use]
    pub fn new() -> Self {
        Self { locks: ModelType::ALL.into_iter().map(|model_type| (model_type, Mutex::new(()))).collect() }
    }

    /// Blocks the current thread until the category's lock is held.
    ///
    /// Only call this from a dispatcher worker. The guard carries no data,
    /// so a poisoned lock is simply taken over.
    pub fn acquire(&self, model_type: ModelType) -> MutexGuard<'_, ()> {
        self.locks[&model_type].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ModelLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_every_category_has_a_lock() {
        let locks = ModelLocks::new();
        for model_type in ModelType::ALL {
            drop(locks.acquire(model_type));
        }
    }

    #[test]
    fn test_categories_do_not_block_each_other() {
        let locks = ModelLocks::new();
        let _clip = locks.acquire(ModelType::Clip);
        // Would deadlock if categories shared a lock.
        let _faces = locks.acquire(ModelType::FacialRecognition);
    }

    #[test]
    fn test_same_category_is_exclusive() {
        let locks = Arc::new(ModelLocks::new());
        let released = Arc::new(AtomicBool::new(false));

        let guard = locks.acquire(ModelType::Clip);
        let waiter = std::thread::spawn({
            let locks = Arc::clone(&locks);
            let released = Arc::clone(&released);
            move || {
                let _guard = locks.acquire(ModelType::Clip);
                released.load(Ordering::SeqCst)
            }
        });

        std::thread::sleep(Duration::from_millis(50));
        released.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let locks = Arc::new(ModelLocks::new());
        let poisoner = Arc::clone(&locks);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.acquire(ModelType::ImageClassification);
            panic!("poison the lock");
        })
        .join();

        drop(locks.acquire(ModelType::ImageClassification));
    }
}
