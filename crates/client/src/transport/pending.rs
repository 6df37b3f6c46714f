//! In-flight request deduplication.
//!
//! Maps each [`PendingOperationKey`] to the single shared task servicing it.
//! A caller asking for a key that is already in flight joins the existing
//! task instead of issuing a second network call. The entry is removed by the
//! task itself as it completes, so a later request with the same key goes to
//! the network again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::debug;

use super::request::PendingOperationKey;

type SharedTask<T> = Shared<BoxFuture<'static, T>>;
type Registry<T> = Mutex<HashMap<PendingOperationKey, SharedTask<T>>>;

/// Registry of in-flight operations.
///
/// Cheaply cloneable; clones share the same registry.
pub struct PendingOperations<T: Clone> {
    inner: Arc<Registry<T>>,
}

impl<T: Clone> Clone for PendingOperations<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Default for PendingOperations<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> PendingOperations<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` for `key`, or join the task already running for it.
    ///
    /// `start` is only called when no task for `key` is in flight.
    pub async fn run<F>(&self, key: PendingOperationKey, start: F) -> T
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let task = {
            let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = registry.get(&key) {
                debug!(key = %key, "Joining in-flight request");
                existing.clone()
            } else {
                let task = Self::wrap(Arc::downgrade(&self.inner), key.clone(), start());
                registry.insert(key, task.clone());
                task
            }
        };

        task.await
    }

    /// Number of operations currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn wrap(
        registry: std::sync::Weak<Registry<T>>,
        key: PendingOperationKey,
        task: BoxFuture<'static, T>,
    ) -> SharedTask<T> {
        async move {
            let output = task.await;
            if let Some(registry) = registry.upgrade() {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
            }
            output
        }
        .boxed()
        .shared()
    }
}
