// SPDX-License-Identifier: GPL-2.0-or-later

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded worker pool for payload iteration.
///
/// The pool may be resized between iterations to track the global
/// payload concurrency option. Growing takes effect immediately;
/// shrinking takes effect as in-flight workers release their permits.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size: Arc::new(AtomicUsize::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Resizes the pool; a no-op when the size is unchanged.
    pub fn resize(&self, new_size: usize) {
        let new_size = new_size.max(1);
        let current = self.size.swap(new_size, Ordering::SeqCst);
        if new_size > current {
            self.semaphore.add_permits(new_size - current);
        } else if new_size < current {
            self.semaphore.forget_permits(current - new_size);
        }
    }

    /// Acquires a worker slot, waiting until one is free.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore is never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let a = pool.acquire().await;
        let _b = pool.acquire().await;
        // third slot is not available
        assert!(
            tokio::time::timeout(Duration::from_millis(50), pool.acquire())
                .await
                .is_err()
        );
        drop(a);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), pool.acquire())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn resize_grows_available_permits() {
        let pool = WorkerPool::new(1);
        let _a = pool.acquire().await;
        pool.resize(2);
        assert_eq!(pool.size(), 2);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), pool.acquire())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn resize_to_same_size_is_a_noop() {
        let pool = WorkerPool::new(3);
        pool.resize(3);
        assert_eq!(pool.size(), 3);
        let _a = pool.acquire().await;
        let _b = pool.acquire().await;
        let _c = pool.acquire().await;
    }

    #[tokio::test]
    async fn shrink_reduces_size() {
        let pool = WorkerPool::new(5);
        pool.resize(2);
        assert_eq!(pool.size(), 2);
        let _a = pool.acquire().await;
        let _b = pool.acquire().await;
        assert!(
            tokio::time::timeout(Duration::from_millis(50), pool.acquire())
                .await
                .is_err()
        );
    }
}
