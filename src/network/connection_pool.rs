//! Connection limiting for the mock server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of connections served at once
#[derive(Clone)]
pub struct ConnectionPool {
    semaphore: Arc<Semaphore>,
    active_count: Arc<AtomicUsize>,
    max_connections: usize,
}

impl ConnectionPool {
    /// Create a pool admitting `max_connections` connections
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        assert!(max_connections > 0, "max_connections must be > 0");

        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            active_count: Arc::new(AtomicUsize::new(0)),
            max_connections,
        }
    }

    /// Admit a connection, or `None` if the pool is full or closed
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.active_count.fetch_add(1, Ordering::Relaxed);
        Some(ConnectionGuard {
            _permit: permit,
            active_count: Arc::clone(&self.active_count),
        })
    }

    /// Refuse every later connection
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Connections currently being served
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Configured limit
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// Held for the lifetime of a served connection
pub struct ConnectionGuard {
    _permit: OwnedSemaphorePermit,
    active_count: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
    }
}
