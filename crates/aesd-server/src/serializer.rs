use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use aesd_store::LogBackend;

use crate::error::{ServerError, ServerResult};
use crate::shutdown::ShutdownSignal;

/// Guard over the backing store, held for one commit batch or read chunk.
pub type StoreGuard<'a> = MutexGuard<'a, Box<dyn LogBackend>>;

/// The single exclusive lock in front of the backing store.
///
/// Every reader and writer goes through [`AccessSerializer::acquire`];
/// there is no reader/writer distinction. The lock is only ever held for
/// bounded store work, never across socket I/O, so acquisition cannot stall
/// behind a slow client. Once shutdown is triggered, acquisition fails with
/// [`ServerError::ShuttingDown`] instead of granting further access.
pub struct AccessSerializer {
    backend: Mutex<Box<dyn LogBackend>>,
    shutdown: Arc<ShutdownSignal>,
}

impl AccessSerializer {
    pub fn new(backend: Box<dyn LogBackend>, shutdown: Arc<ShutdownSignal>) -> Self {
        Self {
            backend: Mutex::new(backend),
            shutdown,
        }
    }

    pub fn acquire(&self) -> ServerResult<StoreGuard<'_>> {
        if self.shutdown.is_triggered() {
            return Err(ServerError::ShuttingDown);
        }
        let guard = self.backend.lock().map_err(|_| ServerError::LockPoisoned)?;
        if self.shutdown.is_triggered() {
            return Err(ServerError::ShuttingDown);
        }
        Ok(guard)
    }

    /// Commit one record under the lock.
    pub fn append(&self, record: &[u8]) -> ServerResult<()> {
        self.acquire()?.append(record)?;
        Ok(())
    }

    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Tear the backing store down at the end of the server's life.
    ///
    /// Bypasses the shutdown check and recovers from poisoning: by the time
    /// this runs every other user of the lock has been joined.
    pub fn teardown(&self) -> ServerResult<()> {
        let mut backend = self.backend.lock().unwrap_or_else(|poisoned| {
            warn!("access lock poisoned; tearing down anyway");
            PoisonError::into_inner(poisoned)
        });
        backend.teardown()?;
        Ok(())
    }

    /// Snapshot of the whole concatenated log, read in `chunk`-sized steps.
    pub fn contents(&self, chunk: usize) -> ServerResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk.max(1)];
        let mut store = self.acquire()?;
        loop {
            let n = store.read_at(out.len() as u64, &mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

impl std::fmt::Debug for AccessSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessSerializer")
            .field("shutdown", &self.shutdown.is_triggered())
            .finish_non_exhaustive()
    }
}
