use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

/// Identifier assigned to each accepted connection.
pub type ConnectionId = u64;

/// Set when a handler's thread body has returned, including by panic.
struct CompletionGuard(Arc<AtomicBool>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

struct HandlerEntry {
    peer: SocketAddr,
    handle: JoinHandle<()>,
    completed: Arc<AtomicBool>,
    /// Second handle onto the client socket, used to unblock a pending
    /// receive when the registry drains.
    control: Option<TcpStream>,
}

/// Outstanding connection-handler threads, keyed by connection id.
///
/// Owned by the accept loop. Finished handlers are reaped on every accept;
/// [`ThreadRegistry::drain`] joins everything at shutdown.
#[derive(Default)]
pub struct ThreadRegistry {
    entries: HashMap<ConnectionId, HandlerEntry>,
    next_id: ConnectionId,
    spawned: u64,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `work` on a new named thread and track it.
    ///
    /// `control` should be a clone of the client socket; at drain time it is
    /// shut down in both directions so a handler blocked on a silent client,
    /// or on a client that stopped reading, returns. Spawn failure is
    /// returned and nothing is registered.
    pub fn spawn<F>(
        &mut self,
        peer: SocketAddr,
        control: Option<TcpStream>,
        work: F,
    ) -> std::io::Result<ConnectionId>
    where
        F: FnOnce(ConnectionId) + Send + 'static,
    {
        let id = self.next_id;
        let completed = Arc::new(AtomicBool::new(false));
        let guard = CompletionGuard(Arc::clone(&completed));

        let handle = thread::Builder::new()
            .name(format!("conn-{id}"))
            .spawn(move || {
                let _guard = guard;
                work(id);
            })?;

        self.next_id += 1;
        self.spawned += 1;
        self.entries.insert(
            id,
            HandlerEntry {
                peer,
                handle,
                completed,
                control,
            },
        );
        debug!(id, %peer, outstanding = self.entries.len(), "handler registered");
        Ok(id)
    }

    /// Join and remove every handler whose completion flag is set.
    pub fn reap_completed(&mut self) -> usize {
        let finished: Vec<ConnectionId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.completed.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            if let Some(entry) = self.entries.remove(id) {
                Self::join(*id, entry);
            }
        }
        finished.len()
    }

    /// Join every outstanding handler, running or not. Blocks until all
    /// have returned.
    pub fn drain(&mut self) -> usize {
        let reaped = self.reap_completed();
        let outstanding = self.entries.len();
        if outstanding > 0 {
            info!(outstanding, "waiting for connection handlers");
        }
        for entry in self.entries.values() {
            if let Some(control) = &entry.control {
                // The handler may already have closed its socket.
                let _ = control.shutdown(Shutdown::Both);
            }
        }
        for (id, entry) in self.entries.drain() {
            Self::join(id, entry);
        }
        reaped + outstanding
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handlers started over the registry's lifetime.
    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    fn join(id: ConnectionId, entry: HandlerEntry) {
        match entry.handle.join() {
            Ok(()) => debug!(id, peer = %entry.peer, "handler joined"),
            Err(_) => warn!(id, peer = %entry.peer, "handler panicked"),
        }
    }
}

impl std::fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("outstanding", &self.entries.len())
            .field("spawned", &self.spawned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn peer() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn reaps_only_finished_handlers() {
        let mut registry = ThreadRegistry::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<ConnectionId>();

        let quick = registry
            .spawn(peer(), None, move |id| done_tx.send(id).unwrap())
            .unwrap();
        registry
            .spawn(peer(), None, move |_| {
                let _ = release_rx.recv();
            })
            .unwrap();
        assert_eq!(done_rx.recv().unwrap(), quick);

        wait_for(|| registry.reap_completed() == 1);
        assert_eq!(registry.len(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(registry.drain(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.spawned(), 2);
    }

    #[test]
    fn panicking_handler_is_reaped() {
        let mut registry = ThreadRegistry::new();
        registry.spawn(peer(), None, |_| panic!("boom")).unwrap();
        wait_for(|| registry.reap_completed() == 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_unblocks_silent_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (mut server_side, client_addr) = listener.accept().unwrap();
        let control = server_side.try_clone().unwrap();

        let mut registry = ThreadRegistry::new();
        registry
            .spawn(client_addr, Some(control), move |_| {
                let mut buf = [0u8; 16];
                // Blocks until the registry shuts the socket down.
                assert_eq!(server_side.read(&mut buf).unwrap(), 0);
            })
            .unwrap();

        assert_eq!(registry.drain(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_unblocks_stalled_writer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (mut server_side, client_addr) = listener.accept().unwrap();
        let control = server_side.try_clone().unwrap();

        let mut registry = ThreadRegistry::new();
        registry
            .spawn(client_addr, Some(control), move |_| {
                let chunk = vec![0u8; 64 * 1024];
                // The client never reads, so this fills the socket buffers
                // and blocks until the registry shuts the socket down.
                while server_side.write_all(&chunk).is_ok() {}
            })
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(registry.drain(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let mut registry = ThreadRegistry::new();
        let a = registry.spawn(peer(), None, |_| {}).unwrap();
        let b = registry.spawn(peer(), None, |_| {}).unwrap();
        assert_ne!(a, b);
        registry.drain();
    }
}
