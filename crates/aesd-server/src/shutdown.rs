//! Cooperative shutdown.
//!
//! A single [`ShutdownSignal`] is shared by the accept loop, every
//! connection handler, and the timestamp writer. Triggering it is one-way.
//! Threads blocked in [`ShutdownSignal::wait_until`] wake immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Instant;

/// Process-wide shutdown flag with a wake-up for timed waiters.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    gate: Mutex<()>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake all waiters. Returns `true` only for the call
    /// that actually flipped it.
    pub fn trigger(&self) -> bool {
        let first = !self.triggered.swap(true, Ordering::SeqCst);
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Block until `deadline` or until shutdown is triggered, whichever
    /// comes first. Returns `true` if shutdown was triggered.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_triggered() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            gate = self
                .wake
                .wait_timeout(gate, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Which OS signal requested shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolve when SIGINT or SIGTERM is delivered.
pub async fn termination_signal() -> std::io::Result<SignalKind> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminated = async move {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminated = std::future::pending::<()>();

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| SignalKind::Interrupt),
        _ = terminated => Ok(SignalKind::Terminate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn trigger_is_one_way() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }

    #[test]
    fn wait_times_out_without_trigger() {
        let signal = ShutdownSignal::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!signal.wait_until(deadline));
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn trigger_wakes_waiter() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_until(Instant::now() + Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn signal_kind_display() {
        assert_eq!(SignalKind::Interrupt.to_string(), "SIGINT");
        assert_eq!(SignalKind::Terminate.to_string(), "SIGTERM");
    }
}
