//! One-shot broadcast shutdown signal
//!
//! Once triggered the signal stays set forever. Every blocking wait in the
//! simulation either sleeps on this signal or re-checks it between bounded
//! wait slices, so shutdown latency is bounded.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

type Hook = Box<dyn Fn() + Send + Sync>;

struct Inner {
    fired: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
    hooks: Mutex<Vec<Hook>>,
}

/// Cloneable handle to the shared shutdown flag
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("fired", &self.is_triggered())
            .finish()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        ShutdownSignal {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                lock: Mutex::new(()),
                cond: Condvar::new(),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Fire the signal
    ///
    /// # Returns
    /// `true` for the single call that performed the transition, `false` for
    /// every later (or concurrently losing) call. Callers gate their one-time
    /// side effects on this value.
    pub fn trigger(&self) -> bool {
        if self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        {
            // Taking the lock orders the flag store before any sleeper's re-check
            let _guard = self.inner.lock.lock();
            self.inner.cond.notify_all();
        }

        for hook in self.inner.hooks.lock().iter() {
            hook();
        }
        true
    }

    /// Register a callback run once when the signal fires
    ///
    /// If the signal has already fired, the hook runs immediately.
    pub fn on_trigger<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut hooks = self.inner.hooks.lock();
        if self.is_triggered() {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Sleep for `duration` unless shutdown fires first
    ///
    /// # Returns
    /// `true` if shutdown was observed (before, during or right after the sleep)
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        while !self.is_triggered() {
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_triggered()
    }

    /// Block until shutdown fires
    pub fn wait(&self) {
        let mut guard = self.inner.lock.lock();
        while !self.is_triggered() {
            self.inner.cond.wait(&mut guard);
        }
    }
}
