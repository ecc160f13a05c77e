//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support.
//! The epoch lives in an atomic so `prepare_park` stays lock-free; the
//! mutex only orders the epoch check against the condvar wait.

use super::{ParkToken, WorkerParking};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Condvar-based parking (fallback)
pub struct FallbackParking {
    epoch: AtomicU32,
    mutex: Mutex<()>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU32::new(0),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    fn signal(&self, all: bool) {
        if self.parked.load(Ordering::SeqCst) == 0 {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        // Taking the lock closes the window between a parker's epoch check
        // and its wait.
        drop(self.mutex.lock().unwrap_or_else(|e| e.into_inner()));
        if all {
            self.condvar.notify_all();
        } else {
            self.condvar.notify_one();
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn prepare_park(&self) -> ParkToken {
        self.parked.fetch_add(1, Ordering::SeqCst);
        ParkToken(self.epoch.load(Ordering::SeqCst))
    }

    fn cancel_park(&self, _token: ParkToken) {
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }

    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool {
        let guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());

        let woken = if self.epoch.load(Ordering::SeqCst) != token.0 {
            true
        } else {
            match timeout {
                Some(t) => {
                    let (_guard, result) = self
                        .condvar
                        .wait_timeout_while(guard, t, |_| {
                            self.epoch.load(Ordering::SeqCst) == token.0
                        })
                        .unwrap_or_else(|e| e.into_inner());
                    !result.timed_out()
                }
                None => {
                    let _guard = self
                        .condvar
                        .wait_while(guard, |_| self.epoch.load(Ordering::SeqCst) == token.0)
                        .unwrap_or_else(|e| e.into_inner());
                    true
                }
            }
        };

        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        self.signal(false);
    }

    fn wake_all(&self) {
        self.signal(true);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
