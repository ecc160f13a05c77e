//! Worker parking mechanism
//!
//! Idle workers sleep here until a submission signals new work.
//! Platform-specific implementations use the most efficient primitive available.
//!
//! Parking is split in two so that the "is there work?" re-check happens
//! after the worker is visible as parked:
//!
//! ```text
//! worker                                 submitter
//! ──────                                 ─────────
//! token = prepare_park()  (parked++)     push item; pending++
//! re-check pending work                  if parked_count() > 0:
//!   found  -> cancel_park()                  wake_one()  (epoch++, wake)
//!   none   -> park(token, timeout)
//! ```
//!
//! Both sides use SeqCst on their counter write followed by a SeqCst read of
//! the other side's counter, so at least one of them sees the other. A wake
//! that lands between the re-check and the sleep bumps the epoch, and the
//! sleep returns immediately because the epoch no longer matches the token.

use std::time::Duration;

/// Snapshot of the wake epoch taken by `prepare_park`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParkToken(pub(crate) u32);

/// Platform-specific worker parking mechanism
pub trait WorkerParking: Send + Sync {
    /// Register as parked and snapshot the wake epoch.
    fn prepare_park(&self) -> ParkToken;

    /// Undo `prepare_park` without sleeping (work was found on re-check).
    fn cancel_park(&self, token: ParkToken);

    /// Sleep until the epoch moves past `token` or the timeout expires.
    ///
    /// Returns `true` if woken by a signal, `false` on timeout. Workers
    /// re-check for work either way.
    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool;

    /// Wake one parked worker. No-op if nobody is parked.
    fn wake_one(&self);

    /// Wake all parked workers (shutdown, bulk submission)
    fn wake_all(&self);

    /// Number of currently parked workers (hint, may be stale)
    fn parked_count(&self) -> usize;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}
