//! Linux futex-based worker parking
//!
//! The futex word is a wake epoch. A parker sleeps with `FUTEX_WAIT`
//! expecting the epoch it saw in `prepare_park`; a waker increments the
//! epoch before `FUTEX_WAKE`, so a wake issued after the snapshot makes the
//! wait return immediately with `EAGAIN` instead of being lost.

use super::{ParkToken, WorkerParking};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Linux futex-based parking
pub struct FutexParking {
    /// Futex word: wake epoch
    epoch: AtomicU32,

    /// Count of parked workers
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn futex_wake(&self, count: i32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.epoch.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn signal(&self, count: i32) {
        if self.parked.load(Ordering::SeqCst) == 0 {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.futex_wake(count);
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn prepare_park(&self) -> ParkToken {
        self.parked.fetch_add(1, Ordering::SeqCst);
        ParkToken(self.epoch.load(Ordering::SeqCst))
    }

    fn cancel_park(&self, _token: ParkToken) {
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }

    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // FUTEX_WAIT: sleep only while epoch == token
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.epoch.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                token.0,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };

        self.parked.fetch_sub(1, Ordering::SeqCst);

        if result == 0 {
            return true;
        }
        // EAGAIN: epoch already moved, i.e. a wake raced ahead of us.
        // ETIMEDOUT / EINTR: not woken.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EAGAIN)
    }

    fn wake_one(&self) {
        self.signal(1);
    }

    fn wake_all(&self) {
        self.signal(i32::MAX);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
