//! Worker CPU pinning
//!
//! With `pin_workers` enabled, worker `i` is pinned to the `i`-th CPU of
//! the process's allowed set (wrapping), so containers restricted to a
//! cpuset still get valid cores. Pinning failures are logged by the caller
//! and never stop the worker.

use wsched_core::{SchedError, SchedResult};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        /// CPUs the calling thread may run on, ascending.
        pub fn allowed_cpus() -> Vec<usize> {
            match sched_getaffinity(Pid::from_raw(0)) {
                Ok(set) => (0..CpuSet::count())
                    .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
                    .collect(),
                Err(_) => Vec::new(),
            }
        }

        /// Pin the calling thread to `cpu`.
        pub fn pin_current_thread(cpu: usize) -> SchedResult<()> {
            let mut set = CpuSet::new();
            set.set(cpu).map_err(|_| SchedError::AffinityFailed)?;
            sched_setaffinity(Pid::from_raw(0), &set).map_err(|_| SchedError::AffinityFailed)
        }
    } else {
        pub fn allowed_cpus() -> Vec<usize> {
            Vec::new()
        }

        pub fn pin_current_thread(_cpu: usize) -> SchedResult<()> {
            Err(SchedError::AffinityFailed)
        }
    }
}

/// CPU for worker `index`: the `index`-th allowed CPU, wrapping.
pub fn cpu_for_worker(index: usize, allowed: &[usize]) -> Option<usize> {
    if allowed.is_empty() {
        None
    } else {
        Some(allowed[index % allowed.len()])
    }
}
