//! Cache-line padding for contended atomics
//!
//! `top`, `bottom`, ring cursors and the per-group work counter are each
//! written by different threads; sharing a line between any two of them
//! turns every write into a coherence miss for the other side.

use core::fmt;
use core::ops::{Deref, DerefMut};

/// Pads and aligns `T` to the length of a cache line.
///
/// x86_64 and aarch64 prefetch cache lines in adjacent pairs, so those
/// targets align to 128 bytes; everything else uses 64.
#[cfg_attr(any(target_arch = "x86_64", target_arch = "aarch64"), repr(align(128)))]
#[cfg_attr(not(any(target_arch = "x86_64", target_arch = "aarch64")), repr(align(64)))]
#[derive(Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        CachePadded { value }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePadded").field("value", &self.value).finish()
    }
}

impl<T> From<T> for CachePadded<T> {
    fn from(value: T) -> Self {
        CachePadded::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_alignment() {
        assert!(core::mem::align_of::<CachePadded<u8>>() >= 64);
        assert!(core::mem::size_of::<CachePadded<AtomicU64>>() >= 64);

        let pair = [CachePadded::new(AtomicU64::new(0)), CachePadded::new(AtomicU64::new(0))];
        let a = &*pair[0] as *const AtomicU64 as usize;
        let b = &*pair[1] as *const AtomicU64 as usize;
        assert!(b - a >= 64);
    }

    #[test]
    fn test_deref() {
        let c = CachePadded::new(AtomicU64::new(5));
        c.fetch_add(1, Ordering::Relaxed);
        assert_eq!(c.into_inner().into_inner(), 6);
    }
}
