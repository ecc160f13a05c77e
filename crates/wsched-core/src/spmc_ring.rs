//! Bounded SPMC ring
//!
//! Fixed-capacity alternative to `ChaseLevQueue` with the same contract:
//! the owner pushes and pops at the bottom, thieves CAS `top`. There is no
//! growth, so the slot array is never replaced and thieves need no
//! reclamation protocol. A full ring rejects `push_back`; the scheduler
//! treats that as backpressure and routes the item elsewhere.

use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::ptr;
use std::sync::atomic::{fence, AtomicI64, Ordering};

use crate::cache_padded::CachePadded;
use crate::next_pow2;
use crate::queue::OwnerQueue;

/// Bounded single-producer multi-consumer ring
pub struct SpmcRing<T> {
    top: CachePadded<AtomicI64>,
    bottom: CachePadded<AtomicI64>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

unsafe impl<T: Send> Send for SpmcRing<T> {}
unsafe impl<T: Send> Sync for SpmcRing<T> {}

impl<T> SpmcRing<T> {
    /// Capacity is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let cap = next_pow2(capacity);
        SpmcRing {
            top: CachePadded::new(AtomicI64::new(0)),
            bottom: CachePadded::new(AtomicI64::new(0)),
            slots: (0..cap).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect(),
            mask: cap - 1,
        }
    }

    #[inline]
    fn slot(&self, index: i64) -> *mut MaybeUninit<T> {
        self.slots[index as usize & self.mask].get()
    }

    /// Push at the bottom. Hands the item back when full.
    ///
    /// # Safety
    ///
    /// Owner thread only.
    pub unsafe fn push_back(&self, item: T) -> Result<(), T> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b - t >= self.capacity() as i64 {
            return Err(item);
        }
        ptr::write_volatile(self.slot(b), MaybeUninit::new(item));
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Pop the most recently pushed item.
    ///
    /// # Safety
    ///
    /// Owner thread only.
    pub unsafe fn pop_back(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        let t = self.top.load(Ordering::Relaxed);
        let len = b - t;
        if len < 0 {
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        let item = ptr::read_volatile(self.slot(b));
        if len > 0 {
            return Some(item.assume_init());
        }

        let won = self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(b + 1, Ordering::Relaxed);
        if won {
            Some(item.assume_init())
        } else {
            None
        }
    }

    /// Take the least recently pushed item. Callable from any thread.
    pub fn steal(&self) -> Option<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if b - t <= 0 {
            return None;
        }

        // Safety: bitwise copy; only assumed initialized after the CAS.
        let item = unsafe { ptr::read_volatile(self.slot(t)) };
        if self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            Some(unsafe { item.assume_init() })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for SpmcRing<T> {
    fn drop(&mut self) {
        let b = *self.bottom.get_mut();
        let t = *self.top.get_mut();
        for i in t..b {
            unsafe { self.slots[i as usize & self.mask].get_mut().assume_init_drop() };
        }
    }
}

impl<T> fmt::Debug for SpmcRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpmcRing")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T: Send> OwnerQueue<T> for SpmcRing<T> {
    #[inline]
    unsafe fn push(&self, item: T) -> Result<(), T> {
        self.push_back(item)
    }

    #[inline]
    unsafe fn pop(&self) -> Option<T> {
        self.pop_back()
    }

    #[inline]
    fn steal(&self) -> Option<T> {
        SpmcRing::steal(self)
    }

    fn len(&self) -> usize {
        SpmcRing::len(self)
    }

    fn capacity(&self) -> usize {
        SpmcRing::capacity(self)
    }
}
