//! Chase-Lev work-stealing deque
//!
//! One owner pushes and pops at the bottom (LIFO); any number of thieves
//! take from the top (FIFO) with a CAS on `top`. When exactly one item
//! remains, owner and thieves race on the same CAS and exactly one wins.
//!
//! ```text
//!            top (thieves CAS)                 bottom (owner only)
//!             │                                  │
//!   ┌───┬───┬─▼─┬───┬───┬───┬───┬───┬───┬───┬───▼───┐
//!   │   │   │ a │ b │ c │ d │ e │ f │ g │ h │       │  circular buffer
//!   └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┴───────┘
//! ```
//!
//! The buffer grows (doubles) on the owner's side only. A thief may still
//! be reading the previous buffer, so replaced buffers are retired instead
//! of freed. Thieves register in `readers` for the duration of a steal; the
//! owner frees retired buffers only when it sees no registered reader after
//! publishing the replacement. Whatever is still retired is freed on drop.
//!
//! Memory orderings follow Lê, Pop, Cohen and Zappa Nardelli, "Correct and
//! Efficient Work-Stealing for Weak Memory Models" (PPoPP 2013).

use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::fmt;
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicI64, AtomicPtr, AtomicUsize, Ordering};

use crate::alloc::{BlockAllocator, SystemAllocator};
use crate::cache_padded::CachePadded;
use crate::constants::DEFAULT_QUEUE_CAPACITY;
use crate::next_pow2;
use crate::queue::OwnerQueue;

/// Circular slot array. The header is boxed, the slots come from the
/// queue's block allocator.
struct Buffer<T> {
    slots: NonNull<MaybeUninit<T>>,
    cap: usize,
}

impl<T> Buffer<T> {
    fn layout(cap: usize) -> Option<Layout> {
        Layout::array::<MaybeUninit<T>>(cap).ok()
    }

    fn alloc<A: BlockAllocator>(alloc: &A, cap: usize) -> Option<*mut Buffer<T>> {
        debug_assert!(cap.is_power_of_two());
        let slots = alloc.allocate(Self::layout(cap)?)?.cast();
        Some(Box::into_raw(Box::new(Buffer { slots, cap })))
    }

    /// Free the header and slots. Slot contents are not dropped.
    unsafe fn dealloc<A: BlockAllocator>(alloc: &A, buf: *mut Buffer<T>) {
        let buf = Box::from_raw(buf);
        if let Some(layout) = Self::layout(buf.cap) {
            alloc.deallocate(buf.slots.cast(), layout);
        }
    }

    #[inline]
    unsafe fn at(&self, index: i64) -> *mut MaybeUninit<T> {
        self.slots.as_ptr().add(index as usize & (self.cap - 1))
    }

    #[inline]
    unsafe fn write(&self, index: i64, item: T) {
        ptr::write_volatile(self.at(index), MaybeUninit::new(item))
    }

    /// Bitwise copy out of a slot. The result only becomes an owned value
    /// once the caller has won the slot.
    #[inline]
    unsafe fn read(&self, index: i64) -> MaybeUninit<T> {
        ptr::read_volatile(self.at(index))
    }
}

/// Growable single-owner, multi-thief deque
pub struct ChaseLevQueue<T, A: BlockAllocator = SystemAllocator> {
    top: CachePadded<AtomicI64>,
    bottom: CachePadded<AtomicI64>,
    buffer: CachePadded<AtomicPtr<Buffer<T>>>,
    /// Thieves currently holding a buffer pointer
    readers: CachePadded<AtomicUsize>,
    /// Replaced buffers awaiting reclamation (owner only)
    retired: UnsafeCell<Vec<*mut Buffer<T>>>,
    alloc: A,
}

unsafe impl<T: Send, A: BlockAllocator> Send for ChaseLevQueue<T, A> {}
unsafe impl<T: Send, A: BlockAllocator> Sync for ChaseLevQueue<T, A> {}

impl<T> ChaseLevQueue<T, SystemAllocator> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Initial capacity is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_allocator(capacity, SystemAllocator)
    }
}

impl<T> Default for ChaseLevQueue<T, SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: BlockAllocator> ChaseLevQueue<T, A> {
    /// Create a deque whose buffers come from `alloc`.
    ///
    /// # Panics
    ///
    /// If the initial buffer cannot be allocated.
    pub fn with_allocator(capacity: usize, alloc: A) -> Self {
        let cap = next_pow2(capacity);
        let buf = match Buffer::alloc(&alloc, cap) {
            Some(buf) => buf,
            None => panic!("chase-lev: cannot allocate {} slots", cap),
        };
        ChaseLevQueue {
            top: CachePadded::new(AtomicI64::new(0)),
            bottom: CachePadded::new(AtomicI64::new(0)),
            buffer: CachePadded::new(AtomicPtr::new(buf)),
            readers: CachePadded::new(AtomicUsize::new(0)),
            retired: UnsafeCell::new(Vec::new()),
            alloc,
        }
    }

    /// Push at the bottom, growing the buffer when full.
    ///
    /// Hands the item back only if a larger buffer cannot be allocated.
    ///
    /// # Safety
    ///
    /// Owner thread only.
    pub unsafe fn push_front(&self, item: T) -> Result<(), T> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let mut buf = self.buffer.load(Ordering::Relaxed);

        if b - t > (*buf).cap as i64 - 1 {
            match self.grow(b, t) {
                Some(grown) => buf = grown,
                None => return Err(item),
            }
        }

        (*buf).write(b, item);
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Pop the most recently pushed item.
    ///
    /// # Safety
    ///
    /// Owner thread only.
    pub unsafe fn pop_front(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        let buf = self.buffer.load(Ordering::Relaxed);
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        let t = self.top.load(Ordering::Relaxed);
        let len = b - t;

        if len < 0 {
            // Was already empty.
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        let item = (*buf).read(b);
        if len > 0 {
            return Some(item.assume_init());
        }

        // Last item: race the thieves for it.
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

    /// Take the oldest item. Callable from any thread.
    ///
    /// Returns `None` when empty or when another thread won the slot.
    pub fn pop_back(&self) -> Option<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if b - t <= 0 {
            return None;
        }

        self.readers.fetch_add(1, Ordering::SeqCst);
        let buf = self.buffer.load(Ordering::SeqCst);
        // Safety: registered in `readers`, so `buf` is not freed under us.
        let item = unsafe { (*buf).read(t) };
        let won = self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.readers.fetch_sub(1, Ordering::Release);

        if won {
            // Safety: the CAS transferred slot `t` to us.
            Some(unsafe { item.assume_init() })
        } else {
            None
        }
    }

    /// Alias for `pop_back`
    #[inline]
    pub fn steal(&self) -> Option<T> {
        self.pop_back()
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
        // Safety: the current buffer is live for as long as `self`.
        unsafe { (*self.buffer.load(Ordering::Relaxed)).cap }
    }

    /// Number of replaced buffers not yet freed
    pub fn retired_buffers(&self) -> usize {
        // Safety: read-only peek; only the owner mutates the list.
        unsafe { (*self.retired.get()).len() }
    }

    /// Double the buffer, copying the live window `[t, b)`.
    unsafe fn grow(&self, b: i64, t: i64) -> Option<*mut Buffer<T>> {
        let old = self.buffer.load(Ordering::Relaxed);
        let new_cap = (*old).cap.checked_mul(2)?;
        let new = Buffer::<T>::alloc(&self.alloc, new_cap)?;

        for i in t..b {
            ptr::copy_nonoverlapping((*old).at(i), (*new).at(i), 1);
        }

        self.buffer.store(new, Ordering::SeqCst);
        let retired = &mut *self.retired.get();
        retired.push(old);
        self.reclaim(retired);
        Some(new)
    }

    /// Free retired buffers if no thief can still hold one.
    unsafe fn reclaim(&self, retired: &mut Vec<*mut Buffer<T>>) {
        if self.readers.load(Ordering::SeqCst) != 0 {
            return;
        }
        for buf in retired.drain(..) {
            Buffer::dealloc(&self.alloc, buf);
        }
    }
}

impl<T, A: BlockAllocator> Drop for ChaseLevQueue<T, A> {
    fn drop(&mut self) {
        let b = *self.bottom.get_mut();
        let t = *self.top.get_mut();
        let buf = *self.buffer.get_mut();

        unsafe {
            if mem::needs_drop::<T>() {
                for i in t..b {
                    (*buf).read(i).assume_init_drop();
                }
            }
            Buffer::dealloc(&self.alloc, buf);
            for old in self.retired.get_mut().drain(..) {
                Buffer::dealloc(&self.alloc, old);
            }
        }
    }
}

impl<T, A: BlockAllocator> fmt::Debug for ChaseLevQueue<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaseLevQueue")
            .field("top", &self.top.load(Ordering::Relaxed))
            .field("bottom", &self.bottom.load(Ordering::Relaxed))
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T: Send, A: BlockAllocator> OwnerQueue<T> for ChaseLevQueue<T, A> {
    #[inline]
    unsafe fn push(&self, item: T) -> Result<(), T> {
        self.push_front(item)
    }

    #[inline]
    unsafe fn pop(&self) -> Option<T> {
        self.pop_front()
    }

    #[inline]
    fn steal(&self) -> Option<T> {
        self.pop_back()
    }

    fn len(&self) -> usize {
        ChaseLevQueue::len(self)
    }

    fn capacity(&self) -> usize {
        ChaseLevQueue::capacity(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_queue::SegQueue;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_lifo_owner_fifo_thief() {
        let q = ChaseLevQueue::new();
        unsafe {
            q.push_front(1).unwrap();
            q.push_front(2).unwrap();
            q.push_front(3).unwrap();
            assert_eq!(q.pop_front(), Some(3));
        }
        assert_eq!(q.steal(), Some(1));
        unsafe {
            assert_eq!(q.pop_front(), Some(2));
            assert_eq!(q.pop_front(), None);
        }
        assert_eq!(q.steal(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_growth_preserves_order() {
        let q = ChaseLevQueue::with_capacity(2);
        assert_eq!(q.capacity(), 2);
        unsafe {
            for i in 0..100 {
                q.push_front(i).unwrap();
            }
        }
        assert!(q.capacity() >= 100);
        assert_eq!(q.len(), 100);
        // No thieves were active, so every replaced buffer was freed.
        assert_eq!(q.retired_buffers(), 0);

        for i in 0..50 {
            assert_eq!(q.steal(), Some(i));
        }
        unsafe {
            for i in (50..100).rev() {
                assert_eq!(q.pop_front(), Some(i));
            }
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_drop_remaining_items() {
        let token = Arc::new(());
        {
            let q = ChaseLevQueue::with_capacity(4);
            unsafe {
                for _ in 0..10 {
                    q.push_front(token.clone()).unwrap();
                }
                drop(q.pop_front());
            }
            drop(q.steal());
            assert_eq!(Arc::strong_count(&token), 9);
        }
        assert_eq!(Arc::strong_count(&token), 1);
    }

    struct CountingAlloc {
        live: Arc<AtomicUsize>,
    }

    unsafe impl BlockAllocator for CountingAlloc {
        fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
            self.live.fetch_add(1, Ordering::Relaxed);
            SystemAllocator.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live.fetch_sub(1, Ordering::Relaxed);
            SystemAllocator.deallocate(ptr, layout)
        }
    }

    #[test]
    fn test_allocator_blocks_all_returned() {
        let live = Arc::new(AtomicUsize::new(0));
        {
            let q = ChaseLevQueue::with_allocator(2, CountingAlloc { live: live.clone() });
            assert_eq!(live.load(Ordering::Relaxed), 1);
            unsafe {
                for i in 0..64u64 {
                    q.push_front(i).unwrap();
                }
            }
        }
        assert_eq!(live.load(Ordering::Relaxed), 0);
    }

    struct FailingAlloc;

    unsafe impl BlockAllocator for FailingAlloc {
        fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
            // Only the initial 2-slot buffer succeeds.
            if layout.size() <= 2 * mem::size_of::<u32>() {
                SystemAllocator.allocate(layout)
            } else {
                None
            }
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            SystemAllocator.deallocate(ptr, layout)
        }
    }

    #[test]
    fn test_growth_failure_hands_item_back() {
        let q = ChaseLevQueue::<u32, _>::with_allocator(2, FailingAlloc);
        unsafe {
            q.push_front(1).unwrap();
            q.push_front(2).unwrap();
            assert_eq!(q.push_front(3), Err(3));
            assert_eq!(q.pop_front(), Some(2));
            q.push_front(3).unwrap();
        }
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_no_duplication_under_stealers() {
        const ITEMS: usize = 20_000;
        const THIEVES: usize = 4;

        let q = Arc::new(ChaseLevQueue::with_capacity(16));
        unsafe {
            for i in 0..ITEMS {
                q.push_front(i).unwrap();
            }
        }

        let stolen = Arc::new(SegQueue::new());
        let handles: Vec<_> = (0..THIEVES)
            .map(|_| {
                let q = q.clone();
                let stolen = stolen.clone();
                thread::spawn(move || {
                    while !q.is_empty() {
                        if let Some(v) = q.steal() {
                            stolen.push(v);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = Vec::with_capacity(ITEMS);
        while let Some(v) = stolen.pop() {
            seen.push(v);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..ITEMS).collect::<Vec<_>>());
    }

    #[test]
    fn test_conservation_owner_and_thieves() {
        const ITEMS: usize = 50_000;
        const THIEVES: usize = 3;

        // Small initial capacity so growth happens under concurrent steals.
        let q = Arc::new(ChaseLevQueue::with_capacity(4));
        let done = Arc::new(AtomicBool::new(false));
        let stolen = Arc::new(SegQueue::new());

        let handles: Vec<_> = (0..THIEVES)
            .map(|_| {
                let q = q.clone();
                let done = done.clone();
                let stolen = stolen.clone();
                thread::spawn(move || loop {
                    match q.steal() {
                        Some(v) => stolen.push(v),
                        None if done.load(Ordering::Acquire) && q.is_empty() => break,
                        None => std::hint::spin_loop(),
                    }
                })
            })
            .collect();

        let mut popped = Vec::new();
        unsafe {
            for i in 0..ITEMS {
                q.push_front(i).unwrap();
                if i % 3 == 0 {
                    if let Some(v) = q.pop_front() {
                        popped.push(v);
                    }
                }
            }
        }
        done.store(true, Ordering::Release);
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = popped;
        while let Some(v) = stolen.pop() {
            seen.push(v);
        }
        unsafe {
            while let Some(v) = q.pop_front() {
                seen.push(v);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..ITEMS).collect::<Vec<_>>());
    }

    #[test]
    fn test_last_item_race_exclusive() {
        const TRIALS: usize = 2_000;

        let q = Arc::new(ChaseLevQueue::with_capacity(4));
        let start = Arc::new(Barrier::new(2));
        let end = Arc::new(Barrier::new(2));
        let thief_wins = Arc::new(AtomicUsize::new(0));

        let thief = {
            let q = q.clone();
            let start = start.clone();
            let end = end.clone();
            let thief_wins = thief_wins.clone();
            thread::spawn(move || {
                for _ in 0..TRIALS {
                    start.wait();
                    if q.steal().is_some() {
                        thief_wins.fetch_add(1, Ordering::Relaxed);
                    }
                    end.wait();
                }
            })
        };

        let mut owner_wins = 0;
        for trial in 0..TRIALS {
            unsafe { q.push_front(trial).unwrap() };
            start.wait();
            if unsafe { q.pop_front() }.is_some() {
                owner_wins += 1;
            }
            end.wait();
            assert!(q.is_empty(), "trial {} left an item behind", trial);
        }
        thief.join().unwrap();

        assert_eq!(owner_wins + thief_wins.load(Ordering::Relaxed), TRIALS);
    }
}
