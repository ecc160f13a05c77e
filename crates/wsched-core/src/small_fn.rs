//! Type-erased, fixed-size work item
//!
//! A `SmallFn<A>` is a one-shot `FnOnce(&A)` stored in a fixed 56-byte
//! value: 48 bytes of inline payload plus a pointer to a static vtable.
//! Closures that fit are stored inline; larger ones spill to a `Box` whose
//! pointer lives in the payload. Either way the value is moved through the
//! lock-free queues as plain bytes and the queues never run its destructor.
//!
//! ```text
//! ┌──────────────────────────── 48 bytes ───────────────────────────┬── 8 ──┐
//! │ closure state (inline)  or  Box<F> pointer (spilled)            │vtable │
//! └─────────────────────────────────────────────────────────────────┴───────┘
//! ```

use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop, MaybeUninit};
use core::ptr;
use std::task::Waker;

use crate::constants::INLINE_TASK_BYTES;

#[repr(C, align(8))]
struct Storage([MaybeUninit<u8>; INLINE_TASK_BYTES]);

impl Storage {
    #[inline]
    fn uninit() -> Self {
        Storage([MaybeUninit::uninit(); INLINE_TASK_BYTES])
    }

    #[inline]
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr() as *mut u8
    }
}

struct VTable<A: ?Sized> {
    call: unsafe fn(*mut u8, &A),
    drop: unsafe fn(*mut u8),
    inline: bool,
}

struct Inline<F, A: ?Sized>(PhantomData<(F, fn(&A))>);

impl<F: FnOnce(&A), A: ?Sized> Inline<F, A> {
    const FITS: bool = mem::size_of::<F>() <= INLINE_TASK_BYTES
        && mem::align_of::<F>() <= mem::align_of::<Storage>();

    const VTABLE: VTable<A> = VTable {
        call: Self::call,
        drop: Self::drop,
        inline: true,
    };

    unsafe fn call(payload: *mut u8, arg: &A) {
        let f = ptr::read(payload as *mut F);
        f(arg)
    }

    unsafe fn drop(payload: *mut u8) {
        ptr::drop_in_place(payload as *mut F)
    }
}

struct Spilled<F, A: ?Sized>(PhantomData<(F, fn(&A))>);

impl<F: FnOnce(&A), A: ?Sized> Spilled<F, A> {
    const VTABLE: VTable<A> = VTable {
        call: Self::call,
        drop: Self::drop,
        inline: false,
    };

    unsafe fn call(payload: *mut u8, arg: &A) {
        let f: Box<F> = Box::from_raw(ptr::read(payload as *mut *mut F));
        (*f)(arg)
    }

    unsafe fn drop(payload: *mut u8) {
        drop(Box::from_raw(ptr::read(payload as *mut *mut F)));
    }
}

/// A one-shot callable taking `&A`, stored in a fixed-size value.
pub struct SmallFn<A: ?Sized + 'static> {
    storage: Storage,
    vtable: &'static VTable<A>,
    // Opt out of auto Send/Sync; Send is granted below because every
    // constructor requires `F: Send`.
    _marker: PhantomData<*const ()>,
}

// Safety: all constructors require the erased closure to be `Send`.
unsafe impl<A: ?Sized + 'static> Send for SmallFn<A> {}

impl<A: ?Sized + 'static> SmallFn<A> {
    /// Erase a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&A) + Send + 'static,
    {
        let mut storage = Storage::uninit();
        if Inline::<F, A>::FITS {
            // Safety: size and alignment checked by FITS.
            unsafe { ptr::write(storage.as_mut_ptr() as *mut F, f) };
            SmallFn {
                storage,
                vtable: &Inline::<F, A>::VTABLE,
                _marker: PhantomData,
            }
        } else {
            let raw = Box::into_raw(Box::new(f));
            // Safety: a thin pointer always fits the payload.
            unsafe { ptr::write(storage.as_mut_ptr() as *mut *mut F, raw) };
            SmallFn {
                storage,
                vtable: &Spilled::<F, A>::VTABLE,
                _marker: PhantomData,
            }
        }
    }

    /// Bind a plain function pointer to a packed argument value.
    pub fn from_fn<T>(func: fn(&A, T), args: T) -> Self
    where
        T: Send + 'static,
    {
        Self::new(move |arg: &A| func(arg, args))
    }

    /// Resumption thunk for a suspended future: running it wakes `waker`.
    pub fn from_waker(waker: Waker) -> Self {
        Self::new(move |_: &A| waker.wake())
    }

    /// Run the callable, consuming it.
    #[inline]
    pub fn call(self, arg: &A) {
        let mut this = ManuallyDrop::new(self);
        let call = this.vtable.call;
        // Safety: the payload was initialized by the constructor matching
        // this vtable and ManuallyDrop keeps it from being dropped twice.
        unsafe { call(this.storage.as_mut_ptr(), arg) }
    }

    /// Whether the closure state lives in the inline payload.
    #[inline]
    pub fn is_inline(&self) -> bool {
        self.vtable.inline
    }
}

impl<A: ?Sized + 'static> Drop for SmallFn<A> {
    fn drop(&mut self) {
        // Safety: payload is initialized until `call` or `drop`, and `call`
        // suppresses this destructor.
        unsafe { (self.vtable.drop)(self.storage.as_mut_ptr()) }
    }
}

impl<A: ?Sized + 'static> fmt::Debug for SmallFn<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmallFn")
            .field("inline", &self.is_inline())
            .finish()
    }
}
