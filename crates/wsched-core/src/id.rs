//! Worker and workgroup handles
//!
//! Both are small integer indices into the scheduler's worker and
//! workgroup tables. `u32::MAX` is reserved as the "none" sentinel.

use core::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel value meaning "no handle"
            pub const NONE: $name = $name(u32::MAX);

            /// Create a handle from a raw index
            #[inline]
            pub const fn new(index: u32) -> Self {
                $name(index)
            }

            /// Raw index
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Index for table lookups
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub const fn is_none(self) -> bool {
                self.0 == u32::MAX
            }

            #[inline]
            pub const fn is_some(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(index: u32) -> Self {
                $name(index)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::NONE
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, concat!($label, "(NONE)"))
                } else {
                    write!(f, concat!($label, "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, "none")
                } else {
                    write!(f, "{}", self.0)
                }
            }
        }
    };
}

define_handle!(
    /// Index of a worker thread in the scheduler's worker table
    WorkerId,
    "WorkerId"
);

define_handle!(
    /// Index of a workgroup in the scheduler's workgroup table
    WorkgroupId,
    "WorkgroupId"
);
