use core::fmt;

macro_rules! define_address {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            pub const fn new(addr: usize) -> $name {
                $name(addr)
            }

            #[inline(always)]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            pub fn checked_add(self, offset: usize) -> Option<$name> {
                self.as_usize().checked_add(offset).map($name::new)
            }

            /// Returns the distance from `base` to `self`, if `self` is not
            /// below `base`.
            pub fn offset_from(self, base: $name) -> Option<usize> {
                self.as_usize().checked_sub(base.as_usize())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if cfg!(target_pointer_width = "64") {
                    write!(f, "{:016x}", self.as_usize())
                } else {
                    write!(f, "{:08x}", self.as_usize())
                }
            }
        }
    };
}

define_address!(
    /// An address the CPU dereferences to reach a buffer.
    HostAddr
);

define_address!(
    /// An address a DMA-capable device uses to reach a buffer.
    BusAddr
);

define_address!(
    /// A physical memory address, used to place fixed-address banks.
    PAddr
);

impl HostAddr {
    /// # Safety
    ///
    /// <https://doc.rust-lang.org/std/ptr/index.html#pointer-to-reference-conversion>
    pub unsafe fn as_mut_ptr<T>(self) -> *mut T {
        self.as_usize() as *mut T
    }

    /// # Safety
    ///
    /// <https://doc.rust-lang.org/std/ptr/index.html#pointer-to-reference-conversion>
    pub unsafe fn as_ptr<T>(self) -> *const T {
        self.as_usize() as *const T
    }
}
