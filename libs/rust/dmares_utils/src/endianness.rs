//! Byte-order helpers.
//!
//! Buffers shared with a device may hold words in the device's byte order.

pub trait SwapEndian: Sized {
    /// Reverses the byte order.
    fn swap_endian(self) -> Self;

    /// Reverses the byte order if `swap` is `true`.
    #[inline(always)]
    fn swap_endian_if(self, swap: bool) -> Self {
        if swap { self.swap_endian() } else { self }
    }
}

macro_rules! impl_swap_endian {
    ($($t:ty),+) => {
        $(
            impl SwapEndian for $t {
                #[inline(always)]
                fn swap_endian(self) -> Self {
                    self.swap_bytes()
                }
            }
        )+
    };
}

impl_swap_endian!(u16, u32, u64);
