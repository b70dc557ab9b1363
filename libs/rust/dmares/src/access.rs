//! Word access to buffer contents.
//!
//! These are best-effort: an invalid handle, a buffer without a host
//! address or an out-of-range offset makes reads return zero and writes do
//! nothing. Such failures are only logged.
use core::mem::size_of;
use core::ptr;

use dmares_types::address::HostAddr;
use dmares_types::domain::Domain;
use dmares_types::error::ErrorCode;
use dmares_types::handle::Handle;
use dmares_utils::endianness::SwapEndian;

use crate::platform::Platform;
use crate::resource::DmaResource;

const WORD_SIZE: usize = size_of::<u32>();

/// Reads one word. Device memory may be mapped without alignment
/// guarantees, so unaligned addresses fall back to an unaligned read.
///
/// # Safety
///
/// `addr` must be valid for reading 4 bytes.
unsafe fn read_word(addr: HostAddr) -> u32 {
    // SAFETY: Valid per the caller.
    let ptr = unsafe { addr.as_ptr::<u32>() };
    if ptr.is_aligned() {
        // SAFETY: Valid and aligned per the caller.
        unsafe { ptr::read_volatile(ptr) }
    } else {
        // SAFETY: Valid per the caller.
        unsafe { ptr::read_unaligned(ptr) }
    }
}

/// # Safety
///
/// `addr` must be valid for writing 4 bytes.
unsafe fn write_word(addr: HostAddr, value: u32) {
    // SAFETY: Valid per the caller.
    let ptr = unsafe { addr.as_mut_ptr::<u32>() };
    if ptr.is_aligned() {
        // SAFETY: Valid and aligned per the caller.
        unsafe { ptr::write_volatile(ptr, value) }
    } else {
        // SAFETY: Valid per the caller.
        unsafe { ptr::write_unaligned(ptr, value) }
    }
}

fn word_at(base: HostAddr, index: usize) -> HostAddr {
    HostAddr::new(base.as_usize() + index * WORD_SIZE)
}

impl<P: Platform> DmaResource<P> {
    /// Resolves `count` words from `word_offset` to the host address of the
    /// first one, along with the buffer's byte-swap setting.
    fn host_words(&self, handle: Handle, word_offset: usize, count: usize) -> Result<(HostAddr, bool), ErrorCode> {
        self.store
            .with_record(handle, |record| {
                let end = word_offset
                    .checked_add(count)
                    .and_then(|end| end.checked_mul(WORD_SIZE))
                    .ok_or(ErrorCode::OutOfRange)?;
                if end > record.props.size {
                    return Err(ErrorCode::OutOfRange);
                }

                let host = record
                    .lookup(Domain::Host)
                    .and_then(|pair| pair.as_host())
                    .ok_or(ErrorCode::NoMapping)?;
                let first = host
                    .checked_add(word_offset * WORD_SIZE)
                    .ok_or(ErrorCode::OutOfRange)?;
                Ok((first, record.swap_endianness))
            })?
            .inspect_err(|err| {
                log::warn!(
                    "{}: cannot access {} words at word {}: {}",
                    handle,
                    count,
                    word_offset,
                    err
                );
            })
    }

    pub fn read32(&self, handle: Handle, word_offset: usize) -> u32 {
        match self.host_words(handle, word_offset, 1) {
            // SAFETY: `host_words` checked the word lies within the buffer.
            Ok((addr, swap)) => unsafe { read_word(addr) }.swap_endian_if(swap),
            Err(ErrorCode::InvalidHandle) => {
                log::warn!("read32: invalid handle {}", handle);
                0
            }
            Err(_) => 0,
        }
    }

    pub fn write32(&self, handle: Handle, word_offset: usize, value: u32) {
        match self.host_words(handle, word_offset, 1) {
            // SAFETY: `host_words` checked the word lies within the buffer.
            Ok((addr, swap)) => unsafe { write_word(addr, value.swap_endian_if(swap)) },
            Err(ErrorCode::InvalidHandle) => log::warn!("write32: invalid handle {}", handle),
            Err(_) => {}
        }
    }

    /// Reads `out.len()` words starting at `start_word`. On failure `out` is
    /// left untouched.
    pub fn read32_array(&self, handle: Handle, start_word: usize, out: &mut [u32]) {
        let Ok((base, swap)) = self.host_words(handle, start_word, out.len()) else {
            return;
        };

        for (i, word) in out.iter_mut().enumerate() {
            // SAFETY: `host_words` checked the whole range.
            *word = unsafe { read_word(word_at(base, i)) }.swap_endian_if(swap);
        }
    }

    pub fn write32_array(&self, handle: Handle, start_word: usize, values: &[u32]) {
        let Ok((base, swap)) = self.host_words(handle, start_word, values.len()) else {
            return;
        };

        for (i, value) in values.iter().enumerate() {
            // SAFETY: `host_words` checked the whole range.
            unsafe { write_word(word_at(base, i), value.swap_endian_if(swap)) };
        }
    }

    /// Reads `count` words and writes each back converted, in place.
    ///
    /// This is a no-op unless the buffer has byte swapping enabled.
    pub fn convert32_in_place(&self, handle: Handle, start_word: usize, count: usize) {
        let Ok((base, swap)) = self.host_words(handle, start_word, count) else {
            return;
        };

        if !swap {
            return;
        }

        for i in 0..count {
            let addr = word_at(base, i);
            // SAFETY: `host_words` checked the whole range.
            unsafe { write_word(addr, read_word(addr).swap_endian()) };
        }
    }

    pub fn swap_endianness(&self, handle: Handle) -> Result<bool, ErrorCode> {
        self.store.with_record(handle, |record| record.swap_endianness)
    }

    /// Makes accessors byte-swap every word of the buffer.
    pub fn set_swap_endianness(&self, handle: Handle, swap: bool) -> Result<(), ErrorCode> {
        self.store
            .with_record(handle, |record| record.swap_endianness = swap)
            .inspect_err(|_| log::warn!("set_swap_endianness: invalid handle {}", handle))
    }
}
