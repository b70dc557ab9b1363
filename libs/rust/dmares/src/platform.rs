//! The backend this crate drives: memory, device mappings and caches.
use dmares_types::address::BusAddr;
use dmares_types::address::HostAddr;
use dmares_types::address::PAddr;
use dmares_types::error::ErrorCode;

mod heap;

pub use heap::HeapPlatform;

pub trait Platform: Send + Sync {
    /// The largest alignment a buffer may ask for.
    fn max_alignment(&self) -> usize;

    /// The D-cache line size, or 1 if no cache line alignment is needed.
    fn dcache_line_size(&self) -> usize;

    /// Returns `true` if the device snoops CPU caches, making every buffer
    /// effectively uncached.
    fn is_coherent(&self) -> bool;

    /// Granularity of [`Platform::map_fixed`].
    fn page_size(&self) -> usize {
        4096
    }

    /// Allocates `len` bytes of zeroed, DMA-capable memory.
    fn alloc(&self, len: usize) -> Result<HostAddr, ErrorCode>;

    /// Frees memory returned by [`Platform::alloc`].
    ///
    /// # Safety
    ///
    /// `addr` and `len` must be exactly those of a previous `alloc` call, and
    /// the memory must not be used afterwards.
    unsafe fn free(&self, addr: HostAddr, len: usize);

    /// Makes `[host, host + len)` visible to the device.
    fn map(&self, host: HostAddr, len: usize) -> Result<BusAddr, ErrorCode>;

    fn unmap(&self, bus: BusAddr, len: usize);

    /// The inverse of the device mapping, if `bus` is mapped.
    fn bus_to_host(&self, bus: BusAddr) -> Option<HostAddr>;

    /// Maps `len` bytes of device memory at `paddr` into the host address
    /// space. Returns the host address and the address the device uses.
    fn map_fixed(
        &self,
        paddr: PAddr,
        len: usize,
        cached: bool,
    ) -> Result<(HostAddr, BusAddr), ErrorCode>;

    /// Undoes [`Platform::map_fixed`].
    ///
    /// # Safety
    ///
    /// `host` and `len` must be exactly those of a previous `map_fixed` call,
    /// and the memory must not be used afterwards.
    unsafe fn unmap_fixed(&self, host: HostAddr, len: usize);

    /// Writes back CPU caches for `[bus + offset, bus + offset + len)` before
    /// the device reads or writes it.
    fn sync_for_device(&self, bus: BusAddr, offset: usize, len: usize);

    /// Invalidates CPU caches for the range after the device is done with it.
    fn sync_for_cpu(&self, bus: BusAddr, offset: usize, len: usize);
}

impl<T: Platform + ?Sized> Platform for &T {
    fn max_alignment(&self) -> usize {
        (**self).max_alignment()
    }

    fn dcache_line_size(&self) -> usize {
        (**self).dcache_line_size()
    }

    fn is_coherent(&self) -> bool {
        (**self).is_coherent()
    }

    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn alloc(&self, len: usize) -> Result<HostAddr, ErrorCode> {
        (**self).alloc(len)
    }

    unsafe fn free(&self, addr: HostAddr, len: usize) {
        // SAFETY: Forwarded from the caller.
        unsafe { (**self).free(addr, len) }
    }

    fn map(&self, host: HostAddr, len: usize) -> Result<BusAddr, ErrorCode> {
        (**self).map(host, len)
    }

    fn unmap(&self, bus: BusAddr, len: usize) {
        (**self).unmap(bus, len)
    }

    fn bus_to_host(&self, bus: BusAddr) -> Option<HostAddr> {
        (**self).bus_to_host(bus)
    }

    fn map_fixed(
        &self,
        paddr: PAddr,
        len: usize,
        cached: bool,
    ) -> Result<(HostAddr, BusAddr), ErrorCode> {
        (**self).map_fixed(paddr, len, cached)
    }

    unsafe fn unmap_fixed(&self, host: HostAddr, len: usize) {
        // SAFETY: Forwarded from the caller.
        unsafe { (**self).unmap_fixed(host, len) }
    }

    fn sync_for_device(&self, bus: BusAddr, offset: usize, len: usize) {
        (**self).sync_for_device(bus, offset, len)
    }

    fn sync_for_cpu(&self, bus: BusAddr, offset: usize, len: usize) {
        (**self).sync_for_cpu(bus, offset, len)
    }
}
