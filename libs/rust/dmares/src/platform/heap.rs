//! A [`Platform`] backed by the global allocator.
//!
//! There is no real device: the bus address of a heap buffer is its host
//! address plus a constant offset, and fixed-address memory is simulated
//! with heap allocations. Cache maintenance is only counted.
use alloc::alloc::Layout;
use alloc::alloc::alloc_zeroed;
use alloc::alloc::dealloc;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use dmares_types::address::BusAddr;
use dmares_types::address::HostAddr;
use dmares_types::address::PAddr;
use dmares_types::error::ErrorCode;
use dmares_utils::alignment::is_aligned;
use hashbrown::HashMap;
use spin::Mutex;

use super::Platform;

const HEAP_ALIGN: usize = 8;
const DEFAULT_BUS_OFFSET: usize = 0x4000_0000;

struct FixedMapping {
    paddr: usize,
    len: usize,
}

pub struct HeapPlatform {
    bus_offset: usize,
    max_alignment: usize,
    dcache_line_size: usize,
    coherent: bool,
    fixed: Mutex<HashMap<usize, FixedMapping>>,
    live_allocs: AtomicUsize,
    device_syncs: AtomicUsize,
    cpu_syncs: AtomicUsize,
    fail_allocs: AtomicBool,
}

impl HeapPlatform {
    pub fn new() -> HeapPlatform {
        HeapPlatform {
            bus_offset: DEFAULT_BUS_OFFSET,
            max_alignment: 4096,
            dcache_line_size: 64,
            coherent: false,
            fixed: Mutex::new(HashMap::new()),
            live_allocs: AtomicUsize::new(0),
            device_syncs: AtomicUsize::new(0),
            cpu_syncs: AtomicUsize::new(0),
            fail_allocs: AtomicBool::new(false),
        }
    }

    pub fn with_coherent(mut self, coherent: bool) -> HeapPlatform {
        self.coherent = coherent;
        self
    }

    pub fn with_dcache_line_size(mut self, size: usize) -> HeapPlatform {
        self.dcache_line_size = size;
        self
    }

    /// Makes subsequent [`Platform::alloc`] calls fail.
    pub fn set_fail_allocs(&self, fail: bool) {
        self.fail_allocs.store(fail, Ordering::Relaxed);
    }

    /// Number of heap regions (including simulated fixed mappings) not yet
    /// freed.
    pub fn live_allocs(&self) -> usize {
        self.live_allocs.load(Ordering::Relaxed)
    }

    pub fn device_syncs(&self) -> usize {
        self.device_syncs.load(Ordering::Relaxed)
    }

    pub fn cpu_syncs(&self) -> usize {
        self.cpu_syncs.load(Ordering::Relaxed)
    }

    fn heap_alloc(&self, len: usize) -> Result<HostAddr, ErrorCode> {
        let layout = Layout::from_size_align(len, HEAP_ALIGN).map_err(|_| ErrorCode::InvalidSize)?;
        if len == 0 {
            return Err(ErrorCode::InvalidSize);
        }

        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(ErrorCode::OutOfMemory);
        }

        self.live_allocs.fetch_add(1, Ordering::Relaxed);
        Ok(HostAddr::new(ptr as usize))
    }

    /// # Safety
    ///
    /// See [`Platform::free`].
    unsafe fn heap_free(&self, addr: HostAddr, len: usize) {
        let Ok(layout) = Layout::from_size_align(len, HEAP_ALIGN) else {
            log::error!("freeing {} with a bad length {}", addr, len);
            return;
        };

        // SAFETY: The caller guarantees that `addr` came from `heap_alloc`
        // with the same length.
        unsafe { dealloc(addr.as_usize() as *mut u8, layout) };
        self.live_allocs.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for HeapPlatform {
    fn default() -> Self {
        HeapPlatform::new()
    }
}

impl Platform for HeapPlatform {
    fn max_alignment(&self) -> usize {
        self.max_alignment
    }

    fn dcache_line_size(&self) -> usize {
        self.dcache_line_size
    }

    fn is_coherent(&self) -> bool {
        self.coherent
    }

    fn alloc(&self, len: usize) -> Result<HostAddr, ErrorCode> {
        if self.fail_allocs.load(Ordering::Relaxed) {
            return Err(ErrorCode::OutOfMemory);
        }

        self.heap_alloc(len)
    }

    unsafe fn free(&self, addr: HostAddr, len: usize) {
        // SAFETY: Forwarded from the caller.
        unsafe { self.heap_free(addr, len) };
    }

    fn map(&self, host: HostAddr, _len: usize) -> Result<BusAddr, ErrorCode> {
        host.as_usize()
            .checked_add(self.bus_offset)
            .map(BusAddr::new)
            .ok_or(ErrorCode::MapFailed)
    }

    fn unmap(&self, bus: BusAddr, len: usize) {
        log::trace!("unmap {}+{:#x}", bus, len);
    }

    fn bus_to_host(&self, bus: BusAddr) -> Option<HostAddr> {
        let fixed = self.fixed.lock();
        for (host, mapping) in fixed.iter() {
            if let Some(offset) = bus.as_usize().checked_sub(mapping.paddr) {
                if offset < mapping.len {
                    return Some(HostAddr::new(host + offset));
                }
            }
        }

        bus.as_usize()
            .checked_sub(self.bus_offset)
            .map(HostAddr::new)
    }

    fn map_fixed(
        &self,
        paddr: PAddr,
        len: usize,
        cached: bool,
    ) -> Result<(HostAddr, BusAddr), ErrorCode> {
        if !is_aligned(paddr.as_usize(), self.page_size()) {
            return Err(ErrorCode::MisalignedAddress);
        }

        let mut fixed = self.fixed.lock();
        let end = paddr.as_usize().checked_add(len).ok_or(ErrorCode::InvalidSize)?;
        let overlaps = fixed
            .values()
            .any(|m| paddr.as_usize() < m.paddr + m.len && m.paddr < end);
        if overlaps {
            return Err(ErrorCode::MapFailed);
        }

        let host = self.heap_alloc(len)?;
        fixed.insert(
            host.as_usize(),
            FixedMapping {
                paddr: paddr.as_usize(),
                len,
            },
        );

        log::debug!("mapped fixed {}+{:#x} at {} (cached={})", paddr, len, host, cached);
        Ok((host, BusAddr::new(paddr.as_usize())))
    }

    unsafe fn unmap_fixed(&self, host: HostAddr, len: usize) {
        let removed = self.fixed.lock().remove(&host.as_usize());
        match removed {
            // SAFETY: `host` was allocated by `map_fixed` with this length.
            Some(mapping) if mapping.len == len => unsafe { self.heap_free(host, len) },
            Some(mapping) => {
                log::error!(
                    "unmap_fixed: {} was mapped with {:#x} bytes, not {:#x}",
                    host,
                    mapping.len,
                    len
                );
                self.fixed.lock().insert(host.as_usize(), mapping);
            }
            None => log::warn!("unmap_fixed: {} is not mapped", host),
        }
    }

    fn sync_for_device(&self, bus: BusAddr, offset: usize, len: usize) {
        log::trace!("sync for device: {}+{:#x} ({:#x} bytes)", bus, offset, len);
        self.device_syncs.fetch_add(1, Ordering::Relaxed);
    }

    fn sync_for_cpu(&self, bus: BusAddr, offset: usize, len: usize) {
        log::trace!("sync for cpu: {}+{:#x} ({:#x} bytes)", bus, offset, len);
        self.cpu_syncs.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_counts() {
        let platform = HeapPlatform::new();
        let addr = platform.alloc(100).unwrap();
        assert_eq!(platform.live_allocs(), 1);
        unsafe { platform.free(addr, 100) };
        assert_eq!(platform.live_allocs(), 0);
    }

    #[test]
    fn test_failing_alloc() {
        let platform = HeapPlatform::new();
        platform.set_fail_allocs(true);
        assert_eq!(platform.alloc(16), Err(ErrorCode::OutOfMemory));
        platform.set_fail_allocs(false);
        let addr = platform.alloc(16).unwrap();
        unsafe { platform.free(addr, 16) };
    }

    #[test]
    fn test_map_is_invertible() {
        let platform = HeapPlatform::new();
        let host = HostAddr::new(0x1234_5000);
        let bus = platform.map(host, 64).unwrap();
        assert_ne!(bus.as_usize(), host.as_usize());
        assert_eq!(platform.bus_to_host(bus), Some(host));
    }

    #[test]
    fn test_fixed_mapping() {
        let platform = HeapPlatform::new();
        let (host, bus) = platform.map_fixed(PAddr::new(0x8000_0000), 8192, false).unwrap();
        assert_eq!(bus.as_usize(), 0x8000_0000);
        assert_eq!(platform.bus_to_host(BusAddr::new(0x8000_0010)), host.checked_add(0x10));

        assert_eq!(
            platform.map_fixed(PAddr::new(0x8000_1000), 4096, false),
            Err(ErrorCode::MapFailed)
        );
        assert_eq!(
            platform.map_fixed(PAddr::new(0x8000_0010), 4096, false),
            Err(ErrorCode::MisalignedAddress)
        );

        unsafe { platform.unmap_fixed(host, 8192) };
        assert_eq!(platform.live_allocs(), 0);
    }
}
