//! Ownership handoff of buffer ranges between the CPU and the device.
use dmares_types::address::BusAddr;
use dmares_types::domain::Domain;
use dmares_types::error::ErrorCode;
use dmares_types::handle::Handle;

use crate::platform::Platform;
use crate::resource::DmaResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToDevice,
    ToCpu,
}

impl<P: Platform> DmaResource<P> {
    /// Hands `[offset, offset + count)` over to the device. Must be the last
    /// CPU action on the range before the device uses it.
    ///
    /// `count == 0` means the whole buffer.
    pub fn pre_dma(&self, handle: Handle, offset: usize, count: usize) -> Result<(), ErrorCode> {
        self.handoff(handle, offset, count, Direction::ToDevice)
    }

    /// Takes `[offset, offset + count)` back from the device. Must be the
    /// first CPU action on the range after the device is done.
    pub fn post_dma(&self, handle: Handle, offset: usize, count: usize) -> Result<(), ErrorCode> {
        self.handoff(handle, offset, count, Direction::ToCpu)
    }

    fn handoff(&self, handle: Handle, offset: usize, count: usize, dir: Direction) -> Result<(), ErrorCode> {
        let sync = self
            .store
            .with_record(handle, |record| -> Result<Option<(BusAddr, usize, usize)>, ErrorCode> {
                let size = record.props.size;
                let (offset, count) = if count == 0 { (0, size) } else { (offset, count) };
                let in_range = offset < size && offset.checked_add(count).is_some_and(|end| end <= size);
                if !in_range {
                    log::warn!(
                        "{:?}: {} range {:#x}+{:#x} is not within [0, {:#x})",
                        dir,
                        handle,
                        offset,
                        count,
                        size
                    );
                    return Err(ErrorCode::OutOfRange);
                }

                let needs_sync = record.props.cached
                    && record.tag.is_some_and(|tag| tag.needs_cache_maintenance());
                if !needs_sync {
                    return Ok(None);
                }

                let bus = record
                    .lookup(Domain::Bus)
                    .and_then(|pair| pair.as_bus())
                    .ok_or_else(|| {
                        log::warn!("{:?}: {} has no bus address", dir, handle);
                        ErrorCode::NoMapping
                    })?;
                Ok(Some((bus, offset, count)))
            })
            .inspect_err(|_| log::warn!("{:?}: invalid handle {}", dir, handle))??;

        if let Some((bus, offset, count)) = sync {
            match dir {
                Direction::ToDevice => self.platform.sync_for_device(bus, offset, count),
                Direction::ToCpu => self.platform.sync_for_cpu(bus, offset, count),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dmares_types::address::HostAddr;
    use dmares_types::domain::AddressPair;
    use dmares_types::properties::AllocatorTag;
    use dmares_types::properties::Properties;

    use super::*;
    use crate::config::Config;
    use crate::platform::HeapPlatform;

    fn dma(platform: &HeapPlatform) -> DmaResource<&HeapPlatform> {
        DmaResource::new(platform, Config::default().with_max_records(8)).unwrap()
    }

    #[test]
    fn test_cached_buffer_is_synced() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let (handle, _) = dma.alloc(Properties::new(128, 4)).unwrap();

        dma.pre_dma(handle, 0, 0).unwrap();
        dma.pre_dma(handle, 64, 64).unwrap();
        dma.post_dma(handle, 0, 128).unwrap();
        assert_eq!(platform.device_syncs(), 2);
        assert_eq!(platform.cpu_syncs(), 1);
        dma.release(handle).unwrap();
    }

    #[test]
    fn test_range_outside_buffer_is_rejected() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let (handle, _) = dma.alloc(Properties::new(128, 4)).unwrap();

        assert_eq!(dma.pre_dma(handle, 128, 1), Err(ErrorCode::OutOfRange));
        assert_eq!(dma.pre_dma(handle, 64, 65), Err(ErrorCode::OutOfRange));
        assert_eq!(dma.post_dma(handle, 1, usize::MAX), Err(ErrorCode::OutOfRange));
        assert_eq!(platform.device_syncs(), 0);
        assert_eq!(platform.cpu_syncs(), 0);
        dma.release(handle).unwrap();
    }

    #[test]
    fn test_uncached_buffers_need_no_sync() {
        let platform = HeapPlatform::new().with_coherent(true);
        let dma = dma(&platform);
        let (handle, _) = dma.alloc(Properties::new(64, 4)).unwrap();
        dma.pre_dma(handle, 0, 0).unwrap();
        dma.post_dma(handle, 0, 0).unwrap();
        assert_eq!(platform.device_syncs(), 0);
        assert_eq!(platform.cpu_syncs(), 0);
        dma.release(handle).unwrap();
    }

    #[test]
    fn test_unsafe_registration_needs_no_sync() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let pair = AddressPair::host(HostAddr::new(0x10_0000));
        let props = Properties::new(64, 4).with_cached(true);
        let handle =
            unsafe { dma.check_and_register(props, pair, AllocatorTag::RegisteredUnsafe) }.unwrap();
        dma.pre_dma(handle, 0, 0).unwrap();
        assert_eq!(platform.device_syncs(), 0);
        dma.release(handle).unwrap();
    }

    #[test]
    fn test_stale_handle() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let (handle, _) = dma.alloc(Properties::new(64, 4)).unwrap();
        dma.release(handle).unwrap();
        assert_eq!(dma.pre_dma(handle, 0, 0), Err(ErrorCode::InvalidHandle));
        assert_eq!(dma.post_dma(handle, 0, 0), Err(ErrorCode::InvalidHandle));
    }
}
