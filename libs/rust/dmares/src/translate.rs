use dmares_types::domain::AddressPair;
use dmares_types::domain::Domain;
use dmares_types::error::ErrorCode;
use dmares_types::handle::Handle;
use dmares_types::properties::AllocatorTag;

use crate::platform::Platform;
use crate::resource::DmaResource;

impl<P: Platform> DmaResource<P> {
    /// Adds (or replaces) the address of the buffer in `pair.domain`.
    ///
    /// The `Bus` and `HostUnaligned` addresses of a buffer this crate mapped
    /// are what release undoes, so they can only be set to the same value.
    ///
    /// # Safety
    ///
    /// If `pair` is in the `Host` or `HostUnaligned` domain, `pair.addr` must
    /// be valid for reads and writes of the buffer's size until the handle is
    /// released.
    pub unsafe fn add_pair(&self, handle: Handle, pair: AddressPair) -> Result<(), ErrorCode> {
        if pair.is_unknown() {
            return Err(ErrorCode::UnsupportedDomain);
        }

        let result = self.store.with_record(handle, |record| {
            let index = match record.pairs.lookup(pair.domain) {
                Some(index) => {
                    let old = record.pairs.get(index).map_or(0, |old| old.addr);
                    let owned = record.tag.is_some_and(|tag| tag.is_mapped())
                        && matches!(pair.domain, Domain::Bus | Domain::HostUnaligned);
                    if owned && old != pair.addr {
                        log::warn!(
                            "{}: cannot replace {:?} address {:#x} of a mapped buffer",
                            handle,
                            pair.domain,
                            old
                        );
                        return Err(ErrorCode::NotSupported);
                    }

                    log::info!(
                        "{}: replacing {:?} address {:#x} with {:#x}",
                        handle,
                        pair.domain,
                        old,
                        pair.addr
                    );
                    index
                }
                None => record
                    .pairs
                    .lookup(Domain::Unknown)
                    .ok_or(ErrorCode::TableOverflow)?,
            };

            self.check_input(Some(&pair), record.tag, &record.props)?;
            record.pairs.set(index, pair);
            Ok(())
        });

        result.inspect_err(|_| log::warn!("add_pair: invalid handle {}", handle))?
    }

    /// Returns the address of the buffer in `domain`.
    ///
    /// On any failure the returned pair is [`AddressPair::UNKNOWN`], so
    /// callers must check its domain.
    pub fn translate(&self, handle: Handle, domain: Domain) -> AddressPair {
        self.try_translate(handle, domain).unwrap_or(AddressPair::UNKNOWN)
    }

    pub fn try_translate(&self, handle: Handle, domain: Domain) -> Result<AddressPair, ErrorCode> {
        match domain {
            Domain::Host | Domain::HostUnaligned | Domain::Bus => {}
            Domain::Unknown => {
                log::warn!("translate: unsupported domain {:?}", domain);
                return Err(ErrorCode::UnsupportedDomain);
            }
        }

        let pair = self
            .store
            .with_record(handle, |record| record.lookup(domain))
            .inspect_err(|_| log::warn!("translate: invalid handle {}", handle))?;

        pair.ok_or_else(|| {
            log::debug!("translate: {} has no {:?} address", handle, domain);
            ErrorCode::NoMapping
        })
    }

    /// Returns the tag the buffer was obtained with.
    pub fn allocator_tag(&self, handle: Handle) -> Result<AllocatorTag, ErrorCode> {
        self.store
            .with_record(handle, |record| record.tag)?
            .ok_or(ErrorCode::InvalidHandle)
    }
}

#[cfg(test)]
mod tests {
    use dmares_types::address::BusAddr;
    use dmares_types::address::HostAddr;
    use dmares_types::properties::Properties;

    use super::*;
    use crate::config::Config;
    use crate::platform::HeapPlatform;

    fn dma(platform: &HeapPlatform) -> DmaResource<&HeapPlatform> {
        DmaResource::new(platform, Config::default().with_max_records(8)).unwrap()
    }

    /// A record with only a host address, backed by memory we never touch.
    fn unsafe_record(dma: &DmaResource<&HeapPlatform>) -> Handle {
        let pair = AddressPair::host(HostAddr::new(0x10_0000));
        unsafe { dma.check_and_register(Properties::new(64, 4), pair, AllocatorTag::RegisteredUnsafe) }
            .unwrap()
    }

    #[test]
    fn test_add_then_translate() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let handle = unsafe_record(&dma);
        assert_eq!(dma.translate(handle, Domain::Bus), AddressPair::UNKNOWN);
        assert_eq!(dma.try_translate(handle, Domain::Bus), Err(ErrorCode::NoMapping));

        let bus = AddressPair::bus(BusAddr::new(0x8000_0000));
        unsafe { dma.add_pair(handle, bus) }.unwrap();
        assert_eq!(dma.translate(handle, Domain::Bus), bus);
        assert_eq!(dma.translate(handle, Domain::Host).addr, 0x10_0000);
        dma.release(handle).unwrap();
    }

    #[test]
    fn test_add_pair_twice_overwrites() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let handle = unsafe_record(&dma);
        unsafe { dma.add_pair(handle, AddressPair::bus(BusAddr::new(0x8000_0000))) }.unwrap();
        unsafe { dma.add_pair(handle, AddressPair::bus(BusAddr::new(0x9000_0000))) }.unwrap();

        let record = dma.store().get(handle).unwrap();
        assert_eq!(record.pairs.len(), 3);
        assert_eq!(dma.translate(handle, Domain::Bus).addr, 0x9000_0000);
        dma.release(handle).unwrap();
    }

    #[test]
    fn test_full_table_still_replaces() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let (handle, _) = dma.alloc(Properties::new(64, 4)).unwrap();

        // Allocated buffers already use every entry; replacing still works.
        let host = dma.translate(handle, Domain::Host);
        unsafe { dma.add_pair(handle, host) }.unwrap();
        assert_eq!(dma.store().get(handle).unwrap().pairs.len(), 3);

        dma.release(handle).unwrap();
    }

    #[test]
    fn test_mapped_buffer_keeps_its_mapping() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let (handle, _) = dma.alloc(Properties::new(64, 64)).unwrap();
        let bus = dma.translate(handle, Domain::Bus);
        let unaligned = dma.translate(handle, Domain::HostUnaligned);

        let other_bus = AddressPair::bus(BusAddr::new(bus.addr + 0x1000));
        assert_eq!(unsafe { dma.add_pair(handle, other_bus) }, Err(ErrorCode::NotSupported));
        let other_host = AddressPair::host_unaligned(HostAddr::new(0x10_0000));
        assert_eq!(
            unsafe { dma.add_pair(handle, other_host) },
            Err(ErrorCode::NotSupported)
        );
        unsafe { dma.add_pair(handle, bus) }.unwrap();

        assert_eq!(dma.translate(handle, Domain::Bus), bus);
        assert_eq!(dma.translate(handle, Domain::HostUnaligned), unaligned);
        dma.release(handle).unwrap();
        assert_eq!(platform.live_allocs(), 0);
    }

    #[test]
    fn test_snapshot_does_not_change_record() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let (handle, host) = dma.alloc(Properties::new(64, 4)).unwrap();

        let mut snapshot = dma.store().get(handle).unwrap();
        snapshot.props.size = 1 << 30;
        snapshot.pairs.set(1, AddressPair::host(HostAddr::new(0x10_0000)));

        let record = dma.store().get(handle).unwrap();
        assert_eq!(record.props().size, 64);
        assert_eq!(record.lookup(Domain::Host), Some(AddressPair::host(host)));
        assert_eq!(dma.read32(handle, 16), 0);
        dma.release(handle).unwrap();
    }

    #[test]
    fn test_add_pair_checks_address() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let pair = AddressPair::host(HostAddr::new(0x10_0000));
        let handle =
            unsafe { dma.check_and_register(Properties::new(64, 16), pair, AllocatorTag::Coherent) }
                .unwrap();

        assert_eq!(
            unsafe { dma.add_pair(handle, AddressPair::bus(BusAddr::new(0))) },
            Err(ErrorCode::NullAddress)
        );
        assert_eq!(
            unsafe { dma.add_pair(handle, AddressPair::bus(BusAddr::new(0x8000_0004))) },
            Err(ErrorCode::MisalignedAddress)
        );
        assert_eq!(
            unsafe { dma.add_pair(handle, AddressPair::UNKNOWN) },
            Err(ErrorCode::UnsupportedDomain)
        );
        assert_eq!(dma.translate(handle, Domain::Bus), AddressPair::UNKNOWN);
        dma.release(handle).unwrap();
    }

    #[test]
    fn test_stale_handle_translates_to_unknown() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let (handle, _) = dma.alloc(Properties::new(64, 4)).unwrap();
        assert_eq!(dma.allocator_tag(handle), Ok(AllocatorTag::Allocated));
        dma.release(handle).unwrap();

        assert_eq!(dma.translate(handle, Domain::Host), AddressPair::UNKNOWN);
        assert_eq!(dma.try_translate(handle, Domain::Host), Err(ErrorCode::InvalidHandle));
        assert_eq!(
            unsafe { dma.add_pair(handle, AddressPair::bus(BusAddr::new(0x1000))) },
            Err(ErrorCode::InvalidHandle)
        );
        assert_eq!(dma.allocator_tag(handle), Err(ErrorCode::InvalidHandle));
    }

    #[test]
    fn test_translate_rejects_unknown_domain() {
        let platform = HeapPlatform::new();
        let dma = dma(&platform);
        let handle = unsafe_record(&dma);
        assert_eq!(
            dma.try_translate(handle, Domain::Unknown),
            Err(ErrorCode::UnsupportedDomain)
        );
        dma.release(handle).unwrap();
    }
}
