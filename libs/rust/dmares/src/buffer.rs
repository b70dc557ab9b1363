//! Buffers outside of static banks: allocation, registration, attachment
//! and release.
use dmares_types::address::BusAddr;
use dmares_types::address::HostAddr;
use dmares_types::address::PAddr;
use dmares_types::bank::BankKind;
use dmares_types::domain::AddressPair;
use dmares_types::domain::Domain;
use dmares_types::error::ErrorCode;
use dmares_types::handle::Handle;
use dmares_types::properties::AllocatorTag;
use dmares_types::properties::MAX_BUFFER_SIZE;
use dmares_types::properties::Properties;
use dmares_utils::alignment::align_for_address;
use dmares_utils::alignment::align_for_size;
use dmares_utils::alignment::align_up;
use dmares_utils::alignment::is_aligned;
use dmares_utils::alignment::is_power_of_two;

use crate::platform::Platform;
use crate::record::Record;
use crate::resource::DmaResource;

/// Where the memory of a freshly allocated buffer ended up.
struct Backing {
    unaligned: HostAddr,
    aligned: HostAddr,
    bus: BusAddr,
    buffer_size: usize,
    mapped_len: usize,
    alignment: usize,
}

impl<P: Platform> DmaResource<P> {
    /// Validates buffer properties and, if given, an address and the tag it
    /// is registered with.
    pub(crate) fn check_input(
        &self,
        pair: Option<&AddressPair>,
        tag: Option<AllocatorTag>,
        props: &Properties,
    ) -> Result<(), ErrorCode> {
        if props.size == 0 || props.size >= MAX_BUFFER_SIZE {
            log::warn!("invalid size {}", props.size);
            return Err(ErrorCode::InvalidSize);
        }

        if !is_power_of_two(props.alignment) || props.alignment > self.platform.max_alignment() {
            log::warn!("invalid alignment {}", props.alignment);
            return Err(ErrorCode::InvalidAlignment);
        }

        if let Some(pair) = pair {
            if pair.addr == 0 {
                log::warn!("null {:?} address", pair.domain);
                return Err(ErrorCode::NullAddress);
            }

            let needs_alignment = tag.is_none_or(|tag| tag.requires_alignment());
            if needs_alignment && !is_aligned(pair.addr, props.alignment) {
                log::warn!("address {:#x} is not aligned to {}", pair.addr, props.alignment);
                return Err(ErrorCode::MisalignedAddress);
            }
        }

        Ok(())
    }

    /// Allocates memory from the platform and describes it in a new record.
    ///
    /// Fixed-address banks map `fixed_addr` instead of allocating.
    pub(crate) fn alloc_generic(
        &self,
        props: Properties,
        kind: BankKind,
        fixed_addr: Option<usize>,
    ) -> Result<(Handle, HostAddr), ErrorCode> {
        self.check_input(None, None, &props)?;

        let mut actual = props;
        actual.cached = if self.platform.is_coherent() {
            false
        } else if kind == BankKind::StaticFixedAddress {
            props.cached
        } else {
            true
        };

        if actual.cached != props.cached {
            log::debug!(
                "bank {}: caching changed from {} to {}",
                props.bank,
                props.cached,
                actual.cached
            );
        }

        let mut align = props.alignment;
        if actual.cached && self.platform.dcache_line_size() > align {
            align = self.platform.dcache_line_size();
        }

        let handle = self.store.create_record()?;
        let backing = match (kind, fixed_addr) {
            (BankKind::StaticFixedAddress, Some(addr)) => self.map_fixed_backing(&actual, addr, align),
            _ => self.heap_backing(&actual, align),
        };

        let backing = match backing {
            Ok(backing) => backing,
            Err(err) => {
                log::warn!("alloc: {} bytes in bank {} failed: {}", props.size, props.bank, err);
                let _ = self.store.destroy_record(handle);
                return Err(err);
            }
        };

        actual.alignment = backing.alignment;
        let populated = self.store.with_record(handle, |record| {
            record.setup(actual, AllocatorTag::Allocated, backing.buffer_size);
            record.bank_kind = kind;
            record.context = backing.mapped_len;
            // The bus address goes first: it is looked up the most.
            record.pairs.push(AddressPair::bus(backing.bus));
            record.pairs.push(AddressPair::host(backing.aligned));
            record.pairs.push(AddressPair::host_unaligned(backing.unaligned));
        });

        if let Err(err) = populated {
            log::error!("alloc: {} vanished before being populated", handle);
            self.free_backing(kind, &backing);
            return Err(err);
        }

        log::debug!(
            "alloc: {} 'A' size={}/{} align={} bank={} cached={} bus={} host={}",
            handle,
            actual.size,
            backing.buffer_size,
            actual.alignment,
            actual.bank,
            actual.cached,
            backing.bus,
            backing.aligned
        );

        Ok((handle, backing.aligned))
    }

    fn heap_backing(&self, props: &Properties, align: usize) -> Result<Backing, ErrorCode> {
        let buffer_size = align_for_address(align_for_size(props.size, align), align);
        let unaligned = self.platform.alloc(buffer_size)?;
        let aligned = align_up(unaligned.as_usize(), align).map(HostAddr::new);
        let Some(aligned) = aligned else {
            // SAFETY: Just allocated with this size.
            unsafe { self.platform.free(unaligned, buffer_size) };
            return Err(ErrorCode::OutOfMemory);
        };

        let mapped_len = buffer_size - (aligned.as_usize() - unaligned.as_usize());
        let bus = match self.platform.map(aligned, mapped_len) {
            Ok(bus) => bus,
            Err(err) => {
                // SAFETY: Just allocated with this size.
                unsafe { self.platform.free(unaligned, buffer_size) };
                return Err(err);
            }
        };

        Ok(Backing {
            unaligned,
            aligned,
            bus,
            buffer_size,
            mapped_len,
            alignment: align,
        })
    }

    fn map_fixed_backing(&self, props: &Properties, addr: usize, align: usize) -> Result<Backing, ErrorCode> {
        let page_size = self.platform.page_size();
        if !is_aligned(addr, page_size) {
            log::error!("bank {}: fixed address {:#x} is not page aligned", props.bank, addr);
            return Err(ErrorCode::MisalignedAddress);
        }

        let buffer_size = align_up(props.size, page_size).ok_or(ErrorCode::InvalidSize)?;
        let (host, bus) = self
            .platform
            .map_fixed(PAddr::new(addr), buffer_size, props.cached)?;

        log::info!(
            "bank {}: mapped fixed address {:#x} ({} bytes) at {}",
            props.bank,
            addr,
            buffer_size,
            host
        );

        Ok(Backing {
            unaligned: host,
            aligned: host,
            bus,
            buffer_size,
            mapped_len: 0,
            alignment: align.max(page_size),
        })
    }

    fn free_backing(&self, kind: BankKind, backing: &Backing) {
        if kind == BankKind::StaticFixedAddress {
            // SAFETY: Mapped by `map_fixed_backing` with this size.
            unsafe { self.platform.unmap_fixed(backing.unaligned, backing.buffer_size) };
        } else {
            self.platform.unmap(backing.bus, backing.mapped_len);
            // SAFETY: Allocated by `heap_backing` with this size.
            unsafe { self.platform.free(backing.unaligned, backing.buffer_size) };
        }
    }

    /// Registers memory the caller allocated.
    ///
    /// # Safety
    ///
    /// See [`DmaResource::check_and_register`].
    pub(crate) unsafe fn register_generic(
        &self,
        props: Properties,
        pair: AddressPair,
        tag: AllocatorTag,
    ) -> Result<Handle, ErrorCode> {
        let mut actual = props;
        if tag.requires_alignment() && props.alignment > 1 && !is_aligned(pair.addr, props.alignment) {
            log::warn!(
                "register: address {:#x} is not aligned to {}, assuming 1",
                pair.addr,
                props.alignment
            );
            actual.alignment = 1;
        }

        self.check_input(Some(&pair), Some(tag), &actual)?;

        if pair.domain != Domain::Host {
            log::warn!("register: unsupported domain {:?}", pair.domain);
            return Err(ErrorCode::UnsupportedDomain);
        }

        let host = HostAddr::new(pair.addr);
        actual.cached = props.cached && !self.platform.is_coherent();

        let mut bank_kind = BankKind::Dynamic;
        let mut mapped_len = 0;
        let bus = match tag {
            AllocatorTag::KernelMapped => {
                let line = self.platform.dcache_line_size();
                if !is_aligned(host.as_usize(), line) {
                    log::error!("register: {} is not aligned to the cache line size {}", host, line);
                    return Err(ErrorCode::MisalignedAddress);
                }

                let bus = self.platform.map(host, actual.size).inspect_err(|err| {
                    log::warn!("register: failed to map {}: {}", host, err);
                })?;

                // Kernel allocator memory is always cached.
                actual.cached = true;
                mapped_len = actual.size;
                Some(bus)
            }
            AllocatorTag::RegisteredDmaSafe => {
                let Some(parent) = self.find_parent(&actual, &pair) else {
                    log::error!(
                        "register: no buffer contains {} (size={}, align={}, bank={})",
                        host,
                        actual.size,
                        actual.alignment,
                        actual.bank
                    );
                    return Err(ErrorCode::NoParent);
                };

                let parent_host = parent.lookup(Domain::Host).and_then(|p| p.as_host());
                let parent_bus = parent.lookup(Domain::Bus).and_then(|p| p.as_bus());
                let (Some(parent_host), Some(parent_bus)) = (parent_host, parent_bus) else {
                    log::error!("register: parent of {} lacks a host or bus address", host);
                    return Err(ErrorCode::NoMapping);
                };

                let offset = host.offset_from(parent_host).ok_or(ErrorCode::NoParent)?;
                actual.cached = parent.props.cached;
                bank_kind = parent.bank_kind;
                log::trace!("register: sub-buffer at {} + {:#x}", parent_bus, offset);
                Some(parent_bus.checked_add(offset).ok_or(ErrorCode::NoParent)?)
            }
            AllocatorTag::RegisteredUnsafe | AllocatorTag::Coherent => None,
            AllocatorTag::Allocated | AllocatorTag::Attached => {
                log::warn!("register: unsupported tag {}", tag);
                return Err(ErrorCode::UnsupportedTag);
            }
        };

        let handle = match self.store.create_record() {
            Ok(handle) => handle,
            Err(err) => {
                if let (AllocatorTag::KernelMapped, Some(bus)) = (tag, bus) {
                    self.platform.unmap(bus, mapped_len);
                }
                return Err(err);
            }
        };

        self.store.with_record(handle, |record| {
            record.setup(actual, tag, actual.size);
            record.bank_kind = bank_kind;
            record.context = mapped_len;
            if let Some(bus) = bus {
                record.pairs.push(AddressPair::bus(bus));
            }
            record.pairs.push(AddressPair::host(host));
            record.pairs.push(AddressPair::host_unaligned(host));
        })?;

        log::debug!(
            "register: {} {} size={} align={} bank={} cached={} host={}",
            handle,
            tag,
            actual.size,
            actual.alignment,
            actual.bank,
            actual.cached,
            host
        );

        Ok(handle)
    }

    /// Returns a snapshot of a live allocated buffer that contains
    /// `[pair, pair + props.size)`.
    fn find_parent(&self, props: &Properties, pair: &AddressPair) -> Option<Record> {
        for handle in self.store.in_use() {
            let Ok(candidate) = self.store.get(handle) else {
                continue;
            };

            // Only buffers with memory of their own can be parents.
            match candidate.tag {
                None | Some(AllocatorTag::RegisteredDmaSafe) | Some(AllocatorTag::RegisteredUnsafe) => {
                    continue;
                }
                Some(_) => {}
            }

            if candidate.props.bank != props.bank
                || props.size > candidate.props.size
                || props.alignment > candidate.props.alignment
            {
                continue;
            }

            let contains = candidate
                .lookup(pair.domain)
                .is_some_and(|outer| pair.is_sub_range_of(props.size, &outer, candidate.props.size));
            if contains {
                return Some(candidate);
            }
        }

        None
    }

    /// Registers a buffer owned elsewhere, given by its host or bus address.
    ///
    /// # Safety
    ///
    /// See [`DmaResource::attach`].
    pub(crate) unsafe fn attach_generic(&self, props: Properties, pair: AddressPair) -> Result<Handle, ErrorCode> {
        self.check_input(Some(&pair), Some(AllocatorTag::Attached), &props)?;

        let (host, bus) = match pair.domain {
            Domain::Host => (HostAddr::new(pair.addr), None),
            Domain::Bus => {
                let bus = BusAddr::new(pair.addr);
                let host = self.platform.bus_to_host(bus).ok_or_else(|| {
                    log::warn!("attach: {} is not mapped", bus);
                    ErrorCode::NoMapping
                })?;
                (host, Some(bus))
            }
            Domain::HostUnaligned | Domain::Unknown => {
                log::warn!("attach: unsupported domain {:?}", pair.domain);
                return Err(ErrorCode::UnsupportedDomain);
            }
        };

        let handle = self.store.create_record()?;
        self.store.with_record(handle, |record| {
            record.setup(props, AllocatorTag::Attached, props.size);
            if let Some(bus) = bus {
                record.pairs.push(AddressPair::bus(bus));
            }
            record.pairs.push(AddressPair::host(host));
        })?;

        log::debug!("attach: {} size={} host={}", handle, props.size, host);
        Ok(handle)
    }

    /// Destroys the record, then undoes the mapping and frees the memory as
    /// its tag requires. Returns the record as it was.
    pub(crate) fn release_generic(&self, handle: Handle) -> Result<Record, ErrorCode> {
        let record = self.store.get(handle)?;

        if let Some(tag) = record.tag.filter(|tag| tag.is_mapped()) {
            if record.lookup(Domain::Bus).is_none() {
                log::warn!("release: {} ({}) has no bus address", handle, tag);
                return Err(ErrorCode::NoMapping);
            }

            if record.lookup(Domain::HostUnaligned).is_none() {
                log::warn!("release: {} ({}) has no host address", handle, tag);
                return Err(ErrorCode::NoMapping);
            }
        }

        // Whoever destroys the record owns its memory from here on.
        let record = self.store.destroy_record(handle)?;
        let tag = match record.tag {
            Some(tag) if tag.is_mapped() => tag,
            _ => {
                log::debug!("release: {} {:?}", handle, record.tag.map(|t| t.as_char()));
                return Ok(record);
            }
        };

        let bus = record.lookup(Domain::Bus).and_then(|p| p.as_bus());
        let unaligned = record.lookup(Domain::HostUnaligned).and_then(|p| p.as_host());
        let (Some(bus), Some(unaligned)) = (bus, unaligned) else {
            log::error!("release: {} lost its addresses", handle);
            return Err(ErrorCode::NoMapping);
        };

        let fixed = record.bank_kind == BankKind::StaticFixedAddress;
        if tag != AllocatorTag::RegisteredDmaSafe && !fixed {
            self.platform.unmap(bus, record.context);
        }

        if tag == AllocatorTag::Allocated {
            if fixed {
                // SAFETY: Mapped by `map_fixed_backing` with this size, and
                // the record that referred to it is gone.
                unsafe { self.platform.unmap_fixed(unaligned, record.buffer_size) };
            } else {
                // SAFETY: Allocated by `heap_backing` with this size, and the
                // record that referred to it is gone.
                unsafe { self.platform.free(unaligned, record.buffer_size) };
            }
        }

        log::debug!(
            "release: {} {} size={}/{} bus={} host={}",
            handle,
            tag,
            record.props.size,
            record.buffer_size,
            bus,
            unaligned
        );

        Ok(record)
    }
}
