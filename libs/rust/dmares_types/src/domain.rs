//! Address spaces a buffer can be described in.
use crate::address::BusAddr;
use crate::address::HostAddr;

/// Number of [`AddressPair`]s a single record can hold.
pub const ADDR_PAIRS_CAPACITY: usize = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// No address space. Also marks an unused address pair.
    #[default]
    Unknown,
    /// Host virtual address the CPU uses to access the buffer.
    Host,
    /// The address the underlying allocator returned, before alignment.
    /// Only needed to free the buffer.
    HostUnaligned,
    /// Device bus address.
    Bus,
}

/// An address tagged with the domain it is valid in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressPair {
    pub domain: Domain,
    pub addr: usize,
}

impl AddressPair {
    /// The unused pair returned by failed translations.
    pub const UNKNOWN: AddressPair = AddressPair {
        domain: Domain::Unknown,
        addr: 0,
    };

    pub const fn new(domain: Domain, addr: usize) -> AddressPair {
        AddressPair { domain, addr }
    }

    pub const fn host(addr: HostAddr) -> AddressPair {
        AddressPair::new(Domain::Host, addr.as_usize())
    }

    pub const fn host_unaligned(addr: HostAddr) -> AddressPair {
        AddressPair::new(Domain::HostUnaligned, addr.as_usize())
    }

    pub const fn bus(addr: BusAddr) -> AddressPair {
        AddressPair::new(Domain::Bus, addr.as_usize())
    }

    pub const fn is_unknown(&self) -> bool {
        matches!(self.domain, Domain::Unknown)
    }

    /// Returns the address if it is a CPU-side address.
    pub fn as_host(&self) -> Option<HostAddr> {
        match self.domain {
            Domain::Host | Domain::HostUnaligned => Some(HostAddr::new(self.addr)),
            _ => None,
        }
    }

    pub fn as_bus(&self) -> Option<BusAddr> {
        match self.domain {
            Domain::Bus => Some(BusAddr::new(self.addr)),
            _ => None,
        }
    }

    /// Returns `true` if `[self, self + size)` lies within
    /// `[outer, outer + outer_size)` in the same domain.
    pub fn is_sub_range_of(&self, size: usize, outer: &AddressPair, outer_size: usize) -> bool {
        if self.domain != outer.domain || size > outer_size || self.addr < outer.addr {
            return false;
        }

        match (self.addr.checked_add(size), outer.addr.checked_add(outer_size)) {
            (Some(end), Some(outer_end)) => end <= outer_end,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let host = AddressPair::host(HostAddr::new(0x1000));
        assert_eq!(host.as_host(), Some(HostAddr::new(0x1000)));
        assert_eq!(host.as_bus(), None);
        assert!(AddressPair::UNKNOWN.is_unknown());
        assert_eq!(AddressPair::default(), AddressPair::UNKNOWN);
    }

    #[test]
    fn test_sub_range() {
        let outer = AddressPair::host(HostAddr::new(0x1000));
        let inner = AddressPair::host(HostAddr::new(0x1040));
        assert!(inner.is_sub_range_of(0x40, &outer, 0x100));
        assert!(inner.is_sub_range_of(0xc0, &outer, 0x100));
        assert!(!inner.is_sub_range_of(0xc1, &outer, 0x100));
        assert!(!outer.is_sub_range_of(0x10, &inner, 0x100));

        let bus = AddressPair::bus(BusAddr::new(0x1040));
        assert!(!bus.is_sub_range_of(0x10, &outer, 0x100));
    }
}
