//! The per-buffer metadata record.
use dmares_types::bank::BankKind;
use dmares_types::domain::ADDR_PAIRS_CAPACITY;
use dmares_types::domain::AddressPair;
use dmares_types::domain::Domain;
use dmares_types::handle::Handle;
use dmares_types::properties::AllocatorTag;
use dmares_types::properties::Properties;

/// Validity marker of a live record.
pub const RECORD_MAGIC: u32 = 0x4d41_4452;

/// Metadata describing one buffer.
///
/// A record is *live* while `magic` is [`RECORD_MAGIC`]; it is then
/// reachable from exactly one handle, `owner`. Outside this crate records
/// are read-only snapshots.
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) magic: u32,
    pub(crate) owner: Option<Handle>,
    pub(crate) props: Properties,
    pub(crate) pairs: AddrTable,
    /// `None` until the record is populated by alloc, register or attach.
    pub(crate) tag: Option<AllocatorTag>,
    /// Bytes actually reserved, at least `props.size`.
    pub(crate) buffer_size: usize,
    pub(crate) swap_endianness: bool,
    /// Kind of the bank the memory came from.
    pub(crate) bank_kind: BankKind,
    /// Backend bookkeeping: the length handed to `Platform::map`, or 0 if
    /// the buffer was not mapped here.
    pub(crate) context: usize,
}

impl Record {
    pub(crate) const fn empty() -> Record {
        Record {
            magic: 0,
            owner: None,
            props: Properties::new(0, 0),
            pairs: AddrTable::new(),
            tag: None,
            buffer_size: 0,
            swap_endianness: false,
            bank_kind: BankKind::Dynamic,
            context: 0,
        }
    }

    pub(crate) fn reset(&mut self, owner: Handle) {
        *self = Record::empty();
        self.magic = RECORD_MAGIC;
        self.owner = Some(owner);
    }

    pub fn is_live(&self) -> bool {
        self.magic == RECORD_MAGIC
    }

    pub fn owner(&self) -> Option<Handle> {
        self.owner
    }

    pub fn props(&self) -> &Properties {
        &self.props
    }

    pub fn pairs(&self) -> &AddrTable {
        &self.pairs
    }

    pub fn tag(&self) -> Option<AllocatorTag> {
        self.tag
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn swap_endianness(&self) -> bool {
        self.swap_endianness
    }

    pub fn bank_kind(&self) -> BankKind {
        self.bank_kind
    }

    /// Fills in everything but the address pairs.
    pub(crate) fn setup(&mut self, props: Properties, tag: AllocatorTag, buffer_size: usize) {
        self.props = props;
        self.tag = Some(tag);
        self.buffer_size = buffer_size;
    }

    pub fn lookup(&self, domain: Domain) -> Option<AddressPair> {
        self.pairs.lookup(domain).map(|i| self.pairs.slots[i])
    }
}

/// A small fixed-capacity table of domain to address mappings.
///
/// Unused entries carry [`Domain::Unknown`] and are always at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrTable {
    slots: [AddressPair; ADDR_PAIRS_CAPACITY],
}

impl AddrTable {
    pub const fn new() -> AddrTable {
        AddrTable {
            slots: [AddressPair::UNKNOWN; ADDR_PAIRS_CAPACITY],
        }
    }

    /// Returns the index of the entry for `domain`.
    ///
    /// Probing with [`Domain::Unknown`] returns the first free entry. `None`
    /// means the domain is absent, or, when probing for a free entry, that
    /// the table is full.
    pub fn lookup(&self, domain: Domain) -> Option<usize> {
        for (i, pair) in self.slots.iter().enumerate() {
            if pair.domain == domain {
                return Some(i);
            }

            if pair.domain == Domain::Unknown {
                return None;
            }
        }

        None
    }

    pub fn get(&self, index: usize) -> Option<&AddressPair> {
        self.slots.get(index)
    }

    pub(crate) fn set(&mut self, index: usize, pair: AddressPair) {
        self.slots[index] = pair;
    }

    /// Appends a pair in the first free entry. Used while populating a fresh
    /// record, where the table cannot overflow.
    pub(crate) fn push(&mut self, pair: AddressPair) -> bool {
        match self.lookup(Domain::Unknown) {
            Some(i) => {
                self.slots[i] = pair;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddressPair> {
        self.slots.iter().take_while(|pair| !pair.is_unknown())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AddrTable {
    fn default() -> Self {
        AddrTable::new()
    }
}
