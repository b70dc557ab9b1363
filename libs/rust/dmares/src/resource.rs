use arrayvec::ArrayVec;
use dmares_types::address::HostAddr;
use dmares_types::bank::BankConfig;
use dmares_types::bank::BankId;
use dmares_types::bank::BankKind;
use dmares_types::domain::AddressPair;
use dmares_types::domain::Domain;
use dmares_types::error::ErrorCode;
use dmares_types::handle::Handle;
use dmares_types::properties::AllocatorTag;
use dmares_types::properties::Properties;

use crate::bank::Bank;
use crate::config::Config;
use crate::config::MAX_BANKS;
use crate::error::InitError;
use crate::platform::Platform;
use crate::store::RecordStore;

/// The DMA resource manager: a record store, the configured banks, and the
/// platform backend they draw memory from.
pub struct DmaResource<P: Platform> {
    pub(crate) platform: P,
    pub(crate) store: RecordStore,
    banks: ArrayVec<Bank, MAX_BANKS>,
    config: Config,
}

impl<P: Platform> DmaResource<P> {
    /// Builds the record store and sets up the backing memory of every
    /// static bank.
    pub fn new(platform: P, config: Config) -> Result<DmaResource<P>, InitError> {
        config.validate()?;

        let store = RecordStore::new(&config)?;
        let mut resource = DmaResource {
            platform,
            store,
            banks: ArrayVec::new(),
            config,
        };

        // On error, dropping `resource` releases the banks set up so far.
        for i in 0..resource.config.banks.len() {
            let bank_config = resource.config.banks[i];
            let bank = resource.setup_bank(&bank_config)?;
            resource
                .banks
                .try_push(bank)
                .map_err(|_| InitError::TooManyBanks(i + 1))?;
        }

        log::info!(
            "dmares: {} records, {} banks",
            resource.store.capacity(),
            resource.banks.len()
        );

        Ok(resource)
    }

    fn setup_bank(&self, bank_config: &BankConfig) -> Result<Bank, InitError> {
        if bank_config.kind == BankKind::Dynamic {
            return Ok(Bank::dynamic(*bank_config));
        }

        let stride = self.config.block_stride(bank_config);
        let size = stride * bank_config.block_count;
        let props = Properties::new(size, self.config.pool_alignment)
            .with_bank(bank_config.id)
            .with_cached(bank_config.cached);

        let (handle, base) = self
            .alloc_generic(props, bank_config.kind, bank_config.fixed_addr)
            .map_err(|source| InitError::Pool {
                bank: bank_config.id,
                source,
            })?;

        log::info!(
            "bank {}: {} blocks of {} bytes at {}",
            bank_config.id,
            bank_config.block_count,
            bank_config.block_size,
            base
        );

        Ok(Bank::with_pool(*bank_config, stride, base, handle))
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn bank(&self, id: BankId) -> Option<&Bank> {
        self.banks.iter().find(|bank| bank.id() == id)
    }

    /// Finds the bank requests for `id` go to. `None` means the generic
    /// path, which is where everything goes when no banks are configured.
    fn route(&self, id: BankId) -> Result<Option<&Bank>, ErrorCode> {
        if self.banks.is_empty() {
            return Ok(None);
        }

        match self.bank(id) {
            Some(bank) if bank.kind().is_static() => Ok(Some(bank)),
            Some(_) => Ok(None),
            None => {
                log::warn!("unknown bank {}", id);
                Err(ErrorCode::UnknownBank)
            }
        }
    }

    /// Allocates a buffer and returns its handle and host address.
    pub fn alloc(&self, props: Properties) -> Result<(Handle, HostAddr), ErrorCode> {
        self.check_input(None, None, &props)?;

        match self.route(props.bank)? {
            Some(bank) => self.alloc_from_bank(bank, props),
            None => self.alloc_generic(props, BankKind::Dynamic, None),
        }
    }

    fn alloc_from_bank(&self, bank: &Bank, props: Properties) -> Result<(Handle, HostAddr), ErrorCode> {
        if props.size <= bank.block_size() {
            let block = bank.get().inspect_err(|err| {
                log::debug!("bank {}: no block for {} bytes: {}", bank.id(), props.size, err);
            })?;

            let actual = Properties {
                size: bank.block_size(),
                cached: bank.config().cached,
                ..props
            };

            if actual.size != props.size || actual.cached != props.cached {
                log::info!(
                    "bank {}: size/cached changed from {}/{} to {}/{}",
                    bank.id(),
                    props.size,
                    props.cached,
                    actual.size,
                    actual.cached
                );
            }

            // SAFETY: The block lies inside the bank's own backing buffer.
            let registered = unsafe {
                self.register_generic(actual, AddressPair::host(block), AllocatorTag::RegisteredDmaSafe)
            };

            return match registered {
                Ok(handle) => Ok((handle, block)),
                Err(err) => {
                    if let Err(put_err) = bank.put(block) {
                        log::error!("bank {}: failed to return {}: {}", bank.id(), block, put_err);
                    }
                    Err(err)
                }
            };
        }

        if Some(props.size) == bank.whole_bank_size() {
            let handle = bank.pool_handle().ok_or(ErrorCode::NotSupported)?;
            bank.try_lock_pool().inspect_err(|err| {
                log::debug!("bank {}: cannot grant the whole bank: {}", bank.id(), err);
            })?;

            let host = self
                .store
                .with_record(handle, |record| record.lookup(Domain::Host))
                .ok()
                .flatten()
                .and_then(|pair| pair.as_host());

            return match host {
                Some(host) => Ok((handle, host)),
                None => {
                    log::error!("bank {}: pool record {} has no host address", bank.id(), handle);
                    bank.unlock_pool().inspect_err(|err| {
                        log::error!("bank {}: failed to unlock the pool: {}", bank.id(), err);
                    })?;
                    Err(ErrorCode::NoMapping)
                }
            };
        }

        log::warn!(
            "bank {}: {} bytes is neither a block nor the whole bank",
            bank.id(),
            props.size
        );
        Err(ErrorCode::UnsupportedSize)
    }

    /// Creates a record for a buffer allocated by the caller.
    ///
    /// `pair` must be a [`Domain::Host`] address. `RegisteredDmaSafe`
    /// buffers must lie within a live allocated buffer of the same bank.
    /// Static banks accept only small `RegisteredDmaSafe` sub-buffers and
    /// `RegisteredUnsafe` buffers.
    ///
    /// # Safety
    ///
    /// `[pair.addr, pair.addr + props.size)` must be valid for reads and
    /// writes until the handle is released.
    pub unsafe fn check_and_register(
        &self,
        props: Properties,
        pair: AddressPair,
        tag: AllocatorTag,
    ) -> Result<Handle, ErrorCode> {
        if let Some(bank) = self.route(props.bank)? {
            match tag {
                AllocatorTag::RegisteredDmaSafe if props.size >= bank.block_size() => {
                    log::warn!(
                        "bank {}: {} bytes is too large for a sub-buffer",
                        bank.id(),
                        props.size
                    );
                    return Err(ErrorCode::UnsupportedSize);
                }
                AllocatorTag::RegisteredDmaSafe | AllocatorTag::RegisteredUnsafe => {}
                _ => {
                    log::warn!("bank {}: cannot register {} buffers", bank.id(), tag);
                    return Err(ErrorCode::UnsupportedTag);
                }
            }
        }

        // SAFETY: Forwarded from the caller.
        unsafe { self.register_generic(props, pair, tag) }
    }

    /// Creates a record for a buffer owned elsewhere.
    ///
    /// # Safety
    ///
    /// The buffer must be valid for reads and writes of `props.size` bytes
    /// until the handle is released.
    pub unsafe fn attach(&self, props: Properties, pair: AddressPair) -> Result<Handle, ErrorCode> {
        self.route(props.bank)?;

        // SAFETY: Forwarded from the caller.
        unsafe { self.attach_generic(props, pair) }
    }

    /// Releases a buffer obtained from [`DmaResource::alloc`],
    /// [`DmaResource::check_and_register`] or [`DmaResource::attach`].
    pub fn release(&self, handle: Handle) -> Result<(), ErrorCode> {
        let record = self.store.get(handle).inspect_err(|_| {
            log::warn!("release: invalid handle {}", handle);
        })?;

        let bank = self.route(record.props.bank).ok().flatten();
        if let Some(bank) = bank {
            if bank.pool_handle() == Some(handle) {
                return bank.unlock_pool().inspect_err(|_| {
                    log::warn!("bank {}: whole bank already released", bank.id());
                });
            }
        }

        // Only whoever destroyed the record returns its block.
        let record = self.release_generic(handle)?;
        if let Some(bank) = bank {
            if record.tag == Some(AllocatorTag::RegisteredDmaSafe)
                && record.props.size == bank.block_size()
            {
                let host = record
                    .lookup(Domain::Host)
                    .and_then(|pair| pair.as_host())
                    .ok_or(ErrorCode::NoMapping)?;
                bank.put(host).inspect_err(|err| {
                    log::error!("bank {}: cannot put {} back: {}", bank.id(), host, err);
                })?;
            }
        }

        Ok(())
    }
}

impl<P: Platform> Drop for DmaResource<P> {
    fn drop(&mut self) {
        let banks = core::mem::replace(&mut self.banks, ArrayVec::new());
        for bank in banks.iter().rev() {
            if let Some(handle) = bank.pool_handle() {
                if bank.is_locked() || bank.num_checked_out() > 0 {
                    log::warn!("bank {}: torn down while in use", bank.id());
                }

                if let Err(err) = self.release_generic(handle) {
                    log::error!("bank {}: failed to release the pool: {}", bank.id(), err);
                }
            }
        }

        let mut leaked = 0;
        for handle in self.store.in_use() {
            if let Ok(record) = self.store.get(handle) {
                log::warn!(
                    "leaked {}: tag={:?}, size={}, bank={}",
                    handle,
                    record.tag.map(|tag| tag.as_char()),
                    record.props.size,
                    record.props.bank
                );
                leaked += 1;
            }
        }

        log::info!("dmares: torn down ({} handles leaked)", leaked);
    }
}
