//! Pools of fixed-size blocks.
use alloc::collections::VecDeque;

use dmares_types::address::HostAddr;
use dmares_types::bank::BankConfig;
use dmares_types::bank::BankId;
use dmares_types::bank::BankKind;
use dmares_types::error::ErrorCode;
use dmares_types::handle::Handle;
use spin::Mutex;

struct Lists {
    /// Free blocks. Taken from the back, returned to the front.
    pool: VecDeque<HostAddr>,
    /// Checked-out blocks.
    dangling: VecDeque<HostAddr>,
    /// An all-of-bank grant is outstanding.
    locked: bool,
}

/// A configured bank.
///
/// Static banks own one backing buffer, carved into blocks of
/// `stride` bytes. The backing buffer is itself a record (`pool_handle`),
/// which is what an all-of-bank allocation hands out.
pub struct Bank {
    config: BankConfig,
    stride: usize,
    pool_handle: Option<Handle>,
    lists: Mutex<Lists>,
}

impl Bank {
    pub fn dynamic(config: BankConfig) -> Bank {
        Bank {
            config,
            stride: 0,
            pool_handle: None,
            lists: Mutex::new(Lists {
                pool: VecDeque::new(),
                dangling: VecDeque::new(),
                locked: false,
            }),
        }
    }

    /// Creates a static bank over a backing buffer starting at `base`.
    pub fn with_pool(config: BankConfig, stride: usize, base: HostAddr, pool_handle: Handle) -> Bank {
        let pool = (0..config.block_count)
            .map(|i| HostAddr::new(base.as_usize() + i * stride))
            .collect();

        Bank {
            config,
            stride,
            pool_handle: Some(pool_handle),
            lists: Mutex::new(Lists {
                pool,
                dangling: VecDeque::with_capacity(config.block_count),
                locked: false,
            }),
        }
    }

    pub fn id(&self) -> BankId {
        self.config.id
    }

    pub fn kind(&self) -> BankKind {
        self.config.kind
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Distance between consecutive blocks.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The record describing the backing buffer of a static bank.
    pub fn pool_handle(&self) -> Option<Handle> {
        self.pool_handle
    }

    /// Size of an all-of-bank allocation.
    pub fn whole_bank_size(&self) -> Option<usize> {
        self.config.whole_bank_size()
    }

    /// Checks out one block.
    pub fn get(&self) -> Result<HostAddr, ErrorCode> {
        let mut lists = self.lists.lock();
        if lists.locked {
            return Err(ErrorCode::BankLocked);
        }

        let addr = lists.pool.pop_back().ok_or(ErrorCode::OutOfBlocks)?;
        lists.dangling.push_front(addr);
        Ok(addr)
    }

    /// Returns a block obtained from [`Bank::get`].
    ///
    /// An address that is not checked out is rejected and nothing changes.
    pub fn put(&self, addr: HostAddr) -> Result<(), ErrorCode> {
        let mut lists = self.lists.lock();
        let index = lists
            .dangling
            .iter()
            .rposition(|block| *block == addr)
            .ok_or(ErrorCode::NotCheckedOut)?;

        lists.dangling.remove(index);
        lists.pool.push_front(addr);
        Ok(())
    }

    /// Grants the whole bank. Fails while any block is checked out.
    pub fn try_lock_pool(&self) -> Result<(), ErrorCode> {
        let mut lists = self.lists.lock();
        if lists.locked {
            return Err(ErrorCode::BankLocked);
        }

        if !lists.dangling.is_empty() {
            return Err(ErrorCode::BankInUse);
        }

        lists.locked = true;
        Ok(())
    }

    /// Gives back the all-of-bank grant.
    pub fn unlock_pool(&self) -> Result<(), ErrorCode> {
        let mut lists = self.lists.lock();
        if !lists.locked {
            return Err(ErrorCode::AlreadyReleased);
        }

        lists.locked = false;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.lists.lock().locked
    }

    pub fn num_free(&self) -> usize {
        self.lists.lock().pool.len()
    }

    pub fn num_checked_out(&self) -> usize {
        self.lists.lock().dangling.len()
    }
}
