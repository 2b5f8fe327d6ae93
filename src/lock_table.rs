use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::{
    error::{DbError, Result},
    file_manager::BlockId,
    transaction::TransactionID,
};

#[derive(Default, Debug)]
struct LockState {
    readers: HashSet<TransactionID>, //  transactions holding a shared lock on the block
    writer: Option<TransactionID>,   //  the transaction holding the exclusive lock, if any
}

impl LockState {
    fn is_free(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }
}

/// Shared by every transaction of a database to keep track of block locks.
///
/// A block has either any number of shared holders or one exclusive holder.
/// Waits are bounded by the timeout; there is no deadlock detection.
pub struct LockTable {
    lock_table: Mutex<HashMap<BlockId, LockState>>,
    cond_var: Condvar,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
            cond_var: Condvar::new(),
            timeout,
        }
    }

    /// Acquire a shared lock on a [`BlockId`], waiting while another transaction holds it exclusively
    pub fn slock(&self, tx_id: TransactionID, block_id: &BlockId) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut lock_table_guard = self.lock_table.lock();
        loop {
            let state = lock_table_guard.entry(block_id.clone()).or_default();
            match state.writer {
                Some(writer) if writer != tx_id => {}
                _ => {
                    state.readers.insert(tx_id);
                    trace!("tx {tx_id} holds a shared lock on {block_id}");
                    return Ok(());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("tx {tx_id} timed out waiting for a shared lock on {block_id}");
                return Err(DbError::LockTimeout(block_id.clone()));
            }
            self.cond_var.wait_for(&mut lock_table_guard, deadline - now);
        }
    }

    /// Upgrade the caller's shared lock on a [`BlockId`] to an exclusive one.
    /// The caller must already hold a shared lock; it waits until it is the only holder.
    pub fn xlock(&self, tx_id: TransactionID, block_id: &BlockId) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut lock_table_guard = self.lock_table.lock();
        loop {
            let state = lock_table_guard.entry(block_id.clone()).or_default();
            if state.writer == Some(tx_id) {
                return Ok(());
            }
            if !state.readers.contains(&tx_id) {
                let state_is_free = state.is_free();
                if state_is_free {
                    lock_table_guard.remove(block_id);
                }
                return Err(DbError::InvalidArgument(format!(
                    "tx {tx_id} asked for an exclusive lock on {block_id} without holding a shared lock"
                )));
            }
            if state.readers.len() == 1 && state.writer.is_none() {
                state.readers.remove(&tx_id);
                state.writer = Some(tx_id);
                trace!("tx {tx_id} holds an exclusive lock on {block_id}");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("tx {tx_id} timed out waiting for an exclusive lock on {block_id}");
                return Err(DbError::LockTimeout(block_id.clone()));
            }
            self.cond_var.wait_for(&mut lock_table_guard, deadline - now);
        }
    }

    /// Release whatever lock the transaction holds on a [`BlockId`]
    pub fn unlock(&self, tx_id: TransactionID, block_id: &BlockId) {
        let mut lock_table_guard = self.lock_table.lock();
        if let Some(state) = lock_table_guard.get_mut(block_id) {
            state.readers.remove(&tx_id);
            if state.writer == Some(tx_id) {
                state.writer = None;
            }
            if state.is_free() {
                lock_table_guard.remove(block_id);
            }
        }
        self.cond_var.notify_all();
    }

    /// Number of transactions holding a shared lock on the block
    pub fn shared_holders(&self, block_id: &BlockId) -> usize {
        self.lock_table
            .lock()
            .get(block_id)
            .map_or(0, |state| state.readers.len())
    }

    pub fn exclusive_holder(&self, block_id: &BlockId) -> Option<TransactionID> {
        self.lock_table
            .lock()
            .get(block_id)
            .and_then(|state| state.writer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

/// The per-transaction view of the lock table: remembers which blocks are
/// locked in which mode and gives them all back at once.
pub struct ConcurrencyManager {
    lock_table: Arc<LockTable>,
    locks: Mutex<HashMap<BlockId, LockType>>,
    tx_id: TransactionID,
}

impl ConcurrencyManager {
    pub fn new(tx_id: TransactionID, lock_table: Arc<LockTable>) -> Self {
        Self {
            lock_table,
            locks: Mutex::new(HashMap::new()),
            tx_id,
        }
    }

    /// Acquire a shared lock on a [`BlockId`] unless this transaction already holds one
    pub fn slock(&self, block_id: &BlockId) -> Result<()> {
        let mut locks = self.locks.lock();
        if locks.contains_key(block_id) {
            return Ok(());
        }
        self.lock_table.slock(self.tx_id, block_id)?;
        locks.insert(block_id.clone(), LockType::Shared);
        Ok(())
    }

    /// Acquire an exclusive lock on a [`BlockId`], taking the shared lock first if needed
    pub fn xlock(&self, block_id: &BlockId) -> Result<()> {
        let mut locks = self.locks.lock();
        match locks.get(block_id) {
            Some(LockType::Exclusive) => return Ok(()),
            Some(LockType::Shared) => {}
            None => {
                self.lock_table.slock(self.tx_id, block_id)?;
                locks.insert(block_id.clone(), LockType::Shared);
            }
        }
        self.lock_table.xlock(self.tx_id, block_id)?;
        locks.insert(block_id.clone(), LockType::Exclusive);
        Ok(())
    }

    pub fn lock_type(&self, block_id: &BlockId) -> Option<LockType> {
        self.locks.lock().get(block_id).copied()
    }

    /// Release all locks held by the transaction
    pub fn release(&self) {
        let mut locks = self.locks.lock();
        for block in locks.keys() {
            self.lock_table.unlock(self.tx_id, block);
        }
        locks.clear();
    }
}
