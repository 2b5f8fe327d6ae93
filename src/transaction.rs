use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::{
    buffer_manager::{Buffer, BufferManager},
    error::{DbError, Result},
    file_manager::{BlockId, FileManager},
    lock_table::{ConcurrencyManager, LockTable},
    log_manager::LogManager,
    page::Page,
    recovery_manager::RecoveryManager,
};

pub type TransactionID = i32;

/// The operations log record undo needs, so that recovery can be exercised
/// against something other than a real [`Transaction`]
pub trait TransactionOperations {
    fn pin(&self, block_id: &BlockId) -> Result<()>;
    fn unpin(&self, block_id: &BlockId);
    fn set_int(&self, block_id: &BlockId, offset: usize, val: i32, log: bool) -> Result<()>;
    fn set_string(&self, block_id: &BlockId, offset: usize, val: &str, log: bool) -> Result<()>;
}

impl TransactionOperations for Transaction {
    fn pin(&self, block_id: &BlockId) -> Result<()> {
        Transaction::pin(self, block_id)
    }

    fn unpin(&self, block_id: &BlockId) {
        Transaction::unpin(self, block_id);
    }

    fn set_int(&self, block_id: &BlockId, offset: usize, val: i32, log: bool) -> Result<()> {
        Transaction::set_int(self, block_id, offset, val, log)
    }

    fn set_string(&self, block_id: &BlockId, offset: usize, val: &str, log: bool) -> Result<()> {
        Transaction::set_string(self, block_id, offset, val, log)
    }
}

/// Hands out monotonically increasing transaction numbers for one database
#[derive(Debug, Default)]
pub struct TxIdGenerator {
    next_id: AtomicI32,
}

impl TxIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> TransactionID {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Wrapper for the value contained in the hash map of the [`BufferList`]
struct HashMapValue {
    buffer: Arc<Mutex<Buffer>>,
    count: usize,
}

/// The multiset of blocks a [`Transaction`] has pinned.
/// It uses the [`BufferManager`] internally and keeps pins and unpins balanced.
pub struct BufferList {
    buffers: Mutex<HashMap<BlockId, HashMapValue>>,
    buffer_manager: Arc<BufferManager>,
}

impl BufferList {
    pub fn new(buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            buffer_manager,
        }
    }

    /// Get the buffer associated with the provided block_id
    pub fn get_buffer(&self, block_id: &BlockId) -> Option<Arc<Mutex<Buffer>>> {
        self.buffers
            .lock()
            .get(block_id)
            .map(|v| Arc::clone(&v.buffer))
    }

    /// Pin the buffer associated with the provided [`BlockId`]
    pub fn pin(&self, block_id: &BlockId) -> Result<()> {
        let buffer = self.buffer_manager.pin(block_id)?;
        self.buffers
            .lock()
            .entry(block_id.clone())
            .and_modify(|v| v.count += 1)
            .or_insert(HashMapValue { buffer, count: 1 });
        Ok(())
    }

    /// Unpin the buffer associated with the provided [`BlockId`].
    /// Returns false if this list does not hold a pin on the block.
    pub fn unpin(&self, block_id: &BlockId) -> bool {
        let mut buffers = self.buffers.lock();
        let Some(value) = buffers.get_mut(block_id) else {
            return false;
        };
        self.buffer_manager.unpin(&value.buffer);
        value.count -= 1;
        if value.count == 0 {
            buffers.remove(block_id);
        }
        true
    }

    /// Give back every pin in this [`BufferList`]
    pub fn unpin_all(&self) {
        let mut buffers = self.buffers.lock();
        for value in buffers.values() {
            for _ in 0..value.count {
                self.buffer_manager.unpin(&value.buffer);
            }
        }
        buffers.clear();
    }

    pub fn pin_count(&self, block_id: &BlockId) -> usize {
        self.buffers.lock().get(block_id).map_or(0, |v| v.count)
    }
}

/// A pin on a block held for as long as the handle lives
pub struct BufferHandle {
    txn: Arc<Transaction>,
    block_id: BlockId,
}

impl BufferHandle {
    pub fn block_id(&self) -> &BlockId {
        &self.block_id
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        self.txn.unpin(&self.block_id);
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("tx", &self.txn.id())
            .field("block_id", &self.block_id)
            .finish()
    }
}

/// A unit of locking, logging and buffer ownership.
///
/// Reads take shared locks and writes take exclusive locks, all held until
/// commit or rollback (strict two-phase locking). Every logged write appends
/// the old value to the WAL before the page changes.
pub struct Transaction {
    file_manager: Arc<FileManager>,
    buffer_manager: Arc<BufferManager>,
    recovery_manager: RecoveryManager,
    concurrency_manager: ConcurrencyManager,
    buffer_list: BufferList,
    tx_id: TransactionID,
    finished: AtomicBool,
}

impl Transaction {
    /// Start a transaction. Writes its Start record to the log.
    pub fn new(
        file_manager: Arc<FileManager>,
        log_manager: Arc<LogManager>,
        buffer_manager: Arc<BufferManager>,
        lock_table: Arc<LockTable>,
        tx_id: TransactionID,
    ) -> Result<Self> {
        let recovery_manager =
            RecoveryManager::new(tx_id, log_manager, Arc::clone(&buffer_manager))?;
        debug!("started tx {tx_id}");
        Ok(Self {
            file_manager,
            recovery_manager,
            concurrency_manager: ConcurrencyManager::new(tx_id, lock_table),
            buffer_list: BufferList::new(Arc::clone(&buffer_manager)),
            buffer_manager,
            tx_id,
            finished: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TransactionID {
        self.tx_id
    }

    /// Commit this transaction.
    /// Flushes its dirty buffers, makes the Commit record durable, then releases
    /// every lock and pin. Calling it again after the transaction ended does nothing.
    pub fn commit(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            debug!("tx {} already finished, ignoring commit", self.tx_id);
            return Ok(());
        }
        self.recovery_manager.commit()?;
        self.finish();
        debug!("committed tx {}", self.tx_id);
        Ok(())
    }

    /// Rollback this transaction.
    /// Undoes each of its logged writes, makes the Rollback record durable, then
    /// releases every lock and pin.
    pub fn rollback(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            debug!("tx {} already finished, ignoring rollback", self.tx_id);
            return Ok(());
        }
        self.recovery_manager.rollback(self)?;
        self.finish();
        debug!("rolled back tx {}", self.tx_id);
        Ok(())
    }

    /// Recover the database on start-up or after a crash.
    /// Must run before any other transaction touches the database.
    pub fn recover(&self) -> Result<()> {
        self.buffer_manager.flush_all(self.tx_id)?;
        self.recovery_manager.recover(self)?;
        self.finish();
        Ok(())
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.concurrency_manager.release();
        self.buffer_list.unpin_all();
    }

    /// Pin this [`BlockId`] to be used in this transaction
    pub fn pin(&self, block_id: &BlockId) -> Result<()> {
        self.buffer_list.pin(block_id)
    }

    /// Pin this [`BlockId`] and get a handle that unpins it when dropped
    pub fn pin_handle(self: &Arc<Self>, block_id: &BlockId) -> Result<BufferHandle> {
        self.pin(block_id)?;
        Ok(BufferHandle {
            txn: Arc::clone(self),
            block_id: block_id.clone(),
        })
    }

    /// Unpin this [`BlockId`] since it is no longer needed by this transaction
    pub fn unpin(&self, block_id: &BlockId) {
        if !self.buffer_list.unpin(block_id) {
            trace!("tx {} does not hold a pin on {block_id}", self.tx_id);
        }
    }

    fn pinned_buffer(&self, block_id: &BlockId) -> Result<Arc<Mutex<Buffer>>> {
        self.buffer_list
            .get_buffer(block_id)
            .ok_or_else(|| DbError::BlockNotPinned(block_id.clone()))
    }

    /// Get an integer value in a [`Buffer`] associated with this transaction
    pub fn get_int(&self, block_id: &BlockId, offset: usize) -> Result<i32> {
        self.concurrency_manager.slock(block_id)?;
        let buffer = self.pinned_buffer(block_id)?;
        let guard = buffer.lock();
        guard.contents().get_int(offset)
    }

    /// Set an integer value in a [`Buffer`] associated with this transaction
    pub fn set_int(&self, block_id: &BlockId, offset: usize, value: i32, log: bool) -> Result<()> {
        self.concurrency_manager.xlock(block_id)?;
        let buffer = self.pinned_buffer(block_id)?;
        let mut guard = buffer.lock();
        let lsn = if log {
            Some(self.recovery_manager.set_int(&guard, offset)?)
        } else {
            None
        };
        guard.contents_mut().set_int(offset, value)?;
        guard.set_modified(self.tx_id, lsn);
        Ok(())
    }

    /// Get a string value in a [`Buffer`] associated with this transaction
    pub fn get_string(&self, block_id: &BlockId, offset: usize) -> Result<String> {
        self.concurrency_manager.slock(block_id)?;
        let buffer = self.pinned_buffer(block_id)?;
        let guard = buffer.lock();
        guard.contents().get_string(offset)
    }

    /// Set a string value in a [`Buffer`] associated with this transaction
    pub fn set_string(
        &self,
        block_id: &BlockId,
        offset: usize,
        value: &str,
        log: bool,
    ) -> Result<()> {
        self.concurrency_manager.xlock(block_id)?;
        let buffer = self.pinned_buffer(block_id)?;
        let mut guard = buffer.lock();
        //  refuse before logging so a failed write leaves no log record behind
        let needed = Page::max_length(value.len());
        if offset + needed > guard.contents().size() {
            return Err(DbError::PageOutOfBounds {
                offset,
                len: needed,
                page_size: guard.contents().size(),
            });
        }
        let lsn = if log {
            Some(self.recovery_manager.set_string(&guard, offset)?)
        } else {
            None
        };
        guard.contents_mut().set_string(offset, value)?;
        guard.set_modified(self.tx_id, lsn);
        Ok(())
    }

    /// Get the available buffers in the pool
    pub fn available_buffs(&self) -> usize {
        self.buffer_manager.available()
    }

    /// Get the size of this file in blocks.
    /// Shared-locks the end-of-file marker so the answer stays true until the transaction ends.
    pub fn size(&self, file_name: &str) -> Result<usize> {
        self.concurrency_manager
            .slock(&BlockId::end_of_file(file_name))?;
        self.file_manager.length(file_name)
    }

    /// Append a block to the file, exclusively locking its end-of-file marker
    pub fn append(&self, file_name: &str) -> Result<BlockId> {
        self.concurrency_manager
            .xlock(&BlockId::end_of_file(file_name))?;
        self.file_manager.append(file_name)
    }

    /// Get the block size
    pub fn block_size(&self) -> usize {
        self.file_manager.block_size()
    }
}


#[cfg(test)]
mod transaction_tests {
    use std::{sync::Arc, thread, thread::JoinHandle, time::Duration};

    use crate::{
        config::DbConfig,
        error::DbError,
        file_manager::BlockId,
        recovery_manager::LogRecord,
        SimpleDB,
    };

    #[test]
    fn test_transaction_single_threaded() {
        let (test_db, _test_dir) = SimpleDB::new_for_test(512, 3);
        let block_id = BlockId::new("txfile", 1);

        //  t1 sets an int and a string without logging
        let t1 = test_db.new_tx().unwrap();
        t1.pin(&block_id).unwrap();
        t1.set_int(&block_id, 80, 1, false).unwrap();
        t1.set_string(&block_id, 40, "one", false).unwrap();
        t1.commit().unwrap();

        //  t2 sees t1's values and overwrites them
        let t2 = test_db.new_tx().unwrap();
        t2.pin(&block_id).unwrap();
        assert_eq!(t2.get_int(&block_id, 80).unwrap(), 1);
        assert_eq!(t2.get_string(&block_id, 40).unwrap(), "one");
        t2.set_int(&block_id, 80, 2, true).unwrap();
        t2.set_string(&block_id, 40, "two", true).unwrap();
        t2.commit().unwrap();

        //  t3 writes and rolls back
        let t3 = test_db.new_tx().unwrap();
        t3.pin(&block_id).unwrap();
        assert_eq!(t3.get_int(&block_id, 80).unwrap(), 2);
        assert_eq!(t3.get_string(&block_id, 40).unwrap(), "two");
        t3.set_int(&block_id, 80, 3, true).unwrap();
        t3.set_string(&block_id, 40, "three", true).unwrap();
        t3.rollback().unwrap();

        //  t4 still sees t2's values
        let t4 = test_db.new_tx().unwrap();
        t4.pin(&block_id).unwrap();
        assert_eq!(t4.get_int(&block_id, 80).unwrap(), 2);
        assert_eq!(t4.get_string(&block_id, 40).unwrap(), "two");
        t4.commit().unwrap();
        assert_eq!(test_db.buffer_manager().available(), 3);
    }

    #[test]
    fn test_rollback_writes_expected_log() {
        let (test_db, _test_dir) = SimpleDB::new_for_test(400, 8);
        let tx1 = test_db.new_tx().unwrap();
        let block_id = tx1.append("rollbackfile").unwrap();
        tx1.pin(&block_id).unwrap();
        tx1.set_int(&block_id, 10, 100, true).unwrap();
        tx1.set_string(&block_id, 14, "foo", true).unwrap();
        tx1.commit().unwrap();

        let tx2 = test_db.new_tx().unwrap();
        tx2.pin(&block_id).unwrap();
        tx2.set_int(&block_id, 10, 102, true).unwrap();
        tx2.set_string(&block_id, 14, "bar", true).unwrap();
        tx2.rollback().unwrap();

        let tx3 = test_db.new_tx().unwrap();
        tx3.pin(&block_id).unwrap();
        assert_eq!(tx3.get_int(&block_id, 10).unwrap(), 100);
        assert_eq!(tx3.get_string(&block_id, 14).unwrap(), "foo");
        tx3.commit().unwrap();

        let (t1, t2, t3) = (tx1.id(), tx2.id(), tx3.id());
        let records: Vec<LogRecord> = test_db
            .log_manager()
            .iterator()
            .unwrap()
            .take(10)
            .map(|bytes| LogRecord::from_bytes(&bytes.unwrap()).unwrap())
            .collect();
        let set_int = |txnum, old_val| LogRecord::SetInt {
            txnum,
            block_id: block_id.clone(),
            offset: 10,
            old_val,
        };
        let set_string = |txnum, old_val: &str| LogRecord::SetString {
            txnum,
            block_id: block_id.clone(),
            offset: 14,
            old_val: old_val.to_string(),
        };
        assert_eq!(
            records,
            vec![
                LogRecord::Commit(t3),
                LogRecord::Start(t3),
                LogRecord::Rollback(t2),
                set_string(t2, "foo"),
                set_int(t2, 100),
                LogRecord::Start(t2),
                LogRecord::Commit(t1),
                set_string(t1, ""),
                set_int(t1, 0),
                LogRecord::Start(t1),
            ]
        );
    }

    #[test]
    fn test_lock_timeout_surfaces_to_second_writer() {
        let (test_db, _test_dir) = SimpleDB::new_for_test_with_config(|config| {
            config
                .with_block_size(400)
                .with_buffer_pool_size(8)
                .with_lock_timeout(Duration::from_millis(200))
        });
        let block_id = BlockId::new("lockedfile", 0);

        let tx1 = test_db.new_tx().unwrap();
        tx1.pin(&block_id).unwrap();
        tx1.set_int(&block_id, 0, 7, true).unwrap();

        let tx2 = test_db.new_tx().unwrap();
        let handle = {
            let tx2 = Arc::clone(&tx2);
            let block_id = block_id.clone();
            thread::spawn(move || {
                tx2.pin(&block_id).unwrap();
                let started = std::time::Instant::now();
                let result = tx2.set_int(&block_id, 0, 9, true);
                (result, started.elapsed())
            })
        };
        let (result, elapsed) = handle.join().unwrap();
        assert!(matches!(result, Err(DbError::LockTimeout(_))));
        assert!(elapsed >= Duration::from_millis(150));
        tx2.rollback().unwrap();

        assert_eq!(tx1.get_int(&block_id, 0).unwrap(), 7);
        tx1.commit().unwrap();
    }

    #[test]
    fn test_transaction_multi_threaded_single_reader_single_writer() {
        let (test_db, _test_dir) = SimpleDB::new_for_test(512, 10);
        let block_id = BlockId::new("txfile", 1);

        let reader = test_db.new_tx().unwrap();
        let writer = test_db.new_tx().unwrap();
        let bid1 = block_id.clone();
        let bid2 = block_id.clone();

        let t1 = thread::spawn(move || {
            reader.pin(&bid1).unwrap();
            reader.get_int(&bid1, 80).unwrap();
            reader.get_string(&bid1, 40).unwrap();
            reader.commit().unwrap();
        });

        let t2 = thread::spawn(move || {
            writer.pin(&bid2).unwrap();
            writer.set_int(&bid2, 80, 1, false).unwrap();
            writer.set_string(&bid2, 40, "Hello", false).unwrap();
            writer.commit().unwrap();
        });
        t1.join().unwrap();
        t2.join().unwrap();

        let txn = test_db.new_tx().unwrap();
        txn.pin(&block_id).unwrap();
        assert_eq!(txn.get_int(&block_id, 80).unwrap(), 1);
        assert_eq!(txn.get_string(&block_id, 40).unwrap(), "Hello");
        txn.commit().unwrap();
    }

    #[test]
    fn test_transaction_multi_threaded_multiple_readers_single_writer() {
        let (test_db, _test_dir) = SimpleDB::new_for_test(512, 10);
        let block_id = BlockId::new("txfile", 1);

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for _ in 0..10 {
            let txn = test_db.new_tx().unwrap();
            let bid = block_id.clone();
            handles.push(thread::spawn(move || {
                txn.pin(&bid).unwrap();
                txn.get_int(&bid, 80).unwrap();
                txn.get_string(&bid, 40).unwrap();
                txn.commit().unwrap();
            }));
        }

        let txn = test_db.new_tx().unwrap();
        txn.pin(&block_id).unwrap();
        txn.set_int(&block_id, 80, 1, false).unwrap();
        txn.set_string(&block_id, 40, "Hello", false).unwrap();
        txn.commit().unwrap();

        handles
            .into_iter()
            .for_each(|handle| handle.join().unwrap());
    }

    #[test]
    fn test_size_and_append_go_through_the_transaction() {
        let (test_db, _test_dir) = SimpleDB::new_for_test(400, 4);
        let tx = test_db.new_tx().unwrap();
        assert_eq!(tx.size("growing").unwrap(), 0);
        assert_eq!(tx.append("growing").unwrap(), BlockId::new("growing", 0));
        assert_eq!(tx.size("growing").unwrap(), 1);
        assert_eq!(tx.block_size(), 400);
        tx.commit().unwrap();
    }

    #[test]
    fn test_unpinned_access_and_oversized_string_are_errors() {
        let (test_db, _test_dir) = SimpleDB::new_for_test(400, 4);
        let tx = test_db.new_tx().unwrap();
        let block_id = BlockId::new("txfile", 0);
        assert!(matches!(
            tx.get_int(&block_id, 0),
            Err(DbError::BlockNotPinned(_))
        ));
        tx.pin(&block_id).unwrap();
        let before = test_db.log_manager().latest_lsn();
        assert!(tx.set_string(&block_id, 390, "much too long", true).is_err());
        assert_eq!(test_db.log_manager().latest_lsn(), before);
        tx.rollback().unwrap();
    }

    #[test]
    fn test_repeated_commit_is_harmless() {
        let (test_db, _test_dir) = SimpleDB::new_for_test(400, 4);
        let block_id = BlockId::new("txfile", 0);
        let tx = test_db.new_tx().unwrap();
        tx.pin(&block_id).unwrap();
        tx.set_int(&block_id, 0, 42, true).unwrap();
        tx.commit().unwrap();
        tx.commit().unwrap();
        tx.rollback().unwrap();

        let reader = test_db.new_tx().unwrap();
        reader.pin(&block_id).unwrap();
        assert_eq!(reader.get_int(&block_id, 0).unwrap(), 42);
        reader.commit().unwrap();
    }

    #[test]
    fn test_buffer_handle_unpins_on_drop() {
        let (test_db, _test_dir) = SimpleDB::new_for_test(400, 4);
        let tx = test_db.new_tx().unwrap();
        let available = tx.available_buffs();
        {
            let handle = tx.pin_handle(&BlockId::new("txfile", 0)).unwrap();
            assert_eq!(handle.block_id().block_num, 0);
            assert_eq!(tx.available_buffs(), available - 1);
        }
        assert_eq!(tx.available_buffs(), available);
        tx.commit().unwrap();
    }

    #[test]
    fn test_config_is_per_database() {
        let (a, _dir_a) = SimpleDB::new_for_test(400, 4);
        let (b, _dir_b) =
            SimpleDB::new_for_test_with_config(|c: DbConfig| c.with_block_size(800));
        assert_eq!(a.new_tx().unwrap().block_size(), 400);
        assert_eq!(b.new_tx().unwrap().block_size(), 800);
    }
}
