use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::{trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    error::{DbError, Result},
    file_manager::{BlockId, FileManager},
    log_manager::{LogManager, Lsn},
    page::Page,
    transaction::TransactionID,
};

/// One frame of the buffer pool
pub struct Buffer {
    file_manager: Arc<FileManager>,
    log_manager: Arc<LogManager>,
    contents: Page,
    block_id: Option<BlockId>,
    pins: usize,
    txn: Option<TransactionID>,
    lsn: Option<Lsn>,
}

impl Buffer {
    fn new(file_manager: Arc<FileManager>, log_manager: Arc<LogManager>) -> Self {
        let contents = file_manager.create_page();
        Self {
            file_manager,
            log_manager,
            contents,
            block_id: None,
            pins: 0,
            txn: None,
            lsn: None,
        }
    }

    pub fn contents(&self) -> &Page {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut Page {
        &mut self.contents
    }

    pub fn block_id(&self) -> Option<&BlockId> {
        self.block_id.as_ref()
    }

    /// Record that `txn` changed the page. The LSN is absent for unlogged writes.
    pub fn set_modified(&mut self, txn: TransactionID, lsn: Option<Lsn>) {
        self.txn = Some(txn);
        if lsn.is_some() {
            self.lsn = lsn;
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    pub fn modifying_tx(&self) -> Option<TransactionID> {
        self.txn
    }

    /// Point this frame at a new block, writing back any dirty contents first.
    /// The frame names no block until the read succeeds.
    fn assign_to_block(&mut self, block_id: &BlockId) -> Result<()> {
        self.flush()?;
        self.block_id = None;
        self.lsn = None;
        self.pins = 0;
        self.file_manager.read(block_id, &mut self.contents)?;
        self.block_id = Some(block_id.clone());
        Ok(())
    }

    /// Write the page back if it is dirty. The log is flushed through the
    /// frame's LSN before the page touches disk.
    fn flush(&mut self) -> Result<()> {
        if self.txn.is_none() {
            return Ok(());
        }
        if let Some(lsn) = self.lsn {
            self.log_manager.flush_lsn(lsn)?;
        }
        if let Some(block_id) = &self.block_id {
            self.file_manager.write(block_id, &self.contents)?;
        }
        self.txn = None;
        Ok(())
    }

    fn pin(&mut self) {
        self.pins += 1;
    }

    fn unpin(&mut self) {
        self.pins = self.pins.saturating_sub(1);
    }
}

/// A fixed pool of frames.
///
/// The `num_available` mutex is the pool latch. Every public operation takes it
/// before any frame latch, so the lock order is always pool -> frame.
pub struct BufferManager {
    buffer_pool: Vec<Arc<Mutex<Buffer>>>,
    num_available: Mutex<usize>,
    cond: Condvar,
    max_wait: Duration,
}

impl BufferManager {
    pub fn new(
        file_manager: Arc<FileManager>,
        log_manager: Arc<LogManager>,
        num_buffers: usize,
        max_wait: Duration,
    ) -> Result<Self> {
        if num_buffers == 0 {
            return Err(DbError::InvalidArgument(
                "buffer pool needs at least one buffer".to_string(),
            ));
        }
        let buffer_pool = (0..num_buffers)
            .map(|_| {
                Arc::new(Mutex::new(Buffer::new(
                    Arc::clone(&file_manager),
                    Arc::clone(&log_manager),
                )))
            })
            .collect();
        Ok(Self {
            buffer_pool,
            num_available: Mutex::new(num_buffers),
            cond: Condvar::new(),
            max_wait,
        })
    }

    /// Number of unpinned frames
    pub fn available(&self) -> usize {
        *self.num_available.lock()
    }

    pub fn size(&self) -> usize {
        self.buffer_pool.len()
    }

    /// Snapshot of (block, pinned) for every frame
    pub fn frames(&self) -> Vec<(Option<BlockId>, bool)> {
        let _latch = self.num_available.lock();
        self.buffer_pool
            .iter()
            .map(|buffer| {
                let buffer = buffer.lock();
                (buffer.block_id.clone(), buffer.is_pinned())
            })
            .collect()
    }

    /// Write back every frame last modified by `txn_num`
    pub fn flush_all(&self, txn_num: TransactionID) -> Result<()> {
        let _latch = self.num_available.lock();
        for buffer in &self.buffer_pool {
            let mut buffer = buffer.lock();
            if buffer.modifying_tx() == Some(txn_num) {
                buffer.flush()?;
            }
        }
        Ok(())
    }

    /// Pin the block into some frame, waiting up to the configured timeout for one to free up
    pub fn pin(&self, block_id: &BlockId) -> Result<Arc<Mutex<Buffer>>> {
        let deadline = Instant::now() + self.max_wait;
        let mut num_available = self.num_available.lock();
        loop {
            if let Some(buffer) = self.try_to_pin(block_id, &mut num_available)? {
                trace!("pinned {block_id}");
                return Ok(buffer);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("timed out waiting for a free buffer for {block_id}");
                return Err(DbError::PinTimeout(block_id.clone()));
            }
            self.cond.wait_for(&mut num_available, deadline - now);
        }
    }

    fn try_to_pin(
        &self,
        block_id: &BlockId,
        num_available: &mut MutexGuard<'_, usize>,
    ) -> Result<Option<Arc<Mutex<Buffer>>>> {
        let buffer = match self.find_existing_buffer(block_id) {
            Some(buffer) => buffer,
            None => match self.choose_unpinned_buffer() {
                Some(buffer) => {
                    buffer.lock().assign_to_block(block_id)?;
                    buffer
                }
                None => return Ok(None),
            },
        };
        {
            let mut guard = buffer.lock();
            if !guard.is_pinned() {
                **num_available -= 1;
            }
            guard.pin();
        }
        Ok(Some(buffer))
    }

    pub fn unpin(&self, buffer: &Arc<Mutex<Buffer>>) {
        let mut num_available = self.num_available.lock();
        let mut guard = buffer.lock();
        guard.unpin();
        if !guard.is_pinned() {
            *num_available += 1;
            if let Some(block_id) = guard.block_id() {
                trace!("unpinned {block_id}");
            }
            self.cond.notify_all();
        }
    }

    fn find_existing_buffer(&self, block_id: &BlockId) -> Option<Arc<Mutex<Buffer>>> {
        self.buffer_pool
            .iter()
            .find(|buffer| buffer.lock().block_id() == Some(block_id))
            .map(Arc::clone)
    }

    fn choose_unpinned_buffer(&self) -> Option<Arc<Mutex<Buffer>>> {
        self.buffer_pool
            .iter()
            .find(|buffer| !buffer.lock().is_pinned())
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod buffer_manager_tests {
    use std::{sync::Arc, thread, time::Duration};

    use crate::{
        error::DbError, file_manager::BlockId, file_manager::FileManager,
        log_manager::LogManager, test_utils::TestDir,
    };

    use super::BufferManager;

    fn setup(num_buffers: usize, max_wait: Duration) -> (TestDir, Arc<FileManager>, BufferManager) {
        let dir = TestDir::unique("buffer_manager");
        let file_manager = Arc::new(FileManager::new(&dir, 400).unwrap());
        let log_manager = Arc::new(LogManager::new(Arc::clone(&file_manager), "logfile").unwrap());
        let buffer_manager =
            BufferManager::new(Arc::clone(&file_manager), log_manager, num_buffers, max_wait)
                .unwrap();
        (dir, file_manager, buffer_manager)
    }

    fn pinned_frames(buffer_manager: &BufferManager) -> usize {
        buffer_manager
            .frames()
            .iter()
            .filter(|(_, pinned)| *pinned)
            .count()
    }

    #[test]
    fn test_buffer_replacement() {
        let (_dir, file_manager, buffer_manager) =
            setup(3, Duration::from_millis(100));

        let buffer_1 = buffer_manager.pin(&BlockId::new("testfile", 1)).unwrap();
        {
            let mut guard = buffer_1.lock();
            guard.contents_mut().set_int(80, 100).unwrap();
            guard.set_modified(1, None);
        }
        buffer_manager.unpin(&buffer_1);

        //  pinning three other blocks forces block 1 out and onto disk
        let b2 = buffer_manager.pin(&BlockId::new("testfile", 2)).unwrap();
        let _b3 = buffer_manager.pin(&BlockId::new("testfile", 3)).unwrap();
        let _b4 = buffer_manager.pin(&BlockId::new("testfile", 4)).unwrap();
        assert_eq!(buffer_manager.available(), 0);

        buffer_manager.unpin(&b2);
        let buffer_1 = buffer_manager.pin(&BlockId::new("testfile", 1)).unwrap();
        assert_eq!(buffer_1.lock().contents().get_int(80).unwrap(), 100);

        let mut page = file_manager.create_page();
        file_manager
            .read(&BlockId::new("testfile", 1), &mut page)
            .unwrap();
        assert_eq!(page.get_int(80).unwrap(), 100);
    }

    #[test]
    fn test_repeated_pins_share_one_frame() {
        let (_dir, _file_manager, buffer_manager) = setup(2, Duration::from_millis(100));
        let block = BlockId::new("testfile", 0);

        let a = buffer_manager.pin(&block).unwrap();
        let b = buffer_manager.pin(&block).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(buffer_manager.available(), 1);

        buffer_manager.unpin(&a);
        assert_eq!(buffer_manager.available(), 1);
        buffer_manager.unpin(&b);
        assert_eq!(buffer_manager.available(), 2);
    }

    #[test]
    fn test_pinned_frames_match_available_count() {
        let (_dir, _file_manager, buffer_manager) = setup(4, Duration::from_millis(100));
        let buffers: Vec<_> = (0..3)
            .map(|i| buffer_manager.pin(&BlockId::new("testfile", i)).unwrap())
            .collect();
        assert_eq!(
            pinned_frames(&buffer_manager),
            buffer_manager.size() - buffer_manager.available()
        );
        buffer_manager.unpin(&buffers[1]);
        assert_eq!(
            pinned_frames(&buffer_manager),
            buffer_manager.size() - buffer_manager.available()
        );
    }

    #[test]
    fn test_pin_times_out_when_pool_is_exhausted() {
        let (_dir, _file_manager, buffer_manager) = setup(3, Duration::from_millis(20));
        let buffer_manager = Arc::new(buffer_manager);

        let holders: Vec<_> = (0..3)
            .map(|i| {
                let buffer_manager = Arc::clone(&buffer_manager);
                thread::spawn(move || {
                    let buffer = buffer_manager.pin(&BlockId::new("testfile", i)).unwrap();
                    thread::sleep(Duration::from_millis(300));
                    buffer_manager.unpin(&buffer);
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(100));

        let result = buffer_manager.pin(&BlockId::new("testfile", 3));
        assert!(matches!(result, Err(DbError::PinTimeout(_))));
        assert!(result.err().map(|e| e.is_timeout()).unwrap_or(false));

        for holder in holders {
            holder.join().unwrap();
        }
        assert_eq!(buffer_manager.available(), 3);
    }

    #[test]
    fn test_waiting_pin_succeeds_once_a_frame_frees_up() {
        let (_dir, _file_manager, buffer_manager) = setup(1, Duration::from_millis(2000));
        let buffer_manager = Arc::new(buffer_manager);

        let held = buffer_manager.pin(&BlockId::new("testfile", 0)).unwrap();
        let waiter = {
            let buffer_manager = Arc::clone(&buffer_manager);
            thread::spawn(move || buffer_manager.pin(&BlockId::new("testfile", 1)).is_ok())
        };
        thread::sleep(Duration::from_millis(50));
        buffer_manager.unpin(&held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_failed_read_leaves_frame_unassigned() {
        let (_dir, _file_manager, buffer_manager) = setup(1, Duration::from_millis(20));
        let good = BlockId::new("testfile", 0);
        let buffer = buffer_manager.pin(&good).unwrap();
        buffer_manager.unpin(&buffer);

        let bad = BlockId::new("", 0);
        assert!(matches!(
            buffer_manager.pin(&bad),
            Err(DbError::InvalidArgument(_))
        ));
        assert_eq!(buffer_manager.frames(), vec![(None, false)]);
        assert_eq!(buffer_manager.available(), 1);

        //  a second pin must not find the block in the frame
        assert!(buffer_manager.pin(&bad).is_err());
        let buffer = buffer_manager.pin(&good).unwrap();
        assert_eq!(buffer.lock().block_id(), Some(&good));
        buffer_manager.unpin(&buffer);
    }

    #[test]
    fn test_zero_buffers_is_invalid() {
        let dir = TestDir::unique("buffer_manager_zero");
        let file_manager = Arc::new(FileManager::new(&dir, 400).unwrap());
        let log_manager = Arc::new(LogManager::new(Arc::clone(&file_manager), "logfile").unwrap());
        assert!(BufferManager::new(file_manager, log_manager, 0, Duration::from_millis(10)).is_err());
    }
}
