use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::{
    error::{DbError, Result},
    file_manager::{BlockId, FileManager},
    page::Page,
};

pub type Lsn = usize;

struct LogState {
    log_page: Page,
    current_block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

/// The append-only write-ahead log.
///
/// Records are packed right to left inside a log block. The first 4 bytes of the
/// block hold the boundary: the offset of the most recently written record.
/// ```text
/// [ boundary ][ free space ... ][ record_k ][ record_k-1 ] ... [ record_1 ]
/// ```
pub struct LogManager {
    file_manager: Arc<FileManager>,
    log_file: String,
    state: Mutex<LogState>,
}

impl LogManager {
    pub fn new(file_manager: Arc<FileManager>, log_file: &str) -> Result<Self> {
        let mut log_page = file_manager.create_page();
        let log_size = file_manager.length(log_file)?;
        let current_block = if log_size == 0 {
            Self::append_new_block(&file_manager, log_file, &mut log_page)?
        } else {
            let block = BlockId::new(log_file, log_size - 1);
            file_manager.read(&block, &mut log_page)?;
            block
        };
        Ok(Self {
            file_manager,
            log_file: log_file.to_string(),
            state: Mutex::new(LogState {
                log_page,
                current_block,
                latest_lsn: 0,
                last_saved_lsn: 0,
            }),
        })
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    pub fn latest_lsn(&self) -> Lsn {
        self.state.lock().latest_lsn
    }

    pub fn last_saved_lsn(&self) -> Lsn {
        self.state.lock().last_saved_lsn
    }

    /// Make sure the record with this LSN is on disk
    pub fn flush_lsn(&self, lsn: Lsn) -> Result<()> {
        let mut state = self.state.lock();
        if lsn >= state.last_saved_lsn {
            self.flush_to_disk(&mut state)?;
        }
        Ok(())
    }

    /// Write the current log block to disk unconditionally
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_to_disk(&mut state)
    }

    fn flush_to_disk(&self, state: &mut LogState) -> Result<()> {
        self.file_manager
            .write(&state.current_block, &state.log_page)?;
        state.last_saved_lsn = state.latest_lsn;
        Ok(())
    }

    /// Write the log record to the log page and return its LSN.
    /// Moves to a fresh log block when the record does not fit in the current one.
    pub fn append(&self, log_record: &[u8]) -> Result<Lsn> {
        let block_size = self.file_manager.block_size();
        let bytes_needed = log_record.len() + Page::INT_BYTES;
        if bytes_needed + Page::INT_BYTES > block_size {
            return Err(DbError::LogRecordTooLarge {
                size: log_record.len(),
                block_size,
            });
        }

        let mut state = self.state.lock();
        let mut boundary = state.log_page.get_int(0)? as usize;
        if boundary < bytes_needed + Page::INT_BYTES {
            self.flush_to_disk(&mut state)?;
            state.current_block =
                Self::append_new_block(&self.file_manager, &self.log_file, &mut state.log_page)?;
            debug!("log rolled over to {}", state.current_block);
            boundary = state.log_page.get_int(0)? as usize;
        }

        let record_pos = boundary - bytes_needed;
        state.log_page.set_bytes(record_pos, log_record)?;
        state.log_page.set_int(0, record_pos as i32)?;
        state.latest_lsn += 1;
        Ok(state.latest_lsn)
    }

    /// Append a new block to the log file, write its boundary pointer and put it on disk
    fn append_new_block(
        file_manager: &FileManager,
        log_file: &str,
        log_page: &mut Page,
    ) -> Result<BlockId> {
        let block_id = file_manager.append(log_file)?;
        log_page.clear();
        log_page.set_int(0, file_manager.block_size() as i32)?;
        file_manager.write(&block_id, log_page)?;
        Ok(block_id)
    }

    /// Iterate the log from the newest record to the oldest. Flushes first so the
    /// iterator sees everything appended so far.
    pub fn iterator(&self) -> Result<LogIterator> {
        let mut state = self.state.lock();
        self.flush_to_disk(&mut state)?;
        LogIterator::new(Arc::clone(&self.file_manager), state.current_block.clone())
    }
}

/// Reverse iterator over raw log records
pub struct LogIterator {
    file_manager: Arc<FileManager>,
    current_block: BlockId,
    page: Page,
    current_pos: usize,
}

impl LogIterator {
    fn new(file_manager: Arc<FileManager>, current_block: BlockId) -> Result<Self> {
        let page = file_manager.create_page();
        let mut iter = Self {
            file_manager,
            current_block,
            page,
            current_pos: 0,
        };
        iter.move_to_block()?;
        Ok(iter)
    }

    fn move_to_block(&mut self) -> Result<()> {
        self.file_manager.read(&self.current_block, &mut self.page)?;
        self.current_pos = self.page.get_int(0)? as usize;
        Ok(())
    }

    /// True while a record remains in this block or an older block exists
    pub fn has_next(&self) -> bool {
        self.current_pos < self.file_manager.block_size() || self.current_block.block_num > 0
    }

    fn read_next(&mut self) -> Result<Option<Vec<u8>>> {
        while self.current_pos >= self.file_manager.block_size() {
            if self.current_block.block_num == 0 {
                return Ok(None);
            }
            self.current_block =
                BlockId::new(&self.current_block.filename, self.current_block.block_num - 1);
            self.move_to_block()?;
        }
        let record = self.page.get_bytes(self.current_pos)?;
        self.current_pos += Page::INT_BYTES + record.len();
        Ok(Some(record))
    }
}

impl Iterator for LogIterator {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        match self.read_next() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                //  a corrupt block ends the iteration after reporting it once
                self.current_block.block_num = 0;
                self.current_pos = self.file_manager.block_size();
                Some(Err(e))
            }
        }
    }
}
