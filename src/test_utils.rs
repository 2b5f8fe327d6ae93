use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{
    buffer_manager::BufferManager,
    file_manager::FileManager,
    lock_table::LockTable,
    log_manager::LogManager,
    transaction::{Transaction, TxIdGenerator},
};

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

/// A scratch directory that is removed when dropped
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new<P>(path: P) -> Self
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    /// A fresh directory under the system temp dir that no other test shares
    pub fn unique(prefix: &str) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let n = NEXT_DIR.fetch_add(1, Ordering::SeqCst);
        Self::new(std::env::temp_dir().join(format!(
            "simpledb_{prefix}_{}_{timestamp}_{n}",
            std::process::id()
        )))
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        self.path.as_ref()
    }
}

/// The storage and transaction layers without a catalog, for tests that need
/// blocks too small to hold the catalog tables
pub struct BareEngine {
    pub file_manager: Arc<FileManager>,
    pub log_manager: Arc<LogManager>,
    pub buffer_manager: Arc<BufferManager>,
    pub lock_table: Arc<LockTable>,
    tx_ids: TxIdGenerator,
    _dir: TestDir,
}

impl BareEngine {
    pub fn new(block_size: usize, num_buffers: usize) -> Self {
        let dir = TestDir::unique("bare");
        let file_manager = Arc::new(FileManager::new(&dir, block_size).unwrap());
        let log_manager = Arc::new(LogManager::new(Arc::clone(&file_manager), "logfile").unwrap());
        let buffer_manager = Arc::new(
            BufferManager::new(
                Arc::clone(&file_manager),
                Arc::clone(&log_manager),
                num_buffers,
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        Self {
            file_manager,
            log_manager,
            buffer_manager,
            lock_table: Arc::new(LockTable::new(Duration::from_secs(1))),
            tx_ids: TxIdGenerator::new(),
            _dir: dir,
        }
    }

    pub fn new_tx(&self) -> Arc<Transaction> {
        Arc::new(
            Transaction::new(
                Arc::clone(&self.file_manager),
                Arc::clone(&self.log_manager),
                Arc::clone(&self.buffer_manager),
                Arc::clone(&self.lock_table),
                self.tx_ids.next_id(),
            )
            .unwrap(),
        )
    }
}
