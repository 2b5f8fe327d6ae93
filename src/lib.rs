use std::{path::Path, sync::Arc};

use log::info;

pub mod btree;
pub mod buffer_manager;
pub mod config;
pub mod error;
pub mod file_manager;
pub mod index;
pub mod lock_table;
pub mod log_manager;
pub mod metadata;
pub mod page;
pub mod query;
pub mod record;
pub mod recovery_manager;
pub mod transaction;
#[cfg(test)]
mod test_utils;

pub use buffer_manager::{Buffer, BufferManager};
pub use config::{DbConfig, IndexKind};
pub use error::{DbError, Result};
pub use file_manager::{BlockId, FileManager};
pub use index::Index;
pub use lock_table::LockTable;
pub use log_manager::{LogManager, Lsn};
pub use metadata::{IndexInfo, MetadataManager, StatInfo};
pub use page::Page;
pub use query::{Constant, Expression, Predicate, Scan, Term, UpdateScan};
pub use record::{FieldType, Layout, Schema, TableScan, RID};
pub use recovery_manager::LogRecord;
pub use transaction::{BufferHandle, Transaction, TransactionID, TxIdGenerator};

#[cfg(test)]
use test_utils::TestDir;

/// The database struct.
///
/// Owns one instance of every shared manager. Two `SimpleDB`s opened on two
/// directories in the same process share nothing.
pub struct SimpleDB {
    config: DbConfig,
    file_manager: Arc<FileManager>,
    log_manager: Arc<LogManager>,
    buffer_manager: Arc<BufferManager>,
    lock_table: Arc<LockTable>,
    tx_id_generator: TxIdGenerator,
    metadata_manager: Arc<MetadataManager>,
}

impl SimpleDB {
    /// Open the database described by the config.
    /// A new directory gets the catalog tables, an existing one is recovered first.
    pub fn open(config: DbConfig) -> Result<Self> {
        config.validate()?;
        let file_manager = Arc::new(FileManager::new(&config.db_directory, config.block_size)?);
        let log_manager = Arc::new(LogManager::new(
            Arc::clone(&file_manager),
            &config.log_file_name,
        )?);
        let buffer_manager = Arc::new(BufferManager::new(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            config.buffer_pool_size,
            config.buffer_pin_timeout,
        )?);
        let lock_table = Arc::new(LockTable::new(config.lock_timeout));
        let metadata_manager = Arc::new(MetadataManager::new(
            config.stat_refresh_threshold,
            config.index_kind,
        )?);

        let db = Self {
            file_manager,
            log_manager,
            buffer_manager,
            lock_table,
            tx_id_generator: TxIdGenerator::new(),
            metadata_manager,
            config,
        };

        let txn = db.new_tx()?;
        if db.file_manager.is_new() {
            info!("creating new database in {}", db.config.db_directory.display());
            if let Err(e) = db.metadata_manager.create_catalog(&txn) {
                txn.rollback()?;
                return Err(e);
            }
            txn.commit()?;
        } else {
            info!("recovering existing database in {}", db.config.db_directory.display());
            txn.recover()?;
        }
        Ok(db)
    }

    /// Open a database in the directory with every other setting at its default
    pub fn open_dir<P: AsRef<Path>>(db_directory: P) -> Result<Self> {
        Self::open(DbConfig::new(db_directory))
    }

    /// Start a new transaction
    pub fn new_tx(&self) -> Result<Arc<Transaction>> {
        Ok(Arc::new(Transaction::new(
            Arc::clone(&self.file_manager),
            Arc::clone(&self.log_manager),
            Arc::clone(&self.buffer_manager),
            Arc::clone(&self.lock_table),
            self.tx_id_generator.next_id(),
        )?))
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn file_manager(&self) -> Arc<FileManager> {
        Arc::clone(&self.file_manager)
    }

    pub fn log_manager(&self) -> Arc<LogManager> {
        Arc::clone(&self.log_manager)
    }

    pub fn buffer_manager(&self) -> Arc<BufferManager> {
        Arc::clone(&self.buffer_manager)
    }

    pub fn lock_table(&self) -> Arc<LockTable> {
        Arc::clone(&self.lock_table)
    }

    pub fn metadata_manager(&self) -> Arc<MetadataManager> {
        Arc::clone(&self.metadata_manager)
    }

    #[cfg(test)]
    pub fn new_for_test(block_size: usize, num_buffers: usize) -> (Self, TestDir) {
        Self::new_for_test_with_config(|config| {
            config
                .with_block_size(block_size)
                .with_buffer_pool_size(num_buffers)
        })
    }

    /// A database in a scratch directory. The closure adjusts a config whose
    /// defaults are a 400 byte block, 8 buffers and 5 second timeouts.
    #[cfg(test)]
    pub fn new_for_test_with_config<F>(f: F) -> (Self, TestDir)
    where
        F: FnOnce(DbConfig) -> DbConfig,
    {
        let test_dir = TestDir::unique("db");
        let config = f(DbConfig::new(&test_dir)
            .with_block_size(400)
            .with_buffer_pool_size(8)
            .with_buffer_pin_timeout(std::time::Duration::from_secs(5))
            .with_lock_timeout(std::time::Duration::from_secs(5)));
        let db = Self::open(config).unwrap();
        (db, test_dir)
    }
}
