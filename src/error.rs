use thiserror::Error;

use crate::file_manager::BlockId;

/// Every failure the engine reports to its callers
#[derive(Error, Debug)]
pub enum DbError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transaction timeout exceeded: could not pin {0}")]
    PinTimeout(BlockId),

    #[error("transaction timeout exceeded: could not lock {0}")]
    LockTimeout(BlockId),

    #[error("specified field is not found: {0}")]
    FieldNotFound(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column does not exist: {0}")]
    ColumnNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("exceed varchar size {max} for field {field}: value '{value}'")]
    VarcharOverflow {
        field: String,
        max: usize,
        value: String,
    },

    #[error("unknown log record kind {0}")]
    UnknownLogRecord(i32),

    #[error("malformed log record: {0}")]
    MalformedLogRecord(String),

    #[error("log record of {size} bytes does not fit in a {block_size} byte log block")]
    LogRecordTooLarge { size: usize, block_size: usize },

    #[error("access of {len} bytes at offset {offset} is outside a page of {page_size} bytes")]
    PageOutOfBounds {
        offset: usize,
        len: usize,
        page_size: usize,
    },

    #[error("corrupt page data: {0}")]
    CorruptPage(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("unsupported field type {0}")]
    UnsupportedFieldType(i32),

    #[error("can't update query")]
    NotUpdatable,

    #[error("block {0} is not pinned by this transaction")]
    BlockNotPinned(BlockId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Timeouts are the retryable failures: the caller should roll back and try again
    pub fn is_timeout(&self) -> bool {
        matches!(self, DbError::PinTimeout(_) | DbError::LockTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
