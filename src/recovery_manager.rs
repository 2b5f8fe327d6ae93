use std::{collections::HashSet, fmt::Display, sync::Arc};

use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    buffer_manager::{Buffer, BufferManager},
    error::{DbError, Result},
    file_manager::BlockId,
    log_manager::{LogManager, Lsn},
    page::Page,
    transaction::{TransactionID, TransactionOperations},
};

/// The container for all the different types of log records that are written to the WAL.
///
/// On disk a record is framed as `[kind: i32][length: i32][body]` where the body is
/// the bincode encoding of the matching `*Body` struct below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Start(TransactionID),
    Commit(TransactionID),
    Rollback(TransactionID),
    Checkpoint,
    SetInt {
        txnum: TransactionID,
        block_id: BlockId,
        offset: usize,
        old_val: i32,
    },
    SetString {
        txnum: TransactionID,
        block_id: BlockId,
        offset: usize,
        old_val: String,
    },
}

#[derive(Serialize, Deserialize)]
struct TxBody {
    txnum: i32,
}

#[derive(Serialize, Deserialize)]
struct SetIntBody {
    filename: String,
    txnum: i32,
    block_number: i32,
    offset: i64,
    val: i32,
}

#[derive(Serialize, Deserialize)]
struct SetStringBody {
    filename: String,
    txnum: i32,
    block_number: i32,
    offset: i64,
    val: String,
}

impl Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogRecord::Start(txnum) => write!(f, "<START {txnum}>"),
            LogRecord::Commit(txnum) => write!(f, "<COMMIT {txnum}>"),
            LogRecord::Rollback(txnum) => write!(f, "<ROLLBACK {txnum}>"),
            LogRecord::Checkpoint => write!(f, "<CHECKPOINT>"),
            LogRecord::SetInt {
                txnum,
                block_id,
                offset,
                old_val,
            } => write!(f, "<SETINT {txnum} {block_id} {offset} {old_val}>"),
            LogRecord::SetString {
                txnum,
                block_id,
                offset,
                old_val,
            } => write!(f, "<SETSTRING {txnum} {block_id} {offset} {old_val}>"),
        }
    }
}

fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(body, bincode::config::standard())
        .map_err(|e| DbError::MalformedLogRecord(e.to_string()))
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (body, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| DbError::MalformedLogRecord(e.to_string()))?;
    if read != bytes.len() {
        return Err(DbError::MalformedLogRecord(format!(
            "{} trailing bytes after record body",
            bytes.len() - read
        )));
    }
    Ok(body)
}

fn to_wire_block(block_id: &BlockId, offset: usize) -> Result<(i32, i64)> {
    let block_number = i32::try_from(block_id.block_num).map_err(|_| {
        DbError::InvalidArgument(format!("{block_id} cannot be written to the log"))
    })?;
    Ok((block_number, offset as i64))
}

fn from_wire_block(filename: String, block_number: i32, offset: i64) -> Result<(BlockId, usize)> {
    if block_number < 0 || offset < 0 {
        return Err(DbError::MalformedLogRecord(format!(
            "negative block {block_number} or offset {offset}"
        )));
    }
    Ok((
        BlockId::new(&filename, block_number as usize),
        offset as usize,
    ))
}

impl TryFrom<&LogRecord> for Vec<u8> {
    type Error = DbError;

    fn try_from(record: &LogRecord) -> Result<Self> {
        let body = match record {
            LogRecord::Start(txnum) | LogRecord::Commit(txnum) | LogRecord::Rollback(txnum) => {
                encode_body(&TxBody { txnum: *txnum })?
            }
            LogRecord::Checkpoint => Vec::new(),
            LogRecord::SetInt {
                txnum,
                block_id,
                offset,
                old_val,
            } => {
                let (block_number, offset) = to_wire_block(block_id, *offset)?;
                encode_body(&SetIntBody {
                    filename: block_id.filename.clone(),
                    txnum: *txnum,
                    block_number,
                    offset,
                    val: *old_val,
                })?
            }
            LogRecord::SetString {
                txnum,
                block_id,
                offset,
                old_val,
            } => {
                let (block_number, offset) = to_wire_block(block_id, *offset)?;
                encode_body(&SetStringBody {
                    filename: block_id.filename.clone(),
                    txnum: *txnum,
                    block_number,
                    offset,
                    val: old_val.clone(),
                })?
            }
        };

        let mut bytes = Vec::with_capacity(2 * Page::INT_BYTES + body.len());
        bytes.extend_from_slice(&record.discriminant().to_be_bytes());
        bytes.extend_from_slice(&(body.len() as i32).to_be_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }
}

impl TryFrom<&[u8]> for LogRecord {
    type Error = DbError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let header = 2 * Page::INT_BYTES;
        if bytes.len() < header {
            return Err(DbError::MalformedLogRecord(format!(
                "record of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let page = Page::from_bytes(bytes[..header].to_vec());
        let kind = page.get_int(0)?;
        let length = page.get_int(Page::INT_BYTES)?;
        let body = &bytes[header..];
        if length < 0 || length as usize != body.len() {
            return Err(DbError::MalformedLogRecord(format!(
                "declared body length {length} but found {} bytes",
                body.len()
            )));
        }

        match kind {
            0 => Ok(LogRecord::Start(decode_body::<TxBody>(body)?.txnum)),
            1 => Ok(LogRecord::Commit(decode_body::<TxBody>(body)?.txnum)),
            2 => Ok(LogRecord::Rollback(decode_body::<TxBody>(body)?.txnum)),
            3 => Ok(LogRecord::Checkpoint),
            4 => {
                let body: SetIntBody = decode_body(body)?;
                let (block_id, offset) =
                    from_wire_block(body.filename, body.block_number, body.offset)?;
                Ok(LogRecord::SetInt {
                    txnum: body.txnum,
                    block_id,
                    offset,
                    old_val: body.val,
                })
            }
            5 => {
                let body: SetStringBody = decode_body(body)?;
                let (block_id, offset) =
                    from_wire_block(body.filename, body.block_number, body.offset)?;
                Ok(LogRecord::SetString {
                    txnum: body.txnum,
                    block_id,
                    offset,
                    old_val: body.val,
                })
            }
            other => Err(DbError::UnknownLogRecord(other)),
        }
    }
}

impl LogRecord {
    /// Get the discriminant value for the log record
    pub fn discriminant(&self) -> i32 {
        match self {
            LogRecord::Start(_) => 0,
            LogRecord::Commit(_) => 1,
            LogRecord::Rollback(_) => 2,
            LogRecord::Checkpoint => 3,
            LogRecord::SetInt { .. } => 4,
            LogRecord::SetString { .. } => 5,
        }
    }

    /// Get the transaction number associated with this log record.
    /// A checkpoint belongs to no transaction.
    pub fn tx_number(&self) -> Option<TransactionID> {
        match self {
            LogRecord::Start(txnum)
            | LogRecord::Commit(txnum)
            | LogRecord::Rollback(txnum)
            | LogRecord::SetInt { txnum, .. }
            | LogRecord::SetString { txnum, .. } => Some(*txnum),
            LogRecord::Checkpoint => None,
        }
    }

    /// Undo the operation performed by this log record.
    /// Restores the old value without logging; only the two setters do anything.
    pub fn undo(&self, tx: &dyn TransactionOperations) -> Result<()> {
        match self {
            LogRecord::Start(_)
            | LogRecord::Commit(_)
            | LogRecord::Rollback(_)
            | LogRecord::Checkpoint => Ok(()),
            LogRecord::SetInt {
                block_id,
                offset,
                old_val,
                ..
            } => {
                tx.pin(block_id)?;
                let result = tx.set_int(block_id, *offset, *old_val, false);
                tx.unpin(block_id);
                result
            }
            LogRecord::SetString {
                block_id,
                offset,
                old_val,
                ..
            } => {
                tx.pin(block_id)?;
                let result = tx.set_string(block_id, *offset, old_val, false);
                tx.unpin(block_id);
                result
            }
        }
    }

    /// Serialize the log record to bytes and write it to the log file
    pub fn write_log_record(&self, log_manager: &LogManager) -> Result<Lsn> {
        let bytes = Vec::<u8>::try_from(self)?;
        log_manager.append(&bytes)
    }

    /// Read the bytes from the log file and deserialize them into a [`LogRecord`]
    pub fn from_bytes(bytes: &[u8]) -> Result<LogRecord> {
        LogRecord::try_from(bytes)
    }
}

/// Every [`crate::transaction::Transaction`] owns one of these to write its WAL
/// records and to drive rollback and recovery
pub struct RecoveryManager {
    tx_num: TransactionID,
    log_manager: Arc<LogManager>,
    buffer_manager: Arc<BufferManager>,
}

impl RecoveryManager {
    /// Writes the Start record for the transaction
    pub fn new(
        tx_num: TransactionID,
        log_manager: Arc<LogManager>,
        buffer_manager: Arc<BufferManager>,
    ) -> Result<Self> {
        LogRecord::Start(tx_num).write_log_record(&log_manager)?;
        Ok(Self {
            tx_num,
            log_manager,
            buffer_manager,
        })
    }

    /// Flush this transaction's buffers, then write and flush the Commit record
    pub fn commit(&self) -> Result<()> {
        self.buffer_manager.flush_all(self.tx_num)?;
        let lsn = LogRecord::Commit(self.tx_num).write_log_record(&self.log_manager)?;
        self.log_manager.flush_lsn(lsn)
    }

    /// Undo everything this transaction logged, then write and flush a Rollback record
    pub fn rollback(&self, tx: &dyn TransactionOperations) -> Result<()> {
        for bytes in self.log_manager.iterator()? {
            let record = LogRecord::from_bytes(&bytes?)?;
            if record.tx_number() != Some(self.tx_num) {
                continue;
            }
            if let LogRecord::Start(_) = record {
                break;
            }
            record.undo(tx)?;
        }
        self.buffer_manager.flush_all(self.tx_num)?;
        let lsn = LogRecord::Rollback(self.tx_num).write_log_record(&self.log_manager)?;
        self.log_manager.flush_lsn(lsn)
    }

    /// Undo every unfinished transaction back to the most recent checkpoint, then
    /// write a quiescent checkpoint
    pub fn recover(&self, tx: &dyn TransactionOperations) -> Result<()> {
        self.buffer_manager.flush_all(self.tx_num)?;
        let mut finished_txns: HashSet<TransactionID> = HashSet::new();
        let mut undone = 0;
        for bytes in self.log_manager.iterator()? {
            let record = LogRecord::from_bytes(&bytes?)?;
            match record {
                LogRecord::Checkpoint => break,
                LogRecord::Commit(txnum) | LogRecord::Rollback(txnum) => {
                    finished_txns.insert(txnum);
                }
                LogRecord::Start(_) => {}
                LogRecord::SetInt { txnum, .. } | LogRecord::SetString { txnum, .. } => {
                    if !finished_txns.contains(&txnum) {
                        debug!("recovery undoing {record}");
                        record.undo(tx)?;
                        undone += 1;
                    }
                }
            }
        }
        self.buffer_manager.flush_all(self.tx_num)?;
        let lsn = LogRecord::Checkpoint.write_log_record(&self.log_manager)?;
        self.log_manager.flush_lsn(lsn)?;
        info!("recovery undid {undone} updates and wrote a checkpoint");
        Ok(())
    }

    /// Log the current integer at `offset` so it can be restored later
    pub fn set_int(&self, buffer: &Buffer, offset: usize) -> Result<Lsn> {
        let old_val = buffer.contents().get_int(offset)?;
        let block_id = Self::assigned_block(buffer)?;
        LogRecord::SetInt {
            txnum: self.tx_num,
            block_id,
            offset,
            old_val,
        }
        .write_log_record(&self.log_manager)
    }

    /// Log the current string at `offset` so it can be restored later
    pub fn set_string(&self, buffer: &Buffer, offset: usize) -> Result<Lsn> {
        let old_val = buffer.contents().get_string(offset)?;
        let block_id = Self::assigned_block(buffer)?;
        LogRecord::SetString {
            txnum: self.tx_num,
            block_id,
            offset,
            old_val,
        }
        .write_log_record(&self.log_manager)
    }

    fn assigned_block(buffer: &Buffer) -> Result<BlockId> {
        buffer
            .block_id()
            .cloned()
            .ok_or_else(|| DbError::InvalidArgument("buffer is not assigned to a block".into()))
    }
}
