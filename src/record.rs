use std::{collections::HashMap, fmt::Display, sync::Arc};

use log::trace;

use crate::{
    error::{DbError, Result},
    file_manager::BlockId,
    page::Page,
    query::{Constant, Scan, UpdateScan},
    transaction::{BufferHandle, Transaction},
};

/// The type codes stored in the field catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int = 4,
    String = 12,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::String => "varchar",
        }
    }
}

impl From<FieldType> for i32 {
    fn from(value: FieldType) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for FieldType {
    type Error = DbError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            4 => Ok(FieldType::Int),
            12 => Ok(FieldType::String),
            other => Err(DbError::UnsupportedFieldType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub field_type: FieldType,
    pub length: usize,
}

/// The names and types of the fields of a table, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub fields: Vec<String>,
    pub info: HashMap<String, FieldInfo>,
}

impl Schema {
    pub const MAX_NAME_LENGTH: usize = 16;

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Re-adding a name replaces its type but keeps its position.
    pub fn add_field(&mut self, field_name: &str, field_type: FieldType, length: usize) -> Result<()> {
        if field_name.is_empty() || field_name.len() > Self::MAX_NAME_LENGTH {
            return Err(DbError::InvalidArgument(format!(
                "field name '{field_name}' must have 1 to {} bytes",
                Self::MAX_NAME_LENGTH
            )));
        }
        if !self.info.contains_key(field_name) {
            self.fields.push(field_name.to_string());
        }
        self.info
            .insert(field_name.to_string(), FieldInfo { field_type, length });
        Ok(())
    }

    pub fn add_int_field(&mut self, field_name: &str) -> Result<()> {
        self.add_field(field_name, FieldType::Int, 0)
    }

    pub fn add_string_field(&mut self, field_name: &str, length: usize) -> Result<()> {
        self.add_field(field_name, FieldType::String, length)
    }

    /// Copy one field definition out of another schema
    pub fn add(&mut self, field_name: &str, other: &Schema) -> Result<()> {
        let info = other.field_info(field_name)?;
        self.add_field(field_name, info.field_type, info.length)
    }

    pub fn add_all(&mut self, other: &Schema) -> Result<()> {
        for field in &other.fields {
            self.add(field, other)?;
        }
        Ok(())
    }

    pub fn has_field(&self, field_name: &str) -> bool {
        self.info.contains_key(field_name)
    }

    pub fn field_info(&self, field_name: &str) -> Result<FieldInfo> {
        self.info
            .get(field_name)
            .copied()
            .ok_or_else(|| DbError::FieldNotFound(field_name.to_string()))
    }

    pub fn field_type(&self, field_name: &str) -> Result<FieldType> {
        Ok(self.field_info(field_name)?.field_type)
    }

    pub fn length(&self, field_name: &str) -> Result<usize> {
        Ok(self.field_info(field_name)?.length)
    }
}

/// A [`Schema`] plus where each field lives inside a record slot.
///
/// Every slot starts with a 4 byte used/empty flag, then the fields in schema
/// order. An int takes 4 bytes, a varchar(n) takes the bytes of a string of n bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub schema: Schema,
    offsets: HashMap<String, usize>,
    pub slot_size: usize,
}

impl Layout {
    pub fn new(schema: Schema) -> Self {
        let mut offsets = HashMap::new();
        let mut pos = Page::INT_BYTES;
        for field in &schema.fields {
            offsets.insert(field.clone(), pos);
            let info = schema.info[field];
            pos += match info.field_type {
                FieldType::Int => Page::INT_BYTES,
                FieldType::String => Page::max_length(info.length),
            };
        }
        Self {
            schema,
            offsets,
            slot_size: pos,
        }
    }

    /// Rebuild a layout from what the catalog recorded
    pub fn with_offsets(schema: Schema, offsets: HashMap<String, usize>, slot_size: usize) -> Self {
        Self {
            schema,
            offsets,
            slot_size,
        }
    }

    pub fn offset(&self, field_name: &str) -> Result<usize> {
        self.offsets
            .get(field_name)
            .copied()
            .ok_or_else(|| DbError::FieldNotFound(field_name.to_string()))
    }
}

/// Identifies a record by its block number within the table file and its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RID {
    pub block_num: usize,
    pub slot: usize,
}

impl RID {
    pub fn new(block_num: usize, slot: usize) -> Self {
        Self { block_num, slot }
    }
}

impl Display for RID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.block_num, self.slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotFlag {
    Empty = 0,
    Used = 1,
}

/// A block of a table viewed as an array of equal sized slots.
/// The block stays pinned for as long as the record page lives.
pub struct RecordPage {
    txn: Arc<Transaction>,
    handle: BufferHandle,
    layout: Layout,
}

impl RecordPage {
    pub fn new(txn: Arc<Transaction>, block_id: BlockId, layout: Layout) -> Result<Self> {
        if layout.slot_size + Page::INT_BYTES > txn.block_size() {
            return Err(DbError::InvalidArgument(format!(
                "slot of {} bytes does not fit in a {} byte block",
                layout.slot_size,
                txn.block_size()
            )));
        }
        let handle = txn.pin_handle(&block_id)?;
        Ok(Self {
            txn,
            handle,
            layout,
        })
    }

    pub fn block_id(&self) -> &BlockId {
        self.handle.block_id()
    }

    pub fn get_int(&self, slot: usize, field_name: &str) -> Result<i32> {
        self.txn
            .get_int(self.block_id(), self.field_pos(slot, field_name)?)
    }

    pub fn get_string(&self, slot: usize, field_name: &str) -> Result<String> {
        self.txn
            .get_string(self.block_id(), self.field_pos(slot, field_name)?)
    }

    pub fn set_int(&self, slot: usize, field_name: &str, value: i32) -> Result<()> {
        self.txn
            .set_int(self.block_id(), self.field_pos(slot, field_name)?, value, true)
    }

    pub fn set_string(&self, slot: usize, field_name: &str, value: &str) -> Result<()> {
        self.txn
            .set_string(self.block_id(), self.field_pos(slot, field_name)?, value, true)
    }

    pub fn delete(&self, slot: usize) -> Result<()> {
        self.set_flag(slot, SlotFlag::Empty)
    }

    /// Mark every slot empty and zero its fields.
    /// The block is brand new so none of this is logged.
    pub fn format(&self) -> Result<()> {
        let mut slot = 0;
        while self.is_valid_slot(slot) {
            self.txn.set_int(
                self.block_id(),
                self.slot_pos(slot),
                SlotFlag::Empty as i32,
                false,
            )?;
            for field in &self.layout.schema.fields {
                let pos = self.field_pos(slot, field)?;
                match self.layout.schema.field_type(field)? {
                    FieldType::Int => self.txn.set_int(self.block_id(), pos, 0, false)?,
                    FieldType::String => self.txn.set_string(self.block_id(), pos, "", false)?,
                }
            }
            slot += 1;
        }
        Ok(())
    }

    /// The first used slot after `slot`, or after the start of the page when `slot` is None
    pub fn next_after(&self, slot: Option<usize>) -> Result<Option<usize>> {
        self.search_after(slot, SlotFlag::Used)
    }

    /// Claim the first empty slot after `slot` and return it
    pub fn insert_after(&self, slot: Option<usize>) -> Result<Option<usize>> {
        let new_slot = self.search_after(slot, SlotFlag::Empty)?;
        if let Some(new_slot) = new_slot {
            self.set_flag(new_slot, SlotFlag::Used)?;
        }
        Ok(new_slot)
    }

    fn search_after(&self, slot: Option<usize>, flag: SlotFlag) -> Result<Option<usize>> {
        let mut slot = slot.map_or(0, |s| s + 1);
        while self.is_valid_slot(slot) {
            if self.txn.get_int(self.block_id(), self.slot_pos(slot))? == flag as i32 {
                return Ok(Some(slot));
            }
            slot += 1;
        }
        Ok(None)
    }

    fn set_flag(&self, slot: usize, flag: SlotFlag) -> Result<()> {
        self.txn
            .set_int(self.block_id(), self.slot_pos(slot), flag as i32, true)
    }

    fn is_valid_slot(&self, slot: usize) -> bool {
        self.slot_pos(slot + 1) <= self.txn.block_size()
    }

    fn slot_pos(&self, slot: usize) -> usize {
        slot * self.layout.slot_size
    }

    fn field_pos(&self, slot: usize, field_name: &str) -> Result<usize> {
        Ok(self.slot_pos(slot) + self.layout.offset(field_name)?)
    }
}

/// A cursor over every record of one table.
///
/// The file is named after the table. Records come back in (block, slot) order.
pub struct TableScan {
    txn: Arc<Transaction>,
    layout: Layout,
    file_name: String,
    record_page: Option<RecordPage>,
    current_slot: Option<usize>,
}

impl TableScan {
    pub fn new(txn: Arc<Transaction>, table_name: &str, layout: Layout) -> Result<Self> {
        let mut scan = Self {
            txn,
            layout,
            file_name: table_name.to_string(),
            record_page: None,
            current_slot: None,
        };
        if scan.txn.size(&scan.file_name)? == 0 {
            scan.move_to_new_block()?;
        } else {
            scan.move_to_block(0)?;
        }
        Ok(scan)
    }

    pub fn table_name(&self) -> &str {
        &self.file_name
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn page(&self) -> Result<&RecordPage> {
        self.record_page
            .as_ref()
            .ok_or_else(|| DbError::InvalidArgument(format!("scan of {} is closed", self.file_name)))
    }

    fn slot(&self) -> Result<usize> {
        self.current_slot.ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "scan of {} is not positioned on a record",
                self.file_name
            ))
        })
    }

    fn move_to_block(&mut self, block_num: usize) -> Result<()> {
        self.close();
        let block_id = BlockId::new(&self.file_name, block_num);
        self.record_page = Some(RecordPage::new(
            Arc::clone(&self.txn),
            block_id,
            self.layout.clone(),
        )?);
        self.current_slot = None;
        Ok(())
    }

    fn move_to_new_block(&mut self) -> Result<()> {
        self.close();
        let block_id = self.txn.append(&self.file_name)?;
        trace!("table {} grew to {}", self.file_name, block_id);
        let record_page = RecordPage::new(Arc::clone(&self.txn), block_id, self.layout.clone())?;
        record_page.format()?;
        self.record_page = Some(record_page);
        self.current_slot = None;
        Ok(())
    }

    fn at_last_block(&self) -> Result<bool> {
        let block_num = self.page()?.block_id().block_num;
        Ok(block_num + 1 >= self.txn.size(&self.file_name)?)
    }

    fn current_block_num(&self) -> Result<usize> {
        Ok(self.page()?.block_id().block_num)
    }
}

impl Scan for TableScan {
    fn before_first(&mut self) -> Result<()> {
        self.move_to_block(0)
    }

    fn next(&mut self) -> Result<bool> {
        loop {
            self.current_slot = self.page()?.next_after(self.current_slot)?;
            if self.current_slot.is_some() {
                return Ok(true);
            }
            if self.at_last_block()? {
                return Ok(false);
            }
            let next_block = self.current_block_num()? + 1;
            self.move_to_block(next_block)?;
        }
    }

    fn get_int(&self, field_name: &str) -> Result<i32> {
        self.page()?.get_int(self.slot()?, field_name)
    }

    fn get_string(&self, field_name: &str) -> Result<String> {
        self.page()?.get_string(self.slot()?, field_name)
    }

    fn get_val(&self, field_name: &str) -> Result<Constant> {
        match self.layout.schema.field_type(field_name)? {
            FieldType::Int => Ok(Constant::Int(self.get_int(field_name)?)),
            FieldType::String => Ok(Constant::String(self.get_string(field_name)?)),
        }
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.layout.schema.has_field(field_name)
    }

    /// Unpin the current block. The scan can be reused after `before_first`.
    fn close(&mut self) {
        self.record_page = None;
        self.current_slot = None;
    }

    fn as_update_scan(&self) -> Result<&dyn UpdateScan> {
        Ok(self)
    }

    fn as_update_scan_mut(&mut self) -> Result<&mut dyn UpdateScan> {
        Ok(self)
    }
}

impl UpdateScan for TableScan {
    fn set_int(&mut self, field_name: &str, value: i32) -> Result<()> {
        self.page()?.set_int(self.slot()?, field_name, value)
    }

    fn set_string(&mut self, field_name: &str, value: &str) -> Result<()> {
        let max = self.layout.schema.length(field_name)?;
        if value.len() > max {
            return Err(DbError::VarcharOverflow {
                field: field_name.to_string(),
                max,
                value: value.to_string(),
            });
        }
        self.page()?.set_string(self.slot()?, field_name, value)
    }

    fn set_val(&mut self, field_name: &str, value: &Constant) -> Result<()> {
        let field_type = self.layout.schema.field_type(field_name)?;
        match (field_type, value) {
            (FieldType::Int, Constant::Int(v)) => self.set_int(field_name, *v),
            (FieldType::String, Constant::String(v)) => self.set_string(field_name, v),
            _ => Err(DbError::TypeMismatch {
                expected: field_type.name(),
                found: value.type_name(),
            }),
        }
    }

    /// Move to an empty slot and claim it, growing the file when every block is full
    fn insert(&mut self) -> Result<()> {
        self.current_slot = self.page()?.insert_after(self.current_slot)?;
        while self.current_slot.is_none() {
            if self.at_last_block()? {
                self.move_to_new_block()?;
            } else {
                let next_block = self.current_block_num()? + 1;
                self.move_to_block(next_block)?;
            }
            self.current_slot = self.page()?.insert_after(self.current_slot)?;
        }
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.page()?.delete(self.slot()?)
    }

    fn get_rid(&self) -> Result<RID> {
        Ok(RID::new(self.current_block_num()?, self.slot()?))
    }

    fn move_to_rid(&mut self, rid: RID) -> Result<()> {
        self.move_to_block(rid.block_num)?;
        self.current_slot = Some(rid.slot);
        Ok(())
    }
}


#[cfg(test)]
mod record_page_tests {
    use std::sync::Arc;

    use super::{Layout, RecordPage, Schema};
    use crate::test_utils::BareEngine;

    fn layout() -> Layout {
        let mut schema = Schema::new();
        schema.add_int_field("A").unwrap();
        schema.add_string_field("B", 9).unwrap();
        Layout::new(schema)
    }

    #[test]
    fn test_insert_fill_and_delete_slots() {
        let engine = BareEngine::new(100, 2);
        let tx = engine.new_tx();
        let block_id = tx.append("T").unwrap();
        let page = RecordPage::new(Arc::clone(&tx), block_id, layout()).unwrap();
        page.format().unwrap();
        assert_eq!(page.next_after(None).unwrap(), None);

        //  a 100 byte block holds four 21 byte slots
        let mut slots = Vec::new();
        let mut slot = page.insert_after(None).unwrap();
        while let Some(s) = slot {
            page.set_int(s, "A", s as i32 * 10).unwrap();
            page.set_string(s, "B", &format!("rec{s}")).unwrap();
            slots.push(s);
            slot = page.insert_after(Some(s)).unwrap();
        }
        assert_eq!(slots, vec![0, 1, 2, 3]);

        page.delete(1).unwrap();
        assert_eq!(page.next_after(Some(0)).unwrap(), Some(2));
        assert_eq!(page.get_int(2, "A").unwrap(), 20);
        assert_eq!(page.get_string(3, "B").unwrap(), "rec3");
        assert_eq!(page.insert_after(None).unwrap(), Some(1));
        drop(page);
        tx.commit().unwrap();
    }

    #[test]
    fn test_slot_larger_than_block_is_rejected() {
        let engine = BareEngine::new(100, 2);
        let tx = engine.new_tx();
        let mut schema = Schema::new();
        schema.add_string_field("big", 100).unwrap();
        let block_id = tx.append("T").unwrap();
        assert!(RecordPage::new(Arc::clone(&tx), block_id, Layout::new(schema)).is_err());
        tx.rollback().unwrap();
    }
}
