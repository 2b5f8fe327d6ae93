use std::{cmp::Ordering, sync::Arc};

use log::debug;

use crate::{
    error::{DbError, Result},
    file_manager::BlockId,
    index::Index,
    metadata::IndexInfo,
    page::Page,
    query::Constant,
    record::{FieldType, Layout, Schema, RID},
    transaction::{BufferHandle, Transaction},
};

/// A B-tree over two files: `{index}leaf` holds the (key, record id) entries and
/// `{index}dir` holds the directory. The root is always block 0 of the directory file.
pub struct BTreeIndex {
    txn: Arc<Transaction>,
    dir_layout: Layout,
    leaf_layout: Layout,
    leaf_table_name: String,
    leaf: Option<BTreeLeaf>,
    root_block: BlockId,
}

impl BTreeIndex {
    pub fn new(txn: Arc<Transaction>, index_name: &str, leaf_layout: Layout) -> Result<Self> {
        //  Create the leaf file with one empty leaf if it does not exist
        let leaf_table_name = format!("{index_name}leaf");
        if txn.size(&leaf_table_name)? == 0 {
            let block_id = txn.append(&leaf_table_name)?;
            let leaf_page = BTreePage::new(Arc::clone(&txn), block_id, leaf_layout.clone())?;
            leaf_page.format(PageType::Leaf(None))?;
        }

        //  Create the directory file whose root routes every key to leaf 0
        let dir_table_name = format!("{index_name}dir");
        let mut dir_schema = Schema::new();
        dir_schema.add(IndexInfo::BLOCK_NUM_FIELD, &leaf_layout.schema)?;
        dir_schema.add(IndexInfo::DATA_FIELD, &leaf_layout.schema)?;
        let dir_layout = Layout::new(dir_schema);
        if txn.size(&dir_table_name)? == 0 {
            let block_id = txn.append(&dir_table_name)?;
            let root = BTreePage::new(Arc::clone(&txn), block_id, dir_layout.clone())?;
            root.format(PageType::Directory(0))?;
            let key_type = dir_layout.schema.field_type(IndexInfo::DATA_FIELD)?;
            root.insert_dir(0, Constant::min_value(key_type), 0)?;
        }
        Ok(Self {
            txn,
            dir_layout,
            leaf_layout,
            leaf_table_name,
            leaf: None,
            root_block: BlockId::new(&dir_table_name, 0),
        })
    }

    /// Blocks read by one lookup: one per directory level plus the leaf
    pub fn search_cost(num_blocks: usize, records_per_block: usize) -> usize {
        if num_blocks <= 1 || records_per_block <= 1 {
            return 1;
        }
        let levels = (num_blocks as f64).ln() / (records_per_block as f64).ln();
        1 + levels.round() as usize
    }

    fn root(&self) -> Result<BTreeDir> {
        BTreeDir::new(
            Arc::clone(&self.txn),
            self.root_block.clone(),
            self.dir_layout.clone(),
        )
    }

    fn leaf_mut(&mut self) -> Result<&mut BTreeLeaf> {
        self.leaf.as_mut().ok_or_else(|| {
            DbError::InvalidArgument("index is not positioned, call before_first".to_string())
        })
    }
}

impl Index for BTreeIndex {
    fn before_first(&mut self, search_key: &Constant) -> Result<()> {
        self.close();
        let key_type = self.leaf_layout.schema.field_type(IndexInfo::DATA_FIELD)?;
        if search_key.field_type() != key_type {
            return Err(DbError::TypeMismatch {
                expected: key_type.name(),
                found: search_key.type_name(),
            });
        }
        let leaf_block_num = self.root()?.search(search_key)?;
        let leaf_block_id = BlockId::new(&self.leaf_table_name, leaf_block_num);
        self.leaf = Some(BTreeLeaf::new(
            Arc::clone(&self.txn),
            leaf_block_id,
            self.leaf_layout.clone(),
            search_key.clone(),
        )?);
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        self.leaf_mut()?.next()
    }

    fn get_data_rid(&self) -> Result<RID> {
        self.leaf
            .as_ref()
            .ok_or_else(|| {
                DbError::InvalidArgument("index is not positioned, call before_first".to_string())
            })?
            .get_data_rid()
    }

    fn insert(&mut self, data_val: &Constant, data_rid: &RID) -> Result<()> {
        debug!("inserting {data_val} for rid {data_rid} into index");
        self.before_first(data_val)?;
        let leaf_split = self.leaf_mut()?.insert(*data_rid)?;
        self.close();
        let Some(leaf_split) = leaf_split else {
            return Ok(());
        };
        debug!("insert caused a leaf split");
        let root = self.root()?;
        let Some(root_split) = root.insert(leaf_split)? else {
            return Ok(());
        };
        debug!("insert caused a root split");
        root.make_new_root(root_split)
    }

    fn delete(&mut self, data_val: &Constant, data_rid: &RID) -> Result<()> {
        self.before_first(data_val)?;
        let result = self.leaf_mut()?.delete(*data_rid);
        self.close();
        result
    }

    fn close(&mut self) {
        self.leaf = None;
    }
}

/// A directory entry: keys from `dataval` on live under `block_num`
#[derive(Debug, Clone, PartialEq)]
struct DirEntry {
    dataval: Constant,
    block_num: usize,
}

/// A directory node. Walks down from the root to find leaves and absorbs the
/// entries that leaf splits push up.
struct BTreeDir {
    txn: Arc<Transaction>,
    layout: Layout,
    contents: BTreePage,
}

impl BTreeDir {
    fn new(txn: Arc<Transaction>, block_id: BlockId, layout: Layout) -> Result<Self> {
        let contents = BTreePage::new(Arc::clone(&txn), block_id, layout.clone())?;
        Ok(Self {
            txn,
            layout,
            contents,
        })
    }

    fn file_name(&self) -> &str {
        &self.contents.block_id().filename
    }

    /// Descend to level 0 and return the number of the leaf block that holds the key
    fn search(&mut self, search_key: &Constant) -> Result<usize> {
        let mut child_block = self.find_child_block(search_key)?;
        while self.contents.level()? > 0 {
            self.contents =
                BTreePage::new(Arc::clone(&self.txn), child_block, self.layout.clone())?;
            child_block = self.find_child_block(search_key)?;
        }
        Ok(child_block.block_num)
    }

    /// Move the root's entries into a new block and point the root at both halves.
    /// The root stays at block 0 and its level goes up by one.
    fn make_new_root(&self, entry: DirEntry) -> Result<()> {
        let first_value = self.contents.get_data_value(0)?;
        let level = self.contents.level()?;
        let new_block_id = self.contents.split(0, PageType::Directory(level))?;
        self.insert_into_page(DirEntry {
            dataval: first_value,
            block_num: new_block_id.block_num,
        })?;
        self.insert_into_page(entry)?;
        self.contents.set_flag(PageType::Directory(level + 1))
    }

    /// Insert the entry at the right level below this node.
    /// Returns the entry for a new sibling if this node had to split.
    fn insert(&self, entry: DirEntry) -> Result<Option<DirEntry>> {
        if self.contents.level()? == 0 {
            return self.insert_into_page(entry);
        }
        let child_block = self.find_child_block(&entry.dataval)?;
        let child = BTreeDir::new(Arc::clone(&self.txn), child_block, self.layout.clone())?;
        match child.insert(entry)? {
            Some(new_entry) => self.insert_into_page(new_entry),
            None => Ok(None),
        }
    }

    fn insert_into_page(&self, entry: DirEntry) -> Result<Option<DirEntry>> {
        let slot = self
            .contents
            .find_slot_before(&entry.dataval)?
            .map_or(0, |slot| slot + 1);
        self.contents
            .insert_dir(slot, entry.dataval, entry.block_num)?;
        if !self.contents.is_full()? {
            return Ok(None);
        }

        let level = self.contents.level()?;
        let split_point = self.contents.get_number_of_recs()? / 2;
        let split_value = self.contents.get_data_value(split_point)?;
        let new_block_id = self.contents.split(split_point, PageType::Directory(level))?;
        debug!("directory {} split at slot {split_point}", self.file_name());
        Ok(Some(DirEntry {
            dataval: split_value,
            block_num: new_block_id.block_num,
        }))
    }

    /// The child that covers the key: the rightmost slot whose key is below it,
    /// or the next slot when that one holds the key exactly
    fn find_child_block(&self, search_key: &Constant) -> Result<BlockId> {
        let before = self.contents.find_slot_before(search_key)?;
        let next = before.map_or(0, |slot| slot + 1);
        let slot = if next < self.contents.get_number_of_recs()?
            && self.contents.get_data_value(next)?.compare(search_key)? == Ordering::Equal
        {
            next
        } else {
            before.unwrap_or(0)
        };
        let block_num = self.contents.get_child_block_num(slot)?;
        Ok(BlockId::new(self.file_name(), block_num))
    }
}

/// A leaf node positioned on the entries of one search key.
///
/// A leaf can chain to overflow blocks holding more entries with its first key.
/// ```text
/// Leaf:           Overflow block:
/// [K5, K6]  --->  [K5, K5, K5, K5]
/// ```
struct BTreeLeaf {
    txn: Arc<Transaction>,
    layout: Layout,
    search_key: Constant,
    contents: BTreePage,
    current_slot: Option<usize>,
}

impl BTreeLeaf {
    fn new(
        txn: Arc<Transaction>,
        block_id: BlockId,
        layout: Layout,
        search_key: Constant,
    ) -> Result<Self> {
        let contents = BTreePage::new(Arc::clone(&txn), block_id, layout.clone())?;
        let current_slot = contents.find_slot_before(&search_key)?;
        Ok(Self {
            txn,
            layout,
            search_key,
            contents,
            current_slot,
        })
    }

    fn file_name(&self) -> String {
        self.contents.block_id().filename.clone()
    }

    /// Advance to the next entry with the search key, following the overflow chain
    fn next(&mut self) -> Result<bool> {
        let slot = self.current_slot.map_or(0, |slot| slot + 1);
        self.current_slot = Some(slot);
        if slot >= self.contents.get_number_of_recs()? {
            self.try_overflow()
        } else if self.contents.get_data_value(slot)?.compare(&self.search_key)?
            == Ordering::Equal
        {
            Ok(true)
        } else {
            self.try_overflow()
        }
    }

    fn get_data_rid(&self) -> Result<RID> {
        let slot = self.current_slot.ok_or_else(|| {
            DbError::InvalidArgument("leaf is not positioned on an entry".to_string())
        })?;
        self.contents.get_rid(slot)
    }

    /// Remove the entry for this record id from the leaf or its overflow chain
    fn delete(&mut self, rid: RID) -> Result<()> {
        while self.next()? {
            if self.get_data_rid()? != rid {
                continue;
            }
            let chain_key = self.contents.get_data_value(0)?;
            if let Some(slot) = self.current_slot {
                self.contents.delete(slot)?;
            }
            return self.refill_from_overflow(&chain_key);
        }
        Err(DbError::InvalidArgument(format!(
            "{rid} is not in the index under {}",
            self.search_key
        )))
    }

    /// After a delete, a page with an overflow chain must still start with the
    /// chain's key. Pull an entry back from the chain when it does not, and unlink
    /// chain blocks that run dry.
    fn refill_from_overflow(&mut self, chain_key: &Constant) -> Result<()> {
        loop {
            let PageType::Leaf(Some(overflow_block)) = self.contents.get_flag()? else {
                return Ok(());
            };
            if self.contents.get_number_of_recs()? > 0
                && self.contents.get_data_value(0)? == *chain_key
            {
                return Ok(());
            }
            let overflow = BTreePage::new(
                Arc::clone(&self.txn),
                BlockId::new(&self.file_name(), overflow_block),
                self.layout.clone(),
            )?;
            let overflow_recs = overflow.get_number_of_recs()?;
            if overflow_recs > 0 {
                let last = overflow_recs - 1;
                let dataval = overflow.get_data_value(last)?;
                let rid = overflow.get_rid(last)?;
                overflow.delete(last)?;
                self.contents.insert_leaf(0, dataval, rid)?;
                if overflow_recs > 1 {
                    return Ok(());
                }
            }
            debug!("unlinking drained overflow block {overflow_block}");
            self.contents.set_flag(overflow.get_flag()?)?;
            if overflow_recs > 0 {
                return Ok(());
            }
        }
    }

    /// Insert an entry for the search key after the current slot.
    /// Returns the directory entry for a new leaf if the leaf split.
    fn insert(&mut self, rid: RID) -> Result<Option<DirEntry>> {
        //  A key below the first key of a chained leaf goes into a fresh page of its
        //  own so that the chain stays attached to a leaf that starts with its key
        if matches!(self.contents.get_flag()?, PageType::Leaf(Some(_)))
            && self.contents.get_data_value(0)?.compare(&self.search_key)? == Ordering::Greater
        {
            debug!("inserting {} below the first key of a chained leaf", self.search_key);
            let first_key = self.contents.get_data_value(0)?;
            let new_block_id = self.contents.split(0, self.contents.get_flag()?)?;
            self.current_slot = Some(0);
            self.contents.set_flag(PageType::Leaf(None))?;
            self.contents.insert_leaf(0, self.search_key.clone(), rid)?;
            return Ok(Some(DirEntry {
                dataval: first_key,
                block_num: new_block_id.block_num,
            }));
        }

        let slot = self.current_slot.map_or(0, |slot| slot + 1);
        self.current_slot = Some(slot);
        self.contents
            .insert_leaf(slot, self.search_key.clone(), rid)?;
        if !self.contents.is_full()? {
            return Ok(None);
        }

        //  The page is full. If every key is the same, keep the first entry here and
        //  move the rest to an overflow block. Otherwise split near the middle without
        //  separating equal keys.
        let first_key = self.contents.get_data_value(0)?;
        let num_recs = self.contents.get_number_of_recs()?;
        let last_key = self.contents.get_data_value(num_recs - 1)?;
        if first_key == last_key {
            let new_block_id = self.contents.split(1, self.contents.get_flag()?)?;
            self.contents
                .set_flag(PageType::Leaf(Some(new_block_id.block_num)))?;
            debug!("leaf overflowed into block {}", new_block_id.block_num);
            return Ok(None);
        }

        let mut split_point = num_recs / 2;
        let mut split_key = self.contents.get_data_value(split_point)?;
        if split_key == first_key {
            while self.contents.get_data_value(split_point)? == first_key {
                split_point += 1;
            }
            split_key = self.contents.get_data_value(split_point)?;
        } else {
            while self.contents.get_data_value(split_point - 1)? == split_key {
                split_point -= 1;
            }
        }
        let new_block_id = self.contents.split(split_point, PageType::Leaf(None))?;
        debug!("leaf split at slot {split_point} into block {}", new_block_id.block_num);
        Ok(Some(DirEntry {
            dataval: split_key,
            block_num: new_block_id.block_num,
        }))
    }

    /// Follow the overflow chain if this page's entries continue there.
    /// Drained blocks left in the chain are skipped.
    fn try_overflow(&mut self) -> Result<bool> {
        if self.contents.get_number_of_recs()? == 0
            || self.contents.get_data_value(0)?.compare(&self.search_key)? != Ordering::Equal
        {
            return Ok(false);
        }
        let mut flag = self.contents.get_flag()?;
        while let PageType::Leaf(Some(overflow_block)) = flag {
            self.contents = BTreePage::new(
                Arc::clone(&self.txn),
                BlockId::new(&self.file_name(), overflow_block),
                self.layout.clone(),
            )?;
            if self.contents.get_number_of_recs()? > 0 {
                self.current_slot = Some(0);
                return Ok(true);
            }
            flag = self.contents.get_flag()?;
        }
        Ok(false)
    }
}

/// The meaning of the flag word of a page depends on the file it lives in:
/// a directory stores its level, a leaf stores its overflow block or -1.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum PageType {
    Directory(usize),
    Leaf(Option<usize>),
}

impl PageType {
    fn to_flag(self) -> i32 {
        match self {
            PageType::Directory(level) => level as i32,
            PageType::Leaf(None) => -1,
            PageType::Leaf(Some(block_num)) => block_num as i32,
        }
    }
}

/// The general format of a B-tree page
/// +--------------------+----------------------+----------------------+
/// | flag (4 bytes)     | record count (4B)    | record slots [...]   |
/// +--------------------+----------------------+----------------------+
///     ^ offset 0            ^ offset 4              ^ offset 8
///
/// Leaf slots hold (dataval, block, id), directory slots hold (dataval, block).
/// Slots are kept sorted by dataval and carry no used/empty flag.
struct BTreePage {
    txn: Arc<Transaction>,
    handle: BufferHandle,
    layout: Layout,
    is_leaf: bool,
}

impl BTreePage {
    const HEADER_BYTES: usize = 2 * Page::INT_BYTES;

    fn new(txn: Arc<Transaction>, block_id: BlockId, layout: Layout) -> Result<Self> {
        //  only leaf entries point at a record slot
        let is_leaf = layout.schema.has_field(IndexInfo::ID_FIELD);
        let handle = txn.pin_handle(&block_id)?;
        Ok(Self {
            txn,
            handle,
            layout,
            is_leaf,
        })
    }

    fn block_id(&self) -> &BlockId {
        self.handle.block_id()
    }

    /// The rightmost slot whose key is below the search key, None if there is none
    fn find_slot_before(&self, search_key: &Constant) -> Result<Option<usize>> {
        let num_recs = self.get_number_of_recs()?;
        let mut slot = 0;
        while slot < num_recs
            && self.get_data_value(slot)?.compare(search_key)? == Ordering::Less
        {
            slot += 1;
        }
        Ok(slot.checked_sub(1))
    }

    /// True when there is no room for another entry
    fn is_full(&self) -> Result<bool> {
        Ok(self.slot_pos(self.get_number_of_recs()? + 1) >= self.txn.block_size())
    }

    /// Move the entries from `slot` on into a newly appended page with the given flag
    fn split(&self, slot: usize, page_type: PageType) -> Result<BlockId> {
        let block_id = self.txn.append(&self.block_id().filename)?;
        let new_page = BTreePage::new(Arc::clone(&self.txn), block_id.clone(), self.layout.clone())?;
        new_page.format(page_type)?;
        let mut dest_slot = 0;
        while slot < self.get_number_of_recs()? {
            new_page.insert(dest_slot)?;
            for field in &self.layout.schema.fields {
                new_page.set_value(dest_slot, field, self.get_value(slot, field)?)?;
            }
            self.delete(slot)?;
            dest_slot += 1;
        }
        Ok(block_id)
    }

    /// Write the header and zero every slot. Only the header is logged.
    fn format(&self, page_type: PageType) -> Result<()> {
        self.txn
            .set_int(self.block_id(), 0, page_type.to_flag(), true)?;
        self.txn
            .set_int(self.block_id(), Page::INT_BYTES, 0, true)?;
        let mut pos = Self::HEADER_BYTES;
        while pos + self.layout.slot_size <= self.txn.block_size() {
            for field in &self.layout.schema.fields {
                let field_pos = pos + self.layout.offset(field)?;
                match self.layout.schema.field_type(field)? {
                    FieldType::Int => self.txn.set_int(self.block_id(), field_pos, 0, false)?,
                    FieldType::String => {
                        self.txn.set_string(self.block_id(), field_pos, "", false)?
                    }
                }
            }
            pos += self.layout.slot_size;
        }
        Ok(())
    }

    fn get_flag(&self) -> Result<PageType> {
        let flag = self.txn.get_int(self.block_id(), 0)?;
        if self.is_leaf {
            Ok(PageType::Leaf((flag >= 0).then_some(flag as usize)))
        } else if flag >= 0 {
            Ok(PageType::Directory(flag as usize))
        } else {
            Err(DbError::CorruptPage(format!(
                "directory page {} has level {flag}",
                self.block_id()
            )))
        }
    }

    fn set_flag(&self, page_type: PageType) -> Result<()> {
        self.txn
            .set_int(self.block_id(), 0, page_type.to_flag(), true)
    }

    fn level(&self) -> Result<usize> {
        match self.get_flag()? {
            PageType::Directory(level) => Ok(level),
            PageType::Leaf(_) => Err(DbError::CorruptPage(format!(
                "{} is a leaf, not a directory",
                self.block_id()
            ))),
        }
    }

    fn get_data_value(&self, slot: usize) -> Result<Constant> {
        self.get_value(slot, IndexInfo::DATA_FIELD)
    }

    fn get_child_block_num(&self, slot: usize) -> Result<usize> {
        Ok(self.get_int(slot, IndexInfo::BLOCK_NUM_FIELD)? as usize)
    }

    fn get_rid(&self, slot: usize) -> Result<RID> {
        let block_num = self.get_int(slot, IndexInfo::BLOCK_NUM_FIELD)? as usize;
        let slot_num = self.get_int(slot, IndexInfo::ID_FIELD)? as usize;
        Ok(RID::new(block_num, slot_num))
    }

    fn insert_dir(&self, slot: usize, value: Constant, block_num: usize) -> Result<()> {
        self.insert(slot)?;
        self.set_value(slot, IndexInfo::DATA_FIELD, value)?;
        self.set_int(slot, IndexInfo::BLOCK_NUM_FIELD, block_num as i32)
    }

    fn insert_leaf(&self, slot: usize, value: Constant, rid: RID) -> Result<()> {
        self.insert(slot)?;
        self.set_value(slot, IndexInfo::DATA_FIELD, value)?;
        self.set_int(slot, IndexInfo::BLOCK_NUM_FIELD, rid.block_num as i32)?;
        self.set_int(slot, IndexInfo::ID_FIELD, rid.slot as i32)
    }

    /// Open a gap at `slot` by shifting the following entries right
    fn insert(&self, slot: usize) -> Result<()> {
        let num_recs = self.get_number_of_recs()?;
        for i in (slot..num_recs).rev() {
            self.copy_record(i, i + 1)?;
        }
        self.set_number_of_recs(num_recs + 1)
    }

    /// Close the gap at `slot` by shifting the following entries left
    fn delete(&self, slot: usize) -> Result<()> {
        let num_recs = self.get_number_of_recs()?;
        for i in slot + 1..num_recs {
            self.copy_record(i, i - 1)?;
        }
        self.set_number_of_recs(num_recs.saturating_sub(1))
    }

    fn copy_record(&self, from: usize, to: usize) -> Result<()> {
        for field in &self.layout.schema.fields {
            self.set_value(to, field, self.get_value(from, field)?)?;
        }
        Ok(())
    }

    fn get_number_of_recs(&self) -> Result<usize> {
        Ok(self.txn.get_int(self.block_id(), Page::INT_BYTES)? as usize)
    }

    fn set_number_of_recs(&self, num: usize) -> Result<()> {
        self.txn
            .set_int(self.block_id(), Page::INT_BYTES, num as i32, true)
    }

    fn get_int(&self, slot: usize, field_name: &str) -> Result<i32> {
        self.txn
            .get_int(self.block_id(), self.field_pos(slot, field_name)?)
    }

    fn set_int(&self, slot: usize, field_name: &str, value: i32) -> Result<()> {
        self.txn
            .set_int(self.block_id(), self.field_pos(slot, field_name)?, value, true)
    }

    fn get_value(&self, slot: usize, field_name: &str) -> Result<Constant> {
        let pos = self.field_pos(slot, field_name)?;
        match self.layout.schema.field_type(field_name)? {
            FieldType::Int => Ok(Constant::Int(self.txn.get_int(self.block_id(), pos)?)),
            FieldType::String => Ok(Constant::String(
                self.txn.get_string(self.block_id(), pos)?,
            )),
        }
    }

    fn set_value(&self, slot: usize, field_name: &str, value: Constant) -> Result<()> {
        let pos = self.field_pos(slot, field_name)?;
        let expected = self.layout.schema.field_type(field_name)?;
        match (expected, value) {
            (FieldType::Int, Constant::Int(v)) => self.txn.set_int(self.block_id(), pos, v, true),
            (FieldType::String, Constant::String(v)) => {
                self.txn.set_string(self.block_id(), pos, &v, true)
            }
            (expected, value) => Err(DbError::TypeMismatch {
                expected: expected.name(),
                found: value.type_name(),
            }),
        }
    }

    fn field_pos(&self, slot: usize, field_name: &str) -> Result<usize> {
        Ok(self.slot_pos(slot) + self.layout.offset(field_name)?)
    }

    fn slot_pos(&self, slot: usize) -> usize {
        Self::HEADER_BYTES + slot * self.layout.slot_size
    }
}

impl std::fmt::Display for BTreePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== BTreePage {} ===", self.block_id())?;
        match self.get_flag() {
            Ok(flag) => writeln!(f, "Page Type: {flag:?}")?,
            Err(e) => writeln!(f, "Error getting flag: {e}")?,
        }
        let count = match self.get_number_of_recs() {
            Ok(count) => count,
            Err(e) => return writeln!(f, "Error getting record count: {e}"),
        };
        writeln!(f, "Record Count: {count}")?;
        for slot in 0..count {
            let key = self.get_data_value(slot);
            if self.is_leaf {
                if let (Ok(key), Ok(rid)) = (key, self.get_rid(slot)) {
                    writeln!(f, "Slot {slot}: Key={key}, RID={rid}")?;
                }
            } else if let (Ok(key), Ok(child)) = (key, self.get_child_block_num(slot)) {
                writeln!(f, "Slot {slot}: Key={key}, Child Block={child}")?;
            }
        }
        writeln!(f, "====================")
    }
}
