use std::{collections::HashMap, sync::Arc};

use log::{debug, info};
use parking_lot::Mutex;

use crate::{
    btree::BTreeIndex,
    config::IndexKind,
    error::{DbError, Result},
    index::{HashIndex, Index},
    query::{Scan, UpdateScan},
    record::{FieldType, Layout, Schema, TableScan},
    transaction::Transaction,
};

const TABLE_CATALOG: &str = "table_catalog";
const FIELD_CATALOG: &str = "field_catalog";
const VIEW_CATALOG: &str = "view_catalog";
const INDEX_CATALOG: &str = "index_catalog";

const TABLE_NAME_FIELD: &str = "table_name";
const SLOT_SIZE_FIELD: &str = "slot_size";
const FIELD_NAME_FIELD: &str = "field_name";
const TYPE_FIELD: &str = "type";
const LENGTH_FIELD: &str = "length";
const OFFSET_FIELD: &str = "offset";
const VIEW_NAME_FIELD: &str = "view_name";
const VIEW_DEF_FIELD: &str = "view_def";
const INDEX_NAME_FIELD: &str = "index_name";

/// Longest view definition the view catalog can hold
pub const MAX_VIEW_DEF: usize = 100;

/// Stores table schemas in two catalog tables.
///
/// `table_catalog` has one row per table with its slot size, `field_catalog` one
/// row per field with its type, length and offset. Both catalogs describe
/// themselves once `create_catalog` has run.
pub struct TableManager {
    table_catalog_layout: Layout,
    field_catalog_layout: Layout,
}

impl TableManager {
    pub fn new() -> Result<Self> {
        let mut table_catalog_schema = Schema::new();
        table_catalog_schema.add_string_field(TABLE_NAME_FIELD, Schema::MAX_NAME_LENGTH)?;
        table_catalog_schema.add_int_field(SLOT_SIZE_FIELD)?;

        let mut field_catalog_schema = Schema::new();
        field_catalog_schema.add_string_field(TABLE_NAME_FIELD, Schema::MAX_NAME_LENGTH)?;
        field_catalog_schema.add_string_field(FIELD_NAME_FIELD, Schema::MAX_NAME_LENGTH)?;
        field_catalog_schema.add_int_field(TYPE_FIELD)?;
        field_catalog_schema.add_int_field(LENGTH_FIELD)?;
        field_catalog_schema.add_int_field(OFFSET_FIELD)?;

        Ok(Self {
            table_catalog_layout: Layout::new(table_catalog_schema),
            field_catalog_layout: Layout::new(field_catalog_schema),
        })
    }

    /// Register the two catalog tables in themselves
    pub fn create_catalog(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.create_table(TABLE_CATALOG, &self.table_catalog_layout.schema, txn)?;
        self.create_table(FIELD_CATALOG, &self.field_catalog_layout.schema, txn)
    }

    pub fn create_table(&self, table_name: &str, schema: &Schema, txn: &Arc<Transaction>) -> Result<()> {
        if self.table_exists(table_name, txn)? {
            return Err(DbError::TableExists(table_name.to_string()));
        }
        let layout = Layout::new(schema.clone());

        let mut table_catalog = self.table_catalog(txn)?;
        table_catalog.insert()?;
        table_catalog.set_string(TABLE_NAME_FIELD, table_name)?;
        table_catalog.set_int(SLOT_SIZE_FIELD, layout.slot_size as i32)?;
        table_catalog.close();

        let mut field_catalog = self.field_catalog(txn)?;
        for field_name in &schema.fields {
            let info = schema.field_info(field_name)?;
            field_catalog.insert()?;
            field_catalog.set_string(TABLE_NAME_FIELD, table_name)?;
            field_catalog.set_string(FIELD_NAME_FIELD, field_name)?;
            field_catalog.set_int(TYPE_FIELD, info.field_type.into())?;
            field_catalog.set_int(LENGTH_FIELD, info.length as i32)?;
            field_catalog.set_int(OFFSET_FIELD, layout.offset(field_name)? as i32)?;
        }
        field_catalog.close();
        debug!("created table {table_name} with slot size {}", layout.slot_size);
        Ok(())
    }

    /// Rebuild a table's layout from the catalog, offsets included
    pub fn get_layout(&self, table_name: &str, txn: &Arc<Transaction>) -> Result<Layout> {
        let mut slot_size = None;
        let mut table_catalog = self.table_catalog(txn)?;
        while table_catalog.next()? {
            if table_catalog.get_string(TABLE_NAME_FIELD)? == table_name {
                slot_size = Some(table_catalog.get_int(SLOT_SIZE_FIELD)? as usize);
                break;
            }
        }
        table_catalog.close();
        let slot_size = slot_size.ok_or_else(|| DbError::TableNotFound(table_name.to_string()))?;

        let mut schema = Schema::new();
        let mut offsets = HashMap::new();
        let mut field_catalog = self.field_catalog(txn)?;
        while field_catalog.next()? {
            if field_catalog.get_string(TABLE_NAME_FIELD)? != table_name {
                continue;
            }
            let field_name = field_catalog.get_string(FIELD_NAME_FIELD)?;
            let field_type = FieldType::try_from(field_catalog.get_int(TYPE_FIELD)?)?;
            let length = field_catalog.get_int(LENGTH_FIELD)? as usize;
            let offset = field_catalog.get_int(OFFSET_FIELD)? as usize;
            schema.add_field(&field_name, field_type, length)?;
            offsets.insert(field_name, offset);
        }
        field_catalog.close();
        Ok(Layout::with_offsets(schema, offsets, slot_size))
    }

    pub fn table_exists(&self, table_name: &str, txn: &Arc<Transaction>) -> Result<bool> {
        Ok(self
            .get_table_names(txn)?
            .iter()
            .any(|name| name == table_name))
    }

    /// Every table in the catalog, catalog tables included, in creation order
    pub fn get_table_names(&self, txn: &Arc<Transaction>) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut table_catalog = self.table_catalog(txn)?;
        while table_catalog.next()? {
            names.push(table_catalog.get_string(TABLE_NAME_FIELD)?);
        }
        table_catalog.close();
        Ok(names)
    }

    fn table_catalog(&self, txn: &Arc<Transaction>) -> Result<TableScan> {
        TableScan::new(Arc::clone(txn), TABLE_CATALOG, self.table_catalog_layout.clone())
    }

    fn field_catalog(&self, txn: &Arc<Transaction>) -> Result<TableScan> {
        TableScan::new(Arc::clone(txn), FIELD_CATALOG, self.field_catalog_layout.clone())
    }
}

/// View definitions kept as text in `view_catalog`
pub struct ViewManager;

impl ViewManager {
    pub fn create_catalog(&self, table_manager: &TableManager, txn: &Arc<Transaction>) -> Result<()> {
        let mut schema = Schema::new();
        schema.add_string_field(VIEW_NAME_FIELD, Schema::MAX_NAME_LENGTH)?;
        schema.add_string_field(VIEW_DEF_FIELD, MAX_VIEW_DEF)?;
        table_manager.create_table(VIEW_CATALOG, &schema, txn)
    }

    pub fn create_view(
        &self,
        view_name: &str,
        view_def: &str,
        table_manager: &TableManager,
        txn: &Arc<Transaction>,
    ) -> Result<()> {
        let layout = table_manager.get_layout(VIEW_CATALOG, txn)?;
        let mut view_catalog = TableScan::new(Arc::clone(txn), VIEW_CATALOG, layout)?;
        view_catalog.insert()?;
        view_catalog.set_string(VIEW_NAME_FIELD, view_name)?;
        view_catalog.set_string(VIEW_DEF_FIELD, view_def)?;
        view_catalog.close();
        Ok(())
    }

    pub fn get_view_def(
        &self,
        view_name: &str,
        table_manager: &TableManager,
        txn: &Arc<Transaction>,
    ) -> Result<Option<String>> {
        let layout = table_manager.get_layout(VIEW_CATALOG, txn)?;
        let mut view_catalog = TableScan::new(Arc::clone(txn), VIEW_CATALOG, layout)?;
        let mut view_def = None;
        while view_catalog.next()? {
            if view_catalog.get_string(VIEW_NAME_FIELD)? == view_name {
                view_def = Some(view_catalog.get_string(VIEW_DEF_FIELD)?);
                break;
            }
        }
        view_catalog.close();
        Ok(view_def)
    }
}

/// Size estimates for one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    pub num_blocks: usize,
    pub num_records: usize,
}

impl StatInfo {
    pub fn new(num_blocks: usize, num_records: usize) -> Self {
        Self {
            num_blocks,
            num_records,
        }
    }

    pub fn blocks_accessed(&self) -> usize {
        self.num_blocks
    }

    pub fn records_output(&self) -> usize {
        self.num_records
    }

    /// A rough guess: a third of the records hold a value nobody else holds
    pub fn distinct_values(&self, _field_name: &str) -> usize {
        1 + self.num_records / 3
    }
}

struct StatState {
    table_stats: HashMap<String, StatInfo>,
    num_calls: usize,
    initialized: bool,
}

/// Caches per-table statistics and recomputes all of them every
/// `refresh_threshold` calls
pub struct StatManager {
    refresh_threshold: usize,
    state: Mutex<StatState>,
}

impl StatManager {
    pub fn new(refresh_threshold: usize) -> Self {
        Self {
            refresh_threshold,
            state: Mutex::new(StatState {
                table_stats: HashMap::new(),
                num_calls: 0,
                initialized: false,
            }),
        }
    }

    /// Statistics for one table. The cache mutex only guards the bookkeeping;
    /// table scans run without it so a scan waiting on a lock stalls no other caller.
    pub fn get_stat_info(
        &self,
        table_name: &str,
        layout: &Layout,
        table_manager: &TableManager,
        txn: &Arc<Transaction>,
    ) -> Result<StatInfo> {
        let (refresh, cached) = {
            let mut state = self.state.lock();
            state.num_calls += 1;
            let refresh = !state.initialized || state.num_calls > self.refresh_threshold;
            if refresh {
                state.num_calls = 0;
            }
            (refresh, state.table_stats.get(table_name).copied())
        };

        if refresh {
            let table_stats = Self::refresh_statistics(table_manager, txn)?;
            let refreshed = table_stats.get(table_name).copied();
            {
                let mut state = self.state.lock();
                state.table_stats = table_stats;
                state.initialized = true;
            }
            if let Some(stat_info) = refreshed {
                return Ok(stat_info);
            }
        } else if let Some(stat_info) = cached {
            return Ok(stat_info);
        }

        let stat_info = Self::calc_table_stats(table_name, layout, txn)?;
        self.state
            .lock()
            .table_stats
            .insert(table_name.to_string(), stat_info);
        Ok(stat_info)
    }

    fn refresh_statistics(
        table_manager: &TableManager,
        txn: &Arc<Transaction>,
    ) -> Result<HashMap<String, StatInfo>> {
        let mut table_stats = HashMap::new();
        for table_name in table_manager.get_table_names(txn)? {
            let layout = table_manager.get_layout(&table_name, txn)?;
            let stat_info = Self::calc_table_stats(&table_name, &layout, txn)?;
            table_stats.insert(table_name, stat_info);
        }
        info!("refreshed statistics for {} tables", table_stats.len());
        Ok(table_stats)
    }

    /// Full scan counting records and the highest block that holds one
    fn calc_table_stats(table_name: &str, layout: &Layout, txn: &Arc<Transaction>) -> Result<StatInfo> {
        let mut num_records = 0;
        let mut num_blocks = 0;
        let mut scan = TableScan::new(Arc::clone(txn), table_name, layout.clone())?;
        while scan.next()? {
            num_records += 1;
            num_blocks = scan.get_rid()?.block_num + 1;
        }
        scan.close();
        Ok(StatInfo::new(num_blocks, num_records))
    }
}

/// What the planner needs to know about one index
pub struct IndexInfo {
    index_name: String,
    field_name: String,
    txn: Arc<Transaction>,
    layout: Layout,
    stat_info: StatInfo,
    index_kind: IndexKind,
}

impl IndexInfo {
    pub const BLOCK_NUM_FIELD: &'static str = "block";
    pub const ID_FIELD: &'static str = "id";
    pub const DATA_FIELD: &'static str = "dataval";

    pub fn new(
        index_name: &str,
        field_name: &str,
        table_schema: &Schema,
        txn: Arc<Transaction>,
        stat_info: StatInfo,
        index_kind: IndexKind,
    ) -> Result<Self> {
        Ok(Self {
            index_name: index_name.to_string(),
            field_name: field_name.to_string(),
            layout: Self::create_index_layout(table_schema, field_name)?,
            txn,
            stat_info,
            index_kind,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn open(&self) -> Result<Box<dyn Index>> {
        match self.index_kind {
            IndexKind::BTree => Ok(Box::new(BTreeIndex::new(
                Arc::clone(&self.txn),
                &self.index_name,
                self.layout.clone(),
            )?)),
            IndexKind::Hash => Ok(Box::new(HashIndex::new(
                Arc::clone(&self.txn),
                &self.index_name,
                self.layout.clone(),
            ))),
        }
    }

    /// Estimated blocks read to find the records for one key
    pub fn blocks_accessed(&self) -> usize {
        let records_per_block = (self.txn.block_size() / self.layout.slot_size).max(1);
        let num_blocks = self.stat_info.num_records / records_per_block;
        match self.index_kind {
            IndexKind::BTree => BTreeIndex::search_cost(num_blocks, records_per_block),
            IndexKind::Hash => HashIndex::search_cost(num_blocks, records_per_block),
        }
    }

    /// Estimated records that share one key
    pub fn records_output(&self) -> usize {
        self.stat_info.num_records / self.stat_info.distinct_values(&self.field_name)
    }

    pub fn distinct_values(&self, field_name: &str) -> usize {
        if self.field_name == field_name {
            1
        } else {
            self.stat_info.distinct_values(field_name)
        }
    }

    /// Index records are (block, id, dataval) where dataval has the type of the
    /// indexed field
    fn create_index_layout(table_schema: &Schema, field_name: &str) -> Result<Layout> {
        let mut schema = Schema::new();
        schema.add_int_field(Self::BLOCK_NUM_FIELD)?;
        schema.add_int_field(Self::ID_FIELD)?;
        match table_schema.field_type(field_name)? {
            FieldType::Int => schema.add_int_field(Self::DATA_FIELD)?,
            FieldType::String => {
                schema.add_string_field(Self::DATA_FIELD, table_schema.length(field_name)?)?
            }
        }
        Ok(Layout::new(schema))
    }
}

/// Index definitions kept in `index_catalog`
pub struct IndexManager {
    index_kind: IndexKind,
}

impl IndexManager {
    pub fn new(index_kind: IndexKind) -> Self {
        Self { index_kind }
    }

    pub fn create_catalog(&self, table_manager: &TableManager, txn: &Arc<Transaction>) -> Result<()> {
        let mut schema = Schema::new();
        schema.add_string_field(INDEX_NAME_FIELD, Schema::MAX_NAME_LENGTH)?;
        schema.add_string_field(TABLE_NAME_FIELD, Schema::MAX_NAME_LENGTH)?;
        schema.add_string_field(FIELD_NAME_FIELD, Schema::MAX_NAME_LENGTH)?;
        table_manager.create_table(INDEX_CATALOG, &schema, txn)
    }

    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        field_name: &str,
        table_manager: &TableManager,
        txn: &Arc<Transaction>,
    ) -> Result<()> {
        let table_layout = table_manager.get_layout(table_name, txn)?;
        if !table_layout.schema.has_field(field_name) {
            return Err(DbError::FieldNotFound(format!("{table_name}.{field_name}")));
        }
        let layout = table_manager.get_layout(INDEX_CATALOG, txn)?;
        let mut index_catalog = TableScan::new(Arc::clone(txn), INDEX_CATALOG, layout)?;
        index_catalog.insert()?;
        index_catalog.set_string(INDEX_NAME_FIELD, index_name)?;
        index_catalog.set_string(TABLE_NAME_FIELD, table_name)?;
        index_catalog.set_string(FIELD_NAME_FIELD, field_name)?;
        index_catalog.close();
        debug!("created {:?} index {index_name} on {table_name}.{field_name}", self.index_kind);
        Ok(())
    }

    /// The indexes of a table keyed by the field they index
    pub fn get_index_info(
        &self,
        table_name: &str,
        table_manager: &TableManager,
        stat_manager: &StatManager,
        txn: &Arc<Transaction>,
    ) -> Result<HashMap<String, IndexInfo>> {
        let layout = table_manager.get_layout(INDEX_CATALOG, txn)?;
        let mut index_catalog = TableScan::new(Arc::clone(txn), INDEX_CATALOG, layout)?;
        let mut entries = Vec::new();
        while index_catalog.next()? {
            if index_catalog.get_string(TABLE_NAME_FIELD)? == table_name {
                entries.push((
                    index_catalog.get_string(INDEX_NAME_FIELD)?,
                    index_catalog.get_string(FIELD_NAME_FIELD)?,
                ));
            }
        }
        index_catalog.close();

        let mut result = HashMap::new();
        if entries.is_empty() {
            return Ok(result);
        }
        let table_layout = table_manager.get_layout(table_name, txn)?;
        let stat_info = stat_manager.get_stat_info(table_name, &table_layout, table_manager, txn)?;
        for (index_name, field_name) in entries {
            let index_info = IndexInfo::new(
                &index_name,
                &field_name,
                &table_layout.schema,
                Arc::clone(txn),
                stat_info,
                self.index_kind,
            )?;
            result.insert(field_name, index_info);
        }
        Ok(result)
    }
}

/// One entry point for every catalog
pub struct MetadataManager {
    table_manager: TableManager,
    view_manager: ViewManager,
    stat_manager: StatManager,
    index_manager: IndexManager,
}

impl MetadataManager {
    pub fn new(stat_refresh_threshold: usize, index_kind: IndexKind) -> Result<Self> {
        Ok(Self {
            table_manager: TableManager::new()?,
            view_manager: ViewManager,
            stat_manager: StatManager::new(stat_refresh_threshold),
            index_manager: IndexManager::new(index_kind),
        })
    }

    /// Create every catalog table. Runs once, when the database directory is new.
    pub fn create_catalog(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.table_manager.create_catalog(txn)?;
        self.view_manager.create_catalog(&self.table_manager, txn)?;
        self.index_manager.create_catalog(&self.table_manager, txn)
    }

    pub fn create_table(&self, table_name: &str, schema: &Schema, txn: &Arc<Transaction>) -> Result<()> {
        self.table_manager.create_table(table_name, schema, txn)
    }

    pub fn get_layout(&self, table_name: &str, txn: &Arc<Transaction>) -> Result<Layout> {
        self.table_manager.get_layout(table_name, txn)
    }

    pub fn table_exists(&self, table_name: &str, txn: &Arc<Transaction>) -> Result<bool> {
        self.table_manager.table_exists(table_name, txn)
    }

    pub fn get_table_names(&self, txn: &Arc<Transaction>) -> Result<Vec<String>> {
        self.table_manager.get_table_names(txn)
    }

    pub fn create_view(&self, view_name: &str, view_def: &str, txn: &Arc<Transaction>) -> Result<()> {
        self.view_manager
            .create_view(view_name, view_def, &self.table_manager, txn)
    }

    pub fn get_view_def(&self, view_name: &str, txn: &Arc<Transaction>) -> Result<Option<String>> {
        self.view_manager
            .get_view_def(view_name, &self.table_manager, txn)
    }

    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        field_name: &str,
        txn: &Arc<Transaction>,
    ) -> Result<()> {
        self.index_manager
            .create_index(index_name, table_name, field_name, &self.table_manager, txn)
    }

    pub fn get_index_info(&self, table_name: &str, txn: &Arc<Transaction>) -> Result<HashMap<String, IndexInfo>> {
        self.index_manager
            .get_index_info(table_name, &self.table_manager, &self.stat_manager, txn)
    }

    pub fn get_stat_info(&self, table_name: &str, layout: &Layout, txn: &Arc<Transaction>) -> Result<StatInfo> {
        self.stat_manager
            .get_stat_info(table_name, layout, &self.table_manager, txn)
    }
}

#[cfg(test)]
mod metadata_tests {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use crate::{
        config::IndexKind,
        error::DbError,
        query::{Constant, Scan, UpdateScan},
        record::{FieldType, Layout, Schema, TableScan},
        transaction::Transaction,
        SimpleDB,
    };

    fn people_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_int_field("id").unwrap();
        schema.add_string_field("name", 9).unwrap();
        schema
    }

    fn insert_people(tx: &Arc<Transaction>, layout: &Layout, range: std::ops::Range<i32>) {
        let mut scan = TableScan::new(Arc::clone(tx), "people", layout.clone()).unwrap();
        for i in range {
            scan.insert().unwrap();
            scan.set_int("id", i).unwrap();
            scan.set_string("name", &format!("p{i}")).unwrap();
        }
        scan.close();
    }

    #[test]
    fn test_table_layout_round_trips_through_catalog() {
        let (db, _dir) = SimpleDB::new_for_test(400, 8);
        let mdm = db.metadata_manager();
        let tx = db.new_tx().unwrap();
        let schema = people_schema();
        mdm.create_table("people", &schema, &tx).unwrap();

        let layout = mdm.get_layout("people", &tx).unwrap();
        assert_eq!(layout, Layout::new(schema));
        assert_eq!(layout.slot_size, 21);
        assert_eq!(layout.schema.field_type("name").unwrap(), FieldType::String);
        assert_eq!(layout.schema.length("name").unwrap(), 9);
        assert_eq!(layout.offset("id").unwrap(), 4);

        assert!(mdm.table_exists("people", &tx).unwrap());
        assert!(!mdm.table_exists("ghosts", &tx).unwrap());
        assert!(matches!(
            mdm.get_layout("ghosts", &tx),
            Err(DbError::TableNotFound(_))
        ));
        assert!(matches!(
            mdm.create_table("people", &people_schema(), &tx),
            Err(DbError::TableExists(_))
        ));
        tx.commit().unwrap();
    }

    #[test]
    fn test_catalog_describes_itself() {
        let (db, _dir) = SimpleDB::new_for_test(400, 8);
        let mdm = db.metadata_manager();
        let tx = db.new_tx().unwrap();
        let layout = mdm.get_layout("table_catalog", &tx).unwrap();
        assert_eq!(layout.schema.fields, vec!["table_name", "slot_size"]);
        let layout = mdm.get_layout("view_catalog", &tx).unwrap();
        assert_eq!(layout.schema.length("view_def").unwrap(), super::MAX_VIEW_DEF);
        tx.commit().unwrap();
    }

    #[test]
    fn test_views() {
        let (db, _dir) = SimpleDB::new_for_test(400, 8);
        let mdm = db.metadata_manager();
        let tx = db.new_tx().unwrap();
        let def = "select name from people where id = 3";
        mdm.create_view("names", def, &tx).unwrap();
        assert_eq!(mdm.get_view_def("names", &tx).unwrap().as_deref(), Some(def));
        assert_eq!(mdm.get_view_def("missing", &tx).unwrap(), None);

        let too_long = "x".repeat(super::MAX_VIEW_DEF + 1);
        assert!(matches!(
            mdm.create_view("long", &too_long, &tx),
            Err(DbError::VarcharOverflow { .. })
        ));
        tx.commit().unwrap();
    }

    #[test]
    fn test_stat_info_refreshes_after_threshold() {
        let (db, _dir) = SimpleDB::new_for_test_with_config(|c| c.with_stat_refresh_threshold(3));
        let mdm = db.metadata_manager();
        let tx = db.new_tx().unwrap();
        mdm.create_table("people", &people_schema(), &tx).unwrap();
        let layout = mdm.get_layout("people", &tx).unwrap();
        insert_people(&tx, &layout, 0..30);

        let stats = mdm.get_stat_info("people", &layout, &tx).unwrap();
        assert_eq!(stats.num_records, 30);
        //  400 byte blocks hold 19 slots of 21 bytes
        assert_eq!(stats.num_blocks, 2);
        assert_eq!(stats.distinct_values("id"), 11);

        insert_people(&tx, &layout, 30..45);
        for _ in 0..3 {
            let cached = mdm.get_stat_info("people", &layout, &tx).unwrap();
            assert_eq!(cached.num_records, 30);
        }
        let refreshed = mdm.get_stat_info("people", &layout, &tx).unwrap();
        assert_eq!(refreshed.num_records, 45);
        assert_eq!(refreshed.blocks_accessed(), 3);
        tx.commit().unwrap();
    }

    #[test]
    fn test_cached_stats_do_not_wait_on_a_blocked_refresh() {
        let (db, _dir) = SimpleDB::new_for_test_with_config(|c| {
            c.with_stat_refresh_threshold(1)
                .with_lock_timeout(Duration::from_millis(1000))
        });
        let mdm = db.metadata_manager();
        let setup = db.new_tx().unwrap();
        mdm.create_table("people", &people_schema(), &setup).unwrap();
        let layout = mdm.get_layout("people", &setup).unwrap();
        insert_people(&setup, &layout, 0..5);
        let mut busy_schema = Schema::new();
        busy_schema.add_int_field("n").unwrap();
        mdm.create_table("busy", &busy_schema, &setup).unwrap();
        let busy_layout = mdm.get_layout("busy", &setup).unwrap();
        let mut scan = TableScan::new(Arc::clone(&setup), "busy", busy_layout.clone()).unwrap();
        scan.insert().unwrap();
        scan.set_int("n", 1).unwrap();
        scan.close();
        assert_eq!(mdm.get_stat_info("people", &layout, &setup).unwrap().num_records, 5);
        setup.commit().unwrap();

        //  hold an exclusive lock on the only block of "busy"
        let writer = db.new_tx().unwrap();
        let mut scan = TableScan::new(Arc::clone(&writer), "busy", busy_layout).unwrap();
        assert!(scan.next().unwrap());
        scan.set_int("n", 2).unwrap();
        scan.close();

        let reader = db.new_tx().unwrap();
        assert_eq!(mdm.get_stat_info("people", &layout, &reader).unwrap().num_records, 5);
        reader.commit().unwrap();

        //  this call crosses the threshold and its refresh waits on the lock
        let refresher = {
            let mdm = Arc::clone(&mdm);
            let layout = layout.clone();
            let txn = db.new_tx().unwrap();
            thread::spawn(move || {
                let result = mdm.get_stat_info("people", &layout, &txn);
                txn.rollback().unwrap();
                result
            })
        };
        thread::sleep(Duration::from_millis(200));

        let reader = db.new_tx().unwrap();
        let started = Instant::now();
        let cached = mdm.get_stat_info("people", &layout, &reader).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(cached.num_records, 5);
        reader.commit().unwrap();

        assert!(matches!(
            refresher.join().unwrap(),
            Err(DbError::LockTimeout(_))
        ));
        writer.rollback().unwrap();
    }

    #[test]
    fn test_index_info_opens_working_index() {
        for kind in [IndexKind::BTree, IndexKind::Hash] {
            let (db, _dir) = SimpleDB::new_for_test_with_config(|c| c.with_index_kind(kind));
            let mdm = db.metadata_manager();
            let tx = db.new_tx().unwrap();
            mdm.create_table("people", &people_schema(), &tx).unwrap();
            let layout = mdm.get_layout("people", &tx).unwrap();
            insert_people(&tx, &layout, 0..12);

            assert!(matches!(
                mdm.create_index("bad", "people", "age", &tx),
                Err(DbError::FieldNotFound(_))
            ));
            mdm.create_index("nameidx", "people", "name", &tx).unwrap();
            assert!(mdm.get_index_info("ghosts", &tx).unwrap().is_empty());

            let infos = mdm.get_index_info("people", &tx).unwrap();
            let info = &infos["name"];
            assert_eq!(info.index_name(), "nameidx");
            assert_eq!(info.layout().schema.length("dataval").unwrap(), 9);
            assert_eq!(info.distinct_values("name"), 1);
            assert_eq!(info.distinct_values("id"), 5);
            assert_eq!(info.records_output(), 2);
            assert!(info.blocks_accessed() <= 1);

            let mut scan = TableScan::new(Arc::clone(&tx), "people", layout.clone()).unwrap();
            let mut index = info.open().unwrap();
            while scan.next().unwrap() {
                index
                    .insert(&scan.get_val("name").unwrap(), &scan.get_rid().unwrap())
                    .unwrap();
            }
            index.before_first(&Constant::from("p7")).unwrap();
            assert!(index.next().unwrap());
            scan.move_to_rid(index.get_data_rid().unwrap()).unwrap();
            assert_eq!(scan.get_int("id").unwrap(), 7);
            assert!(!index.next().unwrap());
            index.close();
            scan.close();
            tx.commit().unwrap();
        }
    }
}
