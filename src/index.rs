use std::sync::Arc;

use log::trace;

use crate::{
    error::{DbError, Result},
    metadata::IndexInfo,
    query::{Constant, Scan, UpdateScan},
    record::{Layout, TableScan, RID},
    transaction::Transaction,
};

/// A secondary index mapping field values to the records that hold them
pub trait Index {
    /// Position the index before the first entry with this key
    fn before_first(&mut self, search_key: &Constant) -> Result<()>;
    /// Move to the next entry with the key passed to `before_first`
    fn next(&mut self) -> Result<bool>;
    fn get_data_rid(&self) -> Result<RID>;
    fn insert(&mut self, data_val: &Constant, data_rid: &RID) -> Result<()>;
    fn delete(&mut self, data_val: &Constant, data_rid: &RID) -> Result<()>;
    fn close(&mut self);
}

/// Static hashing over a fixed number of buckets.
///
/// Bucket `b` of index `X` is an ordinary table named `X{b}` with the index layout.
/// The bucket is picked by a CRC-32 of the key, which is stable across processes.
pub struct HashIndex {
    txn: Arc<Transaction>,
    index_name: String,
    layout: Layout,
    search_key: Option<Constant>,
    table_scan: Option<TableScan>,
}

impl HashIndex {
    pub const NUM_BUCKETS: usize = 100;

    pub fn new(txn: Arc<Transaction>, index_name: &str, layout: Layout) -> Self {
        Self {
            txn,
            index_name: index_name.to_string(),
            layout,
            search_key: None,
            table_scan: None,
        }
    }

    /// Blocks read by one lookup: one bucket's share of the table
    pub fn search_cost(num_blocks: usize, _records_per_block: usize) -> usize {
        num_blocks / Self::NUM_BUCKETS
    }

    fn bucket(key: &Constant) -> usize {
        let hash = match key {
            Constant::Int(v) => crc32fast::hash(&v.to_be_bytes()),
            Constant::String(s) => crc32fast::hash(s.as_bytes()),
        };
        hash as usize % Self::NUM_BUCKETS
    }

    fn scan(&self) -> Result<&TableScan> {
        self.table_scan.as_ref().ok_or_else(|| {
            DbError::InvalidArgument(format!("index {} is not positioned", self.index_name))
        })
    }

    fn scan_mut(&mut self) -> Result<&mut TableScan> {
        let index_name = &self.index_name;
        self.table_scan.as_mut().ok_or_else(|| {
            DbError::InvalidArgument(format!("index {index_name} is not positioned"))
        })
    }
}

impl Index for HashIndex {
    fn before_first(&mut self, search_key: &Constant) -> Result<()> {
        self.close();
        let key_type = self.layout.schema.field_type(IndexInfo::DATA_FIELD)?;
        if search_key.field_type() != key_type {
            return Err(DbError::TypeMismatch {
                expected: key_type.name(),
                found: search_key.type_name(),
            });
        }
        let bucket_table = format!("{}{}", self.index_name, Self::bucket(search_key));
        trace!("index {} searching bucket {bucket_table}", self.index_name);
        self.table_scan = Some(TableScan::new(
            Arc::clone(&self.txn),
            &bucket_table,
            self.layout.clone(),
        )?);
        self.search_key = Some(search_key.clone());
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        let Some(search_key) = self.search_key.clone() else {
            return Ok(false);
        };
        let scan = self.scan_mut()?;
        while scan.next()? {
            if scan.get_val(IndexInfo::DATA_FIELD)? == search_key {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_data_rid(&self) -> Result<RID> {
        let scan = self.scan()?;
        let block_num = scan.get_int(IndexInfo::BLOCK_NUM_FIELD)?;
        let slot = scan.get_int(IndexInfo::ID_FIELD)?;
        Ok(RID::new(block_num as usize, slot as usize))
    }

    fn insert(&mut self, data_val: &Constant, data_rid: &RID) -> Result<()> {
        self.before_first(data_val)?;
        let scan = self.scan_mut()?;
        scan.insert()?;
        scan.set_int(IndexInfo::BLOCK_NUM_FIELD, data_rid.block_num as i32)?;
        scan.set_int(IndexInfo::ID_FIELD, data_rid.slot as i32)?;
        scan.set_val(IndexInfo::DATA_FIELD, data_val)
    }

    fn delete(&mut self, data_val: &Constant, data_rid: &RID) -> Result<()> {
        self.before_first(data_val)?;
        while self.next()? {
            if self.get_data_rid()? == *data_rid {
                return self.scan_mut()?.delete();
            }
        }
        Err(DbError::InvalidArgument(format!(
            "{data_rid} is not in index {} under {data_val}",
            self.index_name
        )))
    }

    fn close(&mut self) {
        self.table_scan = None;
    }
}

#[cfg(test)]
mod hash_index_tests {
    use std::sync::Arc;

    use super::{HashIndex, Index};
    use crate::{
        error::DbError,
        metadata::IndexInfo,
        query::Constant,
        record::{Layout, Schema, RID},
        SimpleDB,
    };

    fn layout() -> Layout {
        let mut schema = Schema::new();
        schema.add_int_field(IndexInfo::BLOCK_NUM_FIELD).unwrap();
        schema.add_int_field(IndexInfo::ID_FIELD).unwrap();
        schema.add_string_field(IndexInfo::DATA_FIELD, 10).unwrap();
        Layout::new(schema)
    }

    #[test]
    fn test_insert_search_and_delete() {
        let (db, _dir) = SimpleDB::new_for_test(400, 8);
        let tx = db.new_tx().unwrap();
        let mut index = HashIndex::new(Arc::clone(&tx), "nameidx", layout());

        let alice = Constant::from("alice");
        let bob = Constant::from("bob");
        index.insert(&alice, &RID::new(0, 1)).unwrap();
        index.insert(&bob, &RID::new(0, 2)).unwrap();
        index.insert(&alice, &RID::new(3, 4)).unwrap();

        index.before_first(&alice).unwrap();
        let mut found = Vec::new();
        while index.next().unwrap() {
            found.push(index.get_data_rid().unwrap());
        }
        found.sort();
        assert_eq!(found, vec![RID::new(0, 1), RID::new(3, 4)]);

        index.delete(&alice, &RID::new(0, 1)).unwrap();
        index.before_first(&alice).unwrap();
        assert!(index.next().unwrap());
        assert_eq!(index.get_data_rid().unwrap(), RID::new(3, 4));
        assert!(!index.next().unwrap());

        assert!(matches!(
            index.delete(&bob, &RID::new(9, 9)),
            Err(DbError::InvalidArgument(_))
        ));
        index.close();
        tx.commit().unwrap();
    }

    #[test]
    fn test_search_key_of_other_type_is_rejected() {
        let (db, _dir) = SimpleDB::new_for_test(400, 8);
        let tx = db.new_tx().unwrap();
        let mut index = HashIndex::new(Arc::clone(&tx), "nameidx", layout());
        index.insert(&Constant::from("alice"), &RID::new(0, 1)).unwrap();

        assert!(matches!(
            index.before_first(&Constant::Int(7)),
            Err(DbError::TypeMismatch { expected: "varchar", found: "int" })
        ));
        assert!(matches!(
            index.insert(&Constant::Int(7), &RID::new(0, 2)),
            Err(DbError::TypeMismatch { .. })
        ));
        index.close();
        tx.commit().unwrap();
    }

    #[test]
    fn test_bucket_is_stable() {
        let key = Constant::Int(42);
        assert_eq!(HashIndex::bucket(&key), HashIndex::bucket(&Constant::Int(42)));
        assert!(HashIndex::bucket(&key) < HashIndex::NUM_BUCKETS);
        assert_eq!(HashIndex::search_cost(1000, 10), 10);
    }
}
