use std::sync::Arc;

use log::debug;

use crate::buffer::buffer_manager::BufferManager;
use crate::errors::{DbError, Result};
use crate::record::record_file::{RecordFile, RecordManager};
use crate::record::scan::RecordScan;
use crate::record::Rid;
use crate::storage::codec::{Deserializer, Serializer, RID_SIZE};
use crate::storage::disk_manager::DiskManager;

/// Manages the index files of a database. Entries are fixed-size
/// `key bytes || rid` records stored through the record layer; anything
/// smarter than a linear probe (ordering, tree structure) is left to a
/// dedicated access method.
pub struct IndexManager {
    record_manager: RecordManager,
}

impl IndexManager {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            record_manager: RecordManager::new(disk_manager, buffer_manager),
        }
    }

    /// Deterministic index file name: the table name, one `_`-joined
    /// segment per indexed column, and the `.idx` suffix.
    pub fn index_name(table: &str, col_names: &[String]) -> String {
        let mut name = String::from(table);
        for col in col_names {
            name.push('_');
            name.push_str(col);
        }
        name.push_str(".idx");
        name
    }

    /// Creates an index file for composite keys of `key_len` bytes.
    pub fn create_index(&self, table: &str, col_names: &[String], key_len: usize) -> Result<()> {
        let name = Self::index_name(table, col_names);
        self.record_manager.create_file(&name, key_len + RID_SIZE)?;
        debug!("created index {}", name);
        Ok(())
    }

    pub fn open_index(&self, table: &str, col_names: &[String]) -> Result<IndexHandle> {
        let name = Self::index_name(table, col_names);
        let file = self.record_manager.open_file(&name)?;
        let record_size = file.record_size();
        if record_size < RID_SIZE {
            return Err(DbError::Internal(format!(
                "index file {} has entries of {} bytes, smaller than a rid",
                name, record_size
            )));
        }
        Ok(IndexHandle {
            file,
            key_len: record_size - RID_SIZE,
        })
    }

    pub fn close_index(&self, handle: IndexHandle) -> Result<()> {
        self.record_manager.close_file(handle.file)
    }

    pub fn destroy_index(&self, table: &str, col_names: &[String]) -> Result<()> {
        self.record_manager
            .destroy_file(&Self::index_name(table, col_names))
    }
}

/// An open index file mapping composite keys to rids.
pub struct IndexHandle {
    file: RecordFile,
    key_len: usize,
}

impl IndexHandle {
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn insert_entry(&self, key: &[u8], rid: Rid) -> Result<()> {
        if key.len() != self.key_len {
            return Err(DbError::Internal(format!(
                "index key of {} bytes does not match key length {}",
                key.len(),
                self.key_len
            )));
        }
        let mut entry = vec![0u8; self.key_len + RID_SIZE];
        let mut serializer = Serializer::new(&mut entry);
        serializer.copy_bytes(key);
        serializer.serialize_rid(rid);
        self.file.insert_record(&entry)?;
        Ok(())
    }

    /// Every rid stored under `key`, in entry-insertion order.
    pub fn lookup(&self, key: &[u8]) -> Result<Vec<Rid>> {
        let mut rids = vec![];
        let mut scan = RecordScan::new(&self.file)?;
        while !scan.is_end() {
            let entry = self.file.get_record(scan.rid())?;
            if &entry.data()[..self.key_len] == key {
                let mut deserializer = Deserializer::new(&entry.data()[self.key_len..]);
                rids.push(deserializer.deserialize_rid());
            }
            scan.next()?;
        }
        Ok(rids)
    }
}
