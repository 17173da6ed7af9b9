use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::buffer::buffer_manager::BufferManager;
use crate::catalog::meta::{ColMeta, ColType, DbMeta, IndexMeta, TabMeta};
use crate::common::{DB_META_NAME, LOG_FILE_NAME, OUTPUT_FILE_NAME};
use crate::errors::{DbError, Result};
use crate::index::{IndexHandle, IndexManager};
use crate::printer::Printer;
use crate::record::record_file::{RecordFile, RecordManager};
use crate::record::scan::RecordScan;
use crate::storage::disk_manager::DiskManager;

/// A column as declared by DDL, before offsets are assigned.
#[derive(Clone, Debug)]
pub struct ColDef {
    pub name: String,
    pub col_type: ColType,
    pub len: i32,
}

/// CatalogManager maps database, table and index names onto directories,
/// record files and in-memory handles, and keeps the persistent `DbMeta`
/// in sync with every DDL operation.
///
/// A database is a directory; opening one changes the process working
/// directory into it (and closing changes back), so at most one database
/// can be open per process and the chdir side effect is process-wide.
pub struct CatalogManager {
    disk_manager: Arc<DiskManager>,
    record_manager: RecordManager,
    index_manager: IndexManager,
    db: DbMeta,
    fhs: HashMap<String, RecordFile>,
    ihs: HashMap<String, IndexHandle>,
}

impl CatalogManager {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            record_manager: RecordManager::new(
                Arc::clone(&disk_manager),
                Arc::clone(&buffer_manager),
            ),
            index_manager: IndexManager::new(Arc::clone(&disk_manager), buffer_manager),
            disk_manager,
            db: DbMeta::default(),
            fhs: HashMap::new(),
            ihs: HashMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.db.name.is_empty()
    }

    pub fn db(&self) -> &DbMeta {
        &self.db
    }

    /// The open record file of a table, for collaborators that drive DML.
    pub fn table_file(&self, tab_name: &str) -> Result<&RecordFile> {
        self.db.get_table(tab_name)?;
        self.fhs
            .get(tab_name)
            .ok_or_else(|| DbError::TableNotFound(tab_name.to_owned()))
    }

    fn is_dir(path: &str) -> bool {
        Path::new(path).is_dir()
    }

    /// Creates the database directory with an empty meta file and a log
    /// file inside it.
    pub fn create_db(&mut self, db_name: &str) -> Result<()> {
        if Self::is_dir(db_name) {
            return Err(DbError::DatabaseExists(db_name.to_owned()));
        }
        std::fs::create_dir(db_name)?;
        std::env::set_current_dir(db_name)?;
        std::fs::write(DB_META_NAME, DbMeta::new(db_name.to_owned()).to_string())?;
        self.disk_manager.create_file(LOG_FILE_NAME)?;
        std::env::set_current_dir("..")?;
        info!("created database {}", db_name);
        Ok(())
    }

    /// Removes the database directory and everything in it.
    pub fn drop_db(&mut self, db_name: &str) -> Result<()> {
        if !Self::is_dir(db_name) {
            return Err(DbError::DatabaseNotFound(db_name.to_owned()));
        }
        std::fs::remove_dir_all(db_name)?;
        info!("dropped database {}", db_name);
        Ok(())
    }

    /// Enters the database directory, loads its meta file and opens a
    /// handle for every table and index.
    pub fn open_db(&mut self, db_name: &str) -> Result<()> {
        if !Self::is_dir(db_name) {
            return Err(DbError::DatabaseNotFound(db_name.to_owned()));
        }
        if self.is_open() {
            return Err(DbError::DatabaseExists(db_name.to_owned()));
        }
        std::env::set_current_dir(db_name)?;
        let meta = std::fs::read_to_string(DB_META_NAME)?;
        self.db = DbMeta::parse(&meta)?;

        for (tab_name, tab) in &self.db.tabs {
            self.fhs
                .insert(tab_name.clone(), self.record_manager.open_file(tab_name)?);
            for index in tab.indexes.values() {
                let handle = self
                    .index_manager
                    .open_index(&tab.name, &index.col_names())?;
                self.ihs.insert(index.index_name.clone(), handle);
            }
        }
        info!("opened database {}", db_name);
        Ok(())
    }

    /// Persists the meta file and closes every open handle, then leaves
    /// the database directory. A no-op when nothing is open.
    pub fn close_db(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.flush_meta()?;

        for (_, file) in self.fhs.drain() {
            self.record_manager.close_file(file)?;
        }
        for (_, handle) in self.ihs.drain() {
            self.index_manager.close_index(handle)?;
        }
        info!("closed database {}", self.db.name);
        self.db = DbMeta::default();
        std::env::set_current_dir("..")?;
        Ok(())
    }

    /// Overwrites the meta file with the current in-memory catalog.
    pub fn flush_meta(&self) -> Result<()> {
        std::fs::write(DB_META_NAME, self.db.to_string())?;
        Ok(())
    }

    /// Prints all table names; also appends them to `output.txt` in a
    /// Markdown-like table.
    pub fn show_tables(&self, out: &mut dyn Write) -> Result<()> {
        let mut outfile = OpenOptions::new()
            .create(true)
            .append(true)
            .open(OUTPUT_FILE_NAME)?;
        writeln!(outfile, "| Tables |")?;

        let printer = Printer::new(&["Tables"]);
        printer.write_separator(out)?;
        printer.write_record(&["Tables"], out)?;
        printer.write_separator(out)?;
        for tab in self.db.tabs.values() {
            printer.write_record(&[&tab.name], out)?;
            writeln!(outfile, "| {} |", tab.name)?;
        }
        printer.write_separator(out)?;
        Ok(())
    }

    /// Prints every index of a table.
    pub fn show_indexes(&self, tab_name: &str, out: &mut dyn Write) -> Result<()> {
        let tab = self.db.get_table(tab_name)?;

        let printer = Printer::new(&["Table", "Index"]);
        printer.write_separator(out)?;
        printer.write_record(&["Table", "Index"], out)?;
        printer.write_separator(out)?;
        for index_name in tab.indexes.keys() {
            printer.write_record(&[&tab.name, index_name], out)?;
        }
        printer.write_separator(out)?;
        Ok(())
    }

    /// Prints the columns of a table with type and index coverage.
    pub fn desc_table(&self, tab_name: &str, out: &mut dyn Write) -> Result<()> {
        let tab = self.db.get_table(tab_name)?;

        let printer = Printer::new(&["Field", "Type", "Index"]);
        printer.write_separator(out)?;
        printer.write_record(&["Field", "Type", "Index"], out)?;
        printer.write_separator(out)?;
        for col in &tab.cols {
            let col_type = col.col_type.to_string();
            let index = if col.index { "YES" } else { "NO" };
            printer.write_record(&[&col.name, &col_type, index], out)?;
        }
        printer.write_separator(out)?;
        Ok(())
    }

    /// Creates the table's record file and meta entry. Column offsets pack
    /// in declaration order; the record size is the sum of column lengths.
    pub fn create_table(&mut self, tab_name: &str, col_defs: &[ColDef]) -> Result<()> {
        if self.db.is_table(tab_name) {
            return Err(DbError::TableExists(tab_name.to_owned()));
        }
        let mut offset = 0;
        let mut cols = Vec::with_capacity(col_defs.len());
        for def in col_defs {
            cols.push(ColMeta {
                tab_name: tab_name.to_owned(),
                name: def.name.clone(),
                col_type: def.col_type,
                len: def.len,
                offset,
                index: false,
            });
            offset += def.len;
        }
        let record_size = offset;

        self.record_manager
            .create_file(tab_name, record_size as usize)?;
        self.db
            .tabs
            .insert(tab_name.to_owned(), TabMeta::new(tab_name.to_owned(), cols));
        self.fhs
            .insert(tab_name.to_owned(), self.record_manager.open_file(tab_name)?);
        info!("created table {}", tab_name);
        self.flush_meta()
    }

    /// Drops a table: all of its indexes first, then the record file and
    /// the meta entry.
    pub fn drop_table(&mut self, tab_name: &str) -> Result<()> {
        if !self.db.is_table(tab_name) {
            return Err(DbError::TableNotFound(tab_name.to_owned()));
        }
        let index_col_lists: Vec<Vec<String>> = self
            .db
            .get_table(tab_name)?
            .indexes
            .values()
            .map(IndexMeta::col_names)
            .collect();
        for col_names in index_col_lists {
            self.drop_index(tab_name, &col_names)?;
        }

        if let Some(file) = self.fhs.remove(tab_name) {
            self.record_manager.close_file(file)?;
        }
        self.record_manager.destroy_file(tab_name)?;
        self.db.tabs.remove(tab_name);
        info!("dropped table {}", tab_name);
        self.flush_meta()
    }

    /// Creates an index over the given columns and backfills it with every
    /// live record of the table.
    pub fn create_index(&mut self, tab_name: &str, col_names: &[String]) -> Result<()> {
        let (ix_name, cols, col_tot_len) = {
            let tab = self.db.get_table_mut(tab_name)?;
            let mut cols = Vec::with_capacity(col_names.len());
            for col_name in col_names {
                cols.push(tab.get_col(col_name)?.clone());
            }
            let ix_name = tab.get_index_name(col_names);
            if tab.indexes.contains_key(&ix_name) {
                return Err(DbError::IndexExists {
                    table: tab_name.to_owned(),
                    columns: col_names.to_vec(),
                });
            }
            let col_tot_len: i32 = cols.iter().map(|col| col.len).sum();
            (ix_name, cols, col_tot_len)
        };

        self.index_manager
            .create_index(tab_name, col_names, col_tot_len as usize)?;
        let index = self.index_manager.open_index(tab_name, col_names)?;

        let file = self
            .fhs
            .get(tab_name)
            .ok_or_else(|| DbError::TableNotFound(tab_name.to_owned()))?;
        let mut scan = RecordScan::new(file)?;
        let mut key = Vec::with_capacity(col_tot_len as usize);
        while !scan.is_end() {
            let rid = scan.rid();
            let record = file.get_record(rid)?;
            key.clear();
            for col in &cols {
                key.extend_from_slice(
                    &record.data()[col.offset as usize..(col.offset + col.len) as usize],
                );
            }
            index.insert_entry(&key, rid)?;
            scan.next()?;
        }

        let tab = self.db.get_table_mut(tab_name)?;
        for col in &cols {
            tab.get_col_mut(&col.name)?.index = true;
        }
        tab.indexes.insert(
            ix_name.clone(),
            IndexMeta::new(tab_name.to_owned(), ix_name.clone(), cols),
        );
        self.ihs.insert(ix_name, index);
        info!("created index on {} over {:?}", tab_name, col_names);
        self.flush_meta()
    }

    /// Drops an index: the handle, the file, and the meta entry.
    pub fn drop_index(&mut self, tab_name: &str, col_names: &[String]) -> Result<()> {
        let ix_name = {
            let tab = self.db.get_table_mut(tab_name)?;
            for col_name in col_names {
                tab.get_col(col_name)?;
            }
            let ix_name = tab.get_index_name(col_names);
            if !tab.indexes.contains_key(&ix_name) {
                return Err(DbError::IndexNotFound {
                    table: tab_name.to_owned(),
                    columns: col_names.to_vec(),
                });
            }
            ix_name
        };
        if !self.disk_manager.is_file(&ix_name) {
            return Err(DbError::IndexNotFound {
                table: tab_name.to_owned(),
                columns: col_names.to_vec(),
            });
        }

        if let Some(handle) = self.ihs.remove(&ix_name) {
            self.index_manager.close_index(handle)?;
        }
        self.index_manager.destroy_index(tab_name, col_names)?;

        let tab = self.db.get_table_mut(tab_name)?;
        tab.indexes.remove(&ix_name);
        for col_name in col_names {
            tab.get_col_mut(col_name)?.index = false;
        }
        info!("dropped index on {} over {:?}", tab_name, col_names);
        self.flush_meta()
    }
}

#[cfg(test)]
mod tests {

    use std::sync::Arc;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::{CatalogManager, ColDef};
    use crate::buffer::buffer_manager::BufferManager;
    use crate::catalog::meta::ColType;
    use crate::common::lock_cwd;
    use crate::errors::DbError;
    use crate::record::scan::RecordScan;
    use crate::storage::disk_manager::DiskManager;

    struct TestEnv {
        _dir: tempfile::TempDir,
        previous: std::path::PathBuf,
        _cwd: std::sync::MutexGuard<'static, ()>,
    }

    impl TestEnv {
        fn enter() -> Self {
            let cwd = lock_cwd();
            let dir = tempdir().unwrap();
            let previous = std::env::current_dir().unwrap();
            std::env::set_current_dir(dir.path()).unwrap();
            Self {
                _dir: dir,
                previous,
                _cwd: cwd,
            }
        }
    }

    impl Drop for TestEnv {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.previous);
        }
    }

    fn manager(pool_size: usize) -> CatalogManager {
        let disk_manager = Arc::new(DiskManager::new());
        let buffer_manager = Arc::new(BufferManager::new(Arc::clone(&disk_manager), pool_size));
        CatalogManager::new(disk_manager, buffer_manager)
    }

    fn int_col(name: &str) -> ColDef {
        ColDef {
            name: name.to_owned(),
            col_type: ColType::Int,
            len: 4,
        }
    }

    fn two_int_record(a: i32, b: i32) -> [u8; 8] {
        let mut record = [0u8; 8];
        record[..4].copy_from_slice(&a.to_be_bytes());
        record[4..].copy_from_slice(&b.to_be_bytes());
        record
    }

    #[test]
    fn database_lifecycle_errors() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(8);

        assert!(matches!(
            catalog.open_db("missing"),
            Err(DbError::DatabaseNotFound(_))
        ));
        catalog.create_db("d")?;
        assert!(matches!(
            catalog.create_db("d"),
            Err(DbError::DatabaseExists(_))
        ));

        catalog.create_db("e")?;
        catalog.open_db("d")?;
        assert!(matches!(
            catalog.open_db("d"),
            Err(DbError::DatabaseExists(_))
        ));
        // the rejection names the database the caller asked for
        match catalog.open_db("e") {
            Err(DbError::DatabaseExists(name)) => assert_eq!(name, "e"),
            other => panic!("expected DatabaseExists, got {:?}", other.err()),
        }
        catalog.close_db()?;
        catalog.close_db()?;

        catalog.drop_db("d")?;
        assert!(matches!(
            catalog.drop_db("d"),
            Err(DbError::DatabaseNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn table_ddl_and_metadata() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(8);
        catalog.create_db("d")?;
        catalog.open_db("d")?;

        catalog.create_table("t", &[int_col("a"), int_col("b")])?;
        assert!(matches!(
            catalog.create_table("t", &[int_col("a")]),
            Err(DbError::TableExists(_))
        ));

        let tab = catalog.db().get_table("t")?;
        assert_eq!(tab.cols.len(), 2);
        assert_eq!(tab.cols[0].offset, 0);
        assert_eq!(tab.cols[1].offset, 4);
        assert_eq!(catalog.table_file("t")?.record_size(), 8);

        assert!(matches!(
            catalog.drop_table("u"),
            Err(DbError::TableNotFound(_))
        ));
        catalog.drop_table("t")?;
        assert!(!catalog.db().is_table("t"));
        assert!(!std::path::Path::new("t").exists());

        catalog.close_db()?;
        Ok(())
    }

    #[test]
    fn metadata_survives_close_and_reopen() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(8);
        catalog.create_db("d")?;
        catalog.open_db("d")?;
        catalog.create_table("t", &[int_col("a"), int_col("b")])?;
        catalog.create_index("t", &["a".to_owned()])?;

        let tab_before = catalog.db().get_table("t")?.clone();
        assert!(tab_before.indexes.contains_key("t_a.idx"));
        assert!(tab_before.get_col("a")?.index);
        assert!(!tab_before.get_col("b")?.index);

        catalog.close_db()?;
        assert!(!catalog.is_open());
        catalog.open_db("d")?;

        let tab_after = catalog.db().get_table("t")?;
        assert_eq!(*tab_after, tab_before);
        assert!(tab_after.indexes.contains_key("t_a.idx"));

        catalog.close_db()?;
        Ok(())
    }

    #[test]
    fn index_backfill_covers_every_live_record() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(16);
        catalog.create_db("d")?;
        catalog.open_db("d")?;
        catalog.create_table("t", &[int_col("a"), int_col("b")])?;

        for n in 0..1000 {
            catalog
                .table_file("t")?
                .insert_record(&two_int_record(n, n * 2))?;
        }
        catalog.create_index("t", &["a".to_owned()])?;

        let file = catalog.table_file("t")?;
        let index = catalog.ihs.get("t_a.idx").unwrap();
        let mut scan = RecordScan::new(file)?;
        while !scan.is_end() {
            let rid = scan.rid();
            let record = file.get_record(rid)?;
            let rids = index.lookup(&record.data()[0..4])?;
            assert!(rids.contains(&rid));
            scan.next()?;
        }

        catalog.close_db()?;
        Ok(())
    }

    #[test]
    fn index_ddl_errors() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(8);
        catalog.create_db("d")?;
        catalog.open_db("d")?;
        catalog.create_table("t", &[int_col("a"), int_col("b")])?;

        assert!(matches!(
            catalog.create_index("u", &["a".to_owned()]),
            Err(DbError::TableNotFound(_))
        ));
        assert!(matches!(
            catalog.create_index("t", &["missing".to_owned()]),
            Err(DbError::ColumnNotFound(_))
        ));

        catalog.create_index("t", &["a".to_owned()])?;
        assert!(matches!(
            catalog.create_index("t", &["a".to_owned()]),
            Err(DbError::IndexExists { .. })
        ));
        assert!(matches!(
            catalog.drop_index("t", &["b".to_owned()]),
            Err(DbError::IndexNotFound { .. })
        ));

        catalog.drop_index("t", &["a".to_owned()])?;
        assert!(!catalog.db().get_table("t")?.get_col("a")?.index);
        assert!(!std::path::Path::new("t_a.idx").exists());
        assert!(matches!(
            catalog.drop_index("t", &["a".to_owned()]),
            Err(DbError::IndexNotFound { .. })
        ));

        catalog.close_db()?;
        Ok(())
    }

    #[test]
    fn composite_index_keys_concatenate_columns() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(8);
        catalog.create_db("d")?;
        catalog.open_db("d")?;
        catalog.create_table("t", &[int_col("a"), int_col("b")])?;

        let rid = catalog
            .table_file("t")?
            .insert_record(&two_int_record(5, 6))?;
        catalog.create_index("t", &["a".to_owned(), "b".to_owned()])?;

        let index = catalog.ihs.get("t_a_b.idx").unwrap();
        assert_eq!(index.key_len(), 8);
        assert_eq!(index.lookup(&two_int_record(5, 6))?, vec![rid]);

        catalog.close_db()?;
        Ok(())
    }

    #[test]
    fn drop_table_drops_its_indexes() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(8);
        catalog.create_db("d")?;
        catalog.open_db("d")?;
        catalog.create_table("t", &[int_col("a"), int_col("b")])?;
        catalog.create_index("t", &["a".to_owned()])?;
        catalog.create_index("t", &["a".to_owned(), "b".to_owned()])?;

        catalog.drop_table("t")?;
        assert!(!std::path::Path::new("t").exists());
        assert!(!std::path::Path::new("t_a.idx").exists());
        assert!(!std::path::Path::new("t_a_b.idx").exists());
        assert!(catalog.ihs.is_empty());
        assert!(catalog.fhs.is_empty());

        catalog.close_db()?;
        Ok(())
    }

    #[test]
    fn show_tables_appends_to_output_file() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(8);
        catalog.create_db("d")?;
        catalog.open_db("d")?;
        catalog.create_table("t", &[int_col("a")])?;
        catalog.create_table("u", &[int_col("a")])?;

        let mut out = Vec::new();
        catalog.show_tables(&mut out)?;
        let rendered = String::from_utf8(out)?;
        assert!(rendered.contains("Tables"));
        assert!(rendered.contains("| t"));
        assert!(rendered.contains("| u"));

        let output = std::fs::read_to_string(crate::common::OUTPUT_FILE_NAME)?;
        assert_eq!(output, "| Tables |\n| t |\n| u |\n");

        catalog.close_db()?;
        Ok(())
    }

    #[test]
    fn desc_table_reports_index_coverage() -> Result<()> {
        let _env = TestEnv::enter();
        let mut catalog = manager(8);
        catalog.create_db("d")?;
        catalog.open_db("d")?;
        catalog.create_table(
            "t",
            &[
                int_col("a"),
                ColDef {
                    name: "name".to_owned(),
                    col_type: ColType::Char,
                    len: 16,
                },
            ],
        )?;
        catalog.create_index("t", &["a".to_owned()])?;

        let mut out = Vec::new();
        catalog.desc_table("t", &mut out)?;
        let rendered = String::from_utf8(out)?;
        let a_line = rendered.lines().find(|line| line.contains(" a ")).unwrap();
        assert!(a_line.contains("INT"));
        assert!(a_line.contains("YES"));
        let name_line = rendered.lines().find(|line| line.contains("name")).unwrap();
        assert!(name_line.contains("CHAR"));
        assert!(name_line.contains("NO"));

        let mut out = Vec::new();
        catalog.show_indexes("t", &mut out)?;
        assert!(String::from_utf8(out)?.contains("t_a.idx"));

        catalog.close_db()?;
        Ok(())
    }
}
