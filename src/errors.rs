use thiserror::Error;

use crate::common::{Fd, PageNo, SlotNo};

/// Every failure the storage core can surface, one variant per kind.
/// Buffer-pool "not present" conditions are boolean results, not errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("system call failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file not open: fd {0}")]
    FileNotOpen(Fd),

    #[error("file not closed: {0}")]
    FileNotClosed(String),

    #[error("page {page_no} does not exist in file {file}")]
    PageNotExist { file: String, page_no: PageNo },

    #[error("record not found at page {page_no} slot {slot_no}")]
    RecordNotFound { page_no: PageNo, slot_no: SlotNo },

    #[error("database already exists: {0}")]
    DatabaseExists(String),

    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("index already exists on table {table}: columns {columns:?}")]
    IndexExists { table: String, columns: Vec<String> },

    #[error("index not found on table {table}: columns {columns:?}")]
    IndexNotFound { table: String, columns: Vec<String> },
}

pub type Result<T> = std::result::Result<T, DbError>;
