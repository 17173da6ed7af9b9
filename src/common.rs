/// File descriptor of an open data file, as handed out by the disk manager.
pub type Fd = i32;
pub type PageNo = i32;
pub type SlotNo = i32;

pub const PAGE_SIZE: usize = 4096;
pub const MAX_FD: usize = 8192;

pub const INVALID_PAGE_NO: PageNo = -1;
/// Terminator of the free-page chain inside a record file.
pub const NO_PAGE: PageNo = -1;
/// Page 0 of a record file holds the file header; records start here.
pub const FIRST_RECORD_PAGE: PageNo = 1;

pub const DB_META_NAME: &str = ".meta";
pub const LOG_FILE_NAME: &str = ".log";
pub const OUTPUT_FILE_NAME: &str = "output.txt";

/// Identifies one page of one open file. Usable as a page-table key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageId {
    pub fd: Fd,
    pub page_no: PageNo,
}

impl PageId {
    pub fn new(fd: Fd, page_no: PageNo) -> Self {
        Self { fd, page_no }
    }

    pub fn invalid() -> Self {
        Self {
            fd: -1,
            page_no: INVALID_PAGE_NO,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(fd={}, page={})", self.fd, self.page_no)
    }
}

#[cfg(test)]
lazy_static::lazy_static! {
    /// The current working directory is process-wide state; tests that enter
    /// a database directory hold this for their whole scenario.
    pub static ref CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
}

#[cfg(test)]
pub fn lock_cwd() -> std::sync::MutexGuard<'static, ()> {
    CWD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
