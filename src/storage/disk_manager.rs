use std::fs::{File, OpenOptions};
use std::os::unix::prelude::{AsRawFd, FileExt};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

use dashmap::DashMap;
use log::{debug, info};

use crate::common::{Fd, PageNo, LOG_FILE_NAME, MAX_FD, PAGE_SIZE};
use crate::errors::{DbError, Result};

/// DiskManager owns every open data file and performs raw page-aligned I/O
/// on them. Files are addressed by path until opened, then by fd. Page
/// numbers are handed out by a monotonic per-file allocator; space freed by
/// deletions is reclaimed through the record layer's free chain, never here.
pub struct DiskManager {
    path_to_fd: DashMap<String, Fd>,
    fd_to_file: DashMap<Fd, File>,
    page_counters: Box<[AtomicI32]>,
}

impl DiskManager {
    pub fn new() -> Self {
        let page_counters = (0..MAX_FD)
            .map(|_| AtomicI32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            path_to_fd: DashMap::new(),
            fd_to_file: DashMap::new(),
            page_counters,
        }
    }

    pub fn is_file(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }

    /// Creates an empty file at `path`. The file is not left open.
    pub fn create_file(&self, path: &str) -> Result<()> {
        if self.is_file(path) {
            return Err(DbError::FileExists(path.to_owned()));
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        debug!("created file {}", path);
        Ok(())
    }

    /// Unlinks the file at `path`. The file must exist and must not be open.
    pub fn destroy_file(&self, path: &str) -> Result<()> {
        if !self.is_file(path) {
            return Err(DbError::FileNotFound(path.to_owned()));
        }
        if self.path_to_fd.contains_key(path) {
            return Err(DbError::FileNotClosed(path.to_owned()));
        }
        std::fs::remove_file(path)?;
        debug!("destroyed file {}", path);
        Ok(())
    }

    /// Opens the file at `path` for page I/O and returns its fd. A file may
    /// be open at most once; the page allocator resumes after the last
    /// existing page.
    pub fn open_file(&self, path: &str) -> Result<Fd> {
        if !self.is_file(path) {
            return Err(DbError::FileNotFound(path.to_owned()));
        }
        if self.path_to_fd.contains_key(path) {
            return Err(DbError::FileNotClosed(path.to_owned()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let fd = file.as_raw_fd();
        if fd < 0 || fd as usize >= MAX_FD {
            return Err(DbError::Internal(format!(
                "fd {} for {} is outside the descriptor table",
                fd, path
            )));
        }
        let pages = (file.metadata()?.len() / PAGE_SIZE as u64) as i32;
        self.page_counters[fd as usize].store(pages, Ordering::Relaxed);
        self.path_to_fd.insert(path.to_owned(), fd);
        self.fd_to_file.insert(fd, file);
        info!("opened file {} as fd {}", path, fd);
        Ok(fd)
    }

    /// Closes an fd previously returned by `open_file`.
    pub fn close_file(&self, fd: Fd) -> Result<()> {
        let (_, file) = self
            .fd_to_file
            .remove(&fd)
            .ok_or(DbError::FileNotOpen(fd))?;
        self.path_to_fd.retain(|_, v| *v != fd);
        drop(file);
        info!("closed fd {}", fd);
        Ok(())
    }

    pub fn get_file_name(&self, fd: Fd) -> Result<String> {
        self.path_to_fd
            .iter()
            .find(|entry| *entry.value() == fd)
            .map(|entry| entry.key().clone())
            .ok_or(DbError::FileNotOpen(fd))
    }

    /// Returns the fd for `path`, opening the file if necessary.
    pub fn get_file_fd(&self, path: &str) -> Result<Fd> {
        if let Some(fd) = self.path_to_fd.get(path) {
            return Ok(*fd);
        }
        self.open_file(path)
    }

    /// Size in bytes of the file at `path`, opening it if necessary.
    pub fn file_size(&self, path: &str) -> Result<u64> {
        let fd = self.get_file_fd(path)?;
        let file = self.fd_to_file.get(&fd).ok_or(DbError::FileNotOpen(fd))?;
        Ok(file.metadata()?.len())
    }

    /// Reads exactly `buf.len()` bytes of page `page_no` into `buf`.
    pub fn read_page(&self, fd: Fd, page_no: PageNo, buf: &mut [u8]) -> Result<()> {
        let file = self.fd_to_file.get(&fd).ok_or(DbError::FileNotOpen(fd))?;
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.read_exact_at(buf, offset).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                DbError::Internal(format!(
                    "short read of page {} on fd {} at offset {}",
                    page_no, fd, offset
                ))
            } else {
                DbError::Io(e)
            }
        })
    }

    /// Writes exactly `buf.len()` bytes of `buf` to page `page_no`.
    pub fn write_page(&self, fd: Fd, page_no: PageNo, buf: &[u8]) -> Result<()> {
        let file = self.fd_to_file.get(&fd).ok_or(DbError::FileNotOpen(fd))?;
        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.write_all_at(buf, offset)?;
        Ok(())
    }

    /// Hands out the next page number of `fd`. Numbers are 0-based and only
    /// ever grow; there is no deallocation at this level.
    pub fn allocate_page(&self, fd: Fd) -> Result<PageNo> {
        if fd < 0 || fd as usize >= MAX_FD {
            return Err(DbError::FileNotOpen(fd));
        }
        Ok(self.page_counters[fd as usize].fetch_add(1, Ordering::Relaxed))
    }

    /// Appends `buf` to the log file in the current directory.
    pub fn write_log(&self, buf: &[u8]) -> Result<()> {
        let size = self.file_size(LOG_FILE_NAME)?;
        let fd = self.get_file_fd(LOG_FILE_NAME)?;
        let file = self.fd_to_file.get(&fd).ok_or(DbError::FileNotOpen(fd))?;
        file.write_all_at(buf, size)?;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes of the log file starting at `offset`.
    /// Returns `None` when `offset` lies beyond the end of the log, and the
    /// number of bytes read otherwise (zero when nothing remains).
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<Option<usize>> {
        let size = self.file_size(LOG_FILE_NAME)?;
        if offset > size {
            return Ok(None);
        }
        let available = ((size - offset) as usize).min(buf.len());
        if available == 0 {
            return Ok(Some(0));
        }
        let fd = self.get_file_fd(LOG_FILE_NAME)?;
        let file = self.fd_to_file.get(&fd).ok_or(DbError::FileNotOpen(fd))?;
        file.read_exact_at(&mut buf[..available], offset)?;
        Ok(Some(available))
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {

    use anyhow::Result;
    use tempfile::tempdir;

    use super::DiskManager;
    use crate::common::PAGE_SIZE;
    use crate::errors::DbError;

    #[test]
    fn file_lifecycle_errors() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t").to_str().unwrap().to_owned();
        let disk_manager = DiskManager::new();

        disk_manager.create_file(&path)?;
        assert!(matches!(
            disk_manager.create_file(&path),
            Err(DbError::FileExists(_))
        ));

        let fd = disk_manager.open_file(&path)?;
        assert!(matches!(
            disk_manager.open_file(&path),
            Err(DbError::FileNotClosed(_))
        ));
        assert!(matches!(
            disk_manager.destroy_file(&path),
            Err(DbError::FileNotClosed(_))
        ));
        assert_eq!(disk_manager.get_file_name(fd)?, path);

        disk_manager.close_file(fd)?;
        assert!(matches!(
            disk_manager.close_file(fd),
            Err(DbError::FileNotOpen(_))
        ));
        disk_manager.destroy_file(&path)?;
        assert!(matches!(
            disk_manager.destroy_file(&path),
            Err(DbError::FileNotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn page_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t").to_str().unwrap().to_owned();
        let disk_manager = DiskManager::new();
        disk_manager.create_file(&path)?;
        let fd = disk_manager.open_file(&path)?;

        let mut page = [0u8; PAGE_SIZE];
        rand::Rng::fill(&mut rand::thread_rng(), &mut page[..]);
        disk_manager.write_page(fd, 3, &page)?;
        assert_eq!(disk_manager.file_size(&path)?, 4 * PAGE_SIZE as u64);

        let mut read_back = [0u8; PAGE_SIZE];
        disk_manager.read_page(fd, 3, &mut read_back)?;
        assert_eq!(page, read_back);

        // pages 0..=2 exist as holes; a read past the end is a short read
        let mut beyond = [0u8; PAGE_SIZE];
        assert!(matches!(
            disk_manager.read_page(fd, 4, &mut beyond),
            Err(DbError::Internal(_))
        ));

        disk_manager.close_file(fd)?;
        Ok(())
    }

    #[test]
    fn allocator_is_monotonic_and_resumes_after_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t").to_str().unwrap().to_owned();
        let disk_manager = DiskManager::new();
        disk_manager.create_file(&path)?;
        let fd = disk_manager.open_file(&path)?;

        assert_eq!(disk_manager.allocate_page(fd)?, 0);
        assert_eq!(disk_manager.allocate_page(fd)?, 1);
        let page = [7u8; PAGE_SIZE];
        disk_manager.write_page(fd, 0, &page)?;
        disk_manager.write_page(fd, 1, &page)?;
        disk_manager.close_file(fd)?;

        let fd = disk_manager.open_file(&path)?;
        assert_eq!(disk_manager.allocate_page(fd)?, 2);
        disk_manager.close_file(fd)?;
        Ok(())
    }

    #[test]
    fn log_append_and_read_by_offset() -> Result<()> {
        let _cwd = crate::common::lock_cwd();
        let dir = tempdir()?;
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(dir.path())?;

        let disk_manager = DiskManager::new();
        disk_manager.create_file(crate::common::LOG_FILE_NAME)?;
        disk_manager.write_log(b"hello ")?;
        disk_manager.write_log(b"log")?;
        assert_eq!(disk_manager.file_size(crate::common::LOG_FILE_NAME)?, 9);

        let mut buf = [0u8; 16];
        assert_eq!(disk_manager.read_log(&mut buf, 0)?, Some(9));
        assert_eq!(&buf[..9], b"hello log");
        assert_eq!(disk_manager.read_log(&mut buf, 6)?, Some(3));
        assert_eq!(&buf[..3], b"log");
        assert_eq!(disk_manager.read_log(&mut buf, 9)?, Some(0));
        assert_eq!(disk_manager.read_log(&mut buf, 100)?, None);

        std::env::set_current_dir(previous)?;
        Ok(())
    }
}
