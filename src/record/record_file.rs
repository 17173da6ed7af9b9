use std::ops::Range;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::buffer::buffer_manager::{BufferManager, PageGuard};
use crate::common::{Fd, PageId, PageNo, NO_PAGE, PAGE_SIZE};
use crate::errors::{DbError, Result};
use crate::record::{bitmap, Record, Rid};
use crate::storage::codec::{Deserializer, Serializer};
use crate::storage::disk_manager::DiskManager;

pub const PAGE_HDR_SIZE: usize = 8;
pub const FILE_HDR_SIZE: usize = 20;

/// In-memory image of page 0 of a record file. Also carries the layout of
/// every record page, which is fixed at file creation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub record_size: i32,
    pub num_records_per_page: i32,
    pub bitmap_size: i32,
    pub first_free_page_no: PageNo,
    pub num_pages: i32,
}

impl FileHeader {
    /// Maximises the slot count for `record_size` subject to
    /// `PAGE_HDR_SIZE + bitmap_size + record_size * n <= PAGE_SIZE` with
    /// `bitmap_size = ceil(n / 8)`.
    fn for_record_size(record_size: usize) -> Result<Self> {
        if record_size == 0 {
            return Err(DbError::Internal("record size must be positive".into()));
        }
        let available = PAGE_SIZE - PAGE_HDR_SIZE;
        let mut n = available * 8 / (record_size * 8 + 1);
        while n > 0 && PAGE_HDR_SIZE + (n + 7) / 8 + record_size * n > PAGE_SIZE {
            n -= 1;
        }
        if n == 0 {
            return Err(DbError::Internal(format!(
                "record size {} does not fit a page",
                record_size
            )));
        }
        Ok(Self {
            record_size: record_size as i32,
            num_records_per_page: n as i32,
            bitmap_size: ((n + 7) / 8) as i32,
            first_free_page_no: NO_PAGE,
            num_pages: 1,
        })
    }

    fn serialize(&self, buf: &mut [u8]) {
        let mut serializer = Serializer::new(buf);
        serializer.serialize_i32(self.record_size);
        serializer.serialize_i32(self.num_records_per_page);
        serializer.serialize_i32(self.bitmap_size);
        serializer.serialize_i32(self.first_free_page_no);
        serializer.serialize_i32(self.num_pages);
    }

    fn parse(buf: &[u8]) -> Self {
        let mut deserializer = Deserializer::new(buf);
        Self {
            record_size: deserializer.deserialize_i32(),
            num_records_per_page: deserializer.deserialize_i32(),
            bitmap_size: deserializer.deserialize_i32(),
            first_free_page_no: deserializer.deserialize_i32(),
            num_pages: deserializer.deserialize_i32(),
        }
    }

    pub(crate) fn bitmap_range(&self) -> Range<usize> {
        PAGE_HDR_SIZE..PAGE_HDR_SIZE + self.bitmap_size as usize
    }

    pub(crate) fn slot_range(&self, slot_no: i32) -> Range<usize> {
        let start = PAGE_HDR_SIZE
            + self.bitmap_size as usize
            + slot_no as usize * self.record_size as usize;
        start..start + self.record_size as usize
    }
}

/// Header at the start of every record page (pages >= 1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct PageHeader {
    next_free_page_no: PageNo,
    num_records: i32,
}

impl PageHeader {
    fn serialize(&self, buf: &mut [u8]) {
        let mut serializer = Serializer::new(buf);
        serializer.serialize_i32(self.next_free_page_no);
        serializer.serialize_i32(self.num_records);
    }

    fn parse(buf: &[u8]) -> Self {
        let mut deserializer = Deserializer::new(buf);
        Self {
            next_free_page_no: deserializer.deserialize_i32(),
            num_records: deserializer.deserialize_i32(),
        }
    }
}

/// Creates, opens, closes and destroys record files. The returned
/// `RecordFile` handles all record-level operations.
pub struct RecordManager {
    disk_manager: Arc<DiskManager>,
    buffer_manager: Arc<BufferManager>,
}

impl RecordManager {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            disk_manager,
            buffer_manager,
        }
    }

    /// Creates a record file for fixed-size records of `record_size` bytes.
    /// Page 0 is allocated and written with the file header.
    pub fn create_file(&self, path: &str, record_size: usize) -> Result<()> {
        let header = FileHeader::for_record_size(record_size)?;
        self.disk_manager.create_file(path)?;
        let fd = self.disk_manager.open_file(path)?;
        self.disk_manager.allocate_page(fd)?;

        let mut page = [0u8; PAGE_SIZE];
        header.serialize(&mut page);
        self.disk_manager.write_page(fd, 0, &page)?;
        self.disk_manager.close_file(fd)?;
        debug!(
            "created record file {} ({} records of {} bytes per page)",
            path, header.num_records_per_page, record_size
        );
        Ok(())
    }

    /// Opens a record file, loading its header into memory.
    pub fn open_file(&self, path: &str) -> Result<RecordFile> {
        let fd = self.disk_manager.open_file(path)?;
        let mut page = [0u8; PAGE_SIZE];
        self.disk_manager.read_page(fd, 0, &mut page)?;
        Ok(RecordFile {
            fd,
            header: Mutex::new(FileHeader::parse(&page)),
            buffer_manager: Arc::clone(&self.buffer_manager),
            disk_manager: Arc::clone(&self.disk_manager),
        })
    }

    /// Persists the header, writes back all of the file's cached pages and
    /// closes the fd. Cached pages are dropped from the pool so a later
    /// open cannot see frames of the old incarnation of the fd.
    pub fn close_file(&self, file: RecordFile) -> Result<()> {
        let header = *file.header.lock().unwrap();
        let mut page = [0u8; PAGE_SIZE];
        header.serialize(&mut page);
        self.disk_manager.write_page(file.fd, 0, &page)?;
        self.buffer_manager.evict_file_pages(file.fd)?;
        self.disk_manager.close_file(file.fd)
    }

    pub fn destroy_file(&self, path: &str) -> Result<()> {
        self.disk_manager.destroy_file(path)
    }
}

/// An open record file: fixed-size slots addressed by `Rid`, with pages
/// holding at least one free slot chained from the file header.
pub struct RecordFile {
    fd: Fd,
    header: Mutex<FileHeader>,
    buffer_manager: Arc<BufferManager>,
    disk_manager: Arc<DiskManager>,
}

impl RecordFile {
    pub fn record_size(&self) -> usize {
        self.header.lock().unwrap().record_size as usize
    }

    /// A snapshot of the in-memory file header.
    pub fn header(&self) -> FileHeader {
        *self.header.lock().unwrap()
    }

    fn file_name(&self) -> String {
        self.disk_manager
            .get_file_name(self.fd)
            .unwrap_or_else(|_| format!("fd {}", self.fd))
    }

    fn page_not_exist(&self, page_no: PageNo) -> DbError {
        DbError::PageNotExist {
            file: self.file_name(),
            page_no,
        }
    }

    fn check_record_len(&self, header: &FileHeader, buf: &[u8]) -> Result<()> {
        if buf.len() != header.record_size as usize {
            return Err(DbError::Internal(format!(
                "record of {} bytes does not match record size {} of {}",
                buf.len(),
                header.record_size,
                self.file_name()
            )));
        }
        Ok(())
    }

    /// Fetches a record page through the buffer pool, pinned for the life
    /// of the guard.
    pub fn fetch_page_guard(&self, page_no: PageNo) -> Result<PageGuard<'_>> {
        let num_pages = self.header.lock().unwrap().num_pages;
        self.fetch_page_inner(page_no, num_pages)
    }

    fn fetch_page_inner(&self, page_no: PageNo, num_pages: i32) -> Result<PageGuard<'_>> {
        if page_no < 0 || page_no >= num_pages {
            return Err(self.page_not_exist(page_no));
        }
        self.buffer_manager
            .fetch_page(PageId::new(self.fd, page_no))?
            .ok_or_else(|| self.page_not_exist(page_no))
    }

    /// Returns a page with at least one free slot, pinned: the head of the
    /// free chain when one exists, otherwise a freshly allocated page that
    /// becomes the new chain head.
    fn free_page(&self, header: &mut FileHeader) -> Result<PageGuard<'_>> {
        if header.first_free_page_no == NO_PAGE {
            return self.new_free_page(header);
        }
        self.fetch_page_inner(header.first_free_page_no, header.num_pages)
    }

    fn new_free_page(&self, header: &mut FileHeader) -> Result<PageGuard<'_>> {
        let guard = self
            .buffer_manager
            .new_page(self.fd)?
            .ok_or_else(|| self.page_not_exist(header.num_pages))?;
        {
            let mut data = guard.write();
            PageHeader {
                next_free_page_no: NO_PAGE,
                num_records: 0,
            }
            .serialize(data.as_mut_slice());
            data[header.bitmap_range()].fill(0);
        }
        header.num_pages += 1;
        header.first_free_page_no = guard.page_id().page_no;
        Ok(guard)
    }

    /// Inserts a record into the first free slot of a free page and returns
    /// its rid. A page that becomes full is popped from the free chain.
    pub fn insert_record(&self, buf: &[u8]) -> Result<Rid> {
        let mut header = self.header.lock().unwrap();
        self.check_record_len(&header, buf)?;

        let guard = self.free_page(&mut header)?;
        let page_no = guard.page_id().page_no;
        let mut data = guard.write();

        let slot_no = bitmap::first_bit(
            false,
            &data[header.bitmap_range()],
            header.num_records_per_page,
        )
        .ok_or_else(|| {
            DbError::Internal(format!(
                "free chain of {} leads to full page {}",
                self.file_name(),
                page_no
            ))
        })?;

        data[header.slot_range(slot_no)].copy_from_slice(buf);
        bitmap::set(&mut data[header.bitmap_range()], slot_no);
        let mut page_header = PageHeader::parse(data.as_slice());
        page_header.num_records += 1;
        if page_header.num_records == header.num_records_per_page {
            header.first_free_page_no = page_header.next_free_page_no;
        }
        page_header.serialize(data.as_mut_slice());

        Ok(Rid { page_no, slot_no })
    }

    /// Writes a record into the given slot, claiming it first when it was
    /// free. Occupied slots are overwritten in place.
    pub fn insert_record_at(&self, rid: Rid, buf: &[u8]) -> Result<()> {
        let mut header = self.header.lock().unwrap();
        self.check_record_len(&header, buf)?;

        let guard = self.fetch_page_inner(rid.page_no, header.num_pages)?;
        let mut data = guard.write();

        if !bitmap::is_set(&data[header.bitmap_range()], rid.slot_no) {
            bitmap::set(&mut data[header.bitmap_range()], rid.slot_no);
            let mut page_header = PageHeader::parse(data.as_slice());
            page_header.num_records += 1;
            if page_header.num_records == header.num_records_per_page {
                header.first_free_page_no = page_header.next_free_page_no;
            }
            page_header.serialize(data.as_mut_slice());
        }
        data[header.slot_range(rid.slot_no)].copy_from_slice(buf);
        Ok(())
    }

    /// Copies the record at `rid` out of its page.
    pub fn get_record(&self, rid: Rid) -> Result<Record> {
        let header = self.header.lock().unwrap();
        let guard = self.fetch_page_inner(rid.page_no, header.num_pages)?;
        let data = guard.read();

        if !bitmap::is_set(&data[header.bitmap_range()], rid.slot_no) {
            return Err(DbError::RecordNotFound {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }
        Ok(Record::new(&data[header.slot_range(rid.slot_no)]))
    }

    /// Overwrites the record at `rid`.
    pub fn update_record(&self, rid: Rid, buf: &[u8]) -> Result<()> {
        let header = self.header.lock().unwrap();
        self.check_record_len(&header, buf)?;

        let guard = self.fetch_page_inner(rid.page_no, header.num_pages)?;
        let mut data = guard.write();

        if !bitmap::is_set(&data[header.bitmap_range()], rid.slot_no) {
            return Err(DbError::RecordNotFound {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }
        data[header.slot_range(rid.slot_no)].copy_from_slice(buf);
        Ok(())
    }

    /// Deletes the record at `rid`. A page that transitions from full to
    /// having a free slot is re-linked at the head of the free chain.
    pub fn delete_record(&self, rid: Rid) -> Result<()> {
        let mut header = self.header.lock().unwrap();
        let guard = self.fetch_page_inner(rid.page_no, header.num_pages)?;
        let mut data = guard.write();

        if !bitmap::is_set(&data[header.bitmap_range()], rid.slot_no) {
            return Err(DbError::RecordNotFound {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }
        bitmap::reset(&mut data[header.bitmap_range()], rid.slot_no);
        let mut page_header = PageHeader::parse(data.as_slice());
        page_header.num_records -= 1;
        if page_header.num_records == header.num_records_per_page - 1 {
            page_header.next_free_page_no = header.first_free_page_no;
            header.first_free_page_no = rid.page_no;
        }
        page_header.serialize(data.as_mut_slice());
        Ok(())
    }
}
