use crate::common::{FIRST_RECORD_PAGE, NO_PAGE};
use crate::errors::Result;
use crate::record::record_file::RecordFile;
use crate::record::{bitmap, Rid};

/// Forward cursor over the live records of a record file, in ascending
/// `(page_no, slot_no)` order. Pages are fetched briefly and released
/// clean. Once the end is reached the scan cannot be restarted.
pub struct RecordScan<'a> {
    file: &'a RecordFile,
    rid: Rid,
}

impl<'a> RecordScan<'a> {
    /// Positions the cursor on the first live record, or at the end for an
    /// empty file.
    pub fn new(file: &'a RecordFile) -> Result<Self> {
        let mut scan = Self {
            file,
            rid: Rid {
                page_no: FIRST_RECORD_PAGE,
                slot_no: -1,
            },
        };
        scan.next()?;
        Ok(scan)
    }

    /// Advances to the next live record, moving across pages as needed.
    pub fn next(&mut self) -> Result<()> {
        let header = self.file.header();
        while self.rid.page_no < header.num_pages {
            let guard = self.file.fetch_page_guard(self.rid.page_no)?;
            let data = guard.read();
            let next_slot = bitmap::next_bit(
                true,
                &data[header.bitmap_range()],
                header.num_records_per_page,
                self.rid.slot_no,
            );
            if let Some(slot_no) = next_slot {
                self.rid.slot_no = slot_no;
                return Ok(());
            }
            self.rid.page_no += 1;
            self.rid.slot_no = -1;
        }
        self.rid.page_no = NO_PAGE;
        Ok(())
    }

    pub fn is_end(&self) -> bool {
        self.rid.page_no == NO_PAGE
    }

    /// The rid under the cursor. Meaningless once `is_end` is true.
    pub fn rid(&self) -> Rid {
        self.rid
    }
}

#[cfg(test)]
mod tests {

    use std::sync::Arc;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::RecordScan;
    use crate::buffer::buffer_manager::BufferManager;
    use crate::record::record_file::RecordManager;
    use crate::record::Rid;
    use crate::storage::disk_manager::DiskManager;

    fn setup(pool_size: usize) -> (tempfile::TempDir, RecordManager) {
        let dir = tempdir().unwrap();
        let disk_manager = Arc::new(DiskManager::new());
        let buffer_manager = Arc::new(BufferManager::new(Arc::clone(&disk_manager), pool_size));
        (dir, RecordManager::new(disk_manager, buffer_manager))
    }

    fn record_pattern(n: usize) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[..2].copy_from_slice(&(n as u16).to_be_bytes());
        data
    }

    #[test]
    fn scan_of_empty_file_is_immediately_at_end() -> Result<()> {
        let (dir, record_manager) = setup(4);
        let path = dir.path().join("t").to_str().unwrap().to_owned();
        record_manager.create_file(&path, 8)?;
        let file = record_manager.open_file(&path)?;

        let scan = RecordScan::new(&file)?;
        assert!(scan.is_end());

        record_manager.close_file(file)?;
        Ok(())
    }

    #[test]
    fn scan_visits_all_records_in_insertion_order() -> Result<()> {
        let (dir, record_manager) = setup(8);
        let path = dir.path().join("t").to_str().unwrap().to_owned();
        record_manager.create_file(&path, 8)?;
        let file = record_manager.open_file(&path)?;

        let mut inserted = vec![];
        for n in 0..500 {
            inserted.push(file.insert_record(&record_pattern(n))?);
        }

        let mut scan = RecordScan::new(&file)?;
        let mut visited = vec![];
        while !scan.is_end() {
            let rid = scan.rid();
            assert_eq!(
                file.get_record(rid)?.data(),
                record_pattern(visited.len()).as_slice()
            );
            visited.push(rid);
            scan.next()?;
        }
        assert_eq!(visited, inserted);

        record_manager.close_file(file)?;
        Ok(())
    }

    #[test]
    fn scan_skips_deleted_records() -> Result<()> {
        let (dir, record_manager) = setup(8);
        let path = dir.path().join("t").to_str().unwrap().to_owned();
        record_manager.create_file(&path, 8)?;
        let file = record_manager.open_file(&path)?;

        for n in 0..500 {
            file.insert_record(&record_pattern(n))?;
        }
        for slot_no in [0, 2, 4] {
            file.delete_record(Rid { page_no: 1, slot_no })?;
        }

        let mut scan = RecordScan::new(&file)?;
        let mut visited = vec![];
        while !scan.is_end() {
            visited.push(scan.rid());
            scan.next()?;
        }
        assert_eq!(visited.len(), 497);
        assert!(!visited.contains(&Rid { page_no: 1, slot_no: 0 }));
        assert!(!visited.contains(&Rid { page_no: 1, slot_no: 2 }));
        assert!(!visited.contains(&Rid { page_no: 1, slot_no: 4 }));
        assert_eq!(visited[0], Rid { page_no: 1, slot_no: 1 });

        record_manager.close_file(file)?;
        Ok(())
    }

    #[test]
    fn scan_crosses_page_boundaries_in_order() -> Result<()> {
        let (dir, record_manager) = setup(8);
        let path = dir.path().join("t").to_str().unwrap().to_owned();
        // 7 slots per page forces several pages
        record_manager.create_file(&path, 512)?;
        let file = record_manager.open_file(&path)?;

        let record = [1u8; 512];
        for _ in 0..20 {
            file.insert_record(&record)?;
        }

        let mut scan = RecordScan::new(&file)?;
        let mut previous: Option<Rid> = None;
        let mut count = 0;
        while !scan.is_end() {
            let rid = scan.rid();
            if let Some(previous) = previous {
                assert!(
                    rid.page_no > previous.page_no
                        || (rid.page_no == previous.page_no && rid.slot_no > previous.slot_no)
                );
            }
            previous = Some(rid);
            count += 1;
            scan.next()?;
        }
        assert_eq!(count, 20);

        record_manager.close_file(file)?;
        Ok(())
    }
}
