pub mod bitmap;
pub mod record_file;
pub mod scan;

use crate::common::{PageNo, SlotNo};

/// Record identifier, stable for the life of the record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_no: PageNo,
    pub slot_no: SlotNo,
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(page={}, slot={})", self.page_no, self.slot_no)
    }
}

/// An owned copy of one record's bytes, detached from its page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    data: Box<[u8]>,
}

impl Record {
    pub fn new(data: &[u8]) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
