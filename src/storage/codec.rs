use crate::common::PageNo;
use crate::record::Rid;

const I32_SIZE: usize = std::mem::size_of::<i32>();

pub const RID_SIZE: usize = 2 * I32_SIZE;

/// Writes fixed-width values into a page buffer at increasing offsets.
/// The layout is big-endian and stable; files are self-consistent but make
/// no cross-architecture portability promise beyond that.
pub struct Serializer<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl<'a> Serializer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    pub fn serialize_i32(&mut self, val: i32) {
        self.buffer[self.pos..self.pos + I32_SIZE].copy_from_slice(val.to_be_bytes().as_slice());
        self.pos += I32_SIZE;
    }

    pub fn serialize_rid(&mut self, rid: Rid) {
        self.serialize_i32(rid.page_no);
        self.serialize_i32(rid.slot_no);
    }

    pub fn copy_bytes(&mut self, bytes: &[u8]) {
        self.buffer[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn end(self) -> usize {
        self.pos
    }
}

pub struct Deserializer<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    pub fn deserialize_i32(&mut self) -> i32 {
        let val = i32::from_be_bytes(
            self.buffer[self.pos..self.pos + I32_SIZE]
                .try_into()
                .unwrap(),
        );
        self.pos += I32_SIZE;
        val
    }

    pub fn deserialize_rid(&mut self) -> Rid {
        let page_no: PageNo = self.deserialize_i32();
        let slot_no = self.deserialize_i32();
        Rid { page_no, slot_no }
    }
}
