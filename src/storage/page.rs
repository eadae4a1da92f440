use serde::{Deserialize, Serialize};
use std::fmt;

use crate::concurrency::TransactionId;
use crate::error::Result;

pub const PAGE_SIZE: usize = 4096;

// bincode writes the header as two little endian u32s.
pub const PAGE_HEADER_BYTES: usize = std::mem::size_of::<u32>() * 2;

pub const PAGE_BODY_BYTES: usize = PAGE_SIZE - PAGE_HEADER_BYTES;

/// Identifies a page by the table it belongs to and its position in that
/// table's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table_id: u32,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: u32, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PageHeader {
    table_id: u32,
    page_no: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    id: PageId,
    data: Vec<u8>,

    // Metadata (in mem only)
    dirtied_by: Option<TransactionId>,
    before_image: Option<Vec<u8>>,
}

impl Page {
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            data: vec![0; PAGE_BODY_BYTES],
            dirtied_by: None,
            before_image: None,
        }
    }

    /// Decode a page written by `as_bytes`. A missing body reads as zeroes;
    /// input shorter than the header is a codec error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: PageHeader = bincode::deserialize(bytes)?;
        let mut data = bytes.get(PAGE_HEADER_BYTES..).unwrap_or_default().to_vec();
        data.resize(PAGE_BODY_BYTES, 0);

        Ok(Self {
            id: PageId::new(header.table_id, header.page_no),
            data,
            dirtied_by: None,
            before_image: None,
        })
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let header = PageHeader {
            table_id: self.id.table_id,
            page_no: self.id.page_no,
        };
        let mut bytes = bincode::serialize(&header)?;
        bytes.extend_from_slice(&self.data);
        Ok(bytes)
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtied_by.is_some()
    }

    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    /// Overwrite `bytes.len()` bytes of the body at `offset` on behalf of
    /// `tid`. The first write after a clean state keeps a before-image so an
    /// abort can put the page back.
    ///
    /// # Panics
    ///
    /// Panics if the write does not fit in `PAGE_BODY_BYTES`.
    pub fn write_bytes(&mut self, tid: TransactionId, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= PAGE_BODY_BYTES,
            "write of {} bytes at {offset} runs past the page body",
            bytes.len()
        );

        if self.before_image.is_none() {
            self.before_image = Some(self.data.clone());
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dirtied_by = Some(tid);
    }

    /// # Panics
    ///
    /// Panics if `offset + 8` is past `PAGE_BODY_BYTES`.
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    pub fn write_u64(&mut self, tid: TransactionId, offset: usize, value: u64) {
        self.write_bytes(tid, offset, &value.to_le_bytes());
    }

    /// The page has reached disk, its current content is the new baseline.
    pub fn mark_clean(&mut self) {
        self.dirtied_by = None;
        self.before_image = None;
    }

    pub fn rollback(&mut self) {
        if let Some(before) = self.before_image.take() {
            self.data = before;
        }
        self.dirtied_by = None;
    }
}
