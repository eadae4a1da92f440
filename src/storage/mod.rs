mod buffer_pool;
mod disk_manager;
mod heap_file;
mod page;

// Reexport so we can refer it from other mod
// as crate::storage::BufferPool instead of
// crate::storage::buffer_pool::BufferPool
pub use self::{
    buffer_pool::BufferPool,
    disk_manager::DiskManager,
    heap_file::{HeapFile, PageProvider},
    page::{Page, PageId, PAGE_BODY_BYTES, PAGE_SIZE},
};
