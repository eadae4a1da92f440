use super::disk_manager::DiskManager;
use super::page::{Page, PageId};
use crate::error::{Error, Result};
use std::path::Path;

/// Turns page ids into page content on a buffer pool miss. Providers know
/// nothing about locking; the buffer pool only calls them after the lock
/// for the page has been granted.
pub trait PageProvider: Send + Sync {
    fn table_id(&self) -> u32;

    fn num_pages(&self) -> Result<usize>;

    fn read_page(&self, pid: PageId) -> Result<Page>;

    fn write_page(&self, page: &Page) -> Result<()>;
}

/// A table stored as an unordered sequence of fixed size pages in one file.
pub struct HeapFile {
    table_id: u32,
    disk_manager: DiskManager,
}

impl HeapFile {
    pub fn open(table_id: u32, path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            table_id,
            disk_manager: DiskManager::new(path)?,
        })
    }

    /// Append an empty page and return its id.
    pub fn allocate_page(&self) -> Result<PageId> {
        // The page number is only known once the append lands, so write a
        // placeholder first and stamp the real header afterwards.
        let placeholder = Page::new(PageId::new(self.table_id, 0)).as_bytes()?;
        let page_no = self.disk_manager.append_page(&placeholder)?;
        let pid = PageId::new(self.table_id, page_no as u32);
        self.write_page(&Page::new(pid))?;
        Ok(pid)
    }

    pub fn path(&self) -> &Path {
        self.disk_manager.path()
    }
}

impl PageProvider for HeapFile {
    fn table_id(&self) -> u32 {
        self.table_id
    }

    fn num_pages(&self) -> Result<usize> {
        Ok(self.disk_manager.num_pages()?)
    }

    fn read_page(&self, pid: PageId) -> Result<Page> {
        if pid.table_id != self.table_id || pid.page_no as usize >= self.num_pages()? {
            return Err(Error::PageOutOfRange(pid));
        }

        let bytes = self.disk_manager.read_page(pid.page_no as usize)?;
        Page::from_bytes(&bytes)
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        let pid = page.id();
        if pid.table_id != self.table_id {
            return Err(Error::PageOutOfRange(pid));
        }
        self.disk_manager
            .write_page(pid.page_no as usize, &page.as_bytes()?)?;
        Ok(())
    }
}
