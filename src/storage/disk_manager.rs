use super::page::PAGE_SIZE;
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::SeekFrom,
    io::{Read, Seek, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

#[derive(Debug)]
pub struct DiskManager {
    write_file: Mutex<File>,
    read_file: Mutex<File>,
    path: PathBuf,
}

impl DiskManager {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let write_file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)?;

        let read_file = File::open(&path)?;

        Ok(Self {
            write_file: Mutex::new(write_file),
            read_file: Mutex::new(read_file),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_pages(&self) -> std::io::Result<usize> {
        let file_len = self.read_file.lock().metadata()?.len() as usize;
        Ok(file_len / PAGE_SIZE)
    }

    pub fn write_page(&self, page_no: usize, page_bytes: &[u8]) -> std::io::Result<()> {
        let offset = page_no * PAGE_SIZE;
        let mut write_file = self.write_file.lock();
        write_file.seek(SeekFrom::Start(offset as u64))?;
        write_file.write_all(page_bytes)?;
        write_file.sync_data()
    }

    pub fn read_page(&self, page_no: usize) -> std::io::Result<[u8; PAGE_SIZE]> {
        let offset = page_no * PAGE_SIZE;

        let mut read_file = self.read_file.lock();
        read_file.seek(SeekFrom::Start(offset as u64))?;
        let mut buffer = [0; PAGE_SIZE];
        read_file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Append `page_bytes` as a new page at the end of the file and return its
    /// page number.
    pub fn append_page(&self, page_bytes: &[u8]) -> std::io::Result<usize> {
        // Holding the write handle keeps concurrent appends from racing on the
        // page number.
        let mut write_file = self.write_file.lock();
        let page_no = write_file.metadata()?.len() as usize / PAGE_SIZE;
        write_file.seek(SeekFrom::Start((page_no * PAGE_SIZE) as u64))?;
        write_file.write_all(page_bytes)?;
        write_file.sync_data()?;
        debug!(path = ?self.path, page_no, "appended page");
        Ok(page_no)
    }
}
