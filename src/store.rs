//! File-backed page store: append, fetch, and write back fixed-size
//! pages of one file (a relation's `.data` or `.ovflow` stream).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;
use crate::page::{Page, PAGESIZE};

/// One of a relation's two page address spaces (primary data, or
/// overflow). Owns the file handle exclusively for its lifetime.
pub struct PageFile {
    file: File,
}

impl PageFile {
    pub fn new(file: File) -> PageFile {
        PageFile { file }
    }

    /// Number of pages currently in the file.
    pub fn page_count(&self) -> Result<u32> {
        let len = self.file.metadata()?.len();
        Ok((len / PAGESIZE as u64) as u32)
    }

    /// Extends the file by one zero-initialized page, returning its id.
    pub fn add_page(&mut self) -> Result<u32> {
        let id = self.page_count()?;
        self.write_raw(id, &Page::new_empty().encode())?;
        log::trace!("allocated page {}", id);
        Ok(id)
    }

    /// Materializes an in-memory copy of `page_id`.
    pub fn get_page(&mut self, page_id: u32) -> Result<Page> {
        let mut buf = [0u8; PAGESIZE];
        self.file.seek(SeekFrom::Start(offset_of(page_id)))?;
        self.file.read_exact(&mut buf)?;
        Ok(Page::decode(&buf))
    }

    /// Writes `page` back to `page_id`.
    pub fn put_page(&mut self, page_id: u32, page: &Page) -> Result<()> {
        self.write_raw(page_id, &page.encode())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    fn write_raw(&mut self, page_id: u32, bytes: &[u8; PAGESIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset_of(page_id)))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}

fn offset_of(page_id: u32) -> u64 {
    page_id as u64 * PAGESIZE as u64
}
