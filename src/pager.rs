//! Owns the database file and serves fixed-size, pinned pages to the B-Tree layer.
//!
//! Pages are numbered from 1. The pager never interprets page contents — that is the B-Tree
//! layer's job — it only knows how to seek, read, write, and grow the file, and it enforces that
//! a page number is never handed out twice while still pinned.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, trace};

use crate::error::{err, Error};
use crate::header;

pub type PageNum = u32;

/// A pinned page: an owned buffer plus the identity the pager needs to write it back.
pub struct Page {
    pub page_no: PageNum,
    pub data: Vec<u8>,
}

pub struct Pager {
    file: File,
    page_size: Option<usize>,
    page_count: PageNum,
    pinned: HashSet<PageNum>,
}

impl Pager {
    /// Opens (creating if necessary) the database file at `path`. The page size is not yet
    /// known; call `set_page_size` before reading or allocating pages.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file,
            page_size: None,
            page_count: 0,
            pinned: HashSet::new(),
        })
    }

    /// True if the underlying file is empty, i.e. this is a brand-new database.
    pub fn is_new(&self) -> Result<bool, Error> {
        Ok(self.file.metadata()?.len() == 0)
    }

    /// Configures the page size this pager will use, deriving the current page count from the
    /// file's length. Must be called once before any `read_page`/`allocate_page` call.
    pub fn set_page_size(&mut self, size: u16) -> Result<(), Error> {
        if !header::is_valid_page_size(size) {
            return Err(err!(CorruptHeader, "page size {} is not a supported value", size));
        }
        let size = size as usize;
        let len = self.file.metadata()?.len();
        if len as usize % size != 0 {
            return Err(err!(
                CorruptHeader,
                "file length {} is not a multiple of page size {}",
                len,
                size
            ));
        }
        self.page_size = Some(size);
        self.page_count = (len as usize / size) as PageNum;
        Ok(())
    }

    pub fn page_size(&self) -> Result<usize, Error> {
        self.page_size
            .ok_or_else(|| err!(CorruptHeader, "page size has not been configured yet"))
    }

    pub fn page_count(&self) -> PageNum {
        self.page_count
    }

    /// Reads the raw 100-byte file header directly, without pinning a page (the header lives
    /// inside page 1 but is validated before the page size, and hence the pinning machinery, is
    /// known).
    pub fn read_header(&mut self) -> Result<[u8; header::HEADER_SIZE], Error> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; header::HEADER_SIZE];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Extends the file by one page of zero bytes and returns its page number.
    pub fn allocate_page(&mut self) -> Result<PageNum, Error> {
        let size = self.page_size()?;
        self.page_count += 1;
        let page_no = self.page_count;
        let offset = (page_no as u64 - 1) * size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&vec![0u8; size])?;
        trace!(page_no, "allocated page");
        Ok(page_no)
    }

    /// Pins and returns `page_no`. Fails if the page is out of range or already pinned.
    pub fn read_page(&mut self, page_no: PageNum) -> Result<Page, Error> {
        let size = self.page_size()?;
        if page_no == 0 || page_no > self.page_count {
            return Err(err!(
                PageNo,
                "page {} out of range (file has {} pages)",
                page_no,
                self.page_count
            ));
        }
        if !self.pinned.insert(page_no) {
            return Err(err!(PageNo, "page {} is already pinned", page_no));
        }
        let offset = (page_no as u64 - 1) * size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; size];
        self.file.read_exact(&mut data)?;
        trace!(page_no, "read page");
        Ok(Page { page_no, data })
    }

    /// Persists `page`'s buffer back to its slot in the file. Does not unpin it.
    pub fn write_page(&mut self, page: &Page) -> Result<(), Error> {
        let offset = (page.page_no as u64 - 1) * page.data.len() as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&page.data)?;
        debug!(page_no = page.page_no, "wrote page");
        Ok(())
    }

    /// Unpins `page`, allowing the page number to be read again.
    pub fn release_page(&mut self, page: Page) {
        self.pinned.remove(&page.page_no);
    }

    pub fn close(self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pager() -> Pager {
        let file = tempfile::NamedTempFile::new().unwrap();
        Pager::open(file.path()).unwrap()
    }

    #[test]
    fn new_file_has_no_pages() {
        let pager = temp_pager();
        assert!(pager.is_new().unwrap());
        assert_eq!(pager.page_count(), 0);
    }

    #[test]
    fn allocate_then_read_round_trips() {
        let mut pager = temp_pager();
        pager.set_page_size(1024).unwrap();
        let page_no = pager.allocate_page().unwrap();
        assert_eq!(page_no, 1);
        let mut page = pager.read_page(page_no).unwrap();
        page.data[0] = 0x42;
        pager.write_page(&page).unwrap();
        pager.release_page(page);

        let page = pager.read_page(page_no).unwrap();
        assert_eq!(page.data[0], 0x42);
        pager.release_page(page);
    }

    #[test]
    fn double_pin_is_rejected() {
        let mut pager = temp_pager();
        pager.set_page_size(1024).unwrap();
        pager.allocate_page().unwrap();
        let _first = pager.read_page(1).unwrap();
        assert!(pager.read_page(1).is_err());
    }

    #[test]
    fn out_of_range_page_is_rejected() {
        let mut pager = temp_pager();
        pager.set_page_size(1024).unwrap();
        assert!(pager.read_page(1).is_err());
    }
}
