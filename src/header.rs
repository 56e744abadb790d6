//! The 100-byte file header that occupies the first 100 bytes of page 1.
//!
//! Every multi-byte field is big-endian. Most fields are fixed constants this engine never varies
//! (page-cache size, format version bytes, text encoding, ...); only the page size is meaningful
//! per-file. Fields not listed below (the in-header page count and the trailing reserved region)
//! are written as zero and are not validated on open, matching the reference file format this
//! header is modeled on.

use crate::error::{err, Error};
use crate::varint;

pub const HEADER_SIZE: usize = 100;

const MAGIC: &[u8; 16] = b"SQLite format 3\0";
const FORMAT_CONSTANTS: [u8; 6] = [0x01, 0x01, 0x00, 0x40, 0x20, 0x20];
const SCHEMA_FORMAT_NUMBER: u32 = 1;
const PAGE_CACHE_SIZE: u32 = 0x4E20;
const TEXT_ENCODING: u32 = 1;

const OFF_PAGE_SIZE: usize = 16;
const OFF_FORMAT_CONSTANTS: usize = 18;
const OFF_FILE_CHANGE_COUNTER: usize = 24;
const OFF_FREELIST_TRUNK: usize = 32;
const OFF_FREELIST_COUNT: usize = 36;
const OFF_SCHEMA_COOKIE: usize = 40;
const OFF_SCHEMA_FORMAT: usize = 44;
const OFF_PAGE_CACHE_SIZE: usize = 48;
const OFF_LARGEST_ROOT_PAGE: usize = 52;
const OFF_TEXT_ENCODING: usize = 56;
const OFF_USER_COOKIE: usize = 60;
const OFF_INCREMENTAL_VACUUM: usize = 64;

pub const VALID_PAGE_SIZES: [u16; 7] = [512, 1024, 2048, 4096, 8192, 16384, 32768];

pub fn is_valid_page_size(size: u16) -> bool {
    VALID_PAGE_SIZES.contains(&size)
}

/// Writes a fresh file header for a newly created database into `buf[0..100]`.
pub fn init(buf: &mut [u8], page_size: u16) -> Result<(), Error> {
    if !is_valid_page_size(page_size) {
        return Err(err!(CorruptHeader, "page size {} is not a supported value", page_size));
    }
    debug_assert!(buf.len() >= HEADER_SIZE);
    buf[..HEADER_SIZE].fill(0);
    buf[0..16].copy_from_slice(MAGIC);
    varint::put2(buf, OFF_PAGE_SIZE, page_size);
    buf[OFF_FORMAT_CONSTANTS..OFF_FORMAT_CONSTANTS + 6].copy_from_slice(&FORMAT_CONSTANTS);
    varint::put4(buf, OFF_FILE_CHANGE_COUNTER, 0);
    varint::put4(buf, OFF_FREELIST_TRUNK, 0);
    varint::put4(buf, OFF_FREELIST_COUNT, 0);
    varint::put4(buf, OFF_SCHEMA_COOKIE, 0);
    varint::put4(buf, OFF_SCHEMA_FORMAT, SCHEMA_FORMAT_NUMBER);
    varint::put4(buf, OFF_PAGE_CACHE_SIZE, PAGE_CACHE_SIZE);
    varint::put4(buf, OFF_LARGEST_ROOT_PAGE, 0);
    varint::put4(buf, OFF_TEXT_ENCODING, TEXT_ENCODING);
    varint::put4(buf, OFF_USER_COOKIE, 0);
    varint::put4(buf, OFF_INCREMENTAL_VACUUM, 0);
    Ok(())
}

/// Validates an on-disk header, returning the page size it declares.
///
/// Every constant slot is checked bit-exactly; a single mismatch anywhere fails the whole file
/// with `CorruptHeader`. Offsets not covered by this check (the in-header page count at 28 and
/// the reserved region from 68 onward) are intentionally left unchecked.
pub fn validate(buf: &[u8]) -> Result<u16, Error> {
    if buf.len() < HEADER_SIZE {
        return Err(err!(CorruptHeader, "header is shorter than {} bytes", HEADER_SIZE));
    }
    if &buf[0..16] != MAGIC {
        return Err(err!(CorruptHeader, "magic string mismatch"));
    }
    let page_size = varint::get2(buf, OFF_PAGE_SIZE);
    if !is_valid_page_size(page_size) {
        return Err(err!(CorruptHeader, "page size {} is not a supported value", page_size));
    }
    if buf[OFF_FORMAT_CONSTANTS..OFF_FORMAT_CONSTANTS + 6] != FORMAT_CONSTANTS {
        return Err(err!(CorruptHeader, "format-version constants mismatch"));
    }
    let checks: &[(&str, usize, u32)] = &[
        ("file-change counter", OFF_FILE_CHANGE_COUNTER, 0),
        ("freelist trunk page", OFF_FREELIST_TRUNK, 0),
        ("freelist page count", OFF_FREELIST_COUNT, 0),
        ("schema cookie", OFF_SCHEMA_COOKIE, 0),
        ("schema format number", OFF_SCHEMA_FORMAT, SCHEMA_FORMAT_NUMBER),
        ("page-cache size", OFF_PAGE_CACHE_SIZE, PAGE_CACHE_SIZE),
        ("largest root b-tree page", OFF_LARGEST_ROOT_PAGE, 0),
        ("text encoding", OFF_TEXT_ENCODING, TEXT_ENCODING),
        ("user cookie", OFF_USER_COOKIE, 0),
        ("incremental-vacuum mode", OFF_INCREMENTAL_VACUUM, 0),
    ];
    for (name, offset, expected) in checks {
        let actual = varint::get4(buf, *offset);
        if actual != *expected {
            return Err(err!(
                CorruptHeader,
                "{} at offset {} is {}, expected {}",
                name,
                offset,
                actual,
                expected
            ));
        }
    }
    Ok(page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_validate_round_trips_page_size() {
        let mut buf = vec![0u8; HEADER_SIZE];
        init(&mut buf, 4096).unwrap();
        assert_eq!(validate(&buf).unwrap(), 4096);
    }

    #[test]
    fn rejects_unsupported_page_size() {
        let mut buf = vec![0u8; HEADER_SIZE];
        assert!(init(&mut buf, 777).is_err());
    }

    #[test]
    fn rejects_corrupt_magic() {
        let mut buf = vec![0u8; HEADER_SIZE];
        init(&mut buf, 1024).unwrap();
        buf[0] ^= 0xFF;
        assert!(matches!(validate(&buf), Err(Error::CorruptHeader(_))));
    }

    #[test]
    fn rejects_tampered_constant_slot() {
        let mut buf = vec![0u8; HEADER_SIZE];
        init(&mut buf, 1024).unwrap();
        varint::put4(&mut buf, OFF_PAGE_CACHE_SIZE, 1);
        assert!(matches!(validate(&buf), Err(Error::CorruptHeader(_))));
    }
}
