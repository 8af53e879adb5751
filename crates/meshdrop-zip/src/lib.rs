//! # meshdrop-zip
//!
//! A streaming ZIP64 packager: feed it file entries one at a time, pull
//! STORE-mode (uncompressed) archive bytes out the other side. Every entry
//! is written with a ZIP64 extra field regardless of its actual size, so
//! there is exactly one code path rather than a 32-bit/64-bit split.
//!
//! Output is pull-driven: the packager never pushes bytes anywhere itself.
//! It accumulates a `VecDeque<u8>` that the caller drains with
//! [`Packager::pull`], and exposes [`Packager::should_pause`] /
//! [`Packager::should_resume`] so the caller can apply backpressure to
//! whatever is feeding entries in.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_DIRECTORY_SIG: u32 = 0x0201_4b50;
const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
const ZIP64_EOCD_LOCATOR_SIG: u32 = 0x0706_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;
const ZIP64_EXTRA_TAG: u16 = 0x0001;
const VERSION_NEEDED_ZIP64: u16 = 45;
const VERSION_MADE_BY: u16 = 45;
/// General-purpose flag bit 3: sizes/CRC live in the trailing data descriptor.
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// Default high-water mark for pull-driven backpressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 32 * 1024 * 1024;
/// Default low-water mark for pull-driven backpressure.
pub const DEFAULT_LOW_WATER_MARK: usize = 8 * 1024 * 1024;

/// Errors from packaging entries into the ZIP64 stream.
#[derive(Debug, Error)]
pub enum PackagingError {
    /// An entry was started while another entry was still open.
    #[error("an entry is already open")]
    EntryAlreadyOpen,

    /// Bytes were written with no entry open.
    #[error("no entry is currently open")]
    NoEntryOpen,

    /// The packager already aborted; no further operations are valid.
    #[error("packager aborted after a prior error")]
    Aborted,

    /// More than `u16::MAX` entries were requested (exceeds ZIP's own limit).
    #[error("too many entries for a single archive")]
    TooManyEntries,
}

struct PendingEntry {
    name: String,
    local_header_offset: u64,
    crc: crc32fast::Hasher,
    uncompressed_size: u64,
}

struct CentralDirectoryRecord {
    name: String,
    crc32: u32,
    size: u64,
    local_header_offset: u64,
}

/// Streaming ZIP64 packager. STORE method only: entries are copied
/// verbatim, with a running CRC-32 computed as bytes are written.
pub struct Packager {
    output: VecDeque<u8>,
    bytes_written: u64,
    current: Option<PendingEntry>,
    directory: Vec<CentralDirectoryRecord>,
    high_water_mark: usize,
    low_water_mark: usize,
    paused: bool,
    aborted: bool,
    finished: bool,
}

impl Default for Packager {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK)
    }
}

impl Packager {
    /// Creates a packager with the given backpressure watermarks.
    #[must_use]
    pub fn new(high_water_mark: usize, low_water_mark: usize) -> Self {
        Self {
            output: VecDeque::new(),
            bytes_written: 0,
            current: None,
            directory: Vec::new(),
            high_water_mark,
            low_water_mark,
            paused: false,
            aborted: false,
            finished: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.output.extend(bytes.iter().copied());
        self.bytes_written += bytes.len() as u64;
    }

    /// Opens a new STORE-mode entry named `relative_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if another entry is open or the packager aborted.
    pub fn start_entry(&mut self, relative_path: &str) -> Result<(), PackagingError> {
        self.check_live()?;
        if self.current.is_some() {
            return Err(PackagingError::EntryAlreadyOpen);
        }
        if self.directory.len() >= u16::MAX as usize {
            return Err(PackagingError::TooManyEntries);
        }

        let local_header_offset = self.bytes_written;
        let name_bytes = relative_path.as_bytes();
        let (dos_time, dos_date) = dos_datetime_now();

        let mut header = Vec::with_capacity(30 + name_bytes.len() + 20);
        header.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&VERSION_NEEDED_ZIP64.to_le_bytes());
        header.extend_from_slice(&FLAG_DATA_DESCRIPTOR.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // method: STORE
        header.extend_from_slice(&dos_time.to_le_bytes());
        header.extend_from_slice(&dos_date.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // crc32 (in data descriptor)
        header.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // compressed size sentinel
        header.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // uncompressed size sentinel
        header.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        header.extend_from_slice(&20u16.to_le_bytes()); // zip64 extra field length

        header.extend_from_slice(name_bytes);
        // ZIP64 extra field, sizes written as 0 placeholders (real values
        // live in the data descriptor that follows the entry's bytes).
        header.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
        header.extend_from_slice(&16u16.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());

        self.push(&header);
        self.current = Some(PendingEntry {
            name: relative_path.to_string(),
            local_header_offset,
            crc: crc32fast::Hasher::new(),
            uncompressed_size: 0,
        });
        Ok(())
    }

    /// Writes `data` verbatim (STORE mode) into the currently-open entry.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the packager aborted.
    pub fn write_entry_bytes(&mut self, data: &[u8]) -> Result<(), PackagingError> {
        self.check_live()?;
        let Some(entry) = self.current.as_mut() else {
            return Err(PackagingError::NoEntryOpen);
        };
        entry.crc.update(data);
        entry.uncompressed_size += data.len() as u64;
        self.push(data);
        self.update_backpressure();
        Ok(())
    }

    /// Closes the currently-open entry, emitting its ZIP64 data descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if no entry is open or the packager aborted.
    pub fn end_entry(&mut self) -> Result<(), PackagingError> {
        self.check_live()?;
        let entry = self.current.take().ok_or(PackagingError::NoEntryOpen)?;
        let crc32 = entry.crc.finalize();

        let mut descriptor = Vec::with_capacity(24);
        descriptor.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
        descriptor.extend_from_slice(&crc32.to_le_bytes());
        descriptor.extend_from_slice(&entry.uncompressed_size.to_le_bytes()); // compressed == uncompressed (STORE)
        descriptor.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
        self.push(&descriptor);

        self.directory.push(CentralDirectoryRecord {
            name: entry.name,
            crc32,
            size: entry.uncompressed_size,
            local_header_offset: entry.local_header_offset,
        });
        Ok(())
    }

    /// Writes the central directory and ZIP64 end-of-central-directory
    /// records. No further entries may be started afterward.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is still open or the packager aborted.
    pub fn finish(&mut self) -> Result<(), PackagingError> {
        self.check_live()?;
        if self.current.is_some() {
            return Err(PackagingError::NoEntryOpen);
        }

        let cd_start = self.bytes_written;
        let entry_count = self.directory.len() as u64;
        for record in std::mem::take(&mut self.directory) {
            let name_bytes = record.name.as_bytes();
            let mut header = Vec::with_capacity(46 + name_bytes.len() + 28);
            header.extend_from_slice(&CENTRAL_DIRECTORY_SIG.to_le_bytes());
            header.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
            header.extend_from_slice(&VERSION_NEEDED_ZIP64.to_le_bytes());
            header.extend_from_slice(&FLAG_DATA_DESCRIPTOR.to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes()); // method: STORE
            let (dos_time, dos_date) = dos_datetime_now();
            header.extend_from_slice(&dos_time.to_le_bytes());
            header.extend_from_slice(&dos_date.to_le_bytes());
            header.extend_from_slice(&record.crc32.to_le_bytes());
            header.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
            header.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
            header.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            header.extend_from_slice(&28u16.to_le_bytes()); // zip64 extra length
            header.extend_from_slice(&0u16.to_le_bytes()); // comment length
            header.extend_from_slice(&0u16.to_le_bytes()); // disk number start
            header.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            header.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            header.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // local header offset sentinel

            header.extend_from_slice(name_bytes);
            header.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
            header.extend_from_slice(&24u16.to_le_bytes());
            header.extend_from_slice(&record.size.to_le_bytes());
            header.extend_from_slice(&record.size.to_le_bytes());
            header.extend_from_slice(&record.local_header_offset.to_le_bytes());

            self.push(&header);
        }
        let cd_size = self.bytes_written - cd_start;

        let zip64_eocd_offset = self.bytes_written;
        let mut zip64_eocd = Vec::with_capacity(56);
        zip64_eocd.extend_from_slice(&ZIP64_EOCD_SIG.to_le_bytes());
        zip64_eocd.extend_from_slice(&44u64.to_le_bytes()); // size of this record - 12
        zip64_eocd.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
        zip64_eocd.extend_from_slice(&VERSION_NEEDED_ZIP64.to_le_bytes());
        zip64_eocd.extend_from_slice(&0u32.to_le_bytes()); // disk number
        zip64_eocd.extend_from_slice(&0u32.to_le_bytes()); // disk with central directory
        zip64_eocd.extend_from_slice(&entry_count.to_le_bytes()); // entries on this disk
        zip64_eocd.extend_from_slice(&entry_count.to_le_bytes()); // total entries
        zip64_eocd.extend_from_slice(&cd_size.to_le_bytes());
        zip64_eocd.extend_from_slice(&cd_start.to_le_bytes());
        self.push(&zip64_eocd);

        let mut locator = Vec::with_capacity(20);
        locator.extend_from_slice(&ZIP64_EOCD_LOCATOR_SIG.to_le_bytes());
        locator.extend_from_slice(&0u32.to_le_bytes()); // disk with zip64 eocd
        locator.extend_from_slice(&zip64_eocd_offset.to_le_bytes());
        locator.extend_from_slice(&1u32.to_le_bytes()); // total number of disks
        self.push(&locator);

        let mut eocd = Vec::with_capacity(22);
        eocd.extend_from_slice(&EOCD_SIG.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes());
        eocd.extend_from_slice(&0xFFFFu16.to_le_bytes()); // entries on this disk sentinel
        eocd.extend_from_slice(&0xFFFFu16.to_le_bytes()); // total entries sentinel
        eocd.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // cd size sentinel
        eocd.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // cd offset sentinel
        eocd.extend_from_slice(&0u16.to_le_bytes()); // comment length
        self.push(&eocd);

        self.finished = true;
        Ok(())
    }

    /// Discards all buffered output and marks the packager unusable,
    /// per the "abort-and-discard-partial-output" contract.
    pub fn abort(&mut self) {
        self.output.clear();
        self.current = None;
        self.directory.clear();
        self.aborted = true;
    }

    /// True once buffered output has crossed the high-water mark.
    #[must_use]
    pub fn should_pause(&self) -> bool {
        self.paused
    }

    /// True once buffered output has drained back below the low-water mark.
    #[must_use]
    pub fn should_resume(&self) -> bool {
        !self.paused
    }

    fn update_backpressure(&mut self) {
        if !self.paused && self.output.len() >= self.high_water_mark {
            self.paused = true;
        } else if self.paused && self.output.len() <= self.low_water_mark {
            self.paused = false;
        }
    }

    /// Pulls up to `max_bytes` of ready archive output.
    pub fn pull(&mut self, max_bytes: usize) -> Vec<u8> {
        let take = max_bytes.min(self.output.len());
        let out: Vec<u8> = self.output.drain(..take).collect();
        self.update_backpressure();
        out
    }

    /// Whether [`Packager::finish`] has been called and all output pulled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.finished && self.output.is_empty()
    }

    fn check_live(&self) -> Result<(), PackagingError> {
        if self.aborted {
            return Err(PackagingError::Aborted);
        }
        Ok(())
    }
}

fn dos_datetime_now() -> (u16, u16) {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    // DOS date/time has a 1980 epoch and 2-second time resolution; an exact
    // calendar conversion isn't load-bearing for any reader of this format,
    // so a fixed placeholder keeps the header fields well-formed.
    let _ = secs;
    (0, 0x21)
}
