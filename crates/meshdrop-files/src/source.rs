//! Uniform byte-source capability.
//!
//! Collapses "a local file" and "a packaged ZIP64 stream" behind one trait
//! so the chunk producer never needs to know which it is feeding from.

use std::io;
use std::ops::Range;

/// A byte range that can be opened for reading, reported on, and named.
pub trait ByteSource: Send {
    /// Opens a reader over `range` (end-exclusive) and reads it fully.
    ///
    /// # Errors
    ///
    /// Returns an error if the range cannot be read.
    fn read_range(&mut self, range: Range<u64>) -> io::Result<Vec<u8>>;

    /// Total size in bytes, if known up front.
    fn size(&self) -> Option<u64>;

    /// Path used to label chunks drawn from this source, relative to the
    /// transfer root.
    fn relative_path(&self) -> &str;
}

/// A [`ByteSource`] backed by a single file on local disk.
pub struct LocalFile {
    file: std::fs::File,
    size: u64,
    relative_path: String,
}

impl LocalFile {
    /// Opens `path` on disk, labelling chunks with `relative_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its metadata read.
    pub fn open(path: &std::path::Path, relative_path: impl Into<String>) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            relative_path: relative_path.into(),
        })
    }
}

impl ByteSource for LocalFile {
    fn read_range(&mut self, range: Range<u64>) -> io::Result<Vec<u8>> {
        use std::io::{Read, Seek, SeekFrom};
        self.file.seek(SeekFrom::Start(range.start))?;
        let len = (range.end - range.start) as usize;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn relative_path(&self) -> &str {
        &self.relative_path
    }
}

/// An in-memory [`ByteSource`], used by tests and by the packaged-mode
/// producer when feeding from the ZIP64 packager's output queue.
pub struct InMemoryPayload {
    data: Vec<u8>,
    relative_path: String,
}

impl InMemoryPayload {
    /// Wraps `data` as a byte source labelled `relative_path`.
    #[must_use]
    pub fn new(data: Vec<u8>, relative_path: impl Into<String>) -> Self {
        Self {
            data,
            relative_path: relative_path.into(),
        }
    }
}

impl ByteSource for InMemoryPayload {
    fn read_range(&mut self, range: Range<u64>) -> io::Result<Vec<u8>> {
        let start = range.start as usize;
        let end = range.end as usize;
        if end > self.data.len() || start > end {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "range out of bounds",
            ));
        }
        Ok(self.data[start..end].to_vec())
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn relative_path(&self) -> &str {
        &self.relative_path
    }
}
