//! Receive-side file writer.
//!
//! Turns a manifest's file list into open, pre-sized file handles and
//! accepts out-of-order, possibly-duplicate `(fileIndex, offset)` writes.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// One file a [`FileWriter`] should create and keep open.
#[derive(Debug, Clone)]
pub struct FileSpec {
    /// Index into the manifest's file list.
    pub index: u16,
    /// Path relative to the transfer root, as sent over the wire.
    pub relative_path: String,
    /// Declared size in bytes.
    pub size: u64,
}

/// Errors writing received chunks to disk.
#[derive(Debug, Error)]
pub enum WriterError {
    /// `relative_path` attempted to escape the destination directory.
    #[error("unsafe path rejected: {0}")]
    UnsafePath(String),

    /// No file is open under that index.
    #[error("unknown file index: {0}")]
    UnknownFileIndex(u16),

    /// Underlying filesystem operation failed.
    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Rejects relative paths that use `..`, start with `/`, or contain a
/// backslash, per the wire-level path-safety contract.
pub fn validate_relative_path(path: &str) -> Result<(), WriterError> {
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(WriterError::UnsafePath(path.to_string()));
    }
    if path.contains('\\') {
        return Err(WriterError::UnsafePath(path.to_string()));
    }
    if Path::new(path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(WriterError::UnsafePath(path.to_string()));
    }
    Ok(())
}

struct OpenFile {
    handle: File,
    written_offsets: HashSet<u64>,
}

/// Opens and manages every file in a manifest for the duration of a
/// receive. `write_at` is idempotent: re-delivering the same
/// `(fileIndex, offset)` pair is a silent no-op rather than a double write.
pub struct FileWriter {
    files: std::collections::HashMap<u16, OpenFile>,
}

impl FileWriter {
    /// Creates (pre-sized, truncated) every file named in `specs` under
    /// `directory`, rejecting any spec whose path is unsafe.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is unsafe or a file cannot be created.
    pub fn open_files(specs: &[FileSpec], directory: &Path) -> Result<Self, WriterError> {
        let mut files = std::collections::HashMap::new();
        for spec in specs {
            validate_relative_path(&spec.relative_path)?;
            let full_path: PathBuf = directory.join(&spec.relative_path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let handle = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&full_path)?;
            handle.set_len(spec.size)?;
            files.insert(
                spec.index,
                OpenFile {
                    handle,
                    written_offsets: HashSet::new(),
                },
            );
        }
        Ok(Self { files })
    }

    /// Writes `bytes` at `offset` within the file at `file_index`.
    ///
    /// Re-delivering a previously-applied `(file_index, offset)` pair
    /// returns `Ok(())` without writing again.
    ///
    /// # Errors
    ///
    /// Returns an error if `file_index` is unknown or the write fails.
    pub fn write_at(&mut self, file_index: u16, offset: u64, bytes: &[u8]) -> Result<(), WriterError> {
        let entry = self
            .files
            .get_mut(&file_index)
            .ok_or(WriterError::UnknownFileIndex(file_index))?;
        if entry.written_offsets.contains(&offset) {
            return Ok(());
        }
        entry.handle.seek(SeekFrom::Start(offset))?;
        entry.handle.write_all(bytes)?;
        entry.written_offsets.insert(offset);
        Ok(())
    }

    /// Reads back `len` bytes starting at `offset` from the file at
    /// `file_index`. Used to verify a completed piece's hash against bytes
    /// already written, rather than buffering them separately.
    ///
    /// # Errors
    ///
    /// Returns an error if `file_index` is unknown or the read fails.
    pub fn read_range(&mut self, file_index: u16, offset: u64, len: u64) -> Result<Vec<u8>, WriterError> {
        let entry = self
            .files
            .get_mut(&file_index)
            .ok_or(WriterError::UnknownFileIndex(file_index))?;
        let mut buf = vec![0u8; len as usize];
        entry.handle.seek(SeekFrom::Start(offset))?;
        entry.handle.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Flushes and closes every open file.
    ///
    /// # Errors
    ///
    /// Returns an error if syncing any file fails.
    pub fn close(mut self) -> Result<(), WriterError> {
        for (_, entry) in self.files.drain() {
            entry.handle.sync_all()?;
        }
        Ok(())
    }
}
