//! The immutable session manifest shared to every peer at join.

use serde::{Deserialize, Serialize};

/// One file (or directory entry) described by a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Index into [`Manifest::files`]; stable for the session's lifetime.
    pub index: u16,
    /// Path relative to the transfer root, forward-slash separated.
    pub relative_path: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type, best-effort guessed from the file extension.
    pub mime_type: String,
    /// Last-modified time, Unix seconds, if known.
    pub last_modified: Option<u64>,
    /// SHA-256 of the whole file, if precomputed. Optional per §9 Open
    /// Question 2: when absent, verification falls back to per-chunk
    /// CRC-32 plus AEAD tags.
    pub sha256: Option<String>,
}

/// Immutable description of what is being transferred, shared to all peers
/// at join. Created once by the sender and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Opaque string, globally unique per session.
    pub transfer_id: String,
    /// Display name for the root item (file or directory name).
    pub root_name: String,
    /// Whether the root item is a directory (packaged as a ZIP stream).
    pub is_folder: bool,
    /// Whether the payload is a streamed ZIP64 archive rather than a raw file.
    pub is_zip_stream: bool,
    /// Whether `total_size` is an estimate rather than an exact figure
    /// (always true when `is_zip_stream`, since STORE-mode ZIP overhead is
    /// folded into the estimate before the archive finishes streaming).
    pub is_size_estimated: bool,
    /// Number of files included.
    pub total_files: u32,
    /// Total payload size in bytes (see `is_size_estimated`).
    pub total_size: u64,
    /// Ordered file list.
    pub files: Vec<FileEntry>,
    /// Logical piece size in bytes, fixed for the session (default 1 MiB).
    pub piece_size: u32,
}

impl Manifest {
    /// Builds a single-file, non-packaged manifest.
    #[must_use]
    pub fn single_file(transfer_id: String, name: String, size: u64, mime_type: String, piece_size: u32) -> Self {
        Self {
            transfer_id,
            root_name: name.clone(),
            is_folder: false,
            is_zip_stream: false,
            is_size_estimated: false,
            total_files: 1,
            total_size: size,
            files: vec![FileEntry {
                index: 0,
                relative_path: name,
                size,
                mime_type,
                last_modified: None,
                sha256: None,
            }],
            piece_size,
        }
    }

    /// Builds a multi-file, ZIP64-packaged manifest. `total_size` should be
    /// the sum of the entries' sizes plus a caller-estimated ZIP overhead;
    /// it is always reported to peers as an estimate.
    #[must_use]
    pub fn zip_stream(transfer_id: String, root_name: String, files: Vec<FileEntry>, total_size_estimate: u64, piece_size: u32) -> Self {
        Self {
            transfer_id,
            root_name,
            is_folder: true,
            is_zip_stream: true,
            is_size_estimated: true,
            total_files: files.len() as u32,
            total_size: total_size_estimate,
            files,
            piece_size,
        }
    }

    /// Total number of logical pieces this manifest's payload is divided
    /// into, given its fixed `piece_size`.
    #[must_use]
    pub fn total_pieces(&self) -> u32 {
        if self.total_size == 0 {
            return 0;
        }
        ((self.total_size + u64::from(self.piece_size) - 1) / u64::from(self.piece_size)) as u32
    }

    /// The SHA-256 digest to verify the manifest's single piece against,
    /// when one applies.
    ///
    /// Pieces don't generally align with file boundaries (a ZIP stream's
    /// pieces span multiple packaged files; a large single file spans
    /// multiple pieces), so a file's whole-file digest can only stand in
    /// for a piece digest in the one case where there's exactly one file
    /// and exactly one piece: a single-file, non-packaged transfer no
    /// larger than `piece_size`. Returns `None` otherwise, or if the
    /// supplied digest isn't valid hex.
    #[must_use]
    pub fn single_piece_sha256(&self) -> Option<[u8; 32]> {
        if self.is_zip_stream || self.files.len() != 1 || self.total_pieces() != 1 {
            return None;
        }
        let digest_hex = self.files[0].sha256.as_ref()?;
        let bytes = hex::decode(digest_hex).ok()?;
        bytes.try_into().ok()
    }

    /// The byte range `[start, end)` covered by piece `index`, clamped to
    /// `total_size`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside `[0, total_pieces())`.
    #[must_use]
    pub fn piece_byte_range(&self, index: u32) -> std::ops::Range<u64> {
        assert!(index < self.total_pieces(), "piece index out of range");
        let start = u64::from(index) * u64::from(self.piece_size);
        let end = (start + u64::from(self.piece_size)).min(self.total_size);
        start..end
    }
}
