//! Receive-side session: apply inbound wire frames to disk and drive the
//! piece scheduler across however many source peers are serving the
//! manifest (one sender is the common case; the scheduler degenerates to
//! "request everything from the one sender in order" when it is).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use meshdrop_core::frame::FrameCodec;
use meshdrop_files::{FileSpec, FileWriter};
use meshdrop_signaling::PeerId;
use meshdrop_swarm::PieceScheduler;
use tokio::sync::{mpsc, Mutex};

use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::manifest::Manifest;

struct SourcePeer {
    codec: Option<FrameCodec>,
    requested_at: HashMap<u32, Instant>,
}

/// Owns the receive-side file writer and piece scheduler for one incoming
/// transfer.
pub struct ReceiverSession {
    manifest: Manifest,
    writer: Mutex<FileWriter>,
    scheduler: Mutex<PieceScheduler>,
    sources: DashMap<PeerId, Mutex<SourcePeer>>,
    piece_bytes_seen: Mutex<HashMap<u32, u64>>,
    bytes_written: Mutex<u64>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Digest to verify the manifest's lone piece against, if one applies
    /// (see [`Manifest::single_piece_sha256`]). When absent, a completed
    /// piece's integrity rests on per-chunk CRC-32 plus AEAD tags alone.
    single_piece_sha256: Option<[u8; 32]>,
}

impl ReceiverSession {
    /// Opens every file named in `manifest` under `directory` and prepares
    /// a scheduler tracking `manifest.total_pieces()` pieces.
    ///
    /// In ZIP-stream mode the manifest's individual file entries describe
    /// the archive's contents for progress display; the writer target is a
    /// single file holding the raw packaged stream (extraction is a UI-
    /// level concern, out of scope here).
    ///
    /// # Errors
    ///
    /// Returns an error if any target path is unsafe or cannot be created.
    pub fn open(
        manifest: Manifest,
        directory: &std::path::Path,
        max_pending_requests: usize,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let specs = Self::writer_specs(&manifest);
        let writer = FileWriter::open_files(&specs, directory)?;
        let scheduler = PieceScheduler::new(manifest.total_pieces(), max_pending_requests);
        let single_piece_sha256 = manifest.single_piece_sha256();
        Ok(Self {
            manifest,
            writer: Mutex::new(writer),
            scheduler: Mutex::new(scheduler),
            sources: DashMap::new(),
            piece_bytes_seen: Mutex::new(HashMap::new()),
            bytes_written: Mutex::new(0),
            events,
            single_piece_sha256,
        })
    }

    fn writer_specs(manifest: &Manifest) -> Vec<FileSpec> {
        if manifest.is_zip_stream {
            let name = if manifest.root_name.ends_with(".zip") {
                manifest.root_name.clone()
            } else {
                format!("{}.zip", manifest.root_name)
            };
            vec![FileSpec {
                index: 0xFFFF,
                relative_path: name,
                size: manifest.total_size,
            }]
        } else {
            manifest
                .files
                .iter()
                .map(|f| FileSpec {
                    index: f.index,
                    relative_path: f.relative_path.clone(),
                    size: f.size,
                })
                .collect()
        }
    }

    /// Registers a connected source peer serving this manifest's payload.
    pub fn add_source(&self, peer_id: PeerId, codec: Option<FrameCodec>) {
        self.sources.insert(
            peer_id.clone(),
            Mutex::new(SourcePeer {
                codec,
                requested_at: HashMap::new(),
            }),
        );
        if let Some(mut scheduler) = self.scheduler.try_lock().ok() {
            scheduler.add_peer(peer_id);
        }
    }

    /// Applies one inbound wire frame from `peer_id`: decodes (if
    /// encrypted), writes the plaintext to disk, and updates the piece
    /// scheduler's completion tracking.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed, fails authentication, or
    /// the write fails.
    pub async fn on_wire_frame(&self, peer_id: &str, remote_counter: u64, frame: &[u8]) -> Result<(), SessionError> {
        let (header, plaintext) = {
            let Some(source) = self.sources.get(peer_id) else {
                return Err(SessionError::UnknownPeer(peer_id.to_string()));
            };
            let mut state = source.lock().await;
            match &mut state.codec {
                Some(codec) => codec.decode(remote_counter, frame)?,
                None => decode_plain(frame)?,
            }
        };

        {
            let mut writer = self.writer.lock().await;
            writer.write_at(header.file_index, header.absolute_offset, &plaintext)?;
        }

        let piece_size = u64::from(self.manifest.piece_size);
        let piece_index = (header.absolute_offset / piece_size) as u32;
        let newly_complete = {
            let mut seen = self.piece_bytes_seen.lock().await;
            let entry = seen.entry(piece_index).or_insert(0);
            *entry += plaintext.len() as u64;
            let range = self.manifest.piece_byte_range(piece_index);
            *entry >= (range.end - range.start)
        };

        let mut total_written = self.bytes_written.lock().await;
        *total_written += plaintext.len() as u64;
        let bytes_transferred = *total_written;
        drop(total_written);

        let _ = self.events.send(SessionEvent::Progress {
            peer_id: peer_id.to_string(),
            bytes_transferred,
            total_bytes: self.manifest.total_size,
        });

        if newly_complete {
            if let Some(expected_digest) = self.single_piece_sha256 {
                let range = self.manifest.piece_byte_range(piece_index);
                let piece_bytes = {
                    let mut writer = self.writer.lock().await;
                    writer.read_range(header.file_index, range.start, range.end - range.start)?
                };
                if !meshdrop_files::hash::verify(&piece_bytes, Some(&expected_digest)) {
                    let mut scheduler = self.scheduler.lock().await;
                    scheduler.fail_piece_verification(piece_index, peer_id)?;
                    drop(scheduler);
                    self.piece_bytes_seen.lock().await.remove(&piece_index);
                    meshdrop_core::pool::release(plaintext);
                    return Err(SessionError::Frame(meshdrop_core::error::FrameError::ChecksumMismatch));
                }
            }

            let mut scheduler = self.scheduler.lock().await;
            let elapsed = {
                let source = self.sources.get(peer_id).unwrap();
                let mut state = source.lock().await;
                state
                    .requested_at
                    .remove(&piece_index)
                    .map_or(Duration::from_millis(1), |t| t.elapsed())
            };
            scheduler.complete_piece(piece_index, peer_id, plaintext.len() as u64, elapsed)?;
        }

        meshdrop_core::pool::release(plaintext);
        Ok(())
    }

    /// Whether every piece of the manifest has been received.
    pub async fn is_complete(&self) -> bool {
        self.scheduler.lock().await.is_complete()
    }

    /// Finalizes the receive: flushes every open file and emits
    /// `PeerComplete` with the total bytes actually written (the §9 Open
    /// Question 3 `{ peer_id, actual_bytes }` shape, keyed by our own peer
    /// id from the caller).
    ///
    /// # Errors
    ///
    /// Returns an error if closing any file fails, or if the total bytes
    /// written does not match the manifest's declared size.
    pub async fn finish(self, our_peer_id: &str) -> Result<u64, SessionError> {
        let total_written = *self.bytes_written.lock().await;
        if !self.manifest.is_size_estimated && total_written != self.manifest.total_size {
            return Err(SessionError::TransferAborted(format!(
                "expected {} bytes, wrote {}",
                self.manifest.total_size, total_written
            )));
        }
        self.writer.into_inner().close()?;
        let _ = self.events.send(SessionEvent::PeerComplete {
            peer_id: our_peer_id.to_string(),
            actual_bytes: total_written,
        });
        Ok(total_written)
    }
}

fn decode_plain(frame: &[u8]) -> Result<(meshdrop_core::frame::FrameHeader, Vec<u8>), SessionError> {
    use meshdrop_core::error::FrameError;
    use meshdrop_core::frame::{FrameHeader, HEADER_SIZE};

    let header = FrameHeader::from_bytes(frame)?;
    let payload = &frame[HEADER_SIZE..];
    if payload.len() != header.payload_len as usize {
        return Err(SessionError::Frame(FrameError::PayloadLengthMismatch {
            expected: header.payload_len as usize,
            actual: payload.len(),
        }));
    }
    if meshdrop_core::frame::crc32(payload) != header.crc32 {
        return Err(SessionError::Frame(FrameError::ChecksumMismatch));
    }
    let mut buf = meshdrop_core::pool::acquire();
    buf.extend_from_slice(payload);
    Ok((header, buf))
}
