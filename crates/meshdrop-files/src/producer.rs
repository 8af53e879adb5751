//! Adaptive, double-buffered chunk producer.
//!
//! Reads a sequential byte stream — either a local file in single-file mode,
//! or the ZIP64 packager's output in packaged mode — and turns it into
//! chunks sized per the congestion controller's current recommendation. A
//! background thread keeps one 8 MiB buffer prefetched while the caller
//! drains the other, so `next_batch` rarely blocks on disk I/O.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;

use meshdrop_core::congestion::{CHUNK_SIZE_MAX, CHUNK_SIZE_MIN};

/// Size of each prefetch half, per spec's double-buffer sizing.
const HALF_SIZE: usize = 8 * 1024 * 1024;

/// One emitted chunk, ready for framing.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Manifest file index this chunk belongs to (or the packaged-stream
    /// sentinel in packaged mode).
    pub file_index: u16,
    /// Globally monotonic sequence number.
    pub sequence: u32,
    /// Byte offset of this chunk within its source stream.
    pub offset: u64,
    /// Chunk payload.
    pub bytes: Vec<u8>,
}

/// Whether a producer is reading a single raw file or a packaged ZIP64
/// stream; both are just sequential byte sources to the producer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    /// Chunks are drawn directly from one file's bytes.
    SingleFile,
    /// Chunks are drawn from the ZIP64 packager's serialized output.
    Packaged,
}

struct RawHalf {
    offset: u64,
    data: Vec<u8>,
}

/// Sequential, double-buffered chunk producer.
pub struct ChunkProducer {
    rx: Receiver<io::Result<RawHalf>>,
    worker: Option<JoinHandle<()>>,
    pending: VecDeque<u8>,
    pending_offset: u64,
    source_exhausted: bool,
    error: Option<io::Error>,
    total_bytes_emitted: u64,
    total_size: Option<u64>,
    file_index: u16,
    mode: ProducerMode,
    sequence: AtomicU32,
}

impl ChunkProducer {
    /// Starts a producer over `reader`, which is read to EOF on a background
    /// thread in [`HALF_SIZE`]-byte halves.
    pub fn new(
        mut reader: Box<dyn Read + Send>,
        total_size: Option<u64>,
        file_index: u16,
        mode: ProducerMode,
    ) -> Self {
        let (tx, rx): (SyncSender<io::Result<RawHalf>>, _) = sync_channel(2);
        let worker = std::thread::spawn(move || {
            let mut offset: u64 = 0;
            loop {
                let mut buf = vec![0u8; HALF_SIZE];
                match read_fill(&mut reader, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.truncate(n);
                        let sent_offset = offset;
                        offset += n as u64;
                        if tx.send(Ok(RawHalf { offset: sent_offset, data: buf })).is_err() {
                            return;
                        }
                        if n < HALF_SIZE {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
        });

        Self {
            rx,
            worker: Some(worker),
            pending: VecDeque::new(),
            pending_offset: 0,
            source_exhausted: false,
            error: None,
            total_bytes_emitted: 0,
            total_size,
            file_index,
            mode,
            sequence: AtomicU32::new(0),
        }
    }

    /// The producer's mode (single-file or packaged).
    #[must_use]
    pub fn mode(&self) -> ProducerMode {
        self.mode
    }

    fn fill_pending(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        while self.pending.is_empty() && !self.source_exhausted {
            match self.rx.recv() {
                Ok(Ok(half)) => {
                    if self.pending.is_empty() {
                        self.pending_offset = half.offset;
                    }
                    self.pending.extend(half.data);
                }
                Ok(Err(e)) => {
                    self.source_exhausted = true;
                    return Err(e);
                }
                Err(_) => {
                    self.source_exhausted = true;
                }
            }
        }
        Ok(())
    }

    /// Produces up to `n` chunks, each sized from `chunk_size` (clamped to
    /// `[16 KiB, 4 MiB]`, per the congestion controller's recommendation).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying source failed.
    pub fn next_batch(&mut self, n: usize, chunk_size: u32) -> io::Result<Vec<Chunk>> {
        let chunk_size = (chunk_size.clamp(CHUNK_SIZE_MIN, CHUNK_SIZE_MAX)) as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            self.fill_pending()?;
            if self.pending.is_empty() {
                break;
            }
            let take = chunk_size.min(self.pending.len());
            let bytes: Vec<u8> = self.pending.drain(..take).collect();
            let offset = self.pending_offset;
            self.pending_offset += bytes.len() as u64;
            self.total_bytes_emitted += bytes.len() as u64;
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            out.push(Chunk {
                file_index: self.file_index,
                sequence,
                offset,
                bytes,
            });
        }
        Ok(out)
    }

    /// Whether the producer has no more bytes to emit.
    ///
    /// In packaged mode `total_size` is only an upper-bound estimate of the
    /// archive's final length (the packager's framing overhead isn't known
    /// until it closes), so exhaustion there is signaled exclusively by the
    /// source itself running dry, never by reaching the estimate.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        if self.mode == ProducerMode::Packaged {
            return self.pending.is_empty() && self.source_exhausted;
        }
        self.pending.is_empty()
            && (self.source_exhausted
                || self.total_size.is_some_and(|size| self.total_bytes_emitted >= size))
    }
}

impl Drop for ChunkProducer {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn read_fill(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn emits_all_bytes_in_order() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
        let mut producer = ChunkProducer::new(
            Box::new(Cursor::new(data.clone())),
            Some(data.len() as u64),
            0,
            ProducerMode::SingleFile,
        );

        let mut collected = Vec::new();
        while !producer.is_exhausted() {
            let batch = producer.next_batch(4, CHUNK_SIZE_MIN).unwrap();
            if batch.is_empty() {
                break;
            }
            for chunk in batch {
                collected.extend_from_slice(&chunk.bytes);
            }
        }
        assert_eq!(collected, data);
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let data = vec![0u8; CHUNK_SIZE_MIN as usize * 6];
        let mut producer = ChunkProducer::new(
            Box::new(Cursor::new(data.clone())),
            Some(data.len() as u64),
            0,
            ProducerMode::SingleFile,
        );
        let batch = producer.next_batch(6, CHUNK_SIZE_MIN).unwrap();
        let sequences: Vec<u32> = batch.iter().map(|c| c.sequence).collect();
        let mut sorted = sequences.clone();
        sorted.sort_unstable();
        assert_eq!(sequences, sorted);
        assert_eq!(sequences.first().copied(), Some(0));
    }

    #[test]
    fn chunk_size_is_clamped_to_bounds() {
        let data = vec![0u8; 64 * 1024];
        let mut producer = ChunkProducer::new(
            Box::new(Cursor::new(data)),
            Some(64 * 1024),
            0,
            ProducerMode::SingleFile,
        );
        let batch = producer.next_batch(1, 4).unwrap();
        assert_eq!(batch[0].bytes.len(), CHUNK_SIZE_MIN as usize);
    }
}
