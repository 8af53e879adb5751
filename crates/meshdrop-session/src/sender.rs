//! Sender-side room orchestration: admission, batching, and the
//! congestion-paced multicast send loop.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use meshdrop_core::congestion::{CongestionController, SAMPLE_INTERVAL};
use meshdrop_core::frame::FrameCodec;
use meshdrop_files::{ChunkProducer, ProducerMode};
use meshdrop_signaling::PeerId;
use meshdrop_zip::Packager;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::manifest::Manifest;
use crate::peer_link::PeerLink;
use crate::room::{PeerRole, Room};

/// Per-peer send-side session state, per spec §3's ephemeral "Session
/// state": in-flight bytes, an ordered in-flight sequence table, the last
/// acknowledged sequence, high-water-sent, and the last RTT sample.
struct PeerSendState {
    link: Box<dyn PeerLink>,
    codec: Option<FrameCodec>,
    congestion: CongestionController,
    in_flight: BTreeMap<u32, Instant>,
    in_flight_bytes: u64,
    last_ack_sequence: Option<u32>,
    high_water_sent: u64,
    last_rtt_sample: Option<Duration>,
    bytes_acked: u64,
}

/// The driver-supplied local payload behind a manifest: either one file
/// (single-file mode) or an ordered list of `(relative_path, local_path)`
/// pairs to stream into the ZIP64 packager (packaged mode).
#[derive(Debug, Clone)]
enum FileSource {
    Single(PathBuf),
    Zip(Vec<(String, PathBuf)>),
}

/// Owns one room and drives its batch lifecycle: peer admission, the
/// all-ready countdown, the congestion-paced multicast send loop, and
/// disconnect/abort handling.
pub struct SenderSession {
    room: Mutex<Room>,
    peers: DashMap<PeerId, Mutex<PeerSendState>>,
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancellation: CancellationToken,
    file_source: StdMutex<Option<FileSource>>,
}

impl SenderSession {
    /// Opens a new room for `manifest`. Initializes the process-wide packet
    /// pool, per spec §9's "explicit init/teardown" resource model.
    #[must_use]
    pub fn new(manifest: Manifest, config: SessionConfig, events: mpsc::UnboundedSender<SessionEvent>) -> Arc<Self> {
        meshdrop_core::pool::init(64);
        let max_direct_peers = config.max_direct_peers;
        Arc::new(Self {
            room: Mutex::new(Room::new(manifest, max_direct_peers)),
            peers: DashMap::new(),
            config,
            events,
            cancellation: CancellationToken::new(),
            file_source: StdMutex::new(None),
        })
    }

    /// Supplies the local file this sender streams for a single-file
    /// manifest. Must be called before the first batch starts.
    pub fn set_single_file_source(&self, path: PathBuf) {
        *self.file_source.lock().unwrap() = Some(FileSource::Single(path));
    }

    /// Supplies the local files this sender packages for a ZIP-stream
    /// manifest, as `(relative_path, local_path)` pairs in the order they
    /// should appear in the archive. Must be called before the first batch
    /// starts.
    pub fn set_zip_file_sources(&self, files: Vec<(String, PathBuf)>) {
        *self.file_source.lock().unwrap() = Some(FileSource::Zip(files));
    }

    /// The room's short, shareable id.
    pub async fn room_id(&self) -> String {
        self.room.lock().await.id.clone()
    }

    /// A token that, when cancelled, unwinds the active batch's send loop
    /// cooperatively (spec §5: "cancellation is cooperative").
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Admits a peer that joined over signaling, registering its transport
    /// link and emitting [`SessionEvent::PeerJoined`].
    pub async fn admit_peer(&self, peer_id: PeerId, link: Box<dyn PeerLink>, key: Option<[u8; 32]>, prefix: [u8; 4]) {
        let codec = key.map(|k| FrameCodec::new(&k, prefix));
        self.peers.insert(
            peer_id.clone(),
            Mutex::new(PeerSendState {
                link,
                codec,
                congestion: CongestionController::new(),
                in_flight: BTreeMap::new(),
                in_flight_bytes: 0,
                last_ack_sequence: None,
                high_water_sent: 0,
                last_rtt_sample: None,
                bytes_acked: 0,
            }),
        );
        {
            let mut room = self.room.lock().await;
            room.admit(peer_id.clone(), PeerRole::Receiver);
        }
        let _ = self.events.send(SessionEvent::PeerJoined { peer_id });
    }

    /// Marks a peer `Ready` once the manifest has been delivered to it,
    /// then starts (or restarts) the all-ready countdown.
    pub async fn mark_peer_ready(self: &Arc<Self>, peer_id: &str) {
        {
            let mut room = self.room.lock().await;
            room.mark_ready(peer_id);
        }
        self.clone().spawn_countdown_if_needed();
    }

    fn spawn_countdown_if_needed(self: Arc<Self>) {
        tokio::spawn(async move {
            let countdown = Duration::from_millis(self.config.all_ready_countdown_ms);
            let deadline = tokio::time::Instant::now() + countdown;
            loop {
                {
                    let room = self.room.lock().await;
                    if room.ready_batch_is_full() {
                        break;
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                    () = self.cancellation.cancelled() => return,
                }
            }
            if let Err(e) = self.clone().try_start_batch().await {
                warn!(error = %e, "failed to start batch");
            }
        });
    }

    /// Promotes every `Ready` peer into the active batch and spawns the
    /// send loop. A no-op if no peer is currently `Ready`.
    pub async fn try_start_batch(self: Arc<Self>) -> Result<(), SessionError> {
        let promoted = {
            let mut room = self.room.lock().await;
            if !room.has_ready_peer() {
                return Ok(());
            }
            room.start_batch()
        };
        if promoted.is_empty() {
            return Ok(());
        }
        info!(peers = promoted.len(), "starting transfer batch");
        tokio::spawn(async move {
            if let Err(e) = self.clone().run_batch(promoted).await {
                warn!(error = %e, "batch aborted");
                let mut room = self.room.lock().await;
                room.abort();
                let _ = self.events.send(SessionEvent::TransferAborted { reason: e.to_string() });
            }
        });
        Ok(())
    }

    fn build_producer(&self, manifest: &Manifest) -> Result<ChunkProducer, SessionError> {
        let source = self.file_source.lock().unwrap().clone();
        match (manifest.is_zip_stream, source) {
            (false, Some(FileSource::Single(path))) => {
                let file = std::fs::File::open(&path)?;
                Ok(ChunkProducer::new(Box::new(file), Some(manifest.total_size), 0, ProducerMode::SingleFile))
            }
            (true, Some(FileSource::Zip(files))) => {
                let packager = Arc::new(StdMutex::new(Packager::new(32 * 1024 * 1024, 8 * 1024 * 1024)));
                spawn_zip_feeder(Arc::clone(&packager), files);
                let reader = PackagerReader { packager };
                Ok(ChunkProducer::new(Box::new(reader), Some(manifest.total_size), 0xFFFF, ProducerMode::Packaged))
            }
            (false, Some(FileSource::Zip(_))) | (true, Some(FileSource::Single(_))) => Err(
                SessionError::TransferAborted("configured file source does not match the manifest's packaging mode".to_string()),
            ),
            (false, None) => {
                Err(SessionError::TransferAborted("no local file source configured for this sender".to_string()))
            }
            (true, None) => {
                let packager = Arc::new(StdMutex::new(Packager::new(32 * 1024 * 1024, 8 * 1024 * 1024)));
                packager.lock().unwrap().finish()?;
                let reader = PackagerReader { packager };
                Ok(ChunkProducer::new(Box::new(reader), Some(manifest.total_size), 0xFFFF, ProducerMode::Packaged))
            }
        }
    }

    /// Runs one batch: pulls chunks from the chunk producer at a pace set
    /// by the slowest active peer's congestion window, and multicasts each
    /// to every currently-transferring peer.
    async fn run_batch(self: Arc<Self>, peer_ids: Vec<PeerId>) -> Result<(), SessionError> {
        let manifest = { self.room.lock().await.manifest.clone() };
        let mut producer = self.build_producer(&manifest)?;

        let mut active: Vec<PeerId> = peer_ids;
        while !producer.is_exhausted() && !active.is_empty() {
            if self.cancellation.is_cancelled() {
                return Err(SessionError::TransferAborted("cancelled".to_string()));
            }

            let mut any_paused = false;
            let mut min_chunk_size = meshdrop_core::congestion::CHUNK_SIZE_MAX;
            let mut min_batch_size = u32::MAX;
            for peer_id in &active {
                if let Some(peer) = self.peers.get(peer_id) {
                    let mut state = peer.lock().await;
                    let signal = state.congestion.tick(state.link.buffered_amount());
                    if matches!(signal, meshdrop_core::congestion::BackpressureSignal::Paused) || state.congestion.is_paused() {
                        any_paused = true;
                    }
                    min_chunk_size = min_chunk_size.min(state.congestion.current_chunk_size());
                }
            }
            for peer_id in &active {
                if let Some(peer) = self.peers.get(peer_id) {
                    let state = peer.lock().await;
                    min_batch_size = min_batch_size.min(state.congestion.batch_size(min_chunk_size));
                }
            }

            if any_paused {
                tokio::time::sleep(SAMPLE_INTERVAL).await;
                continue;
            }

            let batch_size = min_batch_size.max(1) as usize;
            let chunk_size = min_chunk_size;
            let (result, returned_producer) = tokio::task::spawn_blocking(move || {
                let result = producer.next_batch(batch_size, chunk_size);
                (result, producer)
            })
            .await
            .map_err(|e| SessionError::TransferAborted(e.to_string()))?;
            producer = returned_producer;
            let chunks = result.map_err(SessionError::Io)?;

            if chunks.is_empty() {
                break;
            }

            let mut still_active = Vec::with_capacity(active.len());
            for peer_id in &active {
                let Some(peer) = self.peers.get(peer_id) else { continue };
                let mut state = peer.lock().await;
                let mut ok = true;
                for chunk in &chunks {
                    let frame = match &mut state.codec {
                        Some(codec) => codec
                            .encode(chunk.file_index, chunk.sequence, chunk.offset, &chunk.bytes)
                            .map_err(SessionError::from),
                        None => Ok(plain_frame(chunk)),
                    };
                    let frame = match frame {
                        Ok(f) => f,
                        Err(e) => {
                            warn!(peer = %peer_id, error = %e, "failed to encode frame");
                            ok = false;
                            break;
                        }
                    };
                    let len = chunk.bytes.len() as u64;
                    if state.link.send(frame).await.is_err() {
                        ok = false;
                        break;
                    }
                    state.in_flight.insert(chunk.sequence, Instant::now());
                    state.in_flight_bytes += len;
                    state.high_water_sent = state.high_water_sent.max(chunk.offset + len);
                }
                drop(state);
                if ok {
                    still_active.push(peer_id.clone());
                } else {
                    self.handle_disconnect(peer_id).await;
                }
            }
            active = still_active;
        }

        Ok(())
    }

    /// Records that a peer's transport acknowledged bytes through
    /// `sequence`, feeding an RTT sample to its congestion controller.
    pub async fn record_ack(&self, peer_id: &str, sequence: u32, bytes: u64) {
        let Some(peer) = self.peers.get(peer_id) else { return };
        let mut state = peer.lock().await;
        if let Some(sent_at) = state.in_flight.remove(&sequence) {
            let rtt = sent_at.elapsed();
            state.congestion.on_rtt_sample(rtt);
            state.last_rtt_sample = Some(rtt);
        }
        state.last_ack_sequence = Some(sequence);
        state.in_flight_bytes = state.in_flight_bytes.saturating_sub(bytes);
        state.bytes_acked += bytes;
        let bytes_acked = state.bytes_acked;
        drop(state);

        let total = { self.room.lock().await.manifest.total_size };
        let _ = self.events.send(SessionEvent::Progress {
            peer_id: peer_id.to_string(),
            bytes_transferred: bytes_acked,
            total_bytes: total,
        });

        if bytes_acked >= total {
            let ended_batch = { self.room.lock().await.complete_peer(peer_id) };
            let _ = self.events.send(SessionEvent::PeerComplete {
                peer_id: peer_id.to_string(),
                actual_bytes: bytes_acked,
            });
            if ended_batch {
                self.on_batch_ended().await;
            }
        }
    }

    async fn on_batch_ended(self: &Arc<Self>) {
        let pulled = { self.room.lock().await.advance_after_batch() };
        if pulled.is_empty() {
            let _ = self.events.send(SessionEvent::RoomReadyForNext);
        } else {
            let _ = self.clone().try_start_batch().await;
        }
    }

    /// Handles a mid-batch disconnect: the remaining peers continue; this
    /// peer may later rejoin the queue via [`SenderSession::rejoin_queue`].
    pub async fn handle_disconnect(&self, peer_id: &str) {
        {
            let mut room = self.room.lock().await;
            room.disconnect_peer(peer_id);
        }
        let _ = self.events.send(SessionEvent::PeerDisconnected {
            peer_id: peer_id.to_string(),
        });
    }

    /// Moves a disconnected peer back onto the queue, e.g. after it
    /// reconnects over signaling.
    pub async fn rejoin_queue(&self, peer_id: &str) {
        let mut room = self.room.lock().await;
        room.requeue_disconnected(peer_id);
    }

    /// Aborts the room entirely (spec: "a producer error aborts the
    /// current batch, signals `TransferAborted` to all peers, closes the
    /// room").
    pub async fn abort(&self, reason: &str) {
        {
            let mut room = self.room.lock().await;
            room.abort();
        }
        self.cancellation.cancel();
        let _ = self.events.send(SessionEvent::TransferAborted {
            reason: reason.to_string(),
        });
    }
}

impl Drop for SenderSession {
    fn drop(&mut self) {
        meshdrop_core::pool::shutdown();
    }
}

fn plain_frame(chunk: &meshdrop_files::Chunk) -> Vec<u8> {
    let header = meshdrop_core::frame::FrameHeader {
        file_index: chunk.file_index,
        chunk_sequence: chunk.sequence,
        absolute_offset: chunk.offset,
        payload_len: chunk.bytes.len() as u32,
        crc32: meshdrop_core::frame::crc32(&chunk.bytes),
    };
    let mut out = meshdrop_core::pool::acquire();
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&chunk.bytes);
    out
}

/// Drains a [`Packager`]'s pull-based output as a plain [`Read`], blocking
/// the producer's background thread (never the async runtime) while the
/// feeder thread is still writing entries.
struct PackagerReader {
    packager: Arc<StdMutex<Packager>>,
}

impl Read for PackagerReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let bytes = self.packager.lock().unwrap().pull(buf.len());
            if !bytes.is_empty() {
                buf[..bytes.len()].copy_from_slice(&bytes);
                return Ok(bytes.len());
            }
            if self.packager.lock().unwrap().is_complete() {
                return Ok(0);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Feeds a packager from disk on its own thread: opens each file in order,
/// streams its bytes into the currently-open entry, and respects the
/// packager's own pause/resume backpressure rather than buffering an
/// entire file in memory.
fn spawn_zip_feeder(packager: Arc<StdMutex<Packager>>, files: Vec<(String, PathBuf)>) {
    std::thread::spawn(move || {
        for (relative_path, fs_path) in files {
            let mut file = match std::fs::File::open(&fs_path) {
                Ok(f) => f,
                Err(e) => {
                    warn!(path = %fs_path.display(), error = %e, "failed to open file for packaging");
                    packager.lock().unwrap().abort();
                    return;
                }
            };
            if let Err(e) = packager.lock().unwrap().start_entry(&relative_path) {
                warn!(error = %e, "failed to start zip entry");
                return;
            }
            let mut buf = vec![0u8; 256 * 1024];
            loop {
                let n = match file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "failed reading file for packaging");
                        packager.lock().unwrap().abort();
                        return;
                    }
                };
                while packager.lock().unwrap().should_pause() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                if let Err(e) = packager.lock().unwrap().write_entry_bytes(&buf[..n]) {
                    warn!(error = %e, "failed writing zip entry bytes");
                    return;
                }
            }
            if let Err(e) = packager.lock().unwrap().end_entry() {
                warn!(error = %e, "failed ending zip entry");
                return;
            }
        }
        if let Err(e) = packager.lock().unwrap().finish() {
            warn!(error = %e, "failed finishing zip archive");
        }
    });
}
