//! `meshdrop` - command-line driver for the peer-to-peer file-transfer
//! engine: room creation/joining over signaling, and an in-process `--demo`
//! mode that drives a full send→receive cycle over a loopback link so the
//! engine can be exercised without a real transport plugin.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use meshdrop_core::error::ErrorCategory;
use meshdrop_core::frame::FrameCodec;
use meshdrop_session::loopback::LoopbackLink;
use meshdrop_session::{generate_room_id, EncryptionConfig, FileEntry, Manifest, PeerLink, ReceiverSession, SenderSession, SessionError, SessionEvent};
use meshdrop_signaling::{SignalingMessage, SignalingTransport, WebSocketSignalingTransport};
use rand::RngCore;
use tokio::sync::mpsc;
use tracing::{info, warn};

use meshdrop_cli::config::Config;
use meshdrop_cli::progress::{format_bytes, TransferProgress};

/// meshdrop - peer-to-peer bulk file transfer
#[derive(Parser)]
#[command(name = "meshdrop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/meshdrop/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file or directory
    Send {
        /// Path to the file or directory to send
        #[arg(required = true)]
        path: String,

        /// Run an in-process send→receive demo over a loopback link instead
        /// of connecting to a signaling server
        #[arg(long)]
        demo: bool,

        /// Demo-only: directory the in-process receiver writes into
        #[arg(long, default_value = "./meshdrop-demo-out")]
        demo_output: String,

        /// Seal payloads with AES-256-GCM using a freshly generated session key
        #[arg(long)]
        encrypt: bool,
    },

    /// Join a room over signaling and wait for peers
    Receive {
        /// Room id announced by the sender
        #[arg(long)]
        room: String,

        /// Directory received files are written into
        #[arg(short, long, default_value = ".")]
        output: String,
    },

    /// Generate a fresh AES-256-GCM session key and nonce prefix
    Keygen {
        /// TOML file to save the generated key/prefix to
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show the active configuration
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_env_filter(if cli.verbose { "debug" } else { "info" }).init();

    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config_path = PathBuf::from(shellexpand_home(&cli.config));
    let config = if config_path.exists() {
        Config::load(&config_path)
    } else if config_path == Config::default_path() {
        Config::load_or_default()
    } else {
        Config::load(&config_path)
    };

    let config = match config.and_then(|c| c.validate().map(|()| c)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 5;
        }
    };

    let result = match cli.command {
        Commands::Send { path, demo, demo_output, encrypt } => {
            send_command(PathBuf::from(path), demo, PathBuf::from(demo_output), encrypt, &config).await
        }
        Commands::Receive { room, output } => receive_command(room, PathBuf::from(output), &config).await,
        Commands::Keygen { output } => keygen_command(output),
        Commands::Status => status_command(&config),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    }
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

/// Maps a driver-surfaced error to the exit/result codes a programmatic
/// driver reports: connectivity failures are "network unreachable",
/// authentication/protocol failures are "unauthorized", and everything
/// else that isn't a deliberate abort falls back to "internal".
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(session_err) = err.downcast_ref::<SessionError>() {
        return match session_err.category() {
            ErrorCategory::Connectivity => 3,
            ErrorCategory::Protocol => 4,
            ErrorCategory::Logical => 2,
            ErrorCategory::Resource | ErrorCategory::Fatal => 5,
        };
    }
    5
}

async fn send_command(path: PathBuf, demo: bool, demo_output: PathBuf, encrypt: bool, config: &Config) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("path not found: {}", path.display());
    }

    let transfer_id = generate_room_id();
    let piece_size = config.session.piece_size;

    let (manifest, single_path, zip_files) = if path.is_dir() {
        let entries = collect_directory(&path)?;
        let root_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "archive".to_string());
        let mut file_entries = Vec::with_capacity(entries.len());
        let mut zip_files = Vec::with_capacity(entries.len());
        let mut total_size = 0u64;
        for (index, (relative_path, fs_path, size)) in entries.into_iter().enumerate() {
            let mime_type = mime_guess::from_path(&fs_path).first_or_octet_stream().essence_str().to_string();
            total_size += size;
            file_entries.push(FileEntry {
                index: index as u16,
                relative_path: relative_path.clone(),
                size,
                mime_type,
                last_modified: None,
                sha256: None,
            });
            zip_files.push((relative_path, fs_path));
        }
        // STORE-mode ZIP64 overhead: local/central-directory headers per
        // entry plus the end-of-central-directory record.
        let estimate = total_size + (file_entries.len() as u64) * 128 + 64;
        let manifest = Manifest::zip_stream(transfer_id, root_name, file_entries, estimate, piece_size);
        (manifest, None, Some(zip_files))
    } else {
        let metadata = std::fs::metadata(&path)?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "file".to_string());
        let mime_type = mime_guess::from_path(&path).first_or_octet_stream().essence_str().to_string();
        let manifest = Manifest::single_file(transfer_id, name, metadata.len(), mime_type, piece_size);
        (manifest, Some(path.clone()), None)
    };

    let mut session_config = config.session.clone();
    let (key, prefix) = if encrypt {
        let mut key = [0u8; 32];
        let mut prefix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut key);
        rand::thread_rng().fill_bytes(&mut prefix);
        session_config.encryption = Some(EncryptionConfig { key_hex: hex::encode(key), prefix_hex: hex::encode(prefix) });
        println!("Session key:    {}", hex::encode(key));
        println!("Nonce prefix:   {}", hex::encode(prefix));
        println!("Share these with the receiver out of band; they are not sent over signaling.");
        (Some(key), prefix)
    } else {
        (None, [0u8; 4])
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let sender = SenderSession::new(manifest.clone(), session_config.clone(), events_tx);
    if let Some(single_path) = single_path {
        sender.set_single_file_source(single_path);
    }
    if let Some(zip_files) = zip_files {
        sender.set_zip_file_sources(zip_files);
    }

    let room_id = sender.room_id().await;
    println!("Room:           {room_id}");
    println!("Transfer:       {} ({})", manifest.root_name, format_bytes(manifest.total_size));

    tokio::spawn(log_events("sender", events_rx));

    if demo {
        run_demo(sender, manifest, demo_output, key, prefix, config.session.max_pending_requests).await
    } else {
        announce_over_signaling(&config.signaling_url, &room_id).await
    }
}

/// Drives a complete send→receive cycle in-process over a loopback link, so
/// the engine can be proven end to end without a real transport plugin.
async fn run_demo(
    sender: std::sync::Arc<SenderSession>,
    manifest: Manifest,
    output_dir: PathBuf,
    key: Option<[u8; 32]>,
    prefix: [u8; 4],
    max_pending_requests: usize,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(&output_dir)?;

    let (recv_events_tx, recv_events_rx) = mpsc::unbounded_channel();
    let receiver = ReceiverSession::open(manifest.clone(), &output_dir, max_pending_requests, recv_events_tx)?;
    tokio::spawn(log_events("receiver", recv_events_rx));

    let (link_a, mut link_b) = LoopbackLink::pair();
    let peer_id = "demo-receiver".to_string();

    sender.admit_peer(peer_id.clone(), Box::new(link_a), key, prefix).await;
    receiver.add_source(peer_id.clone(), key.map(|k| FrameCodec::new(&k, prefix)));
    sender.mark_peer_ready(&peer_id).await;
    std::sync::Arc::clone(&sender).try_start_batch().await?;

    let progress = TransferProgress::new(manifest.total_size, &manifest.root_name);
    let mut remote_counter = 0u64;
    loop {
        let frame = link_b.recv().await?;
        let header = meshdrop_core::frame::FrameHeader::from_bytes(&frame).map_err(SessionError::from)?;
        receiver.on_wire_frame(&peer_id, remote_counter, &frame).await?;
        sender.record_ack(&peer_id, remote_counter as u32, u64::from(header.payload_len)).await;
        remote_counter += 1;
        if receiver.is_complete().await {
            break;
        }
    }
    progress.finish_with_message(format!("{} received", manifest.root_name));

    let received_bytes = receiver.finish(&peer_id).await?;
    println!("Received {} into {}", format_bytes(received_bytes), output_dir.display());
    Ok(())
}

async fn announce_over_signaling(signaling_url: &str, room_id: &str) -> anyhow::Result<()> {
    let mut transport = WebSocketSignalingTransport::connect(signaling_url).await.map_err(SessionError::from)?;
    transport.send(&SignalingMessage::JoinRoom { room_id: room_id.to_string() }).await.map_err(SessionError::from)?;
    println!("Connected to {signaling_url}, announcing room {room_id}.");
    println!("Waiting for peers to join. Actual payload delivery requires a PeerLink transport plugin,");
    println!("which is outside this engine's scope; this driver only coordinates room membership.");

    loop {
        tokio::select! {
            message = transport.recv() => {
                match message.map_err(SessionError::from)? {
                    SignalingMessage::PeerJoined { peer_id } => println!("peer joined: {peer_id}"),
                    SignalingMessage::Error { message } => warn!(message, "signaling server reported an error"),
                    other => info!(?other, "signaling message"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                transport.send(&SignalingMessage::LeaveRoom { room_id: room_id.to_string() }).await.ok();
                println!("\nLeaving room {room_id}.");
                return Ok(());
            }
        }
    }
}

async fn receive_command(room: String, output: PathBuf, config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&output)?;

    let mut transport = WebSocketSignalingTransport::connect(&config.signaling_url).await.map_err(SessionError::from)?;
    transport.send(&SignalingMessage::JoinRoom { room_id: room.clone() }).await.map_err(SessionError::from)?;

    let assigned = transport.recv().await.map_err(SessionError::from)?;
    if let SignalingMessage::RoomJoined { peer_id, .. } = assigned {
        println!("Joined room {room} as {peer_id}.");
    } else {
        warn!(?assigned, "expected RoomJoined, got a different message");
    }

    println!("Output directory: {}", output.display());
    println!("Waiting for the sender's manifest. Actual payload delivery requires a PeerLink");
    println!("transport plugin, which is outside this engine's scope.");
    println!("Press Ctrl+C to stop.");

    tokio::select! {
        message = transport.recv() => {
            if let Ok(m) = message {
                info!(?m, "signaling message");
            }
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    println!("\nShutting down.");
    Ok(())
}

fn keygen_command(output: Option<String>) -> anyhow::Result<()> {
    let mut key = [0u8; 32];
    let mut prefix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    rand::thread_rng().fill_bytes(&mut prefix);

    let config = EncryptionConfig { key_hex: hex::encode(key), prefix_hex: hex::encode(prefix) };
    println!("Session key:  {}", config.key_hex);
    println!("Nonce prefix: {}", config.prefix_hex);

    if let Some(path) = output {
        let output_path = PathBuf::from(path);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&output_path, toml::to_string_pretty(&config)?)?;
        println!("Saved to: {}", output_path.display());
    } else {
        println!("Not saved (use --output to save as TOML).");
    }

    Ok(())
}

fn status_command(config: &Config) -> anyhow::Result<()> {
    println!("meshdrop status");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Signaling:");
    println!("  URL: {}", config.signaling_url);
    println!();
    println!("Transfer:");
    println!("  Piece size:          {}", format_bytes(u64::from(config.session.piece_size)));
    println!("  Max direct peers:    {}", config.session.max_direct_peers);
    println!("  Max pending/peer:    {}", config.session.max_pending_requests);
    println!("  Chunk size range:    {} - {}", format_bytes(u64::from(config.session.chunk_size_min)), format_bytes(u64::from(config.session.chunk_size_max)));
    println!("  Congestion window:   {} (min {}, max {})", format_bytes(config.session.cwnd_initial), format_bytes(config.session.cwnd_min), format_bytes(config.session.cwnd_max));
    println!("  Backpressure marks:  low {} / high {}", format_bytes(config.session.low_water_mark), format_bytes(config.session.high_water_mark));
    println!("  Encryption default:  {}", if config.session.encryption.is_some() { "on" } else { "off" });
    println!();
    println!("Output directory: {}", config.output_dir.display());
    Ok(())
}

async fn log_events(role: &'static str, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Progress { peer_id, bytes_transferred, total_bytes } => {
                info!(role, peer = %peer_id, bytes_transferred, total_bytes, "progress");
            }
            SessionEvent::PeerComplete { peer_id, actual_bytes } => {
                info!(role, peer = %peer_id, actual_bytes, "peer complete");
            }
            other => info!(role, event = ?other, "session event"),
        }
    }
}

/// Recursively lists every file under `root`, returning
/// `(relative_path, absolute_path, size)` triples sorted by relative path
/// for a deterministic manifest ordering.
fn collect_directory(root: &Path) -> anyhow::Result<Vec<(String, PathBuf, u64)>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let relative = path.strip_prefix(root)?.to_string_lossy().replace('\\', "/");
                let size = entry.metadata()?.len();
                out.push((relative, path, size));
            }
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}
