//! Beam CLI - Send a file straight to another machine
//!
//! Usage:
//!   beam send <room|link> <file>       Send a file to whoever joins the room
//!   beam send --upload <room> <file>   Store the file on the relay for the room
//!   beam receive <room|link>           Wait in a room and save what arrives
//!   beam link <room>                   Print a share link for a room
//!   beam signal                        Run the relay server
//!   beam config                        Print a sample config file

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use beam_core::{Config, ReceivedFile, RoomId, TransferStrategy};
use beam_peer::{
    connect, download_shared, event_channel, FileTransport, PeerSession, RtcPeerConnection,
    RunnerOptions, SessionConfig, SessionEvent, SessionHandle, SessionRunner, SessionState,
    SessionStatus, TransferSummary, UploadTransport,
};
use beam_signal::SignalServer;

/// How long the sender waits for the receiver to hang up after the last frame
const SEND_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "beam")]
#[command(about = "Direct peer-to-peer file transfer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Relay URL, overrides the config file
    #[arg(short, long, global = true, env = "BEAM_SIGNAL_URL")]
    signal: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// Room id or share link
        room: String,

        /// File to send
        file: PathBuf,

        /// Store the file on the relay instead of sending it peer to peer
        #[arg(long)]
        upload: bool,
    },

    /// Receive files
    Receive {
        /// Room id or share link
        room: String,

        /// Directory to save into (default: from config, else current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of files to receive before exiting
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// Print a share link for a room
    Link {
        /// Room id
        room: String,

        /// Base URL of the link
        #[arg(long, default_value = "https://localhost/")]
        base: String,
    },

    /// Run the relay server
    Signal {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,

        /// Maximum members per room
        #[arg(long)]
        max_members: Option<usize>,
    },

    /// Print a sample configuration file
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(url) = cli.signal {
        config.peer.signal_url = url;
    }

    match cli.command {
        Commands::Send { room, file, upload } => {
            if upload {
                config.transfer.strategy = TransferStrategy::Upload;
            }
            run_send(config, &room, &file).await
        }
        Commands::Receive { room, out, count } => run_receive(config, &room, out, count).await,
        Commands::Link { room, base } => {
            let room = RoomId::from_link(&room)?;
            println!("{}", room.share_link(&base)?);
            Ok(())
        }
        Commands::Signal {
            port,
            bind,
            max_members,
        } => run_signal(config, port, bind, max_members).await,
        Commands::Config => {
            print!("{}", Config::sample());
            Ok(())
        }
    }
}

/// Connect to the relay, build the peer connection and start the runner
async fn start_session(config: &Config, room: RoomId) -> Result<(SessionHandle, JoinHandle<SessionState>)> {
    let (events_tx, events_rx) = event_channel();
    let connection = RtcPeerConnection::new(config.peer.ice_servers.clone(), events_tx)
        .await
        .context("failed to create peer connection")?;
    let signal = connect(&config.peer.signal_url)
        .await
        .with_context(|| format!("failed to reach relay at {}", config.peer.signal_url))?;

    let session = PeerSession::new(SessionConfig::from_config(config));
    let (runner, handle) = SessionRunner::new(
        session,
        Arc::new(connection),
        events_rx,
        signal,
        RunnerOptions::from_config(config),
    );
    Ok((handle, tokio::spawn(runner.run(room))))
}

async fn run_send(config: Config, room: &str, file: &Path) -> Result<()> {
    let room = RoomId::from_link(room)?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("path has no file name")?;
    let data = Bytes::from(
        tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read {:?}", file))?,
    );

    if config.transfer.strategy == TransferStrategy::Upload {
        let base = config.peer.upload_base()?;
        let summary = UploadTransport::new(base.clone(), room.clone())
            .send_file(&name, data)
            .await?;
        log_summary("Uploaded", &summary);
        if let Some(location) = &summary.location {
            info!("Room {} can fetch it from {}", room, base.join(location)?);
        }
        return Ok(());
    }

    info!("Sending '{}' ({} bytes) in room {}", name, data.len(), room);
    let (mut handle, task) = start_session(&config, room.clone()).await?;
    info!("Waiting for a peer, share with: beam receive {}", room);

    tokio::select! {
        result = handle.wait_connected() => result?,
        _ = signal::ctrl_c() => {
            info!("Shutting down...");
            handle.close().await;
            task.await?;
            return Ok(());
        }
    }

    let summary = handle.send_file(name, data).await?;
    log_summary("Sent", &summary);

    // The receiver leaves once it has the whole file
    let hangup = async {
        while let Some(event) = handle.next_event().await {
            match event {
                SessionEvent::Status(SessionStatus::PeerDisconnected) => break,
                SessionEvent::Status(status) if status.is_terminal() => break,
                other => debug!("Ignoring {:?}", other),
            }
        }
    };
    if tokio::time::timeout(SEND_GRACE, hangup).await.is_err() {
        warn!("Receiver did not hang up within {:?}", SEND_GRACE);
    }

    handle.close().await;
    task.await?;
    Ok(())
}

async fn run_receive(config: Config, room: &str, out: Option<PathBuf>, count: usize) -> Result<()> {
    let room = RoomId::from_link(room)?;
    let out = out.unwrap_or_else(|| config.download_dir());
    tokio::fs::create_dir_all(&out)
        .await
        .with_context(|| format!("failed to create {:?}", out))?;

    info!("Waiting for files in room {}, saving to {:?}", room, out);
    let (mut handle, task) = start_session(&config, room).await?;

    let mut received = 0;
    let mut failure = None;
    loop {
        let event = tokio::select! {
            event = handle.next_event() => event,
            _ = signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        };
        let Some(event) = event else { break };

        match event {
            SessionEvent::TransferStarted { name, size } => {
                info!("Receiving '{}' ({} bytes)", name, size);
            }
            SessionEvent::TransferProgress { received, total } => {
                debug!("{}/{} bytes", received, total);
            }
            SessionEvent::FileReceived(file) => {
                save_file(&out, &file).await?;
                received += 1;
                if received >= count {
                    break;
                }
            }
            SessionEvent::FileShared(shared) => {
                let base = match config.peer.upload_base() {
                    Ok(base) => base,
                    Err(e) => {
                        warn!("Cannot fetch '{}': {}", shared.originalname, e);
                        continue;
                    }
                };
                info!("Fetching '{}' from the relay", shared.originalname);
                match download_shared(&base, &shared, config.transfer.max_incoming_bytes).await {
                    Ok(file) => {
                        save_file(&out, &file).await?;
                        received += 1;
                        if received >= count {
                            break;
                        }
                    }
                    Err(e) => warn!("Download of '{}' failed: {}", shared.originalname, e),
                }
            }
            SessionEvent::TransferFailed(e) => warn!("Transfer failed: {}", e),
            SessionEvent::Status(SessionStatus::Closed) => break,
            SessionEvent::Status(status) if status.is_terminal() => {
                failure = Some(status);
                break;
            }
            SessionEvent::Status(status) => info!("Status: {}", status),
        }
    }

    handle.close().await;
    task.await?;

    if let Some(status) = failure {
        error!("Session ended: {}", status);
        bail!("session ended: {}", status);
    }
    Ok(())
}

fn log_summary(verb: &str, summary: &TransferSummary) {
    info!(
        "{} '{}': {} bytes in {:.1?} ({:.1} KiB/s)",
        verb,
        summary.name,
        summary.bytes,
        summary.elapsed,
        summary.rate() / 1024.0
    );
}

async fn save_file(out: &Path, file: &ReceivedFile) -> Result<PathBuf> {
    let path = out.join(safe_file_name(&file.name));
    tokio::fs::write(&path, &file.data)
        .await
        .with_context(|| format!("failed to write {:?}", path))?;
    info!("Saved {:?} ({} bytes)", path, file.data.len());
    Ok(path)
}

/// Keep only the final path component of a sender-supplied name
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "received.bin".into())
}

async fn run_signal(
    mut config: Config,
    port: Option<u16>,
    bind: Option<String>,
    max_members: Option<usize>,
) -> Result<()> {
    if let Some(port) = port {
        config.signal.port = port;
    }
    if let Some(bind) = bind {
        config.signal.bind = bind.parse::<IpAddr>().context("invalid bind address")?;
    }
    if let Some(max_members) = max_members {
        config.signal.max_members_per_room = max_members;
    }
    config.validate()?;
    let addr = SocketAddr::new(config.signal.bind, config.signal.port);

    info!("Starting Beam signal server...");
    info!("  Listening on: ws://{}", addr);
    info!("  Uploads in:   {:?}", config.signal.upload_dir);

    let server = SignalServer::from_config(&config.signal);

    // Handle Ctrl+C
    tokio::select! {
        result = server.serve(addr) => {
            if let Err(e) = result {
                error!("Signal server error: {:?}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
