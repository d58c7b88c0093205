//! Beam Signal Server
//!
//! # Usage
//!
//! ```bash
//! beam-signal --port 5000
//!
//! # Settings from a config file, flags still win
//! beam-signal --config ./beam.toml --max-members 2
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use beam_core::Config;
use beam_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "beam-signal")]
#[command(about = "Beam relay server for peer discovery")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Maximum members per room
    #[arg(long)]
    max_members: Option<usize>,

    /// Directory uploaded files are stored in
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    if let Some(port) = args.port {
        config.signal.port = port;
    }
    if let Some(bind) = &args.bind {
        config.signal.bind = bind.parse::<IpAddr>()?;
    }
    if let Some(max_members) = args.max_members {
        config.signal.max_members_per_room = max_members;
    }
    if let Some(upload_dir) = args.upload_dir {
        config.signal.upload_dir = upload_dir;
    }
    config.validate()?;

    let addr = SocketAddr::new(config.signal.bind, config.signal.port);

    info!("Starting Beam Signal Server");
    info!(
        "Listening on {} (max {} members per room, uploads in {:?})",
        addr, config.signal.max_members_per_room, config.signal.upload_dir
    );

    let server = SignalServer::from_config(&config.signal);
    server.serve(addr).await?;

    Ok(())
}
