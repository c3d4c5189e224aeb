use std::path::PathBuf;

use clap::Parser;
use storrent::{config::cfg::Cfg, engine::engine::Engine, torrent_parser::parser::TorrentParser};
use tracing::{error, info};

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    file: String,
    #[arg(short, long)]
    config: String,
}

#[tokio::main]
async fn main() {
    // install global collector configured based on RUST_LOG env var.
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let file_path = PathBuf::from(args.file.trim());
    let config_path = args.config.trim();

    let config = Cfg::new(config_path).expect("Config file not found or invalid");
    let torrent = TorrentParser::parse(&file_path).expect("parser could not read the torrent file");

    let engine = Engine::new(config);
    let mut state = engine
        .add_torrent(torrent)
        .expect("torrent could not be added");

    let acceptor = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = acceptor.run_acceptor().await {
            error!("acceptor failed: {:?}", e);
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                engine.shutdown().await;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow().clone();
                info!(
                    torrent = %snapshot.name,
                    downloaded = snapshot.downloaded_bytes,
                    total = snapshot.total_bytes,
                    peers = snapshot.connected_peers,
                    complete = snapshot.complete,
                    "state"
                );
                if let Some(message) = snapshot.error {
                    error!(torrent = %snapshot.name, "error: {}", message);
                }
            }
        }
    }
}
