use anyhow::{Context, Result};
use bencode::from_bencode::FromBencode;
use clap::Parser;
use std::time::Duration;
use torrent_client::client::{Client, Config};
use torrent_client::file::TorrentFile;
use torrent_client::peer::PeerId;
use torrent_client::tracker::HttpTracker;
use torrent_client::util::to_hex;
use tracing::{debug, info};

mod cli;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .compact()
        .init();

    let data = std::fs::read(&args.torrent_file)
        .with_context(|| format!("failed to read {}", args.torrent_file.display()))?;
    let torrent = TorrentFile::from_bytes(&data)
        .with_context(|| format!("invalid torrent file {}", args.torrent_file.display()))?;
    info!(
        name = %torrent.info.name,
        length = torrent.info.length,
        info_hash = %to_hex(&torrent.info.info_hash),
        "torrent loaded"
    );

    let peer_id = args.peer_id.clone().unwrap_or_else(PeerId::generate);
    debug!(%peer_id, "local peer id");
    let config = Config {
        port: args.port,
        connect_timeout: Duration::from_secs(args.connect_timeout),
        io_timeout: args.io_timeout(),
    };
    let tracker = HttpTracker::new(&peer_id, config.io_timeout)?;
    let client = Client::new(peer_id, config, Box::new(tracker));

    let path = client
        .download(&torrent, &args.output)
        .with_context(|| format!("failed to download {}", torrent.info.name))?;
    println!("Downloaded {} to {}", torrent.info.name, path.display());
    Ok(())
}
