use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use torrent_client::peer::PeerId;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Path to a single-file .torrent
    pub torrent_file: PathBuf,

    /// Directory the downloaded file is written to
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Port reported to the tracker
    #[arg(short, long, default_value_t = 6881)]
    pub port: u16,

    /// Seconds to wait for the peer TCP connection
    #[arg(long, default_value_t = 5)]
    pub connect_timeout: u64,

    /// Seconds a single socket read or write may block, 0 disables the deadline
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// 20 byte peer id, generated when absent
    #[arg(long, value_parser = parse_peer_id, allow_hyphen_values = true)]
    pub peer_id: Option<PeerId>,

    /// Increase logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    pub fn log_level(&self) -> Level {
        if self.quiet {
            return Level::WARN;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

fn parse_peer_id(value: &str) -> Result<PeerId, String> {
    PeerId::try_from(value.as_bytes())
        .map_err(|_| format!("peer id must be exactly 20 bytes, got {}", value.len()))
}
