use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::client::worker::{DownloadState, FileSink, Worker};
use crate::file::TorrentFile;
use crate::peer::connection::{dial, ConnectionError, PeerConnection, Timeouts};
use crate::peer::PeerId;
use crate::tracker::{AnnounceParameters, TrackerClient, TrackerError};
use crate::util::to_hex;

pub mod piece;
pub mod worker;

pub(crate) type Result<T> = std::result::Result<T, DownloadError>;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),
    #[error("Peer connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Tracker returned no peers")]
    NoPeers,
    #[error("Piece {piece} failed verification, expected hash {expected}, but got {actual}")]
    Integrity {
        piece: u32,
        expected: String,
        actual: String,
    },
    #[error("Piece index {0} is out of range")]
    PieceOutOfRange(usize),
    #[error("Piece {0} does not fit the peer wire offsets")]
    PieceTooLarge(usize),
    #[error("Piece sink is closed")]
    SinkClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port reported to the tracker.
    pub port: u16,
    pub connect_timeout: Duration,
    pub io_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6881,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl Config {
    fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            io: self.io_timeout,
        }
    }
}

pub struct Client {
    peer_id: PeerId,
    config: Config,
    tracker_client: Box<dyn TrackerClient>,
}

impl Client {
    pub fn new(peer_id: PeerId, config: Config, tracker_client: Box<dyn TrackerClient>) -> Self {
        Self {
            peer_id,
            config,
            tracker_client,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Downloads the torrent from the first peer the tracker returns and
    /// writes it to `destination/<name>`. Returns the path of the written file.
    pub fn download(&self, torrent: &TorrentFile, destination: &Path) -> Result<PathBuf> {
        let info = &torrent.info;
        info!(
            name = %info.name,
            info_hash = %to_hex(&info.info_hash),
            pieces = info.piece_count(),
            "starting download"
        );
        let path = destination.join(&info.name);
        let mut worker = Worker::new(info);
        match self.start(&mut worker, torrent, &path) {
            Ok(()) => {
                info!(path = %path.display(), "file written");
                Ok(path)
            }
            Err(error) => {
                if worker.state() != DownloadState::Failed {
                    worker.fail(&error);
                }
                Err(error)
            }
        }
    }

    fn start(&self, worker: &mut Worker, torrent: &TorrentFile, path: &Path) -> Result<()> {
        let info = &torrent.info;
        let mut params = AnnounceParameters::new(&info.info_hash);
        params.set_port(self.config.port).set_left(info.length);
        let response = self.tracker_client.announce(&torrent.announce, params)?;
        let peer = response.peers.first().ok_or(DownloadError::NoPeers)?;
        info!(peers = response.peers.len(), %peer, "peers resolved");
        worker.advance(DownloadState::PeersResolved);

        let stream = dial(&peer.addr, self.config.timeouts())?;
        worker.advance(DownloadState::Connected);
        let mut connection = PeerConnection::handshake(stream, &info.info_hash, &self.peer_id)?;
        info!(remote_peer_id = %connection.remote_peer_id(), "handshake done");
        worker.advance(DownloadState::Handshaked);

        let mut sink = FileSink::new(path.to_path_buf());
        let result = worker.run(&mut connection, &mut sink);
        connection.close();
        result
    }
}
