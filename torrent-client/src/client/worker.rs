use bytes::BytesMut;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::client::piece::{plan_blocks, Piece};
use crate::client::{DownloadError, Result};
use crate::file::Info;
use crate::peer::connection::PeerConnection;

/// Progress of one download, from tracker announce to the last written piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Init,
    PeersResolved,
    Connected,
    Handshaked,
    Downloading { piece: u32, block: u32 },
    Verifying(u32),
    Writing(u32),
    Complete,
    Failed,
}

/// Destination of verified pieces, fed strictly in index order.
pub trait PieceSink {
    fn write_piece(&mut self, piece: Piece) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl PieceSink for Vec<u8> {
    fn write_piece(&mut self, piece: Piece) -> Result<()> {
        self.extend_from_slice(&piece.data);
        Ok(())
    }
}

impl PieceSink for mpsc::Sender<Piece> {
    fn write_piece(&mut self, piece: Piece) -> Result<()> {
        self.send(piece).map_err(|_| DownloadError::SinkClosed)
    }
}

/// Appends pieces to a file, created together with its parent directories
/// when the first piece arrives.
pub struct FileSink {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    fn file(&mut self) -> Result<&mut BufWriter<File>> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            debug!(path = %self.path.display(), "creating output file");
            self.file = Some(BufWriter::new(File::create(&self.path)?));
        }
        self.file.as_mut().ok_or(DownloadError::SinkClosed)
    }
}

impl PieceSink for FileSink {
    fn write_piece(&mut self, piece: Piece) -> Result<()> {
        self.file()?.write_all(&piece.data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // An empty torrent still produces its (empty) file.
        self.file()?.flush()?;
        Ok(())
    }
}

/// Drives the download pipeline for one torrent.
pub struct Worker<'a> {
    info: &'a Info,
    state: DownloadState,
}

impl<'a> Worker<'a> {
    pub fn new(info: &'a Info) -> Self {
        Self {
            info,
            state: DownloadState::Init,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub(crate) fn advance(&mut self, state: DownloadState) {
        trace!(from = ?self.state, to = ?state, "download state");
        self.state = state;
    }

    pub(crate) fn fail(&mut self, error: &DownloadError) {
        warn!(state = ?self.state, %error, "download failed");
        self.state = DownloadState::Failed;
    }

    /// Fetches every piece over a handshaked connection and hands them to
    /// `sink` after verification. A corrupt piece aborts the run before it
    /// reaches the sink.
    pub fn run<S, P>(&mut self, connection: &mut PeerConnection<S>, sink: &mut P) -> Result<()>
    where
        S: Read + Write,
        P: PieceSink,
    {
        let result = self.fetch_all(connection, sink);
        if let Err(error) = &result {
            self.fail(error);
        }
        result
    }

    fn fetch_all<S, P>(&mut self, connection: &mut PeerConnection<S>, sink: &mut P) -> Result<()>
    where
        S: Read + Write,
        P: PieceSink,
    {
        let bitfield = connection.read_bitfield()?;
        debug!(bytes = bitfield.len(), "bitfield received");
        connection.send_interested()?;
        connection.read_unchoke()?;
        debug!("unchoked by peer");

        for index in 0..self.info.piece_count() {
            let piece = self.fetch_piece(connection, index)?;

            self.advance(DownloadState::Verifying(piece.index));
            let expected = self
                .info
                .piece_hash(index)
                .ok_or(DownloadError::PieceOutOfRange(index))?;
            piece.verify(expected)?;

            self.advance(DownloadState::Writing(piece.index));
            debug!(piece = piece.index, bytes = piece.data.len(), "piece verified");
            sink.write_piece(piece)?;
        }
        sink.finish()?;

        self.advance(DownloadState::Complete);
        info!(
            pieces = self.info.piece_count(),
            bytes = self.info.length,
            "download complete"
        );
        Ok(())
    }

    fn fetch_piece<S: Read + Write>(
        &mut self,
        connection: &mut PeerConnection<S>,
        index: usize,
    ) -> Result<Piece> {
        let piece_index = u32::try_from(index).map_err(|_| DownloadError::PieceOutOfRange(index))?;
        let size = u32::try_from(self.info.piece_size(index))
            .map_err(|_| DownloadError::PieceTooLarge(index))?;
        let mut data = BytesMut::with_capacity(size as usize);

        for (block_index, block) in plan_blocks(size).enumerate() {
            self.advance(DownloadState::Downloading {
                piece: piece_index,
                block: block_index as u32,
            });
            let bytes = connection.request_block(piece_index, block.begin, block.length)?;
            data.extend_from_slice(&bytes);
        }
        Ok(Piece::new(piece_index, data.freeze()))
    }
}
