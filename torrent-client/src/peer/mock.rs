//! Scripted in-memory peer for connection and download tests.

use bytes::{BufMut, BytesMut};
use std::io::{Cursor, Read, Write};

use crate::peer::connection::BIT_TORRENT_PROTOCOL_STRING;
use crate::peer::message::MessageId;
use crate::peer::PeerId;
use crate::util::Sha1;

/// Replays prepared peer bytes and records everything written to it.
pub(crate) struct MockStream {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl MockStream {
    pub(crate) fn output(&self) -> &[u8] {
        &self.output
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Builder for the byte stream a remote peer sends.
#[derive(Default)]
pub(crate) struct PeerScript {
    data: BytesMut,
}

impl PeerScript {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handshake(mut self, info_hash: &Sha1, peer_id: &PeerId) -> Self {
        self.data.put_u8(19);
        self.data.extend_from_slice(BIT_TORRENT_PROTOCOL_STRING);
        self.data.extend_from_slice(&[0; 8]);
        self.data.extend_from_slice(info_hash);
        self.data.extend_from_slice(peer_id.as_ref());
        self
    }

    pub(crate) fn frame(mut self, id: MessageId, payload: &[u8]) -> Self {
        self.data.put_u32(1 + payload.len() as u32);
        self.data.put_u8(id as u8);
        self.data.extend_from_slice(payload);
        self
    }

    pub(crate) fn bitfield(self, bitfield: &[u8]) -> Self {
        self.frame(MessageId::Bitfield, bitfield)
    }

    pub(crate) fn unchoke(self) -> Self {
        self.frame(MessageId::Unchoke, &[])
    }

    pub(crate) fn keep_alive(mut self) -> Self {
        self.data.put_u32(0);
        self
    }

    pub(crate) fn piece(self, index: u32, begin: u32, block: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(8 + block.len());
        payload.put_u32(index);
        payload.put_u32(begin);
        payload.extend_from_slice(block);
        self.frame(MessageId::Piece, &payload)
    }

    /// Answers every block request of a sequential download of `content`.
    pub(crate) fn serve(mut self, content: &[u8], piece_length: usize, block_size: usize) -> Self {
        for (index, piece) in content.chunks(piece_length).enumerate() {
            for (block_index, block) in piece.chunks(block_size).enumerate() {
                self = self.piece(index as u32, (block_index * block_size) as u32, block);
            }
        }
        self
    }

    pub(crate) fn raw(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.data.to_vec()
    }

    pub(crate) fn into_stream(self) -> MockStream {
        MockStream {
            input: Cursor::new(self.data.to_vec()),
            output: Vec::new(),
        }
    }
}
