use crate::peer::connection::HandshakeError::{InfoHashMismatch, ProtocolString, ProtocolStringLen};
use crate::peer::message::{Block, Frame, MessageId, MAX_FRAME_LEN};
use crate::peer::PeerId;
use crate::util::{to_hex, Sha1};
use bytes::{Bytes, BytesMut};
use std::io;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

type Result<T> = std::result::Result<T, ConnectionError>;

pub static BIT_TORRENT_PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;

#[derive(Error, Debug, PartialEq)]
pub enum HandshakeError {
    #[error("Invalid protocol string(pstr) length, expected 19, but got {0}")]
    ProtocolStringLen(u8),
    #[error("Unexpected protocol string, expected \"BitTorrent protocol\", but got {0}")]
    ProtocolString(String),
    #[error("Info hash mismatch, expected {expected}, but got {actual}")]
    InfoHashMismatch { expected: String, actual: String },
}

#[derive(Debug, PartialEq, Clone)]
struct HandshakeMessage {
    extension_bytes: [u8; 8],
    info_hash: Sha1,
    peer_id: PeerId,
}

impl HandshakeMessage {
    fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut res = [0; HANDSHAKE_LEN];
        res[0] = BIT_TORRENT_PROTOCOL_STRING.len() as u8;
        res[1..20].copy_from_slice(BIT_TORRENT_PROTOCOL_STRING.as_slice());
        res[20..28].copy_from_slice(self.extension_bytes.as_slice());
        res[28..48].copy_from_slice(self.info_hash.as_slice());
        res[48..68].copy_from_slice(self.peer_id.as_slice());
        res
    }

    fn from_bytes(raw: &[u8; HANDSHAKE_LEN]) -> std::result::Result<Self, HandshakeError> {
        let pstr_len = raw[0];
        if pstr_len as usize != BIT_TORRENT_PROTOCOL_STRING.len() {
            return Err(ProtocolStringLen(pstr_len));
        }
        let pstr = &raw[1..20];
        if pstr != BIT_TORRENT_PROTOCOL_STRING.as_slice() {
            return Err(ProtocolString(String::from_utf8_lossy(pstr).to_string()));
        }
        let mut extension_bytes = [0; 8];
        extension_bytes.copy_from_slice(&raw[20..28]);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&raw[28..48]);
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&raw[48..68]);

        Ok(Self::new(extension_bytes, info_hash, PeerId::new(peer_id)))
    }

    pub fn new(extension_bytes: [u8; 8], info_hash: Sha1, peer_id: PeerId) -> Self {
        Self {
            extension_bytes,
            info_hash,
            peer_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is open, nothing exchanged yet.
    Connecting,
    Handshaking,
    BitfieldExpected,
    Ready,
    Closed,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("BitTorrent handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),
    #[error("Expected {expected} message, but got {actual}")]
    UnexpectedMessage {
        expected: MessageId,
        actual: MessageId,
    },
    #[error("Unknown message id {0}")]
    UnknownMessageId(u8),
    #[error("Malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    #[error("Requested block (piece {expected_index}, offset {expected_begin}, {expected_len} bytes), but got (piece {index}, offset {begin}, {len} bytes)")]
    BlockMismatch {
        expected_index: u32,
        expected_begin: u32,
        expected_len: u32,
        index: u32,
        begin: u32,
        len: usize,
    },
    #[error("Operation is not allowed in state {0:?}")]
    InvalidState(ConnectionState),
    #[error("Peer is choking us")]
    Choked,
    #[error(transparent)]
    IoKind(#[from] io::Error),
}

/// Socket deadlines applied to every blocking call.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub io: Option<Duration>,
}

/// Single blocking connection to one peer.
///
/// Requests are strictly sequential: every call writes at most one message
/// and waits for the matching reply. Any error closes the connection for good.
pub struct PeerConnection<S = TcpStream> {
    stream: S,
    state: ConnectionState,
    choked: bool,
    peer_id: PeerId,
}

/// Opens the TCP transport to a peer with the configured deadlines.
pub fn dial(addr: &SocketAddr, timeouts: Timeouts) -> Result<TcpStream> {
    debug!(%addr, "connecting to peer");
    let tcp = TcpStream::connect_timeout(addr, timeouts.connect)?;
    tcp.set_read_timeout(timeouts.io)?;
    tcp.set_write_timeout(timeouts.io)?;
    tcp.set_nodelay(true)?;
    Ok(tcp)
}

impl<S: Read + Write> PeerConnection<S> {
    pub fn handshake(stream: S, info_hash: &Sha1, peer_id: &PeerId) -> Result<Self> {
        let mut connection = Self {
            stream,
            state: ConnectionState::Connecting,
            choked: true,
            peer_id: PeerId::default(),
        };
        connection.guarded(|conn| conn.exchange_handshake(info_hash, peer_id))?;
        Ok(connection)
    }

    fn exchange_handshake(&mut self, info_hash: &Sha1, peer_id: &PeerId) -> Result<()> {
        self.expect_state(ConnectionState::Connecting)?;
        self.state = ConnectionState::Handshaking;
        let bytes = HandshakeMessage::new([0; 8], *info_hash, peer_id.clone()).to_bytes();
        self.stream.write_all(bytes.as_slice())?;
        self.stream.flush()?;

        let mut response = [0; HANDSHAKE_LEN];
        self.stream.read_exact(&mut response)?;
        let response = HandshakeMessage::from_bytes(&response)?;
        if response.info_hash != *info_hash {
            return Err(InfoHashMismatch {
                expected: to_hex(info_hash),
                actual: to_hex(&response.info_hash),
            }
            .into());
        }
        debug!(remote_peer_id = %response.peer_id, "handshake completed");
        self.peer_id = response.peer_id;
        self.state = ConnectionState::BitfieldExpected;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Peer id the remote side sent in its handshake.
    pub fn remote_peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Reads the bitfield message, which must be the first one after the handshake.
    pub fn read_bitfield(&mut self) -> Result<Bytes> {
        self.guarded(|conn| {
            conn.expect_state(ConnectionState::BitfieldExpected)?;
            let bitfield = conn.read_message(MessageId::Bitfield)?;
            conn.state = ConnectionState::Ready;
            Ok(bitfield)
        })
    }

    pub fn send_interested(&mut self) -> Result<()> {
        self.guarded(|conn| {
            conn.expect_state(ConnectionState::Ready)?;
            conn.write_frame(&Frame::interested())
        })
    }

    pub fn read_unchoke(&mut self) -> Result<()> {
        self.guarded(|conn| {
            conn.expect_state(ConnectionState::Ready)?;
            let payload = conn.read_message(MessageId::Unchoke)?;
            if !payload.is_empty() {
                return Err(ConnectionError::MalformedFrame("unchoke message with payload"));
            }
            conn.choked = false;
            Ok(())
        })
    }

    /// Requests one block and blocks until the peer sends it back.
    pub fn request_block(&mut self, index: u32, begin: u32, length: u32) -> Result<Bytes> {
        self.guarded(|conn| {
            conn.expect_state(ConnectionState::Ready)?;
            if conn.choked {
                return Err(ConnectionError::Choked);
            }
            conn.write_frame(&Frame::request(index, begin, length))?;
            trace!(index, begin, length, "block requested");

            let block = Block::from_payload(conn.read_message(MessageId::Piece)?)?;
            if block.index != index || block.begin != begin || block.data.len() != length as usize {
                return Err(ConnectionError::BlockMismatch {
                    expected_index: index,
                    expected_begin: begin,
                    expected_len: length,
                    index: block.index,
                    begin: block.begin,
                    len: block.data.len(),
                });
            }
            Ok(block.data)
        })
    }

    /// Marks the connection unusable. The transport is released on drop.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            debug!("peer connection closed");
        }
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::InvalidState(ConnectionState::Closed));
        }
        let result = f(self);
        if result.is_err() {
            self.state = ConnectionState::Closed;
        }
        result
    }

    fn expect_state(&self, expected: ConnectionState) -> Result<()> {
        if self.state != expected {
            return Err(ConnectionError::InvalidState(self.state));
        }
        Ok(())
    }

    fn read_message(&mut self, expected: MessageId) -> Result<Bytes> {
        let frame = self.read_frame()?;
        if frame.id != expected {
            return Err(ConnectionError::UnexpectedMessage {
                expected,
                actual: frame.id,
            });
        }
        Ok(frame.payload)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let mut length = [0; 4];
            self.stream.read_exact(&mut length)?;
            let length = u32::from_be_bytes(length) as usize;
            if length == 0 {
                trace!("keep-alive received");
                continue;
            }
            if length > MAX_FRAME_LEN {
                return Err(ConnectionError::FrameTooLarge(length));
            }
            let mut body = BytesMut::zeroed(length);
            self.stream.read_exact(&mut body)?;
            return Frame::from_body(body.freeze());
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.stream.write_all(&frame.to_bytes())?;
        self.stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::PeerScript;
    use crate::peer::PeerId;
    use bytes::{BufMut, BytesMut};
    use rand::RngCore;

    fn random_hash() -> Sha1 {
        let mut info_hash = [0; 20];
        rand::thread_rng().fill_bytes(&mut info_hash);
        info_hash
    }

    #[test]
    fn handshake_message_as_bytes() {
        let mut extensions_bytes = [0; 8];
        rand::thread_rng().fill_bytes(&mut extensions_bytes);
        let info_hash = random_hash();
        let peed_id = PeerId::random();

        let mut bytes = BytesMut::with_capacity(68);
        bytes.put_u8(19u8);
        bytes.extend_from_slice(BIT_TORRENT_PROTOCOL_STRING);
        bytes.extend_from_slice(extensions_bytes.as_slice());
        bytes.extend_from_slice(info_hash.as_slice());
        bytes.extend_from_slice(peed_id.as_ref());

        let message = HandshakeMessage::new(extensions_bytes, info_hash, peed_id);
        let message_bytes = message.to_bytes();

        assert_eq!(bytes.as_ref(), message_bytes.as_slice());
    }

    #[test]
    fn handshake_message_from_bytes() {
        let mut extensions_bytes = [0; 8];
        rand::thread_rng().fill_bytes(&mut extensions_bytes);
        let info_hash = random_hash();
        let peed_id = PeerId::random();

        let message = HandshakeMessage::new(extensions_bytes, info_hash, peed_id);
        let message_from_bytes = HandshakeMessage::from_bytes(&message.to_bytes()).unwrap();

        assert_eq!(message_from_bytes, message)
    }

    #[test]
    fn handshake_exchange() {
        let info_hash = random_hash();
        let local = PeerId::generate();
        let remote = PeerId::random();
        let stream = PeerScript::new().handshake(&info_hash, &remote).into_stream();

        let connection = PeerConnection::handshake(stream, &info_hash, &local).unwrap();
        assert_eq!(connection.state(), ConnectionState::BitfieldExpected);
        assert_eq!(connection.remote_peer_id(), &remote);

        let sent = connection.stream.output();
        let expected = HandshakeMessage::new([0; 8], info_hash, local).to_bytes();
        assert_eq!(sent, expected.as_slice());
    }

    #[test]
    fn handshake_rejects_info_hash_mismatch() {
        let info_hash = random_hash();
        let mut other = info_hash;
        other[0] ^= 0xff;
        let stream = PeerScript::new()
            .handshake(&other, &PeerId::random())
            .bitfield(&[0xff])
            .into_stream();

        let result = PeerConnection::handshake(stream, &info_hash, &PeerId::generate());
        assert!(matches!(
            result,
            Err(ConnectionError::HandshakeFailed(InfoHashMismatch { .. }))
        ));
    }

    #[test]
    fn handshake_rejects_wrong_protocol() {
        let info_hash = random_hash();
        let mut raw = HandshakeMessage::new([0; 8], info_hash, PeerId::random()).to_bytes();
        raw[1..20].copy_from_slice(b"BitTorrent protocoX");
        let stream = PeerScript::new().raw(&raw).into_stream();

        let result = PeerConnection::handshake(stream, &info_hash, &PeerId::generate());
        assert!(matches!(
            result,
            Err(ConnectionError::HandshakeFailed(ProtocolString(pstr))) if pstr == "BitTorrent protocoX"
        ));
    }

    #[test]
    fn handshake_rejects_wrong_protocol_length() {
        let info_hash = random_hash();
        let mut raw = HandshakeMessage::new([0; 8], info_hash, PeerId::random()).to_bytes();
        raw[0] = 18;
        let stream = PeerScript::new().raw(&raw).into_stream();

        let result = PeerConnection::handshake(stream, &info_hash, &PeerId::generate());
        assert!(matches!(
            result,
            Err(ConnectionError::HandshakeFailed(ProtocolStringLen(18)))
        ));
    }

    #[test]
    fn handshake_short_read() {
        let info_hash = random_hash();
        let stream = PeerScript::new().raw(&[19, b'B', b'i']).into_stream();
        let result = PeerConnection::handshake(stream, &info_hash, &PeerId::generate());
        assert!(matches!(
            result,
            Err(ConnectionError::IoKind(e)) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn session_downloads_block() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .bitfield(&[0b1110_0000])
            .unchoke()
            .piece(0, 0, b"hello")
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        assert_eq!(connection.read_bitfield().unwrap().as_ref(), &[0b1110_0000]);
        assert_eq!(connection.state(), ConnectionState::Ready);
        connection.send_interested().unwrap();
        connection.read_unchoke().unwrap();
        let block = connection.request_block(0, 0, 5).unwrap();
        assert_eq!(block.as_ref(), b"hello");

        let sent = &connection.stream.output()[HANDSHAKE_LEN..];
        assert_eq!(&sent[..5], &[0, 0, 0, 1, 2]);
        assert_eq!(
            &sent[5..],
            &[0, 0, 0, 13, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5]
        );
    }

    #[test]
    fn keep_alive_is_skipped() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .keep_alive()
            .bitfield(&[0x80])
            .keep_alive()
            .unchoke()
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        connection.read_bitfield().unwrap();
        connection.read_unchoke().unwrap();
    }

    #[test]
    fn unexpected_message_closes_connection() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .unchoke()
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        assert!(matches!(
            connection.read_bitfield(),
            Err(ConnectionError::UnexpectedMessage {
                expected: MessageId::Bitfield,
                actual: MessageId::Unchoke
            })
        ));
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(matches!(
            connection.send_interested(),
            Err(ConnectionError::InvalidState(ConnectionState::Closed))
        ));
    }

    #[test]
    fn request_while_choked() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .bitfield(&[0x80])
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        connection.read_bitfield().unwrap();
        assert!(matches!(
            connection.request_block(0, 0, 16384),
            Err(ConnectionError::Choked)
        ));
    }

    #[test]
    fn request_before_bitfield() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        assert!(matches!(
            connection.request_block(0, 0, 16384),
            Err(ConnectionError::InvalidState(ConnectionState::BitfieldExpected))
        ));
    }

    #[test]
    fn unchoke_with_payload() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .bitfield(&[0x80])
            .frame(MessageId::Unchoke, &[1])
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        connection.read_bitfield().unwrap();
        assert!(matches!(
            connection.read_unchoke(),
            Err(ConnectionError::MalformedFrame(_))
        ));
    }

    #[test]
    fn block_mismatch() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .bitfield(&[0x80])
            .unchoke()
            .piece(0, 16384, b"data")
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        connection.read_bitfield().unwrap();
        connection.read_unchoke().unwrap();
        assert!(matches!(
            connection.request_block(0, 0, 4),
            Err(ConnectionError::BlockMismatch {
                begin: 16384,
                ..
            })
        ));
    }

    #[test]
    fn truncated_block() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .bitfield(&[0x80])
            .unchoke()
            .raw(&[0, 0, 0, 20, 7, 0, 0])
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        connection.read_bitfield().unwrap();
        connection.read_unchoke().unwrap();
        assert!(matches!(
            connection.request_block(0, 0, 11),
            Err(ConnectionError::IoKind(e)) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn frame_too_large() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .raw(&[0x7f, 0, 0, 0])
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        assert!(matches!(
            connection.read_bitfield(),
            Err(ConnectionError::FrameTooLarge(0x7f00_0000))
        ));
    }

    #[test]
    fn closed_connection_rejects_requests() {
        let info_hash = random_hash();
        let stream = PeerScript::new()
            .handshake(&info_hash, &PeerId::random())
            .bitfield(&[0x80])
            .unchoke()
            .piece(0, 0, b"data")
            .into_stream();

        let mut connection =
            PeerConnection::handshake(stream, &info_hash, &PeerId::generate()).unwrap();
        connection.read_bitfield().unwrap();
        connection.read_unchoke().unwrap();
        connection.close();
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(matches!(
            connection.request_block(0, 0, 4),
            Err(ConnectionError::InvalidState(ConnectionState::Closed))
        ));

        let sent = connection.stream.output().len();
        connection.close();
        assert_eq!(connection.stream.output().len(), sent);
        assert_eq!(sent, HANDSHAKE_LEN + 5);
    }
}
