use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt::{Display, Formatter};

use crate::peer::connection::ConnectionError;

/// Largest frame accepted from a peer, length prefix excluded.
pub const MAX_FRAME_LEN: usize = 1 << 20;

const PIECE_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = ConnectionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            id => return Err(ConnectionError::UnknownMessageId(id)),
        })
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageId::Choke => "choke",
            MessageId::Unchoke => "unchoke",
            MessageId::Interested => "interested",
            MessageId::NotInterested => "not interested",
            MessageId::Have => "have",
            MessageId::Bitfield => "bitfield",
            MessageId::Request => "request",
            MessageId::Piece => "piece",
            MessageId::Cancel => "cancel",
        };
        write!(f, "{name}")
    }
}

/// Length-prefixed peer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: MessageId,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: MessageId, payload: Bytes) -> Self {
        Self { id, payload }
    }

    pub fn interested() -> Self {
        Self::new(MessageId::Interested, Bytes::new())
    }

    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        let mut payload = BytesMut::with_capacity(12);
        payload.put_u32(index);
        payload.put_u32(begin);
        payload.put_u32(length);
        Self::new(MessageId::Request, payload.freeze())
    }

    /// Serializes as `length (u32 BE) | id | payload`.
    pub fn to_bytes(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(5 + self.payload.len());
        bytes.put_u32(1 + self.payload.len() as u32);
        bytes.put_u8(self.id as u8);
        bytes.extend_from_slice(&self.payload);
        bytes.freeze()
    }

    /// Parses a frame body, the length prefix already stripped.
    pub fn from_body(mut body: Bytes) -> Result<Self, ConnectionError> {
        if body.is_empty() {
            return Err(ConnectionError::MalformedFrame("empty frame body"));
        }
        let id = MessageId::try_from(body.get_u8())?;
        Ok(Self::new(id, body))
    }
}

/// Payload of a `piece` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u32,
    pub begin: u32,
    pub data: Bytes,
}

impl Block {
    pub fn from_payload(mut payload: Bytes) -> Result<Self, ConnectionError> {
        if payload.len() < PIECE_HEADER_LEN {
            return Err(ConnectionError::MalformedFrame("piece message shorter than its header"));
        }
        let index = payload.get_u32();
        let begin = payload.get_u32();
        Ok(Self {
            index,
            begin,
            data: payload,
        })
    }
}
