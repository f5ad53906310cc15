use bytes::Bytes;

use crate::client::DownloadError;
use crate::util::{sha1, to_hex, Sha1};

/// Largest block requested from a peer in one message.
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// One `request` within a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub begin: u32,
    pub length: u32,
}

/// Splits a piece into consecutive blocks of `BLOCK_SIZE`, the last one
/// holding the remainder.
pub fn plan_blocks(piece_size: u32) -> impl Iterator<Item = BlockRequest> {
    (0..piece_size.div_ceil(BLOCK_SIZE)).map(move |block| {
        let begin = block * BLOCK_SIZE;
        BlockRequest {
            begin,
            length: BLOCK_SIZE.min(piece_size - begin),
        }
    })
}

/// Fully assembled piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub index: u32,
    pub data: Bytes,
}

impl Piece {
    pub fn new(index: u32, data: Bytes) -> Self {
        Self { index, data }
    }

    pub fn verify(&self, expected: &Sha1) -> Result<(), DownloadError> {
        let actual = sha1(&self.data);
        if &actual != expected {
            return Err(DownloadError::Integrity {
                piece: self.index,
                expected: to_hex(expected),
                actual: to_hex(&actual),
            });
        }
        Ok(())
    }
}
