use bencode::from_bencode::FromBencode;
use bencode::{BencodeDict, BencodeError, BencodeInt, BencodeString, Value};
use thiserror::Error;
use url::Url;

use crate::file::TorrentError::{
    InvalidFieldType, InvalidName, InvalidPiecesLength, MissingField, MultiFileUnsupported,
    PieceCountMismatch,
};
use crate::util::{sha1, Sha1, SHA1_LEN};

type Result<T> = std::result::Result<T, TorrentError>;

/// Metadata of a single-file torrent.
#[derive(Debug, Clone)]
pub struct TorrentFile {
    pub announce: Url,
    pub info: Info,
}

#[derive(Debug, Clone)]
pub struct Info {
    pub name: String,
    pub length: u64,
    pub piece_length: u64,
    /// SHA-1 of the `info` dictionary exactly as it is re-encoded.
    pub info_hash: Sha1,
    pub pieces: Vec<Sha1>,
}

#[derive(Error, Debug)]
pub enum TorrentError {
    #[error("Bencode error: {0}")]
    Bencode(#[from] BencodeError),
    #[error("Url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid field type: {0}")]
    InvalidFieldType(&'static str),
    #[error("Invalid pieces length {0}, expected a multiple of 20")]
    InvalidPiecesLength(usize),
    #[error("Torrent has {actual} piece hashes, but its length requires {expected}")]
    PieceCountMismatch { expected: u64, actual: usize },
    #[error("Multi-file torrents are not supported")]
    MultiFileUnsupported,
    #[error("Invalid file name {0:?}")]
    InvalidName(String),
}

fn take<T>(dict: &mut BencodeDict, key: &'static str) -> Result<T>
where
    T: TryFrom<Value, Error = BencodeError>,
{
    let value = dict.remove(key.as_bytes()).ok_or(MissingField(key))?;
    T::try_from(value).map_err(|_| InvalidFieldType(key))
}

fn take_positive(dict: &mut BencodeDict, key: &'static str, allow_zero: bool) -> Result<u64> {
    let value: BencodeInt = take(dict, key)?;
    match u64::try_from(value) {
        Ok(0) if !allow_zero => Err(InvalidFieldType(key)),
        Ok(value) => Ok(value),
        Err(_) => Err(InvalidFieldType(key)),
    }
}

impl TorrentFile {
    pub fn from_dict(mut dict: BencodeDict) -> Result<Self> {
        let announce: String = take(&mut dict, "announce")?;
        let announce = Url::parse(&announce)?;
        let info: BencodeDict = take(&mut dict, "info")?;
        let info = Info::from_dict(info)?;
        Ok(Self { announce, info })
    }
}

impl FromBencode for TorrentFile {
    type Error = TorrentError;

    fn from_bencode(bencode: Value) -> Result<Self> {
        TorrentFile::from_dict(bencode.try_into()?)
    }
}

impl Info {
    pub fn from_dict(mut dict: BencodeDict) -> Result<Self> {
        let info_hash = sha1(&bencode::into_vec(&Value::Dict(dict.clone())));

        let name: String = take(&mut dict, "name")?;
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(InvalidName(name));
        }
        let piece_length = take_positive(&mut dict, "piece length", false)?;
        let pieces: BencodeString = take(&mut dict, "pieces")?;
        if pieces.len() % SHA1_LEN != 0 {
            return Err(InvalidPiecesLength(pieces.len()));
        }
        let pieces: Vec<Sha1> = pieces
            .chunks_exact(SHA1_LEN)
            .map(|chunk| {
                let mut hash = [0; SHA1_LEN];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        if !dict.contains_key(b"length") && dict.contains_key(b"files") {
            return Err(MultiFileUnsupported);
        }
        let length = take_positive(&mut dict, "length", true)?;

        let expected = length.div_ceil(piece_length);
        if expected != pieces.len() as u64 {
            return Err(PieceCountMismatch {
                expected,
                actual: pieces.len(),
            });
        }

        Ok(Info {
            name,
            length,
            piece_length,
            info_hash,
            pieces,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn piece_hash(&self, index: usize) -> Option<&Sha1> {
        self.pieces.get(index)
    }

    /// Size of the piece at `index`, the last one holds the remainder of the
    /// file. Zero for an index past the end.
    pub fn piece_size(&self, index: usize) -> u64 {
        let count = self.piece_count();
        if index >= count {
            0
        } else if index + 1 < count {
            self.piece_length
        } else {
            self.length - self.piece_length * (count as u64 - 1)
        }
    }
}
