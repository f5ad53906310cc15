use crate::{BencodeError, BencodeInt, BencodeString, Value};

/// Conversion from a decoded value into a typed structure.
pub trait FromBencode: Sized {
    type Error: From<BencodeError>;

    fn from_bencode(bencode: Value) -> Result<Self, Self::Error>;

    /// Decodes `data` and converts the root value.
    fn from_bytes(data: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bencode(crate::from_slice(data)?)
    }
}

impl FromBencode for String {
    type Error = BencodeError;

    fn from_bencode(bencode: Value) -> Result<Self, Self::Error> {
        Ok(String::from_utf8(BencodeString::try_from(bencode)?).map_err(|e| e.utf8_error())?)
    }
}

impl FromBencode for BencodeInt {
    type Error = BencodeError;

    fn from_bencode(bencode: Value) -> Result<Self, Self::Error> {
        BencodeInt::try_from(bencode)
    }
}
