use std::fmt::{Display, Formatter};
use std::str::Utf8Error;

use thiserror::Error;

use crate::BencodeError::InvalidType;

mod decoder;
mod encoder;
pub mod from_bencode;

pub use decoder::{BencodeDecoder, Expected, MAX_DEPTH};
pub use encoder::BencodeEncoder;

pub type BencodeInt = i64;
pub type BencodeString = Vec<u8>;
pub type BencodeList = Vec<Value>;
pub type Result<T> = std::result::Result<T, BencodeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(BencodeInt),
    String(BencodeString),
    List(BencodeList),
    Dict(BencodeDict),
}

static INTEGER_NAME: &str = "Integer";
static STRING_NAME: &str = "String";
static LIST_NAME: &str = "List";
static DICTIONARY_NAME: &str = "Dictionary";

impl Value {
    pub fn name(&self) -> &'static str {
        match self {
            Value::Int(_) => INTEGER_NAME,
            Value::String(_) => STRING_NAME,
            Value::List(_) => LIST_NAME,
            Value::Dict(_) => DICTIONARY_NAME,
        }
    }

    /// Looks up `key` when the value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        match self {
            Value::Dict(dict) => dict.get(key),
            _ => None,
        }
    }
}

/// Dictionary that keeps pairs in the order they were decoded or inserted.
///
/// Keys are neither sorted nor deduplicated. Lookups scan linearly and return
/// the first pair whose key matches, and the encoder writes pairs back in
/// stored order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BencodeDict(Vec<(BencodeString, Value)>);

impl BencodeDict {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.0
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Removes and returns the first value stored under `key`.
    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        let position = self.0.iter().position(|(k, _)| k.as_slice() == key)?;
        Some(self.0.remove(position).1)
    }

    /// Appends a pair. An existing pair with the same key is left in place.
    pub fn insert<K: Into<BencodeString>>(&mut self, key: K, value: Value) {
        self.0.push((key.into(), value));
    }
}

impl From<Vec<(BencodeString, Value)>> for BencodeDict {
    fn from(pairs: Vec<(BencodeString, Value)>) -> Self {
        Self(pairs)
    }
}

impl<const N: usize> From<[(BencodeString, Value); N]> for BencodeDict {
    fn from(pairs: [(BencodeString, Value); N]) -> Self {
        Self(pairs.into())
    }
}

impl FromIterator<(BencodeString, Value)> for BencodeDict {
    fn from_iter<T: IntoIterator<Item = (BencodeString, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for BencodeDict {
    type Item = (BencodeString, Value);
    type IntoIter = std::vec::IntoIter<(BencodeString, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a BencodeDict {
    type Item = &'a (BencodeString, Value);
    type IntoIter = std::slice::Iter<'a, (BencodeString, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders a single input byte for diagnostics, `'e'` or `0x00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Byte(pub u8);

impl Display for Byte {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_ascii_graphic() {
            write!(f, "'{}'", self.0 as char)
        } else {
            write!(f, "{:#04x}", self.0)
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum BencodeError {
    #[error("Unexpected byte {found}, expected {expected}")]
    UnexpectedByte { found: Byte, expected: Expected },
    #[error("Nesting deeper than {0} containers")]
    NestingTooDeep(usize),
    #[error("Invalid bencode: {0}")]
    InvalidBencode(&'static str),
    #[error("Invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("Invalid string length {0:?}")]
    InvalidLength(String),
    #[error("Length or integer tag longer than {0} bytes")]
    TagTooLong(usize),
    #[error("Invalid UTF-8 sequence: {0}")]
    InvalidUTF8(#[from] Utf8Error),
    #[error("Invalid type found {0} expected {1}")]
    InvalidType(&'static str, &'static str),
}

impl TryFrom<Value> for BencodeInt {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        if let Value::Int(int) = value {
            return Ok(int);
        }
        Err(InvalidType(value.name(), INTEGER_NAME))
    }
}

impl TryFrom<Value> for BencodeString {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        if let Value::String(string) = value {
            return Ok(string);
        }
        Err(InvalidType(value.name(), STRING_NAME))
    }
}

impl TryFrom<Value> for BencodeList {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        if let Value::List(list) = value {
            return Ok(list);
        }
        Err(InvalidType(value.name(), LIST_NAME))
    }
}

impl TryFrom<Value> for BencodeDict {
    type Error = BencodeError;
    fn try_from(value: Value) -> Result<Self> {
        if let Value::Dict(dict) = value {
            return Ok(dict);
        }
        Err(InvalidType(value.name(), DICTIONARY_NAME))
    }
}

impl TryFrom<Value> for String {
    type Error = BencodeError;
    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        Ok(String::from_utf8(BencodeString::try_from(value)?).map_err(|e| e.utf8_error())?)
    }
}

impl From<BencodeString> for Value {
    fn from(value: BencodeString) -> Self {
        Value::String(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::String(value.to_vec())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into_bytes())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.as_bytes().to_vec())
    }
}

impl From<BencodeInt> for Value {
    fn from(value: BencodeInt) -> Self {
        Value::Int(value)
    }
}

impl From<BencodeList> for Value {
    fn from(value: BencodeList) -> Self {
        Value::List(value)
    }
}

impl From<BencodeDict> for Value {
    fn from(value: BencodeDict) -> Self {
        Value::Dict(value)
    }
}

/// Decodes exactly one bencoded value from `data`.
pub fn from_slice(data: &[u8]) -> Result<Value> {
    let mut decoder = BencodeDecoder::new();
    decoder.feed(data)?;
    decoder.finish()
}

pub fn into_vec(value: &Value) -> Vec<u8> {
    let mut res = Vec::new();
    let mut encoder = BencodeEncoder::new(&mut res);
    encoder.encode(value);
    res
}
