use std::fmt::{Display, Formatter};
use std::str::from_utf8;

use crate::BencodeError::{
    InvalidBencode, InvalidInteger, InvalidLength, NestingTooDeep, TagTooLong, UnexpectedByte,
};
use crate::{BencodeDict, BencodeError, BencodeList, BencodeString, Byte, Result, Value};

/// Maximum number of nested lists and dictionaries.
pub const MAX_DEPTH: usize = 1024;

/// Longest accepted integer or length tag, sign included.
const MAX_TAG_LEN: usize = 20;

/// Upper bound for the buffer reserved up front for a byte string body.
const MAX_PREALLOCATION: usize = 64 * 1024;

/// Set of bytes that would have been accepted where decoding failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Value,
    ValueOrEnd,
    KeyOrEnd,
    SignOrDigit,
    Digit,
    DigitOrEnd,
    DigitOrColon,
    EndOfInput,
}

impl Display for Expected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let expected = match self {
            Expected::Value => "one of 'i', 'l', 'd', <digit>",
            Expected::ValueOrEnd => "one of 'i', 'l', 'd', 'e', <digit>",
            Expected::KeyOrEnd => "one of 'e', <digit>",
            Expected::SignOrDigit => "one of '-', <digit>",
            Expected::Digit => "<digit>",
            Expected::DigitOrEnd => "one of 'e', <digit>",
            Expected::DigitOrColon => "one of ':', <digit>",
            Expected::EndOfInput => "<EOF>",
        };
        write!(f, "{expected}")
    }
}

#[derive(Debug)]
struct Body {
    data: BencodeString,
    len: usize,
}

impl Body {
    fn remaining(&self) -> usize {
        self.len - self.data.len()
    }
}

#[derive(Debug)]
enum ParseContext {
    Root(Option<Value>),
    List(BencodeList),
    Int,
    /// `None` while the length tag is being read.
    Bytes(Option<Body>),
    /// Expects a key or the terminating `e`.
    Dict(BencodeDict),
    /// A key is being read on top of this context.
    DictKey(BencodeDict),
    /// The value for the stored key is expected next.
    DictValue(BencodeDict, BencodeString),
}

/// Push-style bencode decoder.
///
/// Input can be fed in chunks of any size, the decoder keeps an explicit stack
/// of parse contexts instead of recursing, so deeply nested input can only
/// fail with [`BencodeError::NestingTooDeep`] and never exhaust the call stack.
/// After an error the decoder refuses further input.
#[derive(Debug)]
pub struct BencodeDecoder {
    stack: Vec<ParseContext>,
    scratch: Vec<u8>,
    depth: usize,
    failed: bool,
}

impl Default for BencodeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BencodeDecoder {
    pub fn new() -> Self {
        Self {
            stack: vec![ParseContext::Root(None)],
            scratch: Vec::with_capacity(MAX_TAG_LEN),
            depth: 0,
            failed: false,
        }
    }

    /// Returns true once a complete root value has been decoded.
    pub fn is_complete(&self) -> bool {
        matches!(self.stack.as_slice(), [ParseContext::Root(Some(_))])
    }

    /// Feeds a single byte.
    pub fn push(&mut self, byte: u8) -> Result<()> {
        self.guarded(|decoder| decoder.step(byte))
    }

    /// Feeds a chunk of input. Byte string bodies are copied in bulk.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.guarded(|decoder| decoder.feed_chunk(data))
    }

    /// Signals the end of input and returns the decoded root value.
    pub fn finish(mut self) -> Result<Value> {
        if self.failed {
            return Err(InvalidBencode("decoder already failed"));
        }
        match self.stack.pop() {
            Some(ParseContext::Root(Some(value))) if self.stack.is_empty() => Ok(value),
            Some(ParseContext::Root(None)) => Err(InvalidBencode("empty input")),
            _ => Err(InvalidBencode("truncated input")),
        }
    }

    fn guarded(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        if self.failed {
            return Err(InvalidBencode("decoder already failed"));
        }
        let result = f(self);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn feed_chunk(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        while let Some((&byte, tail)) = rest.split_first() {
            if let Some(ParseContext::Bytes(Some(body))) = self.stack.last_mut() {
                let take = body.remaining().min(rest.len());
                body.data.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if body.remaining() == 0 {
                    self.close_bytes()?;
                }
                continue;
            }
            self.step(byte)?;
            rest = tail;
        }
        Ok(())
    }

    fn step(&mut self, byte: u8) -> Result<()> {
        match self.stack.last_mut() {
            Some(ParseContext::Bytes(Some(body))) => {
                body.data.push(byte);
                if body.remaining() == 0 {
                    self.close_bytes()?;
                }
                Ok(())
            }
            Some(ParseContext::Bytes(None)) => self.length_byte(byte),
            Some(ParseContext::Int) => self.int_byte(byte),
            Some(ParseContext::Root(None)) => self.open_value(byte, Expected::Value),
            Some(ParseContext::Root(Some(_))) => Err(unexpected(byte, Expected::EndOfInput)),
            Some(ParseContext::List(_)) => match byte {
                b'e' => self.close_container(),
                _ => self.open_value(byte, Expected::ValueOrEnd),
            },
            Some(ParseContext::Dict(_)) => match byte {
                b'e' => self.close_container(),
                b'0'..=b'9' => self.open_key(byte),
                _ => Err(unexpected(byte, Expected::KeyOrEnd)),
            },
            Some(ParseContext::DictValue(..)) => self.open_value(byte, Expected::Value),
            Some(ParseContext::DictKey(_)) | None => Err(InvalidBencode("corrupted context stack")),
        }
    }

    fn open_value(&mut self, byte: u8, expected: Expected) -> Result<()> {
        match byte {
            b'i' => {
                self.scratch.clear();
                self.stack.push(ParseContext::Int);
            }
            b'0'..=b'9' => {
                self.scratch.clear();
                self.scratch.push(byte);
                self.stack.push(ParseContext::Bytes(None));
            }
            b'l' => {
                self.enter()?;
                self.stack.push(ParseContext::List(Vec::new()));
            }
            b'd' => {
                self.enter()?;
                self.stack.push(ParseContext::Dict(BencodeDict::new()));
            }
            _ => return Err(unexpected(byte, expected)),
        }
        Ok(())
    }

    fn open_key(&mut self, byte: u8) -> Result<()> {
        match self.stack.pop() {
            Some(ParseContext::Dict(dict)) => self.stack.push(ParseContext::DictKey(dict)),
            _ => return Err(InvalidBencode("dictionary key outside of a dictionary")),
        }
        self.scratch.clear();
        self.scratch.push(byte);
        self.stack.push(ParseContext::Bytes(None));
        Ok(())
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(NestingTooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    fn push_tag_byte(&mut self, byte: u8) -> Result<()> {
        if self.scratch.len() >= MAX_TAG_LEN {
            return Err(TagTooLong(MAX_TAG_LEN));
        }
        self.scratch.push(byte);
        Ok(())
    }

    fn int_byte(&mut self, byte: u8) -> Result<()> {
        match byte {
            b'-' if self.scratch.is_empty() => self.push_tag_byte(byte),
            b'0'..=b'9' => self.push_tag_byte(byte),
            b'e' if !self.scratch.is_empty() && self.scratch != b"-" => {
                let int = parse_int(&self.scratch)?;
                self.scratch.clear();
                self.stack.pop();
                self.complete(Value::Int(int))
            }
            _ => {
                let expected = match self.scratch.as_slice() {
                    [] => Expected::SignOrDigit,
                    b"-" => Expected::Digit,
                    _ => Expected::DigitOrEnd,
                };
                Err(unexpected(byte, expected))
            }
        }
    }

    fn length_byte(&mut self, byte: u8) -> Result<()> {
        match byte {
            b'0'..=b'9' => self.push_tag_byte(byte),
            b':' => {
                let len = parse_length(&self.scratch)?;
                self.scratch.clear();
                if len == 0 {
                    self.stack.pop();
                    return self.complete(Value::String(Vec::new()));
                }
                let body = Body {
                    data: Vec::with_capacity(len.min(MAX_PREALLOCATION)),
                    len,
                };
                if let Some(top) = self.stack.last_mut() {
                    *top = ParseContext::Bytes(Some(body));
                }
                Ok(())
            }
            _ => Err(unexpected(byte, Expected::DigitOrColon)),
        }
    }

    fn close_bytes(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(ParseContext::Bytes(Some(body))) => self.complete(Value::String(body.data)),
            _ => Err(InvalidBencode("corrupted context stack")),
        }
    }

    fn close_container(&mut self) -> Result<()> {
        let value = match self.stack.pop() {
            Some(ParseContext::List(list)) => Value::List(list),
            Some(ParseContext::Dict(dict)) => Value::Dict(dict),
            _ => return Err(InvalidBencode("corrupted context stack")),
        };
        self.depth -= 1;
        self.complete(value)
    }

    /// Hands a finished value to the enclosing context.
    fn complete(&mut self, value: Value) -> Result<()> {
        let parent = match self.stack.pop() {
            Some(ParseContext::Root(None)) => ParseContext::Root(Some(value)),
            Some(ParseContext::List(mut list)) => {
                list.push(value);
                ParseContext::List(list)
            }
            Some(ParseContext::DictKey(dict)) => match value {
                Value::String(key) => ParseContext::DictValue(dict, key),
                _ => return Err(InvalidBencode("dictionary key is not a byte string")),
            },
            Some(ParseContext::DictValue(mut dict, key)) => {
                dict.insert(key, value);
                ParseContext::Dict(dict)
            }
            _ => return Err(InvalidBencode("value completed outside of a container")),
        };
        self.stack.push(parent);
        Ok(())
    }
}

fn unexpected(byte: u8, expected: Expected) -> BencodeError {
    UnexpectedByte {
        found: Byte(byte),
        expected,
    }
}

fn parse_int(text: &[u8]) -> Result<i64> {
    let text = from_utf8(text)?;
    let digits = text.strip_prefix('-').unwrap_or(text);
    let negative = digits.len() != text.len();
    let leading_zero = digits.starts_with('0') && (digits.len() > 1 || negative);
    if digits.is_empty() || leading_zero {
        return Err(InvalidInteger(text.to_string()));
    }
    text.parse::<i64>()
        .map_err(|_| InvalidInteger(text.to_string()))
}

fn parse_length(text: &[u8]) -> Result<usize> {
    let text = from_utf8(text)?;
    text.parse::<usize>()
        .map_err(|_| InvalidLength(text.to_string()))
}
