use crate::{BencodeDict, BencodeInt, BencodeList, Value};

/// Appends the bencode form of values to a byte buffer.
///
/// `BencodeDict` pairs are written in the order they are stored, duplicates
/// included, so a decoded dictionary re-encodes to its original bytes even
/// when the source did not sort its keys. The info hash depends on this.
pub struct BencodeEncoder<'a> {
    data: &'a mut Vec<u8>,
}

impl<'a> BencodeEncoder<'a> {
    pub fn new(data: &'a mut Vec<u8>) -> Self {
        Self { data }
    }

    pub fn encode(&mut self, value: &Value) {
        match value {
            Value::Int(int) => self.encode_int(*int),
            Value::String(bytes) => self.encode_bytes(bytes),
            Value::List(list) => self.encode_list(list),
            Value::Dict(dict) => self.encode_dict(dict),
        }
    }

    pub fn encode_int(&mut self, int: BencodeInt) {
        self.delimited(b'i', int.to_string().as_bytes());
    }

    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        self.data.extend(format!("{}:", bytes.len()).into_bytes());
        self.data.extend_from_slice(bytes);
    }

    pub fn encode_list(&mut self, list: &BencodeList) {
        self.data.push(b'l');
        list.iter().for_each(|item| self.encode(item));
        self.data.push(b'e');
    }

    pub fn encode_dict(&mut self, dict: &BencodeDict) {
        self.data.push(b'd');
        for (key, value) in dict {
            self.encode_bytes(key);
            self.encode(value);
        }
        self.data.push(b'e');
    }

    fn delimited(&mut self, tag: u8, body: &[u8]) {
        self.data.push(tag);
        self.data.extend_from_slice(body);
        self.data.push(b'e');
    }
}
