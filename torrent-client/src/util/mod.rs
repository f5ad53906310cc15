use sha1::Digest;

pub type Sha1 = [u8; 20];

pub const SHA1_LEN: usize = 20;

pub fn sha1(data: &[u8]) -> Sha1 {
    sha1::Sha1::digest(data).into()
}

/// Lowercase hex form used in logs and error messages.
pub fn to_hex(digest: &Sha1) -> String {
    hex::encode(digest)
}
