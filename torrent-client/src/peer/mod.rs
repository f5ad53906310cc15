use rand::RngCore;
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::ops::Deref;

pub mod connection;
pub mod message;
#[cfg(test)]
pub(crate) mod mock;

static CLIENT_PREFIX: &[u8; 8] = b"-VD0001-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerId([u8; 20]);

/// Remote peer as announced by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub peer_id: Option<PeerId>,
    pub addr: SocketAddr,
}

impl PeerId {
    pub fn new(peer_id: [u8; 20]) -> Self {
        Self(peer_id)
    }

    pub fn random() -> Self {
        let mut peer_id = [0; 20];
        rand::thread_rng().fill_bytes(&mut peer_id);
        Self::new(peer_id)
    }

    /// Azureus-style id: client prefix followed by random bytes.
    pub fn generate() -> Self {
        let mut peer_id = [0; 20];
        peer_id[..CLIENT_PREFIX.len()].copy_from_slice(CLIENT_PREFIX);
        rand::thread_rng().fill_bytes(&mut peer_id[CLIENT_PREFIX.len()..]);
        Self::new(peer_id)
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = std::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self::new(value.try_into()?))
    }
}

impl Borrow<[u8]> for PeerId {
    fn borrow(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl Deref for PeerId {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new([0; 20])
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Peer {
    pub fn new(peer_id: Option<PeerId>, addr: SocketAddr) -> Self {
        Self { peer_id, addr }
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}
