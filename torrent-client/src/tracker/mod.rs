use crate::peer::{Peer, PeerId};
use crate::tracker::TrackerError::{
    AnnounceRequestError, Failure, InternalError, ResponseFormat, Status, UnsupportedProtocol,
};
use crate::util::Sha1;
use bencode::from_bencode::FromBencode;
use bencode::{BencodeDict, BencodeInt, Value};
use bytes::Buf;
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

type Result<T> = std::result::Result<T, TrackerError>;

const COMPACT_PEER_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Bencode error: {0}")]
    Bencode(#[from] bencode::BencodeError),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Unsupported protocol {0}")]
    UnsupportedProtocol(String),

    #[error("Announce request error {0}")]
    AnnounceRequestError(String),

    #[error("Tracker responded with HTTP status {0}")]
    Status(u16),

    #[error("Tracker sent error as response {0}")]
    Failure(String),

    #[error("Error in response format {0}")]
    ResponseFormat(String),
}

pub struct AnnounceParameters<'a> {
    info_hash: &'a Sha1,
    port: u16,
    uploaded: u64,
    downloaded: u64,
    left: u64,
}

impl<'a> AnnounceParameters<'a> {
    pub fn new(info_hash: &'a Sha1) -> Self {
        Self {
            info_hash,
            port: 0,
            uploaded: 0,
            downloaded: 0,
            left: 0,
        }
    }

    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }
    pub fn set_uploaded(&mut self, uploaded: u64) -> &mut Self {
        self.uploaded = uploaded;
        self
    }
    pub fn set_downloaded(&mut self, downloaded: u64) -> &mut Self {
        self.downloaded = downloaded;
        self
    }
    pub fn set_left(&mut self, left: u64) -> &mut Self {
        self.left = left;
        self
    }
}

#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: Duration,
    pub min_interval: Option<Duration>,
    pub complete: Option<i64>,
    pub incomplete: Option<i64>,
    pub peers: Vec<Peer>,
}

fn take_int(dict: &mut BencodeDict, key: &str) -> Result<Option<BencodeInt>> {
    match dict.remove(key.as_bytes()) {
        None => Ok(None),
        Some(value) => Ok(Some(value.try_into().map_err(|_| {
            ResponseFormat(format!("'{key}' field is not an integer"))
        })?)),
    }
}

fn take_secs(dict: &mut BencodeDict, key: &str) -> Result<Option<Duration>> {
    match take_int(dict, key)? {
        None => Ok(None),
        Some(secs) => u64::try_from(secs)
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ResponseFormat(format!("'{key}' field is negative"))),
    }
}

fn compact_peers(string: &[u8]) -> Result<Vec<Peer>> {
    if string.len() % COMPACT_PEER_LEN != 0 {
        return Err(ResponseFormat(
            "peers binary string length is not a multiple of 6".to_string(),
        ));
    }
    let mut bytes = string;
    let mut peers = Vec::with_capacity(string.len() / COMPACT_PEER_LEN);
    while bytes.has_remaining() {
        let ip = bytes.get_u32();
        let port = bytes.get_u16();
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), port));
        peers.push(Peer::new(None, addr));
    }
    Ok(peers)
}

fn dictionary_peer(mut dict: BencodeDict) -> Result<Peer> {
    let peer_id = dict.remove(b"peer id").and_then(|x| {
        if let Value::String(s) = x {
            PeerId::try_from(s.as_slice()).ok()
        } else {
            None
        }
    });
    let ip: String = dict
        .remove(b"ip")
        .ok_or(ResponseFormat(
            "No 'ip' field found in dictionary form".to_string(),
        ))?
        .try_into()?;
    let ip = ip
        .parse::<IpAddr>()
        .map_err(|_| ResponseFormat(format!("{ip} is not valid ip address")))?;
    let port: BencodeInt = dict
        .remove(b"port")
        .ok_or(ResponseFormat(
            "No 'port' field found in dictionary form".to_string(),
        ))?
        .try_into()?;
    let port = u16::try_from(port)
        .map_err(|_| ResponseFormat(format!("{port} is not valid port")))?;
    Ok(Peer::new(peer_id, SocketAddr::new(ip, port)))
}

impl AnnounceResponse {
    pub fn from_dict(mut bencode_dict: BencodeDict) -> Result<Self> {
        if let Some(failure_reason) = bencode_dict.remove(b"failure reason") {
            let error = match failure_reason {
                Value::String(string) => String::from_utf8_lossy(&string).to_string(),
                x => format!(
                    "error getting tracker 'failure reason' reason expected string got {}",
                    x.name()
                ),
            };
            return Err(Failure(error));
        }

        let interval = take_secs(&mut bencode_dict, "interval")?
            .ok_or(ResponseFormat("No 'interval' field".to_string()))?;
        let min_interval = take_secs(&mut bencode_dict, "min interval")?;
        let complete = take_int(&mut bencode_dict, "complete")?;
        let incomplete = take_int(&mut bencode_dict, "incomplete")?;
        let peers = bencode_dict
            .remove(b"peers")
            .ok_or(ResponseFormat("No 'peers' field".to_string()))?;

        let peers = match peers {
            Value::String(string) => compact_peers(&string)?,
            Value::List(list) => list
                .into_iter()
                .map(|value| match value {
                    Value::Dict(dict) => dictionary_peer(dict),
                    v => Err(ResponseFormat(format!(
                        "peers list of dicts format error, unexpected {}",
                        v.name()
                    ))),
                })
                .collect::<Result<Vec<Peer>>>()?,
            v => {
                return Err(ResponseFormat(format!(
                    "unknown peers format {}",
                    v.name()
                )))
            }
        };

        Ok(AnnounceResponse {
            interval,
            min_interval,
            complete,
            incomplete,
            peers,
        })
    }
}

impl FromBencode for AnnounceResponse {
    type Error = TrackerError;

    fn from_bencode(bencode: Value) -> Result<Self> {
        AnnounceResponse::from_dict(bencode.try_into()?)
    }
}

/// Percent-encodes every byte, alphanumerics included.
fn escape_all(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("%{byte:02X}")).collect()
}

pub trait TrackerClient {
    fn announce(&self, url: &Url, params: AnnounceParameters) -> Result<AnnounceResponse>;
}

pub struct HttpTracker {
    http_client: reqwest::blocking::Client,
    encoded_peer_id: String,
}

impl HttpTracker {
    pub fn new(peer_id: &PeerId, timeout: Option<Duration>) -> Result<Self> {
        let http_client = reqwest::blocking::ClientBuilder::new()
            .user_agent(concat!("torrent-client/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|x| InternalError(format!("failed to create http client {}", x)))?;
        let encoded_peer_id = percent_encode(peer_id.as_ref(), NON_ALPHANUMERIC).to_string();
        Ok(Self {
            http_client,
            encoded_peer_id,
        })
    }

    fn build_announce_url(&self, mut url: Url, request: AnnounceParameters) -> Url {
        let info_hash = escape_all(request.info_hash);

        let query = format!("info_hash={}&peer_id={}", info_hash, self.encoded_peer_id);
        let new_query = if let Some(url_query) = url.query() {
            format!("{url_query}&{query}")
        } else {
            query
        };
        url.set_query(Some(new_query.as_str()));
        url.query_pairs_mut()
            .append_pair("port", request.port.to_string().as_str())
            .append_pair("uploaded", request.uploaded.to_string().as_str())
            .append_pair("downloaded", request.downloaded.to_string().as_str())
            .append_pair("left", request.left.to_string().as_str())
            .append_pair("compact", "1");
        url
    }
}

impl TrackerClient for HttpTracker {
    fn announce(&self, url: &Url, params: AnnounceParameters) -> Result<AnnounceResponse> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(UnsupportedProtocol(String::from(url.scheme())));
        }
        let announce_url = self.build_announce_url(url.clone(), params);
        info!(tracker = %url, "announcing");
        let tracker_response = self
            .http_client
            .get(announce_url)
            .send()
            .map_err(|e| AnnounceRequestError(format!("send request to tracker failed {e}")))?;

        let status = tracker_response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Status(status.as_u16()));
        }
        let body = tracker_response
            .bytes()
            .map_err(|e| AnnounceRequestError(format!("failed to retrieve response body {e}")))?;
        debug!(bytes = body.len(), "tracker response received");

        AnnounceResponse::from_bytes(&body)
    }
}
