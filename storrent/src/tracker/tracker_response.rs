use bencoder::bencode::{Bencode, BencodeError};

use crate::peer::peer_info::{FromPeerInfoError, PeerInfo};

/// `TrackerResponse` struct containing a decoded HTTP tracker response.
///
/// To create a new `TrackerResponse` use the method builder `from()`.
#[derive(Debug)]
pub struct TrackerResponse {
    pub interval: u32,
    pub complete: u32,
    pub incomplete: u32,
    pub peers: Vec<PeerInfo>,
}

/// Possible `TrackerResponse` errors.
#[derive(Debug, PartialEq)]
pub enum FromTrackerResponseError {
    DecodeResponseError(BencodeError),
    /// The tracker answered with a `failure reason` dict.
    Failure(String),
    InvalidInterval,
    InvalidPeers(FromPeerInfoError),
    InvalidCompactPeers,
    NotADict,
    NotAList,
}

impl TrackerResponse {
    /// Builds a new `TrackerResponse` decoding a bencoded byte response.
    ///
    /// It returns a `FromTrackerResponseError` if:
    /// - The response does not decode as a bencoded dict.
    /// - The response carries a `failure reason`.
    /// - The interval or peer list have the wrong shape.
    pub fn from(response: &[u8]) -> Result<TrackerResponse, FromTrackerResponseError> {
        let decoded = Bencode::decode(response)
            .map_err(FromTrackerResponseError::DecodeResponseError)?;

        let d = match decoded {
            Bencode::BDict(d) => d,
            _ => return Err(FromTrackerResponseError::NotADict),
        };

        let mut interval = 0;
        let mut complete = 0;
        let mut incomplete = 0;
        let mut peers = Vec::new();

        for (k, v) in d.iter() {
            if k == b"failure reason" {
                return Err(FromTrackerResponseError::Failure(Self::create_failure(v)));
            } else if k == b"interval" {
                interval = Self::create_count(v).ok_or(FromTrackerResponseError::InvalidInterval)?;
            } else if k == b"complete" {
                complete = Self::create_count(v).unwrap_or(0);
            } else if k == b"incomplete" {
                incomplete = Self::create_count(v).unwrap_or(0);
            } else if k == b"peers" {
                peers = Self::create_peers(v)?;
            }
        }

        Ok(TrackerResponse {
            interval,
            complete,
            incomplete,
            peers,
        })
    }

    fn create_failure(bencode: &Bencode) -> String {
        match bencode {
            Bencode::BString(s) => String::from_utf8_lossy(s).to_string(),
            other => format!("{:?}", other),
        }
    }

    fn create_count(bencode: &Bencode) -> Option<u32> {
        match bencode {
            Bencode::BNumber(n) if *n >= 0 => Some(*n as u32),
            _ => None,
        }
    }

    fn create_peers(bencode: &Bencode) -> Result<Vec<PeerInfo>, FromTrackerResponseError> {
        match bencode {
            Bencode::BList(list) => Self::create_peers_from_dicts(list),
            Bencode::BString(compact) => Self::create_peers_from_compact(compact),
            _ => Err(FromTrackerResponseError::NotAList),
        }
    }

    fn create_peers_from_dicts(
        list: &[Bencode],
    ) -> Result<Vec<PeerInfo>, FromTrackerResponseError> {
        let mut peers = Vec::with_capacity(list.len());

        for entry in list {
            let peer =
                PeerInfo::from_bencode(entry).map_err(FromTrackerResponseError::InvalidPeers)?;
            peers.push(peer);
        }

        Ok(peers)
    }

    /// Compact format: concatenated 6-byte records, 4 bytes IPv4 + 2 bytes
    /// port, both big-endian.
    fn create_peers_from_compact(
        compact: &[u8],
    ) -> Result<Vec<PeerInfo>, FromTrackerResponseError> {
        if compact.len() % 6 != 0 {
            return Err(FromTrackerResponseError::InvalidCompactPeers);
        }

        compact
            .chunks(6)
            .map(|chunk| {
                PeerInfo::from_compact(chunk)
                    .map_err(|_| FromTrackerResponseError::InvalidCompactPeers)
            })
            .collect()
    }
}
