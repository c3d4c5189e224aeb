use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bencoder::bencode::Bencode;

/// Identity of a remote peer as learned from a tracker or an inbound
/// connection. The address is kept parsed; two peers are the same peer
/// when their `(ip, port)` pair matches, whatever the peer_id says.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub peer_id: Option<[u8; 20]>,
}

impl PartialEq for PeerInfo {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for PeerInfo {}

impl std::hash::Hash for PeerInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Possible `PeerInfo` parsing errors.
#[derive(Debug, PartialEq)]
pub enum FromPeerInfoError {
    InvalidPeerId,
    InvalidIp,
    InvalidPort,
    NotADict,
    InvalidCompactEntry,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            peer_id: None,
        }
    }

    /// Builds a `PeerInfo` from one 6-byte record of a compact peer list:
    /// 4 bytes IPv4, 2 bytes port, both big-endian.
    pub fn from_compact(chunk: &[u8]) -> Result<Self, FromPeerInfoError> {
        if chunk.len() != 6 {
            return Err(FromPeerInfoError::InvalidCompactEntry);
        }
        let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
        let port = u16::from_be_bytes([chunk[4], chunk[5]]);

        Ok(Self::new(SocketAddr::new(IpAddr::V4(ip), port)))
    }

    /// Builds a `PeerInfo` from a bencoded peer dict of a non-compact
    /// tracker response.
    ///
    /// It returns a `FromPeerInfoError` if:
    /// - The peer ID is present but not 20 bytes.
    /// - The peer IP does not parse.
    /// - The peer Port is out of range.
    /// - The bencoded peer is not a Dict.
    pub fn from_bencode(bencode: &Bencode) -> Result<PeerInfo, FromPeerInfoError> {
        let d = match bencode {
            Bencode::BDict(d) => d,
            _ => return Err(FromPeerInfoError::NotADict),
        };

        let mut peer_id = None;
        let mut ip = None;
        let mut port = None;

        for (k, v) in d.iter() {
            if k == b"peer id" {
                peer_id = Some(Self::create_peer_id(v)?);
            } else if k == b"ip" {
                ip = Some(Self::create_ip(v)?);
            } else if k == b"port" {
                port = Some(Self::create_port(v)?);
            }
        }

        let ip = ip.ok_or(FromPeerInfoError::InvalidIp)?;
        let port = port.ok_or(FromPeerInfoError::InvalidPort)?;

        Ok(PeerInfo {
            addr: SocketAddr::new(ip, port),
            peer_id,
        })
    }

    fn create_peer_id(bencode: &Bencode) -> Result<[u8; 20], FromPeerInfoError> {
        let bytes = match bencode {
            Bencode::BString(s) => s,
            _ => return Err(FromPeerInfoError::InvalidPeerId),
        };
        if bytes.len() != 20 {
            return Err(FromPeerInfoError::InvalidPeerId);
        }
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(bytes);
        Ok(peer_id)
    }

    fn create_ip(bencode: &Bencode) -> Result<IpAddr, FromPeerInfoError> {
        let bytes = match bencode {
            Bencode::BString(s) => s,
            _ => return Err(FromPeerInfoError::InvalidIp),
        };

        let text = String::from_utf8(bytes.to_vec()).map_err(|_| FromPeerInfoError::InvalidIp)?;
        text.parse().map_err(|_| FromPeerInfoError::InvalidIp)
    }

    fn create_port(bencode: &Bencode) -> Result<u16, FromPeerInfoError> {
        match bencode {
            Bencode::BNumber(n) if (0..=i64::from(u16::MAX)).contains(n) => Ok(*n as u16),
            _ => Err(FromPeerInfoError::InvalidPort),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_from_compact() {
        let peer = PeerInfo::from_compact(&[127, 0, 0, 1, 0x1a, 0xe1]).unwrap();

        assert_eq!(peer.addr, "127.0.0.1:6881".parse().unwrap());
        assert_eq!(peer.peer_id, None);
    }

    #[test]
    fn test_from_compact_wrong_length() {
        assert_eq!(
            PeerInfo::from_compact(&[127, 0, 0, 1]),
            Err(FromPeerInfoError::InvalidCompactEntry)
        );
    }

    #[test]
    fn test_from_bencode() {
        let mut dict = BTreeMap::new();
        dict.insert(b"peer id".to_vec(), Bencode::BString(vec![7; 20]));
        dict.insert(b"ip".to_vec(), Bencode::BString(b"127.0.0.1".to_vec()));
        dict.insert(b"port".to_vec(), Bencode::BNumber(6868));

        let peer = PeerInfo::from_bencode(&Bencode::BDict(dict)).unwrap();

        assert_eq!(peer.addr, "127.0.0.1:6868".parse().unwrap());
        assert_eq!(peer.peer_id, Some([7; 20]));
    }

    #[test]
    fn test_from_bencode_bad_ip() {
        let mut dict = BTreeMap::new();
        dict.insert(b"ip".to_vec(), Bencode::BString(b"not-an-ip".to_vec()));
        dict.insert(b"port".to_vec(), Bencode::BNumber(6868));

        assert_eq!(
            PeerInfo::from_bencode(&Bencode::BDict(dict)),
            Err(FromPeerInfoError::InvalidIp)
        );
    }

    #[test]
    fn test_from_bencode_bad_port() {
        let mut dict = BTreeMap::new();
        dict.insert(b"ip".to_vec(), Bencode::BString(b"127.0.0.1".to_vec()));
        dict.insert(b"port".to_vec(), Bencode::BNumber(70000));

        assert_eq!(
            PeerInfo::from_bencode(&Bencode::BDict(dict)),
            Err(FromPeerInfoError::InvalidPort)
        );
    }

    #[test]
    fn test_same_addr_is_same_peer() {
        let mut a = PeerInfo::new("10.0.0.1:6881".parse().unwrap());
        let b = PeerInfo::new("10.0.0.1:6881".parse().unwrap());
        a.peer_id = Some([1; 20]);

        assert_eq!(a, b);
    }
}
