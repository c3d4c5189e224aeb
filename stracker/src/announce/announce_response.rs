use std::net::SocketAddr;

const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// One BEP 15 announce response: the counters header plus a compact IPv4
/// peer list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<SocketAddr>,
}

impl AnnounceResponse {
    /// Serializes the response. Non-IPv4 peers are skipped since the
    /// compact format has no room for them.
    pub fn to_bytes(&self, transaction_id: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(20 + self.peers.len() * 6);
        bytes.extend(ACTION_ANNOUNCE.to_be_bytes());
        bytes.extend(transaction_id.to_be_bytes());
        bytes.extend(self.interval.to_be_bytes());
        bytes.extend(self.leechers.to_be_bytes());
        bytes.extend(self.seeders.to_be_bytes());

        for peer in &self.peers {
            if let SocketAddr::V4(addr) = peer {
                bytes.extend(addr.ip().octets());
                bytes.extend(addr.port().to_be_bytes());
            }
        }

        bytes
    }
}

/// Serializes a BEP 15 error packet (action 3).
pub fn error_response(transaction_id: u32, message: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + message.len());
    bytes.extend(ACTION_ERROR.to_be_bytes());
    bytes.extend(transaction_id.to_be_bytes());
    bytes.extend(message.as_bytes());
    bytes
}
