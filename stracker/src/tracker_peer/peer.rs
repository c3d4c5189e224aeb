use std::net::SocketAddr;

use chrono::{DateTime, Local};

use crate::announce::announce_request::AnnounceRequest;
use crate::announce::event::PeerEvent;

/// One peer as the tracker sees it.
///
/// `last_seen` drives the inactivity pruning; seeder/leecher status is
/// derived from `left` and the announced event.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: [u8; 20],
    pub addr: SocketAddr,
    pub left: u64,
    pub event: PeerEvent,
    last_seen: DateTime<Local>,
}

impl Peer {
    /// Builds a peer from an announce. The packet's `ip` field is parsed
    /// but never honored: the listed address is always the datagram source,
    /// so a client cannot plant someone else's IP in the swarm. The port is
    /// taken from the packet, since the announce socket is not the peer
    /// listen socket.
    pub fn from_request(request: &AnnounceRequest, source: SocketAddr) -> Self {
        Self {
            id: request.peer_id,
            addr: SocketAddr::new(source.ip(), request.port),
            left: request.left,
            event: request.event,
            last_seen: Local::now(),
        }
    }

    pub fn last_seen(&self) -> DateTime<Local> {
        self.last_seen
    }

    /// Returns `true` if the given peer is acting as a seeder.
    pub fn is_seeder(&self) -> bool {
        self.left == 0 || self.event == PeerEvent::Completed
    }

    /// Returns `true` if the given peer is acting as a leecher.
    pub fn is_leecher(&self) -> bool {
        !self.is_seeder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_with_nothing_left_is_seeder() {
        let peer = create_test_peer(0, PeerEvent::None);

        assert!(peer.is_seeder());
        assert!(!peer.is_leecher());
    }

    #[test]
    fn test_peer_with_bytes_left_is_leecher() {
        let peer = create_test_peer(1024, PeerEvent::Started);

        assert!(peer.is_leecher());
    }

    #[test]
    fn test_completed_event_makes_seeder() {
        let peer = create_test_peer(1024, PeerEvent::Completed);

        assert!(peer.is_seeder());
    }

    #[test]
    fn test_from_request_uses_source_ip_and_packet_port() {
        let request = AnnounceRequest {
            connection_id: 1,
            transaction_id: 2,
            info_hash: [1; 20],
            peer_id: [2; 20],
            downloaded: 0,
            left: 10,
            uploaded: 0,
            event: PeerEvent::Started,
            ip: 0,
            key: 0,
            num_want: -1,
            port: 7000,
        };
        let source = "10.1.2.3:50000".parse().unwrap();

        let peer = Peer::from_request(&request, source);

        assert_eq!(peer.addr, "10.1.2.3:7000".parse().unwrap());
    }

    // Auxiliary functions

    fn create_test_peer(left: u64, event: PeerEvent) -> Peer {
        let request = AnnounceRequest {
            connection_id: 1,
            transaction_id: 2,
            info_hash: [1; 20],
            peer_id: [2; 20],
            downloaded: 0,
            left,
            uploaded: 0,
            event,
            ip: 0,
            key: 0,
            num_want: -1,
            port: 6881,
        };
        Peer::from_request(&request, "127.0.0.1:6881".parse().unwrap())
    }
}
