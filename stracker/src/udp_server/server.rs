use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::announce::announce_request::AnnounceRequest;
use crate::announce::announce_response::{error_response, AnnounceResponse};
use crate::announce::event::PeerEvent;
use crate::tracker_peer::peer::Peer;
use crate::tracker_status::tracker_state::TrackerState;

/// Magic constant expected in every connect request (BEP 15).
pub const PROTOCOL_ID: u64 = 0x41727101980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_SCRAPE: u32 = 2;

/// Peers handed out per announce when `num_want` is negative.
const DEFAULT_NUM_WANT: u32 = 200;
const DEFAULT_INTERVAL_SECS: u32 = 1800;

const MAX_PACKET: usize = 2048;

/// State is pruned every this many datagrams.
const CLEAN_STRIDE: u64 = 64;

/// Minimal BEP 15 tracker over one UDP socket.
///
/// All state lives in the owned `TrackerState`; dropping the server (or
/// letting `run` end) forgets every peer it ever saw.
pub struct TrackerServer {
    socket: UdpSocket,
    state: TrackerState,
    handled: u64,
}

impl TrackerServer {
    /// Binds the tracker socket; `0` as port picks a free one.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "tracker listening");
        Ok(Self {
            socket,
            state: TrackerState::new(DEFAULT_INTERVAL_SECS),
            handled: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves datagrams until the socket fails.
    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.handle_next().await {
                warn!("tracker socket error: {:?}", e);
                break;
            }
        }
    }

    async fn handle_next(&mut self) -> io::Result<()> {
        let mut buffer = [0u8; MAX_PACKET];
        let (received, addr) = self.socket.recv_from(&mut buffer).await?;

        self.handled += 1;
        if self.handled % CLEAN_STRIDE == 0 {
            self.state.clean_expired();
        }

        if let Some(response) = self.handle_datagram(&buffer[..received], addr) {
            let _ = self.socket.send_to(&response, addr).await;
        }
        Ok(())
    }

    /// Parses one datagram and produces the reply, if any. Malformed
    /// packets and stale connection ids are dropped without an answer so
    /// the server cannot be used as an amplifier.
    fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) -> Option<Vec<u8>> {
        if data.len() < 16 {
            debug!(peer = %addr, "short datagram dropped");
            return None;
        }

        let action = read_u32(&data[8..12]);
        let transaction_id = read_u32(&data[12..16]);

        match action {
            ACTION_CONNECT => self.handle_connect(data, transaction_id, addr),
            ACTION_ANNOUNCE => self.handle_announce(data, transaction_id, addr),
            ACTION_SCRAPE => self.handle_scrape(data, transaction_id, addr),
            other => {
                debug!(peer = %addr, action = other, "unknown action");
                Some(error_response(transaction_id, "unknown action"))
            }
        }
    }

    fn handle_connect(
        &mut self,
        data: &[u8],
        transaction_id: u32,
        addr: SocketAddr,
    ) -> Option<Vec<u8>> {
        if read_u64(&data[0..8]) != PROTOCOL_ID {
            debug!(peer = %addr, "connect without protocol magic");
            return None;
        }

        let connection_id = self.state.new_connection_id();
        let mut response = Vec::with_capacity(16);
        response.extend(ACTION_CONNECT.to_be_bytes());
        response.extend(transaction_id.to_be_bytes());
        response.extend(connection_id.to_be_bytes());
        Some(response)
    }

    fn handle_announce(
        &mut self,
        data: &[u8],
        transaction_id: u32,
        addr: SocketAddr,
    ) -> Option<Vec<u8>> {
        let request = match AnnounceRequest::from_bytes(data) {
            Ok(request) => request,
            Err(e) => {
                debug!(peer = %addr, "bad announce: {:?}", e);
                return Some(error_response(transaction_id, "malformed announce"));
            }
        };

        if !self.state.is_connection_valid(request.connection_id) {
            warn!(peer = %addr, "announce with invalid connection id");
            return None;
        }

        let interval = self.state.interval();
        let announced_addr = SocketAddr::new(addr.ip(), request.port);

        let swarm = self.state.swarm_mut(request.info_hash);
        swarm.announce(Peer::from_request(&request, addr));
        let (seeders, leechers) = swarm.current_seeders_and_leechers();

        // a stopped announce still gets the counters header, just no peers
        let peers = if request.event == PeerEvent::Stopped {
            vec![]
        } else {
            let wanted = if request.num_want < 0 {
                DEFAULT_NUM_WANT
            } else {
                (request.num_want as u32).min(DEFAULT_NUM_WANT)
            };
            swarm.active_peers(wanted, announced_addr)
        };

        debug!(
            peer = %addr,
            seeders,
            leechers,
            returned = peers.len(),
            "announce handled"
        );

        Some(
            AnnounceResponse {
                interval,
                leechers,
                seeders,
                peers,
            }
            .to_bytes(transaction_id),
        )
    }

    fn handle_scrape(
        &mut self,
        data: &[u8],
        transaction_id: u32,
        addr: SocketAddr,
    ) -> Option<Vec<u8>> {
        if !self.state.is_connection_valid(read_u64(&data[0..8])) {
            warn!(peer = %addr, "scrape with invalid connection id");
            return None;
        }

        let hashes = &data[16..];
        if hashes.is_empty() || hashes.len() % 20 != 0 {
            return Some(error_response(transaction_id, "malformed scrape"));
        }

        let mut response = Vec::with_capacity(8 + (hashes.len() / 20) * 12);
        response.extend(ACTION_SCRAPE.to_be_bytes());
        response.extend(transaction_id.to_be_bytes());

        for hash in hashes.chunks(20) {
            let mut info_hash = [0u8; 20];
            info_hash.copy_from_slice(hash);

            let (seeders, completed, leechers) = match self.state.swarm(&info_hash) {
                Some(swarm) => {
                    let (seeders, leechers) = swarm.current_seeders_and_leechers();
                    (seeders, swarm.completed_count(), leechers)
                }
                None => (0, 0, 0),
            };
            response.extend(seeders.to_be_bytes());
            response.extend(completed.to_be_bytes());
            response.extend(leechers.to_be_bytes());
        }

        Some(response)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_issues_connection_id() {
        let mut server = create_test_server().await;
        let addr = "127.0.0.1:50000".parse().unwrap();

        let response = server
            .handle_datagram(&connect_packet(7), addr)
            .expect("connect should be answered");

        assert_eq!(read_u32(&response[0..4]), ACTION_CONNECT);
        assert_eq!(read_u32(&response[4..8]), 7);
        let connection_id = read_u64(&response[8..16]);
        assert!(server.state.is_connection_valid(connection_id));
    }

    #[tokio::test]
    async fn test_connect_without_magic_is_dropped() {
        let mut server = create_test_server().await;
        let addr = "127.0.0.1:50000".parse().unwrap();

        let mut packet = connect_packet(7);
        packet[0] = 0xff;

        assert!(server.handle_datagram(&packet, addr).is_none());
    }

    #[tokio::test]
    async fn test_announce_with_stale_connection_id_is_dropped() {
        let mut server = create_test_server().await;
        let addr = "127.0.0.1:50000".parse().unwrap();

        let packet = announce_packet(999, 7, [1; 20], [2; 20], 100, 0, 6881);

        assert!(server.handle_datagram(&packet, addr).is_none());
    }

    #[tokio::test]
    async fn test_announce_excludes_the_announcer() {
        let mut server = create_test_server().await;
        let connection_id = server.state.new_connection_id();

        // a seeder shows up first
        let seeder = announce_packet(connection_id, 1, [9; 20], [1; 20], 0, 0, 7001);
        server
            .handle_datagram(&seeder, "127.0.0.1:40001".parse().unwrap())
            .unwrap();

        // the leecher announces and must not see itself
        let leecher = announce_packet(connection_id, 2, [9; 20], [2; 20], 500, 2, 7002);
        let response = server
            .handle_datagram(&leecher, "127.0.0.1:40002".parse().unwrap())
            .unwrap();

        assert_eq!(read_u32(&response[0..4]), ACTION_ANNOUNCE);
        assert_eq!(read_u32(&response[12..16]), 1); // leechers
        assert_eq!(read_u32(&response[16..20]), 1); // seeders
        let peers = &response[20..];
        assert_eq!(peers.len(), 6);
        assert_eq!(&peers[0..4], &[127, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([peers[4], peers[5]]), 7001);
    }

    #[tokio::test]
    async fn test_stopped_announce_returns_header_only() {
        let mut server = create_test_server().await;
        let connection_id = server.state.new_connection_id();

        let seeder = announce_packet(connection_id, 1, [9; 20], [1; 20], 0, 0, 7001);
        server
            .handle_datagram(&seeder, "127.0.0.1:40001".parse().unwrap())
            .unwrap();

        let stopped = announce_packet(connection_id, 2, [9; 20], [2; 20], 500, 3, 7002);
        let response = server
            .handle_datagram(&stopped, "127.0.0.1:40002".parse().unwrap())
            .unwrap();

        assert_eq!(response.len(), 20);
        assert_eq!(read_u32(&response[12..16]), 1); // leechers header survives
        assert_eq!(read_u32(&response[16..20]), 1);
    }

    #[tokio::test]
    async fn test_scrape_counts_completions() {
        let mut server = create_test_server().await;
        let connection_id = server.state.new_connection_id();

        let seeder = announce_packet(connection_id, 1, [9; 20], [1; 20], 0, 0, 7001);
        server
            .handle_datagram(&seeder, "127.0.0.1:40001".parse().unwrap())
            .unwrap();
        let finisher = announce_packet(connection_id, 2, [9; 20], [2; 20], 0, 1, 7002);
        server
            .handle_datagram(&finisher, "127.0.0.1:40002".parse().unwrap())
            .unwrap();

        let mut scrape = Vec::new();
        scrape.extend(connection_id.to_be_bytes());
        scrape.extend(ACTION_SCRAPE.to_be_bytes());
        scrape.extend(5u32.to_be_bytes());
        scrape.extend([9; 20]);

        let response = server
            .handle_datagram(&scrape, "127.0.0.1:40003".parse().unwrap())
            .unwrap();

        assert_eq!(read_u32(&response[0..4]), ACTION_SCRAPE);
        assert_eq!(read_u32(&response[8..12]), 2); // seeders
        assert_eq!(read_u32(&response[12..16]), 1); // completed
        assert_eq!(read_u32(&response[16..20]), 0); // leechers
    }

    #[tokio::test]
    async fn test_unknown_action_gets_error_packet() {
        let mut server = create_test_server().await;
        let addr = "127.0.0.1:50000".parse().unwrap();

        let mut packet = connect_packet(7);
        packet[8..12].copy_from_slice(&9u32.to_be_bytes());

        let response = server.handle_datagram(&packet, addr).unwrap();

        assert_eq!(read_u32(&response[0..4]), 3);
        assert_eq!(read_u32(&response[4..8]), 7);
    }

    // Auxiliary functions

    async fn create_test_server() -> TrackerServer {
        TrackerServer::bind("127.0.0.1:0").await.unwrap()
    }

    fn connect_packet(transaction_id: u32) -> Vec<u8> {
        let mut packet = Vec::with_capacity(16);
        packet.extend(PROTOCOL_ID.to_be_bytes());
        packet.extend(ACTION_CONNECT.to_be_bytes());
        packet.extend(transaction_id.to_be_bytes());
        packet
    }

    #[allow(clippy::too_many_arguments)]
    fn announce_packet(
        connection_id: u64,
        transaction_id: u32,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        left: u64,
        event: u32,
        port: u16,
    ) -> Vec<u8> {
        let mut packet = Vec::with_capacity(98);
        packet.extend(connection_id.to_be_bytes());
        packet.extend(ACTION_ANNOUNCE.to_be_bytes());
        packet.extend(transaction_id.to_be_bytes());
        packet.extend(info_hash);
        packet.extend(peer_id);
        packet.extend(0u64.to_be_bytes());
        packet.extend(left.to_be_bytes());
        packet.extend(0u64.to_be_bytes());
        packet.extend(event.to_be_bytes());
        packet.extend(0u32.to_be_bytes());
        packet.extend(0u32.to_be_bytes());
        packet.extend((-1i32).to_be_bytes());
        packet.extend(port.to_be_bytes());
        packet
    }
}
