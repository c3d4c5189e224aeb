use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{Duration, Local};

use crate::announce::event::PeerEvent;
use crate::tracker_peer::peer::Peer;

type PeerId = [u8; 20];

/// The set of peers announced for one torrent.
///
/// Seeder/leecher counters are kept in lockstep with the peer map so the
/// announce header never needs a full scan.
#[derive(Debug, Clone)]
pub struct Swarm {
    peers: HashMap<PeerId, Peer>,
    peer_timeout: Duration,
    seeders: u32,
    leechers: u32,
    completed: u32,
}

impl Swarm {
    /// Creates a new swarm.
    ///
    /// ## Arguments
    /// * `peer_timeout`: how long a silent peer stays listed.
    pub fn new(peer_timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            peer_timeout,
            seeders: 0,
            leechers: 0,
            completed: 0,
        }
    }

    /// Adds or refreshes a peer, keeping the seeder/leecher counters
    /// consistent across role changes.
    pub fn announce(&mut self, incoming_peer: Peer) {
        if incoming_peer.event == PeerEvent::Completed {
            self.completed += 1;
        }
        let old_peer = self.peers.insert(incoming_peer.id, incoming_peer.clone());

        if let Some(old_peer) = old_peer {
            if old_peer.is_leecher() {
                self.leechers -= 1;
            } else {
                self.seeders -= 1;
            }
        }

        if incoming_peer.is_leecher() {
            self.leechers += 1;
        } else {
            self.seeders += 1;
        }
    }

    /// Returns up to `wanted_peers` peers, never including the announcing
    /// `(ip, port)` itself.
    pub fn active_peers(&self, wanted_peers: u32, exclude: SocketAddr) -> Vec<SocketAddr> {
        self.peers
            .values()
            .map(|peer| peer.addr)
            .filter(|addr| *addr != exclude)
            .take(wanted_peers as usize)
            .collect()
    }

    /// Returns the current amount of seeders and leechers in the swarm.
    pub fn current_seeders_and_leechers(&self) -> (u32, u32) {
        (self.seeders, self.leechers)
    }

    /// How many peers reported a completed download here.
    pub fn completed_count(&self) -> u32 {
        self.completed
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Removes any inactive peers from the swarm.
    pub fn remove_inactive_peers(&mut self) {
        let timeout = self.peer_timeout;
        let seeders = &mut self.seeders;
        let leechers = &mut self.leechers;

        self.peers.retain(|_, peer| {
            if Local::now().signed_duration_since(peer.last_seen()) > timeout {
                if peer.is_leecher() {
                    *leechers -= 1;
                } else {
                    *seeders -= 1;
                }
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::announce_request::AnnounceRequest;
    use crate::announce::event::PeerEvent;

    #[test]
    fn test_announce_counts_roles() {
        let mut swarm = create_test_swarm();
        swarm.announce(create_test_peer([1; 20], 0, 6881));
        swarm.announce(create_test_peer([2; 20], 100, 6882));

        assert_eq!(swarm.current_seeders_and_leechers(), (1, 1));
    }

    #[test]
    fn test_reannounce_updates_role_without_double_count() {
        let mut swarm = create_test_swarm();
        swarm.announce(create_test_peer([1; 20], 100, 6881));
        swarm.announce(create_test_peer([1; 20], 0, 6881));

        assert_eq!(swarm.current_seeders_and_leechers(), (1, 0));
    }

    #[test]
    fn test_active_peers_excludes_the_announcer() {
        let mut swarm = create_test_swarm();
        swarm.announce(create_test_peer([1; 20], 0, 6881));
        swarm.announce(create_test_peer([2; 20], 0, 6882));

        let peers = swarm.active_peers(50, "127.0.0.1:6881".parse().unwrap());

        assert_eq!(peers, vec!["127.0.0.1:6882".parse().unwrap()]);
    }

    #[test]
    fn test_active_peers_respects_wanted_count() {
        let mut swarm = create_test_swarm();
        for i in 0..10 {
            swarm.announce(create_test_peer([i; 20], 0, 7000 + u16::from(i)));
        }

        let peers = swarm.active_peers(3, "10.9.9.9:1".parse().unwrap());

        assert_eq!(peers.len(), 3);
    }

    #[test]
    fn test_inactive_peers_are_pruned() {
        let mut swarm = Swarm::new(Duration::zero());
        swarm.announce(create_test_peer([1; 20], 0, 6881));
        std::thread::sleep(std::time::Duration::from_millis(5));

        swarm.remove_inactive_peers();

        assert!(swarm.is_empty());
        assert_eq!(swarm.current_seeders_and_leechers(), (0, 0));
    }

    // Auxiliary functions

    fn create_test_swarm() -> Swarm {
        Swarm::new(Duration::hours(1))
    }

    fn create_test_peer(id: [u8; 20], left: u64, port: u16) -> Peer {
        let request = AnnounceRequest {
            connection_id: 1,
            transaction_id: 2,
            info_hash: [9; 20],
            peer_id: id,
            downloaded: 0,
            left,
            uploaded: 0,
            event: PeerEvent::None,
            ip: 0,
            key: 0,
            num_want: -1,
            port,
        };
        Peer::from_request(&request, format!("127.0.0.1:{}", port).parse().unwrap())
    }
}
