use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;
use rand::Rng;

use crate::torrent_swarm::swarm::Swarm;

type InfoHash = [u8; 20];

/// Issued connection ids stay valid for this long (BEP 15 allows servers
/// to accept them for up to two minutes; this server is generous so slow
/// retransmit ladders still land).
pub const CONNECTION_ID_VALIDITY: Duration = Duration::from_secs(300);

/// Peers that have not announced for twice the default interval are
/// forgotten.
const PEER_TIMEOUT_SECS: i64 = 3600;

/// All tracker state, owned by the server loop.
///
/// Connection ids and swarms live here and nowhere else; dropping the
/// server drops every trace of the peers it knew.
#[derive(Debug)]
pub struct TrackerState {
    connections: HashMap<u64, Instant>,
    swarms: HashMap<InfoHash, Swarm>,
    interval: u32,
}

impl TrackerState {
    pub fn new(interval: u32) -> Self {
        Self {
            connections: HashMap::new(),
            swarms: HashMap::new(),
            interval,
        }
    }

    /// Seconds clients are told to wait between periodic announces.
    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Issues a fresh connection id.
    pub fn new_connection_id(&mut self) -> u64 {
        let id = rand::thread_rng().gen();
        self.connections.insert(id, Instant::now());
        id
    }

    /// Whether the id was issued here within its validity window.
    pub fn is_connection_valid(&self, connection_id: u64) -> bool {
        self.connections
            .get(&connection_id)
            .map_or(false, |issued| issued.elapsed() < CONNECTION_ID_VALIDITY)
    }

    /// The swarm for an info_hash, created on first announce.
    pub fn swarm_mut(&mut self, info_hash: InfoHash) -> &mut Swarm {
        self.swarms
            .entry(info_hash)
            .or_insert_with(|| Swarm::new(ChronoDuration::seconds(PEER_TIMEOUT_SECS)))
    }

    pub fn swarm(&self, info_hash: &InfoHash) -> Option<&Swarm> {
        self.swarms.get(info_hash)
    }

    /// Drops expired connection ids, silent peers and empty swarms.
    pub fn clean_expired(&mut self) {
        self.connections
            .retain(|_, issued| issued.elapsed() < CONNECTION_ID_VALIDITY);
        for swarm in self.swarms.values_mut() {
            swarm.remove_inactive_peers();
        }
        self.swarms.retain(|_, swarm| !swarm.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_connection_id_is_valid() {
        let mut state = TrackerState::new(1800);

        let id = state.new_connection_id();

        assert!(state.is_connection_valid(id));
    }

    #[test]
    fn test_unknown_connection_id_is_invalid() {
        let state = TrackerState::new(1800);

        assert!(!state.is_connection_valid(12345));
    }

    #[test]
    fn test_swarms_are_created_on_demand() {
        let mut state = TrackerState::new(1800);

        assert!(state.swarm(&[1; 20]).is_none());
        state.swarm_mut([1; 20]);
        assert!(state.swarm(&[1; 20]).is_some());
    }

    #[test]
    fn test_clean_expired_drops_empty_swarms() {
        let mut state = TrackerState::new(1800);
        state.swarm_mut([1; 20]);

        state.clean_expired();

        assert!(state.swarm(&[1; 20]).is_none());
    }
}
