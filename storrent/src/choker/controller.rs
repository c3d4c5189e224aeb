use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Duration;

use rand::prelude::IteratorRandom;

use crate::scheduler::piece_state::PeerHandle;

/// The unchoke set is recomputed on this cadence.
pub const CHOKE_INTERVAL: Duration = Duration::from_secs(10);

/// The optimistic slot rotates every third tick (30 s).
const OPTIMISTIC_ROTATION_TICKS: u64 = 3;

/// One peer as seen by the choke controller.
#[derive(Debug, Clone)]
pub struct ChokeCandidate {
    pub handle: PeerHandle,
    /// The remote side declared interest, so unchoking it matters.
    pub interested: bool,
    /// Download rate from the peer while leeching, upload rate to it once
    /// we are a seeder.
    pub rate: f64,
}

/// Periodic unchoke decisions: top-K interested peers by observed rate,
/// plus one randomly rotated optimistic slot so cold peers get a chance to
/// prove themselves.
#[derive(Debug)]
pub struct ChokeController {
    unchoke_slots: usize,
    tick: u64,
    optimistic: Option<PeerHandle>,
}

impl ChokeController {
    pub fn new(unchoke_slots: u32) -> Self {
        Self {
            unchoke_slots: unchoke_slots as usize,
            tick: 0,
            optimistic: None,
        }
    }

    /// Computes the set of peers to unchoke for this tick. Every candidate
    /// not in the returned set should be choked.
    pub fn decide(&mut self, candidates: Vec<ChokeCandidate>) -> HashSet<PeerHandle> {
        self.tick += 1;

        let mut eligible: Vec<ChokeCandidate> =
            candidates.into_iter().filter(|c| c.interested).collect();
        eligible.sort_by(|a, b| b.rate.partial_cmp(&a.rate).unwrap_or(Ordering::Equal));

        let mut unchoked: HashSet<PeerHandle> = eligible
            .iter()
            .take(self.unchoke_slots)
            .map(|c| c.handle)
            .collect();

        self.rotate_optimistic(&eligible, &unchoked);
        if let Some(handle) = self.optimistic {
            unchoked.insert(handle);
        }

        unchoked
    }

    fn rotate_optimistic(&mut self, eligible: &[ChokeCandidate], unchoked: &HashSet<PeerHandle>) {
        let still_valid = self.optimistic.map_or(false, |handle| {
            eligible.iter().any(|c| c.handle == handle) && !unchoked.contains(&handle)
        });
        let due = self.tick % OPTIMISTIC_ROTATION_TICKS == 1;

        if still_valid && !due {
            return;
        }

        self.optimistic = eligible
            .iter()
            .map(|c| c.handle)
            .filter(|handle| !unchoked.contains(handle))
            .choose(&mut rand::thread_rng());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_candidates_by_rate_are_unchoked() {
        let mut controller = ChokeController::new(2);

        let unchoked = controller.decide(vec![
            create_candidate(1, 100.0),
            create_candidate(2, 300.0),
            create_candidate(3, 200.0),
        ]);

        assert!(unchoked.contains(&2));
        assert!(unchoked.contains(&3));
    }

    #[test]
    fn test_uninterested_peers_are_never_unchoked() {
        let mut controller = ChokeController::new(2);

        let unchoked = controller.decide(vec![
            ChokeCandidate {
                handle: 1,
                interested: false,
                rate: 1000.0,
            },
            create_candidate(2, 10.0),
        ]);

        assert!(!unchoked.contains(&1));
        assert!(unchoked.contains(&2));
    }

    #[test]
    fn test_optimistic_slot_comes_from_leftovers() {
        let mut controller = ChokeController::new(1);

        let unchoked = controller.decide(vec![
            create_candidate(1, 300.0),
            create_candidate(2, 10.0),
            create_candidate(3, 20.0),
        ]);

        // one ranked slot plus the optimistic one
        assert_eq!(unchoked.len(), 2);
        assert!(unchoked.contains(&1));
    }

    #[test]
    fn test_optimistic_slot_is_sticky_between_rotations() {
        let mut controller = ChokeController::new(1);
        let candidates = || {
            vec![
                create_candidate(1, 300.0),
                create_candidate(2, 10.0),
                create_candidate(3, 20.0),
            ]
        };

        let first = controller.decide(candidates());
        let optimistic = controller.optimistic.unwrap();
        let second = controller.decide(candidates());

        assert!(first.contains(&optimistic));
        assert!(second.contains(&optimistic));
    }

    #[test]
    fn test_no_candidates_unchokes_nobody() {
        let mut controller = ChokeController::new(4);

        assert!(controller.decide(vec![]).is_empty());
    }

    // Auxiliary functions

    fn create_candidate(handle: PeerHandle, rate: f64) -> ChokeCandidate {
        ChokeCandidate {
            handle,
            interested: true,
            rate,
        }
    }
}
