use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use rand::prelude::IteratorRandom;

use crate::peer::peer_message::{Bitfield, BlockRequest, BLOCK_SIZE};

use super::piece_state::{PeerHandle, PieceState};

/// A block request is revoked when no response arrived within this window.
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Every third request timeout costs the peer one distrust point.
const TIMEOUTS_PER_DISTRUST: u32 = 3;

/// At this distrust score the peer is blacklisted for the session.
const DISTRUST_LIMIT: u32 = 3;

#[derive(Debug)]
struct PeerScheduling {
    choking_us: bool,
    owned: HashSet<u32>,
    /// Outside endgame a peer downloads one piece at a time.
    active_piece: Option<u32>,
    inflight: u32,
    timeouts: u32,
    distrust: u32,
}

impl PeerScheduling {
    fn new() -> Self {
        Self {
            choking_us: true,
            owned: HashSet::new(),
            active_piece: None,
            inflight: 0,
            timeouts: 0,
            distrust: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Assignment {
    peer: PeerHandle,
    deadline: Instant,
}

/// Outcome of an incoming block.
#[derive(Debug, PartialEq)]
pub enum BlockReceipt {
    /// The piece is already validating or downloaded; the write was skipped.
    Ignored,
    Accepted {
        /// Other peers still assigned this block; they get a `cancel`.
        cancels: Vec<(PeerHandle, BlockRequest)>,
        /// All blocks of the piece are now present; validation must start.
        piece_complete: bool,
    },
}

/// Outcome of a timeout sweep.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub revoked: Vec<(PeerHandle, BlockRequest)>,
    pub blacklisted: Vec<PeerHandle>,
}

/// Outcome of a finished hash check.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub downloaded: bool,
    pub blacklisted: Vec<PeerHandle>,
    /// Every selected piece is downloaded.
    pub complete: bool,
}

/// Decides which `(peer, piece, block)` request to issue next.
///
/// Piece selection is rarest-first with random tie-breaking; once the set of
/// wanted pieces shrinks to the endgame threshold, remaining blocks are
/// requested from every owner in parallel and the first arrival cancels the
/// rest. Peers that keep timing out or feed us corrupt pieces accrue
/// distrust and end up blacklisted.
#[derive(Debug)]
pub struct RequestScheduler {
    piece_length: u32,
    total_size: u64,
    pieces: Vec<PieceState>,
    /// Pieces that are selected and not yet downloaded.
    interesting: HashSet<u32>,
    downloaded_count: u32,
    selected_count: u32,
    /// piece -> block begin -> peers the block is assigned to.
    assignments: HashMap<u32, HashMap<u32, Vec<Assignment>>>,
    peers: HashMap<PeerHandle, PeerScheduling>,
    blacklist: HashSet<PeerHandle>,
    pipeline: u32,
    endgame_threshold: u32,
}

impl RequestScheduler {
    pub fn new(piece_length: u32, total_size: u64, pipeline: u32, endgame_threshold: u32) -> Self {
        let piece_count =
            ((total_size + u64::from(piece_length) - 1) / u64::from(piece_length)) as u32;

        let pieces = (0..piece_count)
            .map(|index| {
                let start = u64::from(index) * u64::from(piece_length);
                let real_length = (total_size - start).min(u64::from(piece_length)) as u32;
                PieceState::new(index, real_length)
            })
            .collect();

        Self {
            piece_length,
            total_size,
            pieces,
            interesting: (0..piece_count).collect(),
            downloaded_count: 0,
            selected_count: piece_count,
            assignments: HashMap::new(),
            peers: HashMap::new(),
            blacklist: HashSet::new(),
            pipeline,
            endgame_threshold,
        }
    }

    // ------------------------------------------------------------------
    // Roster bookkeeping

    pub fn register_peer(&mut self, handle: PeerHandle) {
        self.peers.insert(handle, PeerScheduling::new());
    }

    pub fn remove_peer(&mut self, handle: PeerHandle) {
        if let Some(peer) = self.peers.remove(&handle) {
            for index in peer.owned {
                if let Some(piece) = self.pieces.get_mut(index as usize) {
                    piece.owners.remove(&handle);
                }
            }
        }
        for blocks in self.assignments.values_mut() {
            for holders in blocks.values_mut() {
                holders.retain(|a| a.peer != handle);
            }
            blocks.retain(|_, holders| !holders.is_empty());
        }
        self.assignments.retain(|_, blocks| !blocks.is_empty());
    }

    /// Registers that `handle` owns `piece_index`. Returns whether the piece
    /// is currently interesting, so the session can flip `am_interested`.
    pub fn mark_owner(&mut self, handle: PeerHandle, piece_index: u32) -> bool {
        if let Some(piece) = self.pieces.get_mut(piece_index as usize) {
            piece.owners.insert(handle);
        }
        if let Some(peer) = self.peers.get_mut(&handle) {
            peer.owned.insert(piece_index);
        }
        self.interesting.contains(&piece_index)
    }

    /// Whether the peer owns any piece we still want.
    pub fn peer_has_interesting(&self, handle: PeerHandle) -> bool {
        match self.peers.get(&handle) {
            Some(peer) => peer.owned.iter().any(|i| self.interesting.contains(i)),
            None => false,
        }
    }

    /// Records the remote choke state. Assignments are left in place on a
    /// choke: they come back through the timeout sweep, which also charges
    /// the peer for the stall.
    pub fn set_peer_choking(&mut self, handle: PeerHandle, choking: bool) {
        if let Some(peer) = self.peers.get_mut(&handle) {
            peer.choking_us = choking;
        }
    }

    pub fn is_blacklisted(&self, handle: PeerHandle) -> bool {
        self.blacklist.contains(&handle)
    }

    // ------------------------------------------------------------------
    // Request selection

    /// Endgame starts once the wanted set is down to the threshold.
    pub fn is_endgame(&self) -> bool {
        !self.interesting.is_empty() && self.interesting.len() as u32 <= self.endgame_threshold
    }

    /// Fills the peer's pipeline and returns the requests to put on the
    /// wire. Empty when the peer is choking us, blacklisted, or there is
    /// nothing useful to ask of it.
    pub fn next_requests(&mut self, handle: PeerHandle) -> Vec<BlockRequest> {
        if self.blacklist.contains(&handle) {
            return vec![];
        }
        match self.peers.get(&handle) {
            Some(peer) if !peer.choking_us => (),
            _ => return vec![],
        }

        let now = Instant::now();
        let mut requests = Vec::new();
        if self.is_endgame() {
            self.fill_endgame(handle, now, &mut requests);
        } else {
            self.fill_rarest_first(handle, now, &mut requests);
        }
        requests
    }

    fn fill_rarest_first(
        &mut self,
        handle: PeerHandle,
        now: Instant,
        requests: &mut Vec<BlockRequest>,
    ) {
        loop {
            if self.peer_inflight(handle) >= self.pipeline {
                return;
            }

            let piece_index = match self.peers.get(&handle).and_then(|p| p.active_piece) {
                Some(index) => index,
                None => match self.pick_rarest_piece(handle) {
                    Some(index) => {
                        if let Some(peer) = self.peers.get_mut(&handle) {
                            peer.active_piece = Some(index);
                        }
                        index
                    }
                    None => return,
                },
            };

            let piece = &self.pieces[piece_index as usize];
            if piece.validating || piece.downloaded {
                if let Some(peer) = self.peers.get_mut(&handle) {
                    peer.active_piece = None;
                }
                continue;
            }

            let assigned = self.assignments.get(&piece_index);
            let begin = piece
                .missing_blocks()
                .into_iter()
                .find(|b| assigned.map_or(true, |blocks| !blocks.contains_key(b)));

            match begin {
                Some(begin) => {
                    self.assign(piece_index, begin, handle, now);
                    requests.push(self.block_request(piece_index, begin));
                }
                // every missing block is already in flight to us
                None => return,
            }
        }
    }

    fn fill_endgame(
        &mut self,
        handle: PeerHandle,
        now: Instant,
        requests: &mut Vec<BlockRequest>,
    ) {
        let mut wanted: Vec<u32> = self
            .interesting
            .iter()
            .copied()
            .filter(|&i| {
                let piece = &self.pieces[i as usize];
                !piece.validating && !piece.downloaded && piece.owners.contains(&handle)
            })
            .collect();
        wanted.sort_unstable();

        for piece_index in wanted {
            for begin in self.pieces[piece_index as usize].missing_blocks() {
                if self.peer_inflight(handle) >= self.pipeline {
                    return;
                }
                let already_ours = self
                    .assignments
                    .get(&piece_index)
                    .and_then(|blocks| blocks.get(&begin))
                    .map_or(false, |holders| holders.iter().any(|a| a.peer == handle));
                if already_ours {
                    continue;
                }
                self.assign(piece_index, begin, handle, now);
                requests.push(self.block_request(piece_index, begin));
            }
        }
    }

    /// Rarest piece this peer owns that nobody is working on, ties broken
    /// at random so duplicate swarms do not stampede the same piece.
    fn pick_rarest_piece(&self, handle: PeerHandle) -> Option<u32> {
        let peer = self.peers.get(&handle)?;
        let busy: HashSet<u32> = self.peers.values().filter_map(|p| p.active_piece).collect();

        let candidate = |index: u32| -> bool {
            let piece = &self.pieces[index as usize];
            !piece.validating
                && !piece.downloaded
                && peer.owned.contains(&index)
                && !busy.contains(&index)
                && self
                    .assignments
                    .get(&index)
                    .map_or(true, |blocks| blocks.is_empty())
        };

        let min_owners = self
            .interesting
            .iter()
            .copied()
            .filter(|index| candidate(*index))
            .map(|index| self.pieces[index as usize].owners.len())
            .min()?;

        self.interesting
            .iter()
            .copied()
            .filter(|index| candidate(*index))
            .filter(|index| self.pieces[*index as usize].owners.len() == min_owners)
            .choose(&mut rand::thread_rng())
    }

    // ------------------------------------------------------------------
    // Progress

    /// Records an incoming block. Callers must hold the file store lock so
    /// the validating/downloaded check cannot race the hash task.
    pub fn block_received(&mut self, handle: PeerHandle, piece_index: u32, begin: u32) -> BlockReceipt {
        let request = self.block_request(piece_index, begin);
        let piece = match self.pieces.get_mut(piece_index as usize) {
            Some(piece) => piece,
            None => return BlockReceipt::Ignored,
        };
        if piece.validating || piece.downloaded {
            return BlockReceipt::Ignored;
        }

        piece.mark_block(begin);
        piece.contributors.insert(handle);

        let mut cancels = Vec::new();
        if let Some(blocks) = self.assignments.get_mut(&piece_index) {
            if let Some(holders) = blocks.remove(&begin) {
                for assignment in holders {
                    if let Some(peer) = self.peers.get_mut(&assignment.peer) {
                        peer.inflight = peer.inflight.saturating_sub(1);
                    }
                    if assignment.peer != handle {
                        cancels.push((assignment.peer, request));
                    }
                }
            }
        }

        let piece_complete = self.pieces[piece_index as usize].is_complete();
        if piece_complete {
            self.pieces[piece_index as usize].validating = true;
            self.clear_piece_assignments(piece_index);
        }

        BlockReceipt::Accepted {
            cancels,
            piece_complete,
        }
    }

    /// Applies a finished hash check. On success the piece is downloaded
    /// for good; on failure its content is dropped and every contributor is
    /// charged one distrust point.
    pub fn piece_validated(&mut self, piece_index: u32, ok: bool) -> ValidationOutcome {
        let mut blacklisted = Vec::new();

        let contributors: Vec<PeerHandle> = match self.pieces.get(piece_index as usize) {
            Some(piece) => piece.contributors.iter().copied().collect(),
            None => vec![],
        };

        if ok {
            let piece = &mut self.pieces[piece_index as usize];
            if !piece.downloaded {
                piece.mark_downloaded();
                self.interesting.remove(&piece_index);
                self.downloaded_count += 1;
            }
        } else {
            self.pieces[piece_index as usize].reset_content();
            for handle in contributors {
                if self.bump_distrust(handle) {
                    blacklisted.push(handle);
                }
            }
        }

        self.clear_piece_assignments(piece_index);

        ValidationOutcome {
            downloaded: ok,
            blacklisted,
            complete: self.is_complete(),
        }
    }

    /// Marks a piece verified by the startup scan.
    pub fn mark_piece_verified(&mut self, piece_index: u32) {
        let piece = &mut self.pieces[piece_index as usize];
        if !piece.downloaded {
            piece.mark_downloaded();
            self.interesting.remove(&piece_index);
            self.downloaded_count += 1;
        }
    }

    /// Resets a piece whose on-disk content failed the startup scan.
    pub fn reset_piece(&mut self, piece_index: u32) {
        self.pieces[piece_index as usize].reset_content();
        self.interesting.insert(piece_index);
    }

    /// Revokes assignments whose deadline has passed and charges the slow
    /// peers. Returns what was revoked and who crossed the blacklist line.
    pub fn sweep_timeouts(&mut self, now: Instant) -> SweepOutcome {
        let mut expired: Vec<(u32, u32, PeerHandle)> = Vec::new();
        for (&piece_index, blocks) in &self.assignments {
            for (&begin, holders) in blocks {
                for assignment in holders {
                    if assignment.deadline <= now {
                        expired.push((piece_index, begin, assignment.peer));
                    }
                }
            }
        }

        let mut outcome = SweepOutcome::default();
        for (piece_index, begin, handle) in expired {
            self.revoke(piece_index, begin, handle);
            outcome
                .revoked
                .push((handle, self.block_request(piece_index, begin)));

            let mut charge = false;
            if let Some(peer) = self.peers.get_mut(&handle) {
                peer.timeouts += 1;
                charge = peer.timeouts % TIMEOUTS_PER_DISTRUST == 0;
            }
            if charge && self.bump_distrust(handle) {
                outcome.blacklisted.push(handle);
            }
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Queries

    pub fn bitfield(&self) -> Bitfield {
        let mut bitfield = Bitfield::new_empty(self.pieces.len() as u32);
        for piece in &self.pieces {
            if piece.downloaded {
                bitfield.set_bit(piece.index, true);
            }
        }
        bitfield
    }

    pub fn has_piece(&self, piece_index: u32) -> bool {
        self.pieces
            .get(piece_index as usize)
            .map_or(false, |piece| piece.downloaded)
    }

    pub fn piece_count(&self) -> u32 {
        self.pieces.len() as u32
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn real_piece_length(&self, piece_index: u32) -> u32 {
        let start = u64::from(piece_index) * u64::from(self.piece_length);
        (self.total_size - start).min(u64::from(self.piece_length)) as u32
    }

    pub fn downloaded_count(&self) -> u32 {
        self.downloaded_count
    }

    pub fn interesting_count(&self) -> u32 {
        self.interesting.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded_count == self.selected_count
    }

    pub fn is_validating(&self, piece_index: u32) -> bool {
        self.pieces
            .get(piece_index as usize)
            .map_or(false, |piece| piece.validating)
    }

    // ------------------------------------------------------------------
    // Internals

    fn peer_inflight(&self, handle: PeerHandle) -> u32 {
        self.peers.get(&handle).map_or(0, |peer| peer.inflight)
    }

    fn assign(&mut self, piece_index: u32, begin: u32, handle: PeerHandle, now: Instant) {
        self.assignments
            .entry(piece_index)
            .or_default()
            .entry(begin)
            .or_default()
            .push(Assignment {
                peer: handle,
                deadline: now + BLOCK_TIMEOUT,
            });
        if let Some(peer) = self.peers.get_mut(&handle) {
            peer.inflight += 1;
        }
    }

    fn revoke(&mut self, piece_index: u32, begin: u32, handle: PeerHandle) {
        if let Some(blocks) = self.assignments.get_mut(&piece_index) {
            if let Some(holders) = blocks.get_mut(&begin) {
                holders.retain(|a| a.peer != handle);
                if holders.is_empty() {
                    blocks.remove(&begin);
                }
            }
            if blocks.is_empty() {
                self.assignments.remove(&piece_index);
            }
        }
        let still_assigned = self.assignments.get(&piece_index).map_or(false, |blocks| {
            blocks
                .values()
                .any(|holders| holders.iter().any(|a| a.peer == handle))
        });
        if let Some(peer) = self.peers.get_mut(&handle) {
            peer.inflight = peer.inflight.saturating_sub(1);
            if peer.active_piece == Some(piece_index) && !still_assigned {
                peer.active_piece = None;
            }
        }
    }

    fn clear_piece_assignments(&mut self, piece_index: u32) {
        if let Some(blocks) = self.assignments.remove(&piece_index) {
            for holders in blocks.values() {
                for assignment in holders {
                    if let Some(peer) = self.peers.get_mut(&assignment.peer) {
                        peer.inflight = peer.inflight.saturating_sub(1);
                    }
                }
            }
        }
        for peer in self.peers.values_mut() {
            if peer.active_piece == Some(piece_index) {
                peer.active_piece = None;
            }
        }
    }

    fn bump_distrust(&mut self, handle: PeerHandle) -> bool {
        if let Some(peer) = self.peers.get_mut(&handle) {
            peer.distrust += 1;
            if peer.distrust >= DISTRUST_LIMIT {
                return self.blacklist.insert(handle);
            }
        }
        false
    }

    fn block_request(&self, piece_index: u32, begin: u32) -> BlockRequest {
        let real_length = self.real_piece_length(piece_index);
        let length = (real_length - begin).min(BLOCK_SIZE);
        BlockRequest::new(piece_index, begin, length)
    }
}
