use std::collections::HashSet;

use crate::peer::peer_message::BLOCK_SIZE;

/// Opaque identity of a peer session inside one swarm. Handles are issued
/// by the roster and never reused, so stale references simply miss.
pub type PeerHandle = u64;

/// Download state of a single piece.
///
/// Progress runs `empty -> partial -> complete-unverified -> downloaded`,
/// or back to empty when the hash check fails. While `validating` is set
/// the piece is owned by the hash task: incoming blocks for it are dropped
/// and it is excluded from request selection.
#[derive(Debug, Clone)]
pub struct PieceState {
    pub index: u32,
    pub selected: bool,
    pub downloaded: bool,
    pub validating: bool,
    blocks_present: Vec<bool>,
    /// Peers that claim to have this piece.
    pub owners: HashSet<PeerHandle>,
    /// Peers that supplied blocks of the current (unverified) content.
    pub contributors: HashSet<PeerHandle>,
}

impl PieceState {
    pub fn new(index: u32, real_length: u32) -> Self {
        let block_count = ((real_length + BLOCK_SIZE - 1) / BLOCK_SIZE) as usize;
        Self {
            index,
            selected: true,
            downloaded: false,
            validating: false,
            blocks_present: vec![false; block_count],
            owners: HashSet::new(),
            contributors: HashSet::new(),
        }
    }

    pub fn block_count(&self) -> u32 {
        self.blocks_present.len() as u32
    }

    /// Marks the block starting at `begin` as present.
    pub fn mark_block(&mut self, begin: u32) {
        let block = (begin / BLOCK_SIZE) as usize;
        if let Some(present) = self.blocks_present.get_mut(block) {
            *present = true;
        }
    }

    pub fn has_block(&self, begin: u32) -> bool {
        self.blocks_present
            .get((begin / BLOCK_SIZE) as usize)
            .copied()
            .unwrap_or(false)
    }

    /// A piece is complete when every block is present.
    pub fn is_complete(&self) -> bool {
        self.blocks_present.iter().all(|present| *present)
    }

    /// Begin offsets of the blocks still missing.
    pub fn missing_blocks(&self) -> Vec<u32> {
        self.blocks_present
            .iter()
            .enumerate()
            .filter(|(_, present)| !**present)
            .map(|(block, _)| block as u32 * BLOCK_SIZE)
            .collect()
    }

    /// Drops all unverified content after a failed hash check.
    pub fn reset_content(&mut self) {
        for present in &mut self.blocks_present {
            *present = false;
        }
        self.validating = false;
        self.downloaded = false;
        self.contributors.clear();
    }

    pub fn mark_downloaded(&mut self) {
        self.downloaded = true;
        self.validating = false;
        self.contributors.clear();
    }
}
