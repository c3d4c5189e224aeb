use std::sync::Arc;

use sha1::{Digest, Sha1};
use tokio::task;
use tracing::{debug, info};

use crate::swarm::status::{SwarmStatus, SwarmStatusError};

/// Possible verifier errors.
#[derive(Debug)]
pub enum VerifierError {
    Status(SwarmStatusError),
    HashTaskFailed,
}

/// Publish a progress snapshot every this many scanned pieces.
const SCAN_PROGRESS_STRIDE: u32 = 32;

/// Scans the content already on disk before the first announce, so the
/// bitfield we advertise is accurate and finished torrents start as
/// seeders.
///
/// Every selected piece is read back and hashed: a match marks it
/// downloaded, a mismatch or short read resets it for download.
pub async fn verify_existing_data(status: &Arc<SwarmStatus>) -> Result<(), VerifierError> {
    let piece_count = status.torrent().total_pieces();
    let mut verified = 0;

    for piece_index in 0..piece_count {
        if check_piece(status, piece_index).await? {
            status
                .mark_piece_verified(piece_index)
                .map_err(VerifierError::Status)?;
            verified += 1;
        } else {
            status
                .reset_piece(piece_index)
                .map_err(VerifierError::Status)?;
        }

        if piece_index % SCAN_PROGRESS_STRIDE == 0 {
            status.publish();
        }
    }

    info!(
        torrent = %status.torrent().name(),
        verified,
        total = piece_count,
        "startup verification finished"
    );
    status.publish();
    Ok(())
}

/// Hashes a freshly completed piece and applies the outcome. Exactly one
/// task runs this per completion: the scheduler flips the piece to
/// `validating` under the store lock before this is spawned.
pub async fn validate_piece(
    status: Arc<SwarmStatus>,
    piece_index: u32,
) -> Result<bool, VerifierError> {
    let ok = check_piece(&status, piece_index).await?;
    if !ok {
        debug!(
            torrent = %status.torrent().name(),
            piece = piece_index,
            "piece failed hash check, resetting"
        );
    }
    status
        .finish_validation(piece_index, ok)
        .map_err(VerifierError::Status)
}

/// Reads the piece and compares its SHA-1 with the metainfo digest. Short
/// reads count as missing content.
async fn check_piece(status: &Arc<SwarmStatus>, piece_index: u32) -> Result<bool, VerifierError> {
    let real_length = status.torrent().info.real_piece_length(piece_index) as usize;
    let data = status
        .read_piece(piece_index)
        .await
        .map_err(VerifierError::Status)?;

    if data.len() != real_length {
        return Ok(false);
    }

    let mut expected = [0u8; 20];
    expected.copy_from_slice(status.torrent().info.piece_hash(piece_index));

    // hashing a multi-megabyte piece would stall the reactor
    task::spawn_blocking(move || {
        let digest = Sha1::digest(&data);
        digest[..] == expected[..]
    })
    .await
    .map_err(|_| VerifierError::HashTaskFailed)
}
