use chrono::{DateTime, Local};

use crate::stats::rate::RateEstimator;

/// Both directions of the per-peer protocol state plus the session-scoped
/// transfer counters.
///
/// Initial state per the protocol: both sides choking, neither interested.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// We are choking the peer.
    pub am_choking: bool,
    /// We want pieces the peer has.
    pub am_interested: bool,
    /// The peer is choking us.
    pub peer_choking: bool,
    /// The peer wants pieces we have.
    pub peer_interested: bool,
    pub downloaded: u64,
    pub uploaded: u64,
    pub download_rate: RateEstimator,
    pub upload_rate: RateEstimator,
    pub last_seen: DateTime<Local>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            downloaded: 0,
            uploaded: 0,
            download_rate: RateEstimator::default(),
            upload_rate: RateEstimator::default(),
            last_seen: Local::now(),
        }
    }

    pub fn add_downloaded(&mut self, bytes: u64) {
        self.downloaded += bytes;
        self.download_rate.record(bytes);
        self.last_seen = Local::now();
    }

    pub fn add_uploaded(&mut self, bytes: u64) {
        self.uploaded += bytes;
        self.upload_rate.record(bytes);
        self.last_seen = Local::now();
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_choked_and_uninterested() {
        let status = SessionStatus::new();

        assert!(status.am_choking);
        assert!(status.peer_choking);
        assert!(!status.am_interested);
        assert!(!status.peer_interested);
    }

    #[test]
    fn test_counters_accumulate() {
        let mut status = SessionStatus::new();
        status.add_downloaded(16384);
        status.add_downloaded(1024);
        status.add_uploaded(512);

        assert_eq!(status.downloaded, 17408);
        assert_eq!(status.uploaded, 512);
    }
}
