use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use super::announce::{AnnounceEvent, AnnounceOutcome, AnnounceRequest};
use super::tracker_client::TrackerClient;

/// Sleep between full failed passes over every tier.
pub const ANNOUNCE_RETRY: Duration = Duration::from_secs(3);

const DEFAULT_INTERVAL_SECS: u32 = 1800;
const DEFAULT_NUM_WANT: i32 = -1;

/// Transfer totals reported with every announce.
#[derive(Debug, Clone, Copy)]
pub struct AnnounceProgress {
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

/// Possible `Announcer` errors.
#[derive(Debug)]
pub enum AnnouncerError {
    /// Every URL in every tier failed this pass.
    AllTrackersFailed,
}

/// Owns the announce tiers of one torrent.
///
/// Tiers are shuffled once at startup (BEP 12), then walked in order on
/// every announce; the first URL that answers is promoted to the head of
/// its tier so later announces try it first.
#[derive(Debug)]
pub struct Announcer {
    tiers: Vec<Vec<String>>,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    port: u16,
    key: u32,
    interval: u32,
    torrent_tag: String,
}

impl Announcer {
    pub fn new(
        mut tiers: Vec<Vec<String>>,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        port: u16,
        torrent_tag: String,
    ) -> Self {
        for tier in &mut tiers {
            tier.shuffle(&mut rand::thread_rng());
        }

        Self {
            tiers,
            info_hash,
            peer_id,
            port,
            key: rand::thread_rng().gen(),
            interval: DEFAULT_INTERVAL_SECS,
            torrent_tag,
        }
    }

    /// Seconds the last responding tracker asked us to wait between
    /// periodic announces.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval))
    }

    /// Walks the tiers until one URL answers.
    ///
    /// It returns `AllTrackersFailed` when the whole pass came up empty;
    /// callers sleep `ANNOUNCE_RETRY` and try again.
    pub async fn announce(
        &mut self,
        event: AnnounceEvent,
        progress: AnnounceProgress,
    ) -> Result<AnnounceOutcome, AnnouncerError> {
        let request = self.build_request(event, progress);

        for tier_index in 0..self.tiers.len() {
            for url_index in 0..self.tiers[tier_index].len() {
                let url = self.tiers[tier_index][url_index].clone();

                match TrackerClient::announce(&url, &request).await {
                    Ok(outcome) => {
                        info!(
                            torrent = %self.torrent_tag,
                            url = %url,
                            peers = outcome.peers.len(),
                            "announce ok"
                        );
                        self.promote(tier_index, url_index);
                        if outcome.interval > 0 {
                            self.interval = outcome.interval;
                        }
                        return Ok(outcome);
                    }
                    Err(e) => {
                        warn!(torrent = %self.torrent_tag, url = %url, "announce failed: {:?}", e);
                    }
                }
            }
        }

        Err(AnnouncerError::AllTrackersFailed)
    }

    fn build_request(&self, event: AnnounceEvent, progress: AnnounceProgress) -> AnnounceRequest {
        AnnounceRequest {
            info_hash: self.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: progress.uploaded,
            downloaded: progress.downloaded,
            left: progress.left,
            event,
            key: self.key,
            num_want: DEFAULT_NUM_WANT,
        }
    }

    /// Moves the URL that just answered to the head of its tier.
    fn promote(&mut self, tier_index: usize, url_index: usize) {
        let url = self.tiers[tier_index].remove(url_index);
        self.tiers[tier_index].insert(0, url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shuffle_preserves_tier_membership() {
        let announcer = create_test_announcer(vec![
            vec!["udp://a:1".to_string(), "udp://b:2".to_string()],
            vec!["udp://c:3".to_string()],
        ]);

        assert_eq!(announcer.tiers.len(), 2);
        assert_eq!(announcer.tiers[0].len(), 2);
        assert!(announcer.tiers[0].contains(&"udp://a:1".to_string()));
        assert!(announcer.tiers[0].contains(&"udp://b:2".to_string()));
        assert_eq!(announcer.tiers[1], vec!["udp://c:3".to_string()]);
    }

    #[test]
    fn test_promote_moves_url_to_tier_head() {
        let mut announcer = create_test_announcer(vec![]);
        announcer.tiers = vec![vec![
            "udp://a:1".to_string(),
            "udp://b:2".to_string(),
            "udp://c:3".to_string(),
        ]];

        announcer.promote(0, 2);

        assert_eq!(
            announcer.tiers[0],
            vec![
                "udp://c:3".to_string(),
                "udp://a:1".to_string(),
                "udp://b:2".to_string(),
            ]
        );
    }

    #[test]
    fn test_build_request_carries_progress() {
        let announcer = create_test_announcer(vec![]);

        let request = announcer.build_request(
            AnnounceEvent::Completed,
            AnnounceProgress {
                uploaded: 1,
                downloaded: 2,
                left: 3,
            },
        );

        assert_eq!(request.uploaded, 1);
        assert_eq!(request.downloaded, 2);
        assert_eq!(request.left, 3);
        assert_eq!(request.event, AnnounceEvent::Completed);
        assert_eq!(request.num_want, -1);
        assert_eq!(request.port, 6881);
    }

    #[test]
    fn test_interval_defaults_to_half_hour() {
        let announcer = create_test_announcer(vec![]);

        assert_eq!(announcer.interval(), Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_announce_walks_past_a_dead_url_and_promotes_the_live_one() {
        let tracker = stracker::udp_server::server::TrackerServer::bind("127.0.0.1:0")
            .await
            .unwrap();
        let tracker_addr = tracker.local_addr().unwrap();
        tokio::spawn(tracker.run());
        let live_url = format!("udp://127.0.0.1:{}/announce", tracker_addr.port());

        let mut announcer = create_test_announcer(vec![]);
        // a udp url without a port fails to parse, so the walk moves on fast
        announcer.tiers = vec![vec!["udp://dead-url".to_string(), live_url.clone()]];

        let outcome = announcer
            .announce(
                AnnounceEvent::Started,
                AnnounceProgress {
                    uploaded: 0,
                    downloaded: 0,
                    left: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.interval, 1800);
        assert_eq!(announcer.interval(), Duration::from_secs(1800));
        assert_eq!(announcer.tiers[0][0], live_url);
    }

    #[tokio::test]
    async fn test_announce_reports_full_pass_failure() {
        let mut announcer = create_test_announcer(vec![]);
        announcer.tiers = vec![vec!["udp://dead-url".to_string()]];

        let result = announcer
            .announce(
                AnnounceEvent::Started,
                AnnounceProgress {
                    uploaded: 0,
                    downloaded: 0,
                    left: 0,
                },
            )
            .await;

        assert!(matches!(result, Err(AnnouncerError::AllTrackersFailed)));
    }

    // Auxiliary functions

    fn create_test_announcer(tiers: Vec<Vec<String>>) -> Announcer {
        Announcer::new(tiers, [1; 20], [2; 20], 6881, "test".to_string())
    }
}
