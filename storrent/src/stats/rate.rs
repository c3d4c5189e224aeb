use std::collections::VecDeque;
use std::time::{Duration, Instant};

const RATE_WINDOW_SECS: u64 = 20;

/// Byte-rate estimator over a sliding window.
///
/// The choke controller ranks peers on recent throughput, so old samples
/// must age out instead of being averaged over the whole session.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
    windowed_bytes: u64,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(Duration::from_secs(RATE_WINDOW_SECS))
    }
}

impl RateEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            windowed_bytes: 0,
        }
    }

    /// Records `bytes` transferred now.
    pub fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));
        self.windowed_bytes += bytes;
        self.prune(now);
    }

    /// Returns the observed rate in bytes per second over the window.
    pub fn rate(&mut self) -> f64 {
        self.prune(Instant::now());
        self.windowed_bytes as f64 / self.window.as_secs_f64()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((stamp, bytes)) = self.samples.front().copied() {
            if now.duration_since(stamp) <= self.window {
                break;
            }
            self.windowed_bytes -= bytes;
            self.samples.pop_front();
        }
    }
}

/// Monotonic transfer counters plus windowed rates for one torrent.
#[derive(Debug, Clone, Default)]
pub struct SessionStatistics {
    pub downloaded: u64,
    pub uploaded: u64,
    download_rate: RateEstimator,
    upload_rate: RateEstimator,
}

impl SessionStatistics {
    pub fn add_downloaded(&mut self, bytes: u64) {
        self.downloaded += bytes;
        self.download_rate.record(bytes);
    }

    pub fn add_uploaded(&mut self, bytes: u64) {
        self.uploaded += bytes;
        self.upload_rate.record(bytes);
    }

    pub fn download_rate(&mut self) -> f64 {
        self.download_rate.rate()
    }

    pub fn upload_rate(&mut self) -> f64 {
        self.upload_rate.rate()
    }

    /// Upload/download ratio; zero until the first byte is downloaded.
    pub fn ratio(&self) -> f64 {
        if self.downloaded == 0 {
            return 0.0;
        }
        self.uploaded as f64 / self.downloaded as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_counts_recent_bytes() {
        let mut estimator = RateEstimator::new(Duration::from_secs(10));
        estimator.record(1000);
        estimator.record(500);

        assert_eq!(estimator.rate(), 150.0);
    }

    #[test]
    fn test_rate_prunes_old_samples() {
        let mut estimator = RateEstimator::new(Duration::from_millis(1));
        estimator.record(1000);
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(estimator.rate(), 0.0);
    }

    #[test]
    fn test_statistics_counters_are_monotonic() {
        let mut stats = SessionStatistics::default();
        stats.add_downloaded(100);
        stats.add_downloaded(50);
        stats.add_uploaded(75);

        assert_eq!(stats.downloaded, 150);
        assert_eq!(stats.uploaded, 75);
        assert_eq!(stats.ratio(), 0.5);
    }

    #[test]
    fn test_ratio_without_download_is_zero() {
        let mut stats = SessionStatistics::default();
        stats.add_uploaded(75);

        assert_eq!(stats.ratio(), 0.0);
    }
}
