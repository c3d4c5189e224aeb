use crate::peer::peer_info::PeerInfo;

/// Lifecycle event attached to an announce.
///
/// The numeric values are the BEP 15 wire encoding; the strings are what
/// the HTTP query expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    None,
    Completed,
    Started,
    Stopped,
}

impl AnnounceEvent {
    pub fn as_u32(&self) -> u32 {
        match self {
            AnnounceEvent::None => 0,
            AnnounceEvent::Completed => 1,
            AnnounceEvent::Started => 2,
            AnnounceEvent::Stopped => 3,
        }
    }

    /// Query parameter value; `None` events are omitted from the query.
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            AnnounceEvent::None => None,
            AnnounceEvent::Completed => Some("completed"),
            AnnounceEvent::Started => Some("started"),
            AnnounceEvent::Stopped => Some("stopped"),
        }
    }
}

/// Everything a tracker needs to know about us for one announce.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: AnnounceEvent,
    /// Random per-run key (BEP 15) so trackers can match announces across
    /// address changes.
    pub key: u32,
    /// How many peers we want; -1 lets the tracker pick its default.
    pub num_want: i32,
}

/// A successful announce as reported by a tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnounceOutcome {
    /// Seconds until the next periodic announce.
    pub interval: u32,
    pub seeders: u32,
    pub leechers: u32,
    pub peers: Vec<PeerInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_values() {
        assert_eq!(AnnounceEvent::None.as_u32(), 0);
        assert_eq!(AnnounceEvent::Completed.as_u32(), 1);
        assert_eq!(AnnounceEvent::Started.as_u32(), 2);
        assert_eq!(AnnounceEvent::Stopped.as_u32(), 3);
    }

    #[test]
    fn test_event_query_values() {
        assert_eq!(AnnounceEvent::None.as_str(), None);
        assert_eq!(AnnounceEvent::Started.as_str(), Some("started"));
    }
}
