/// Lifecycle event carried by an announce, as encoded on the wire
/// (BEP 15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    None,
    Completed,
    Started,
    Stopped,
}

impl PeerEvent {
    pub fn from_u32(value: u32) -> Option<PeerEvent> {
        match value {
            0 => Some(PeerEvent::None),
            1 => Some(PeerEvent::Completed),
            2 => Some(PeerEvent::Started),
            3 => Some(PeerEvent::Stopped),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u32() {
        assert_eq!(PeerEvent::from_u32(0), Some(PeerEvent::None));
        assert_eq!(PeerEvent::from_u32(1), Some(PeerEvent::Completed));
        assert_eq!(PeerEvent::from_u32(2), Some(PeerEvent::Started));
        assert_eq!(PeerEvent::from_u32(3), Some(PeerEvent::Stopped));
        assert_eq!(PeerEvent::from_u32(4), None);
    }
}
