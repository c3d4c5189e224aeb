use super::event::PeerEvent;

/// One parsed BEP 15 announce packet (98 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceRequest {
    pub connection_id: u64,
    pub transaction_id: u32,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: PeerEvent,
    /// 0 means "use the datagram's source address".
    pub ip: u32,
    pub key: u32,
    /// Signed: negative asks for the server default.
    pub num_want: i32,
    pub port: u16,
}

/// Possible `AnnounceRequest` parsing errors.
#[derive(Debug, PartialEq)]
pub enum AnnounceRequestError {
    TooShort,
    UnknownEvent(u32),
}

impl AnnounceRequest {
    /// Parses an announce packet. Trailing bytes (extensions) are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<AnnounceRequest, AnnounceRequestError> {
        if data.len() < 98 {
            return Err(AnnounceRequestError::TooShort);
        }

        let mut info_hash = [0u8; 20];
        let mut peer_id = [0u8; 20];
        info_hash.copy_from_slice(&data[16..36]);
        peer_id.copy_from_slice(&data[36..56]);

        let event_value = read_u32(&data[80..84]);
        let event =
            PeerEvent::from_u32(event_value).ok_or(AnnounceRequestError::UnknownEvent(event_value))?;

        Ok(AnnounceRequest {
            connection_id: read_u64(&data[0..8]),
            transaction_id: read_u32(&data[12..16]),
            info_hash,
            peer_id,
            downloaded: read_u64(&data[56..64]),
            left: read_u64(&data[64..72]),
            uploaded: read_u64(&data[72..80]),
            event,
            ip: read_u32(&data[84..88]),
            key: read_u32(&data[88..92]),
            num_want: read_u32(&data[92..96]) as i32,
            port: u16::from_be_bytes([data[96], data[97]]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
