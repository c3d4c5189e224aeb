/// Canonical block size: pieces are requested in 16 KiB chunks, except for
/// the final block of the final piece.
pub const BLOCK_SIZE: u32 = 16384;

/// Largest request payload we accept from a remote peer.
pub const MAX_REQUEST_LENGTH: u32 = 1 << 17;

/// One requested block: a sub-range of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece_index: u32,
    pub begin: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece_index: u32, begin: u32, length: u32) -> Self {
        Self {
            piece_index,
            begin,
            length,
        }
    }

    /// Converts a `BlockRequest` payload to a byte array.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; 12];
        bytes[0..4].copy_from_slice(&self.piece_index.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.begin.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    /// Parses a 12-byte request/cancel payload.
    pub fn from_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() != 12 {
            return None;
        }
        let mut piece_index = [0; 4];
        let mut begin = [0; 4];
        let mut length = [0; 4];
        piece_index.copy_from_slice(&payload[0..4]);
        begin.copy_from_slice(&payload[4..8]);
        length.copy_from_slice(&payload[8..12]);

        Some(Self {
            piece_index: u32::from_be_bytes(piece_index),
            begin: u32::from_be_bytes(begin),
            length: u32::from_be_bytes(length),
        })
    }

    /// Checks the requested range against the torrent geometry: the block
    /// must stay inside its piece and inside the total content size.
    pub fn is_within(&self, piece_count: u32, piece_length: u32, total_size: u64) -> bool {
        if self.piece_index >= piece_count {
            return false;
        }
        let begin_plus_len = u64::from(self.begin) + u64::from(self.length);
        if begin_plus_len > u64::from(piece_length) {
            return false;
        }
        let end_offset =
            u64::from(self.piece_index) * u64::from(piece_length) + begin_plus_len;
        end_offset <= total_size
    }

    /// Absolute offset of this block in the torrent's virtual byte stream.
    pub fn offset(&self, piece_length: u32) -> u64 {
        u64::from(self.piece_index) * u64::from(piece_length) + u64::from(self.begin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_as_bytes() {
        let request = BlockRequest::new(1, 16384, 16384);

        let mut expected = vec![];
        expected.extend(1u32.to_be_bytes());
        expected.extend(16384u32.to_be_bytes());
        expected.extend(16384u32.to_be_bytes());

        assert_eq!(request.as_bytes(), expected);
    }

    #[test]
    fn test_request_from_bytes_round_trip() {
        let request = BlockRequest::new(7, 32768, 1024);

        assert_eq!(BlockRequest::from_bytes(&request.as_bytes()), Some(request));
    }

    #[test]
    fn test_request_from_bytes_wrong_length() {
        assert_eq!(BlockRequest::from_bytes(&[0; 11]), None);
    }

    #[test]
    fn test_is_within_accepts_last_short_block() {
        // 40000 bytes, 16384-byte pieces: last piece is 7232 bytes long.
        let request = BlockRequest::new(2, 0, 7232);

        assert!(request.is_within(3, 16384, 40000));
    }

    #[test]
    fn test_is_within_rejects_past_total_size() {
        let request = BlockRequest::new(2, 0, 7233);

        assert!(!request.is_within(3, 16384, 40000));
    }

    #[test]
    fn test_is_within_rejects_piece_overflow() {
        let request = BlockRequest::new(0, 16000, 1024);

        assert!(!request.is_within(3, 16384, 40000));
    }

    #[test]
    fn test_is_within_rejects_bad_piece_index() {
        let request = BlockRequest::new(3, 0, 1024);

        assert!(!request.is_within(3, 16384, 40000));
    }
}
