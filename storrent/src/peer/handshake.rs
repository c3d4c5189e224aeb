#[derive(Debug, PartialEq)]
pub enum FromHandshakeError {
    InvalidHandshake,
}

/// Represents a handshake message.
/// Is the first message sent to start a connection with a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

const PSTR: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;

impl Handshake {
    /// Creates a new `Handshake` message.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Converts a `Handshake` message to its 68-byte wire form.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HANDSHAKE_LEN);
        bytes.push(PSTR.len() as u8);
        bytes.extend_from_slice(PSTR);
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&self.info_hash);
        bytes.extend_from_slice(&self.peer_id);
        bytes
    }

    /// Parses a byte array into a `Handshake` message.
    ///
    /// The protocol header must match exactly; the reserved bytes are
    /// accepted with any value since other clients set extension flags there.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FromHandshakeError> {
        if bytes.len() != HANDSHAKE_LEN {
            return Err(FromHandshakeError::InvalidHandshake);
        }
        if bytes[0] as usize != PSTR.len() || &bytes[1..20] != PSTR {
            return Err(FromHandshakeError::InvalidHandshake);
        }

        let mut info_hash = [0; 20];
        let mut peer_id = [0; 20];
        info_hash.copy_from_slice(&bytes[28..48]);
        peer_id.copy_from_slice(&bytes[48..68]);

        Ok(Self { info_hash, peer_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_bytes() {
        let info_hash = [1u8; 20];
        let peer_id = [2u8; 20];
        let handshake = Handshake::new(info_hash, peer_id);

        let bytes = handshake.as_bytes();

        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(bytes[20..28], [0; 8]);
        assert_eq!(bytes[28..48], info_hash);
        assert_eq!(bytes[48..68], peer_id);
    }

    #[test]
    fn test_from_bytes_round_trip() {
        let handshake = Handshake::new([1; 20], [2; 20]);

        assert_eq!(
            Handshake::from_bytes(&handshake.as_bytes()).unwrap(),
            handshake
        );
    }

    #[test]
    fn test_from_bytes_bad_header() {
        let mut bytes = Handshake::new([1; 20], [2; 20]).as_bytes();
        bytes[1] = b'b';

        assert_eq!(
            Handshake::from_bytes(&bytes),
            Err(FromHandshakeError::InvalidHandshake)
        );
    }

    #[test]
    fn test_from_bytes_wrong_length() {
        assert_eq!(
            Handshake::from_bytes(&[0; 67]),
            Err(FromHandshakeError::InvalidHandshake)
        );
    }

    #[test]
    fn test_from_bytes_keeps_nonzero_reserved() {
        let mut bytes = Handshake::new([1; 20], [2; 20]).as_bytes();
        bytes[25] = 0x10;

        assert!(Handshake::from_bytes(&bytes).is_ok());
    }
}
