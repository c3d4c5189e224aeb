use super::bitfield::Bitfield;
use super::request::BlockRequest;

/// Largest frame we accept, length prefix excluded.
pub const MAX_MESSAGE_LENGTH: u32 = 1 << 18;

/// One peer wire protocol message.
///
/// Every recognized id gets its own variant so dispatch is an exhaustive
/// match; a zero-length frame is the keep-alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bitfield),
    Request(BlockRequest),
    Piece {
        piece_index: u32,
        begin: u32,
        block: Vec<u8>,
    },
    Cancel(BlockRequest),
    Port(u16),
}

/// Possible wire decoding errors.
#[derive(Debug, PartialEq)]
pub enum MessageError {
    UnknownId(u8),
    InvalidPayload(u8),
}

impl Message {
    /// Serializes the message as a length-prefixed frame.
    pub fn as_bytes(&self) -> Vec<u8> {
        let (id, payload) = match self {
            Message::KeepAlive => return 0u32.to_be_bytes().to_vec(),
            Message::Choke => (0, vec![]),
            Message::Unchoke => (1, vec![]),
            Message::Interested => (2, vec![]),
            Message::NotInterested => (3, vec![]),
            Message::Have(index) => (4, index.to_be_bytes().to_vec()),
            Message::Bitfield(bitfield) => (5, bitfield.get_vec()),
            Message::Request(request) => (6, request.as_bytes()),
            Message::Piece {
                piece_index,
                begin,
                block,
            } => {
                let mut payload = Vec::with_capacity(8 + block.len());
                payload.extend(piece_index.to_be_bytes());
                payload.extend(begin.to_be_bytes());
                payload.extend(block);
                (7, payload)
            }
            Message::Cancel(request) => (8, request.as_bytes()),
            Message::Port(port) => (9, port.to_be_bytes().to_vec()),
        };

        let len = payload.len() as u32 + 1;
        let mut bytes = Vec::with_capacity(4 + len as usize);
        bytes.extend(len.to_be_bytes());
        bytes.push(id);
        bytes.extend(payload);
        bytes
    }

    /// Parses one frame (length prefix already stripped). An empty frame is
    /// the keep-alive.
    pub fn from_frame(frame: &[u8]) -> Result<Message, MessageError> {
        if frame.is_empty() {
            return Ok(Message::KeepAlive);
        }
        let id = frame[0];
        let payload = &frame[1..];

        match id {
            0 => Self::flag_message(id, payload, Message::Choke),
            1 => Self::flag_message(id, payload, Message::Unchoke),
            2 => Self::flag_message(id, payload, Message::Interested),
            3 => Self::flag_message(id, payload, Message::NotInterested),
            4 => {
                let index = Self::u32_payload(id, payload)?;
                Ok(Message::Have(index))
            }
            5 => Ok(Message::Bitfield(Bitfield::new(payload.to_vec()))),
            6 => BlockRequest::from_bytes(payload)
                .map(Message::Request)
                .ok_or(MessageError::InvalidPayload(id)),
            7 => {
                if payload.len() < 8 {
                    return Err(MessageError::InvalidPayload(id));
                }
                let mut piece_index = [0; 4];
                let mut begin = [0; 4];
                piece_index.copy_from_slice(&payload[0..4]);
                begin.copy_from_slice(&payload[4..8]);
                Ok(Message::Piece {
                    piece_index: u32::from_be_bytes(piece_index),
                    begin: u32::from_be_bytes(begin),
                    block: payload[8..].to_vec(),
                })
            }
            8 => BlockRequest::from_bytes(payload)
                .map(Message::Cancel)
                .ok_or(MessageError::InvalidPayload(id)),
            9 => {
                if payload.len() != 2 {
                    return Err(MessageError::InvalidPayload(id));
                }
                Ok(Message::Port(u16::from_be_bytes([payload[0], payload[1]])))
            }
            other => Err(MessageError::UnknownId(other)),
        }
    }

    fn flag_message(id: u8, payload: &[u8], message: Message) -> Result<Message, MessageError> {
        if payload.is_empty() {
            Ok(message)
        } else {
            Err(MessageError::InvalidPayload(id))
        }
    }

    fn u32_payload(id: u8, payload: &[u8]) -> Result<u32, MessageError> {
        if payload.len() != 4 {
            return Err(MessageError::InvalidPayload(id));
        }
        let mut bytes = [0; 4];
        bytes.copy_from_slice(payload);
        Ok(u32::from_be_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchoke_from_frame() {
        let msg = Message::from_frame(&[1]).unwrap();

        assert_eq!(msg, Message::Unchoke);
    }

    #[test]
    fn test_interested_as_bytes() {
        let bytes = Message::Interested.as_bytes();

        let mut expected = vec![];
        expected.extend(1u32.to_be_bytes());
        expected.push(2u8);

        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_keep_alive_as_bytes() {
        assert_eq!(Message::KeepAlive.as_bytes(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_empty_frame_is_keep_alive() {
        assert_eq!(Message::from_frame(&[]).unwrap(), Message::KeepAlive);
    }

    #[test]
    fn test_request_as_bytes() {
        let request = BlockRequest::new(0, 0, 16384);
        let bytes = Message::Request(request).as_bytes();

        let mut expected = vec![];
        expected.extend(13u32.to_be_bytes());
        expected.push(6u8);
        expected.extend(request.as_bytes());

        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_every_message_round_trips() {
        let messages = vec![
            Message::KeepAlive,
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
            Message::Have(42),
            Message::Bitfield(Bitfield::new(vec![0b10100000])),
            Message::Request(BlockRequest::new(1, 16384, 16384)),
            Message::Piece {
                piece_index: 3,
                begin: 0,
                block: vec![0xde, 0xad, 0xbe, 0xef],
            },
            Message::Cancel(BlockRequest::new(1, 16384, 16384)),
            Message::Port(6881),
        ];

        for message in messages {
            let bytes = message.as_bytes();
            // strip the length prefix to feed the frame parser
            let frame = &bytes[4..];
            assert_eq!(Message::from_frame(frame).unwrap(), message);
        }
    }

    #[test]
    fn test_flag_message_with_payload_is_rejected() {
        assert_eq!(
            Message::from_frame(&[0, 1]),
            Err(MessageError::InvalidPayload(0))
        );
    }

    #[test]
    fn test_have_with_short_payload_is_rejected() {
        assert_eq!(
            Message::from_frame(&[4, 0, 0]),
            Err(MessageError::InvalidPayload(4))
        );
    }

    #[test]
    fn test_port_with_long_payload_is_rejected() {
        assert_eq!(
            Message::from_frame(&[9, 0, 0, 0]),
            Err(MessageError::InvalidPayload(9))
        );
    }

    #[test]
    fn test_unknown_id_is_rejected() {
        assert_eq!(Message::from_frame(&[20]), Err(MessageError::UnknownId(20)));
    }
}
