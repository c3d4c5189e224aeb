pub mod bitfield;
pub mod message;
pub mod request;

pub use bitfield::Bitfield;
pub use message::{Message, MessageError, MAX_MESSAGE_LENGTH};
pub use request::{BlockRequest, BLOCK_SIZE, MAX_REQUEST_LENGTH};
