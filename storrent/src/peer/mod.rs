pub mod handshake;
pub mod peer_info;
pub mod peer_message;
pub mod peer_session;
pub mod peer_stream;
pub mod session_status;
