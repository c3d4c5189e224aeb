pub mod announce;
pub mod announcer;
pub mod http;
pub mod tracker_client;
pub mod tracker_response;
pub mod udp;
