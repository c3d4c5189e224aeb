pub mod announce;
pub mod torrent_swarm;
pub mod tracker_peer;
pub mod tracker_status;
pub mod udp_server;
