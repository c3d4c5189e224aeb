// Setting names accepted in the config file.
pub const TCP_PORT: &str = "TCP_PORT";
pub const DOWNLOAD_DIRECTORY: &str = "DOWNLOAD_DIRECTORY";
pub const PIPELINING_SIZE: &str = "PIPELINING_SIZE";
pub const MAX_OUTBOUND_PEERS: &str = "MAX_OUTBOUND_PEERS";
pub const UNCHOKE_SLOTS: &str = "UNCHOKE_SLOTS";
pub const ENDGAME_THRESHOLD: &str = "ENDGAME_THRESHOLD";

// Defaults used when a setting is absent from the config file.
pub const DEFAULT_TCP_PORT: u16 = 6881;
pub const DEFAULT_DOWNLOAD_DIRECTORY: &str = "./downloads";
pub const DEFAULT_PIPELINING_SIZE: u32 = 10;
pub const DEFAULT_MAX_OUTBOUND_PEERS: u32 = 50;
pub const DEFAULT_UNCHOKE_SLOTS: u32 = 4;
pub const DEFAULT_ENDGAME_THRESHOLD: u32 = 10;
