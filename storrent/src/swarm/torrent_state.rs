/// Control-plane snapshot of one torrent.
///
/// Published on a watch channel on every meaningful change; the GUI or
/// daemon on the other end only ever sees this struct.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentState {
    pub name: String,
    pub info_hash: [u8; 20],
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub ratio: f64,
    pub connected_peers: u32,
    /// Swarm-wide counts as last reported by a tracker.
    pub seeders: u32,
    pub leechers: u32,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub paused: bool,
    pub complete: bool,
    pub error: Option<String>,
}

impl TorrentState {
    pub fn new(name: String, info_hash: [u8; 20], total_bytes: u64) -> Self {
        Self {
            name,
            info_hash,
            downloaded_bytes: 0,
            total_bytes,
            uploaded_bytes: 0,
            ratio: 0.0,
            connected_peers: 0,
            seeders: 0,
            leechers: 0,
            download_speed: 0.0,
            upload_speed: 0.0,
            paused: false,
            complete: false,
            error: None,
        }
    }
}
