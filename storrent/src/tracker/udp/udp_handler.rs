use std::io;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::peer::peer_info::PeerInfo;
use crate::tracker::announce::{AnnounceOutcome, AnnounceRequest};

/// Magic constant opening every connect request (BEP 15).
pub const PROTOCOL_ID: u64 = 0x41727101980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_SCRAPE: u32 = 2;
const ACTION_ERROR: u32 = 3;

/// A connection id may be reused for this long after the connect exchange.
const CONNECTION_ID_VALIDITY: Duration = Duration::from_secs(60);

/// Base of the 15 * 2^n retransmit ladder.
const INITIAL_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 8;

const MAX_RESPONSE_LEN: usize = 2048;

/// Possible UDP tracker errors.
#[derive(Debug)]
pub enum UdpTrackerError {
    Bind(io::Error),
    Connect(io::Error),
    Send(io::Error),
    Recv(io::Error),
    Timeout,
    ShortResponse,
    TransactionMismatch,
    UnexpectedAction(u32),
    /// The tracker answered with an error packet (action 3).
    TrackerFailure(String),
}

/// Per-torrent scrape counters as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeOutcome {
    pub seeders: u32,
    pub completed: u32,
    pub leechers: u32,
}

/// BEP 15 client for one tracker endpoint.
///
/// Keeps the connection id between calls and re-does the connect exchange
/// once it is older than its validity window. Requests follow the
/// 15 * 2^n retransmit ladder, so a dead tracker takes a while to give up
/// on; the announcer runs one client per URL and moves on after failure.
#[derive(Debug)]
pub struct UdpTrackerClient {
    socket: UdpSocket,
    connection: Option<(u64, Instant)>,
    initial_timeout: Duration,
}

impl UdpTrackerClient {
    /// Binds an ephemeral socket and points it at the tracker.
    pub async fn connect(host: &str, port: u16) -> Result<Self, UdpTrackerError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(UdpTrackerError::Bind)?;
        socket
            .connect((host, port))
            .await
            .map_err(UdpTrackerError::Connect)?;

        Ok(Self {
            socket,
            connection: None,
            initial_timeout: INITIAL_TIMEOUT,
        })
    }

    /// Shrinks the retransmit ladder; tests use this to avoid real waits.
    pub fn set_initial_timeout(&mut self, initial_timeout: Duration) {
        self.initial_timeout = initial_timeout;
    }

    /// Runs one announce, retransmitting on the BEP 15 ladder.
    pub async fn announce(
        &mut self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceOutcome, UdpTrackerError> {
        let mut attempt = 0;
        loop {
            let deadline = self.initial_timeout * 2u32.pow(attempt);
            match self.try_announce(request, deadline).await {
                Ok(outcome) => return Ok(outcome),
                Err(UdpTrackerError::Timeout) if attempt < MAX_RETRIES => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Scrapes the tracker for a single info_hash.
    pub async fn scrape(&mut self, info_hash: [u8; 20]) -> Result<ScrapeOutcome, UdpTrackerError> {
        let mut attempt = 0;
        loop {
            let deadline = self.initial_timeout * 2u32.pow(attempt);
            match self.try_scrape(info_hash, deadline).await {
                Ok(outcome) => return Ok(outcome),
                Err(UdpTrackerError::Timeout) if attempt < MAX_RETRIES => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_announce(
        &mut self,
        request: &AnnounceRequest,
        deadline: Duration,
    ) -> Result<AnnounceOutcome, UdpTrackerError> {
        let connection_id = self.connection_id(deadline).await?;
        let transaction_id: u32 = rand::thread_rng().gen();

        let packet = Self::build_announce(connection_id, transaction_id, request);
        let payload = self
            .exchange(&packet, deadline, ACTION_ANNOUNCE, transaction_id)
            .await?;

        Self::parse_announce(&payload)
    }

    async fn try_scrape(
        &mut self,
        info_hash: [u8; 20],
        deadline: Duration,
    ) -> Result<ScrapeOutcome, UdpTrackerError> {
        let connection_id = self.connection_id(deadline).await?;
        let transaction_id: u32 = rand::thread_rng().gen();

        let mut packet = Vec::with_capacity(36);
        packet.extend(connection_id.to_be_bytes());
        packet.extend(ACTION_SCRAPE.to_be_bytes());
        packet.extend(transaction_id.to_be_bytes());
        packet.extend(info_hash);

        let payload = self
            .exchange(&packet, deadline, ACTION_SCRAPE, transaction_id)
            .await?;
        if payload.len() < 12 {
            return Err(UdpTrackerError::ShortResponse);
        }

        Ok(ScrapeOutcome {
            seeders: read_u32(&payload[0..4]),
            completed: read_u32(&payload[4..8]),
            leechers: read_u32(&payload[8..12]),
        })
    }

    /// Returns a fresh or cached connection id.
    async fn connection_id(&mut self, deadline: Duration) -> Result<u64, UdpTrackerError> {
        if let Some((id, obtained_at)) = self.connection {
            if obtained_at.elapsed() < CONNECTION_ID_VALIDITY {
                return Ok(id);
            }
        }

        let transaction_id: u32 = rand::thread_rng().gen();
        let mut packet = Vec::with_capacity(16);
        packet.extend(PROTOCOL_ID.to_be_bytes());
        packet.extend(ACTION_CONNECT.to_be_bytes());
        packet.extend(transaction_id.to_be_bytes());

        let payload = self
            .exchange(&packet, deadline, ACTION_CONNECT, transaction_id)
            .await?;
        if payload.len() < 8 {
            return Err(UdpTrackerError::ShortResponse);
        }

        let id = u64::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3], payload[4], payload[5], payload[6],
            payload[7],
        ]);
        self.connection = Some((id, Instant::now()));
        Ok(id)
    }

    /// Sends one packet and waits for the matching response. Returns the
    /// payload past the 8-byte `(action, transaction_id)` header.
    async fn exchange(
        &mut self,
        packet: &[u8],
        deadline: Duration,
        expected_action: u32,
        transaction_id: u32,
    ) -> Result<Vec<u8>, UdpTrackerError> {
        self.socket
            .send(packet)
            .await
            .map_err(UdpTrackerError::Send)?;

        let mut buffer = [0u8; MAX_RESPONSE_LEN];
        let received = timeout(deadline, self.socket.recv(&mut buffer))
            .await
            .map_err(|_| UdpTrackerError::Timeout)?
            .map_err(UdpTrackerError::Recv)?;

        let response = &buffer[..received];
        if response.len() < 8 {
            return Err(UdpTrackerError::ShortResponse);
        }

        let action = read_u32(&response[0..4]);
        if read_u32(&response[4..8]) != transaction_id {
            return Err(UdpTrackerError::TransactionMismatch);
        }
        if action == ACTION_ERROR {
            return Err(UdpTrackerError::TrackerFailure(
                String::from_utf8_lossy(&response[8..]).to_string(),
            ));
        }
        if action != expected_action {
            return Err(UdpTrackerError::UnexpectedAction(action));
        }

        Ok(response[8..].to_vec())
    }

    fn build_announce(
        connection_id: u64,
        transaction_id: u32,
        request: &AnnounceRequest,
    ) -> Vec<u8> {
        let mut packet = Vec::with_capacity(98);
        packet.extend(connection_id.to_be_bytes());
        packet.extend(ACTION_ANNOUNCE.to_be_bytes());
        packet.extend(transaction_id.to_be_bytes());
        packet.extend(request.info_hash);
        packet.extend(request.peer_id);
        packet.extend(request.downloaded.to_be_bytes());
        packet.extend(request.left.to_be_bytes());
        packet.extend(request.uploaded.to_be_bytes());
        packet.extend(request.event.as_u32().to_be_bytes());
        packet.extend(0u32.to_be_bytes()); // ip: 0 = use source address
        packet.extend(request.key.to_be_bytes());
        packet.extend(request.num_want.to_be_bytes());
        packet.extend(request.port.to_be_bytes());
        packet
    }

    fn parse_announce(payload: &[u8]) -> Result<AnnounceOutcome, UdpTrackerError> {
        if payload.len() < 12 {
            return Err(UdpTrackerError::ShortResponse);
        }
        let interval = read_u32(&payload[0..4]);
        let leechers = read_u32(&payload[4..8]);
        let seeders = read_u32(&payload[8..12]);

        let peer_bytes = &payload[12..];
        if peer_bytes.len() % 6 != 0 {
            return Err(UdpTrackerError::ShortResponse);
        }
        let mut peers = Vec::with_capacity(peer_bytes.len() / 6);
        for chunk in peer_bytes.chunks(6) {
            match PeerInfo::from_compact(chunk) {
                Ok(peer) => peers.push(peer),
                Err(_) => return Err(UdpTrackerError::ShortResponse),
            }
        }

        Ok(AnnounceOutcome {
            interval,
            seeders,
            leechers,
            peers,
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
