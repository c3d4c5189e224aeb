use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::cfg::Cfg;
use crate::peer::peer_stream;
use crate::swarm::supervisor::{InboundPeer, SwarmHandle};

/// Process-wide map from info_hash to the swarm that owns it.
pub type SwarmRegistry = Arc<Mutex<HashMap<[u8; 20], SwarmHandle>>>;

/// Possible `BtServer` errors.
#[derive(Debug)]
pub enum BtServerError {
    OpeningListenerError(std::io::Error),
}

/// Accepts inbound peer connections for every torrent in the process.
///
/// The listener reads the remote handshake to learn which torrent the peer
/// wants, then hands the socket to that swarm; the session replies to the
/// handshake from there.
pub struct BtServer {
    swarms: SwarmRegistry,
    config: Cfg,
    token: CancellationToken,
}

impl BtServer {
    pub fn new(swarms: SwarmRegistry, config: Cfg, token: CancellationToken) -> Self {
        Self {
            swarms,
            config,
            token,
        }
    }

    /// Starts the server and listens until cancelled.
    ///
    /// # Errors
    /// - `OpeningListenerError` if the TcpListener couldn't be opened.
    pub async fn init(&self) -> Result<(), BtServerError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.tcp_port))
            .await
            .map_err(BtServerError::OpeningListenerError)?;

        info!(port = self.config.tcp_port, "listening for peer connections");

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(route_connection(stream, addr, self.swarms.clone()));
                    }
                    Err(e) => warn!("couldn't accept incoming connection: {:?}", e),
                },
            }
        }
    }
}

/// Reads the handshake and routes the socket to the swarm with the
/// matching info_hash. Unknown hashes are dropped quietly.
async fn route_connection(mut stream: TcpStream, addr: SocketAddr, swarms: SwarmRegistry) {
    let handshake = match peer_stream::read_handshake(&mut stream).await {
        Ok(handshake) => handshake,
        Err(e) => {
            debug!(peer = %addr, "inbound handshake failed: {:?}", e);
            return;
        }
    };

    let handle = swarms
        .lock()
        .ok()
        .and_then(|map| map.get(&handshake.info_hash).cloned());

    match handle {
        Some(handle) => {
            if handle
                .inbound
                .send(InboundPeer { stream, handshake })
                .await
                .is_err()
            {
                debug!(peer = %addr, "swarm is gone, dropping inbound peer");
            }
        }
        None => warn!(peer = %addr, "inbound handshake for unknown torrent"),
    }
}
