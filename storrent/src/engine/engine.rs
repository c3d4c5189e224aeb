use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bt_server::server::{BtServer, BtServerError, SwarmRegistry};
use crate::config::cfg::Cfg;
use crate::swarm::supervisor::{SwarmCommand, SwarmHandle, SwarmSupervisor};
use crate::swarm::torrent_state::TorrentState;
use crate::torrent_parser::torrent::Torrent;

/// Possible `Engine` errors.
#[derive(Debug, PartialEq)]
pub enum EngineError {
    AlreadyAdded,
    UnknownTorrent,
    PoisonedRegistryLock,
    SwarmGone,
}

/// Process-wide torrent roster and the control surface the outside world
/// sees: `add`, `pause`, `resume` and `remove`, all keyed by info_hash.
#[derive(Clone)]
pub struct Engine {
    config: Cfg,
    client_peer_id: [u8; 20],
    swarms: SwarmRegistry,
    token: CancellationToken,
}

impl Engine {
    pub fn new(config: Cfg) -> Self {
        Self {
            config,
            client_peer_id: Self::generate_peer_id(),
            swarms: Arc::new(Mutex::new(HashMap::new())),
            token: CancellationToken::new(),
        }
    }

    /// Azureus-style peer id: client tag plus random tail, generated once
    /// per process and passed down everywhere.
    pub fn generate_peer_id() -> [u8; 20] {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(b"-ST0100-");
        for byte in peer_id[8..].iter_mut() {
            *byte = rand::thread_rng().sample(Alphanumeric);
        }
        peer_id
    }

    pub fn client_peer_id(&self) -> [u8; 20] {
        self.client_peer_id
    }

    /// Spawns a swarm for the torrent and returns its state feed.
    pub fn add_torrent(&self, torrent: Torrent) -> Result<watch::Receiver<TorrentState>, EngineError> {
        let mut swarms = self
            .swarms
            .lock()
            .map_err(|_| EngineError::PoisonedRegistryLock)?;
        if swarms.contains_key(&torrent.info_hash()) {
            return Err(EngineError::AlreadyAdded);
        }

        info!(torrent = %torrent.name(), "adding torrent");
        let (supervisor, handle) =
            SwarmSupervisor::new(torrent, self.config.clone(), self.client_peer_id);
        let state = handle.state.clone();
        swarms.insert(handle.info_hash, handle);
        tokio::spawn(supervisor.run());

        Ok(state)
    }

    pub async fn pause(&self, info_hash: [u8; 20]) -> Result<(), EngineError> {
        self.send_command(info_hash, SwarmCommand::Pause).await
    }

    pub async fn resume(&self, info_hash: [u8; 20]) -> Result<(), EngineError> {
        self.send_command(info_hash, SwarmCommand::Resume).await
    }

    /// Stops the swarm (best-effort stopped announce included) and forgets
    /// it.
    pub async fn remove(&self, info_hash: [u8; 20]) -> Result<(), EngineError> {
        let handle = {
            let mut swarms = self
                .swarms
                .lock()
                .map_err(|_| EngineError::PoisonedRegistryLock)?;
            swarms.remove(&info_hash)
        };

        match handle {
            Some(handle) => handle
                .control
                .send(SwarmCommand::Remove)
                .await
                .map_err(|_| EngineError::SwarmGone),
            None => Err(EngineError::UnknownTorrent),
        }
    }

    /// Stops every torrent.
    pub async fn shutdown(&self) {
        let hashes: Vec<[u8; 20]> = match self.swarms.lock() {
            Ok(swarms) => swarms.keys().copied().collect(),
            Err(_) => return,
        };
        for info_hash in hashes {
            let _ = self.remove(info_hash).await;
        }
        self.token.cancel();
    }

    /// Runs the inbound acceptor until shutdown.
    pub async fn run_acceptor(&self) -> Result<(), BtServerError> {
        let server = BtServer::new(self.swarms.clone(), self.config.clone(), self.token.clone());
        server.init().await
    }

    async fn send_command(
        &self,
        info_hash: [u8; 20],
        command: SwarmCommand,
    ) -> Result<(), EngineError> {
        let handle = {
            let swarms = self
                .swarms
                .lock()
                .map_err(|_| EngineError::PoisonedRegistryLock)?;
            swarms.get(&info_hash).cloned()
        };

        match handle {
            Some(handle) => handle
                .control
                .send(command)
                .await
                .map_err(|_| EngineError::SwarmGone),
            None => Err(EngineError::UnknownTorrent),
        }
    }
}
