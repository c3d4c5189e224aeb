use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::choker::controller::{ChokeController, CHOKE_INTERVAL};
use crate::config::cfg::Cfg;
use crate::peer::handshake::Handshake;
use crate::peer::peer_info::PeerInfo;
use crate::peer::peer_session;
use crate::torrent_parser::torrent::Torrent;
use crate::tracker::announce::AnnounceEvent;
use crate::tracker::announcer::{AnnounceProgress, Announcer, AnnouncerError, ANNOUNCE_RETRY};
use crate::verifier::integrity::{self, VerifierError};

use super::status::{SwarmEvent, SwarmStatus, SwarmStatusError};
use super::torrent_state::TorrentState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const STATS_INTERVAL: Duration = Duration::from_secs(1);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const INBOUND_QUEUE: usize = 16;

/// An accepted connection whose handshake the acceptor already read.
#[derive(Debug)]
pub struct InboundPeer {
    pub stream: TcpStream,
    pub handshake: Handshake,
}

/// Control-plane commands addressed to one swarm.
#[derive(Debug, PartialEq)]
pub enum SwarmCommand {
    Pause,
    Resume,
    Remove,
}

/// The engine-facing side of a running swarm.
#[derive(Debug, Clone)]
pub struct SwarmHandle {
    pub info_hash: [u8; 20],
    pub inbound: mpsc::Sender<InboundPeer>,
    pub control: mpsc::Sender<SwarmCommand>,
    pub state: watch::Receiver<TorrentState>,
}

/// Possible supervisor errors; any of these pauses the torrent with a
/// visible error string.
#[derive(Debug)]
pub enum SupervisorError {
    Verifier(VerifierError),
    Status(SwarmStatusError),
}

/// Owns one torrent: verifies what is on disk, announces, dials and
/// accepts peers, and runs the periodic machinery until removal.
pub struct SwarmSupervisor {
    status: Arc<SwarmStatus>,
    announcer: Announcer,
    token: CancellationToken,
    sessions_token: CancellationToken,
    inbound: mpsc::Receiver<InboundPeer>,
    control: mpsc::Receiver<SwarmCommand>,
    events: mpsc::UnboundedReceiver<SwarmEvent>,
    completed_sent: bool,
}

impl SwarmSupervisor {
    /// Builds the supervisor and the handle the engine keeps for it.
    pub fn new(torrent: Torrent, config: Cfg, client_peer_id: [u8; 20]) -> (Self, SwarmHandle) {
        let announcer = Announcer::new(
            torrent.announce_tiers.clone(),
            torrent.info_hash(),
            client_peer_id,
            config.tcp_port,
            torrent.name(),
        );
        let (status, state, events) = SwarmStatus::new(torrent, config, client_peer_id);
        let status = Arc::new(status);

        let (inbound_sender, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (control_sender, control) = mpsc::channel(4);
        let token = CancellationToken::new();

        let handle = SwarmHandle {
            info_hash: status.info_hash(),
            inbound: inbound_sender,
            control: control_sender,
            state,
        };

        let supervisor = Self {
            sessions_token: token.child_token(),
            status,
            announcer,
            token,
            inbound,
            control,
            events,
            completed_sent: false,
        };

        (supervisor, handle)
    }

    pub fn status(&self) -> Arc<SwarmStatus> {
        self.status.clone()
    }

    /// Runs the swarm to completion of its lifecycle (removal or fatal
    /// error). Never panics across peers: session failures stay inside
    /// their own tasks.
    pub async fn run(mut self) {
        match self.run_inner().await {
            Ok(()) => info!(torrent = %self.status.torrent().name(), "swarm stopped"),
            Err(e) => {
                error!(torrent = %self.status.torrent().name(), "swarm failed: {:?}", e);
                self.status.set_error(format!("{:?}", e));
                self.status.set_paused(true);
            }
        }
    }

    async fn run_inner(&mut self) -> Result<(), SupervisorError> {
        integrity::verify_existing_data(&self.status)
            .await
            .map_err(SupervisorError::Verifier)?;

        // a torrent that verified complete must not announce `completed`
        // again later; it was never incomplete in this run
        self.completed_sent = self.status.is_complete().map_err(SupervisorError::Status)?;

        // the started announce gates all peer work
        let mut outcome = match self.announce_until_success(AnnounceEvent::Started).await {
            Some(outcome) => outcome,
            None => return Ok(()), // cancelled while announcing
        };

        // a leecher with an empty peer list cannot make progress; keep
        // asking on the retry cadence instead of waiting a full interval
        loop {
            self.status
                .update_swarm_counts(outcome.seeders, outcome.leechers);
            let got_peers = !outcome.peers.is_empty();
            self.dial_peers(outcome.peers.clone())
                .map_err(SupervisorError::Status)?;
            if got_peers || self.status.is_complete().map_err(SupervisorError::Status)? {
                break;
            }
            tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                _ = sleep(ANNOUNCE_RETRY) => (),
            }
            if let Some(next) = self.announce_once(AnnounceEvent::None).await {
                outcome = next;
            }
        }

        let sweep_token = self.token.child_token();
        let choker_token = self.token.child_token();
        let stats_token = self.token.child_token();
        let sweep_task = tokio::spawn(sweep_loop(self.status.clone(), sweep_token.clone()));
        let choker_task = tokio::spawn(choke_loop(
            self.status.clone(),
            self.status.config().unchoke_slots,
            choker_token.clone(),
        ));
        let stats_task = tokio::spawn(stats_loop(self.status.clone(), stats_token.clone()));

        let mut next_announce = Instant::now() + self.announcer.interval();

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                command = self.control.recv() => match command {
                    Some(SwarmCommand::Pause) => self.pause(),
                    Some(SwarmCommand::Resume) => {
                        if let Err(e) = self.resume().await {
                            warn!("resume failed: {:?}", e);
                        }
                        next_announce = Instant::now() + self.announcer.interval();
                    }
                    Some(SwarmCommand::Remove) | None => break,
                },
                accepted = self.inbound.recv() => {
                    if let Some(inbound) = accepted {
                        self.accept_peer(inbound);
                    }
                },
                event = self.events.recv() => match event {
                    Some(SwarmEvent::Completed) => self.handle_completed().await,
                    Some(SwarmEvent::StorageFailure(message)) => {
                        error!(torrent = %self.status.torrent().name(), "storage failure: {}", message);
                        self.status.set_error(message);
                        self.pause();
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(next_announce)) => {
                    if !self.status.is_paused() {
                        if let Some(outcome) = self.announce_once(AnnounceEvent::None).await {
                            self.status.update_swarm_counts(outcome.seeders, outcome.leechers);
                            if let Err(e) = self.dial_peers(outcome.peers) {
                                warn!("dialing announced peers failed: {:?}", e);
                            }
                        }
                    }
                    next_announce = Instant::now() + self.announcer.interval();
                },
            }
        }

        // shutdown in reverse dependency order: scheduler sweep, sessions,
        // announcer, choke controller
        sweep_token.cancel();
        self.sessions_token.cancel();
        self.announce_stopped().await;
        choker_token.cancel();
        stats_token.cancel();

        for task in [sweep_task, choker_task, stats_task] {
            let _ = timeout(SHUTDOWN_GRACE, task).await;
        }

        self.status
            .flush_store()
            .await
            .map_err(SupervisorError::Status)?;
        self.status.publish();
        Ok(())
    }

    /// Repeats full announce passes with the retry sleep until one URL
    /// answers. Returns `None` when cancelled or removed while waiting.
    async fn announce_until_success(
        &mut self,
        event: AnnounceEvent,
    ) -> Option<crate::tracker::announce::AnnounceOutcome> {
        loop {
            if let Some(outcome) = self.announce_once(event).await {
                return Some(outcome);
            }
            tokio::select! {
                _ = self.token.cancelled() => return None,
                command = self.control.recv() => match command {
                    Some(SwarmCommand::Remove) | None => return None,
                    Some(_) => (),
                },
                _ = sleep(ANNOUNCE_RETRY) => (),
            }
        }
    }

    async fn announce_once(
        &mut self,
        event: AnnounceEvent,
    ) -> Option<crate::tracker::announce::AnnounceOutcome> {
        let progress = match self.progress() {
            Ok(progress) => progress,
            Err(_) => return None,
        };
        match self.announcer.announce(event, progress).await {
            Ok(outcome) => Some(outcome),
            Err(AnnouncerError::AllTrackersFailed) => {
                warn!(torrent = %self.status.torrent().name(), "all trackers failed this pass");
                None
            }
        }
    }

    /// Best-effort stopped announce with at most one retry.
    async fn announce_stopped(&mut self) {
        if self.announce_once(AnnounceEvent::Stopped).await.is_none() {
            let _ = self.announce_once(AnnounceEvent::Stopped).await;
        }
    }

    async fn handle_completed(&mut self) {
        if self.completed_sent {
            return;
        }
        self.completed_sent = true;
        info!(torrent = %self.status.torrent().name(), "download complete");
        let _ = self.announce_once(AnnounceEvent::Completed).await;
        self.status.publish();
    }

    fn progress(&self) -> Result<AnnounceProgress, SwarmStatusError> {
        let (uploaded, downloaded, left) = self.status.announce_progress()?;
        Ok(AnnounceProgress {
            uploaded,
            downloaded,
            left,
        })
    }

    /// Dials every useful peer from a tracker response, up to the outbound
    /// cap.
    fn dial_peers(&mut self, peers: Vec<PeerInfo>) -> Result<(), SwarmStatusError> {
        if self.status.is_paused() {
            return Ok(());
        }
        for peer in peers {
            if self.status.connected_count()? >= self.status.config().max_outbound_peers {
                break;
            }
            if !self.status.should_dial(peer.addr)? {
                continue;
            }
            tokio::spawn(peer_session::run_outgoing(
                self.status.clone(),
                peer,
                self.sessions_token.child_token(),
            ));
        }
        Ok(())
    }

    fn accept_peer(&mut self, inbound: InboundPeer) {
        if self.status.is_paused() {
            return;
        }
        tokio::spawn(peer_session::run_incoming(
            self.status.clone(),
            inbound.stream,
            inbound.handshake,
            self.sessions_token.child_token(),
        ));
    }

    fn pause(&mut self) {
        info!(torrent = %self.status.torrent().name(), "paused");
        self.status.set_paused(true);
        self.sessions_token.cancel();
    }

    async fn resume(&mut self) -> Result<(), SwarmStatusError> {
        info!(torrent = %self.status.torrent().name(), "resumed");
        self.sessions_token = self.token.child_token();
        self.status.set_paused(false);

        if let Some(outcome) = self.announce_once(AnnounceEvent::None).await {
            self.status
                .update_swarm_counts(outcome.seeders, outcome.leechers);
            self.dial_peers(outcome.peers)?;
        }
        Ok(())
    }
}

/// Revokes timed-out block assignments and bans peers that crossed the
/// distrust line.
async fn sweep_loop(status: Arc<SwarmStatus>, token: CancellationToken) {
    let mut ticker = interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Ok(outcome) = status.sweep_timeouts(Instant::now()) {
                    for handle in outcome.blacklisted {
                        let _ = status.ban_peer(handle);
                    }
                    if !outcome.revoked.is_empty() {
                        status.nudge_refill();
                    }
                }
            },
        }
    }
}

/// Recomputes the unchoke set every choke interval.
async fn choke_loop(status: Arc<SwarmStatus>, unchoke_slots: u32, token: CancellationToken) {
    let mut controller = ChokeController::new(unchoke_slots);
    let mut ticker = interval(CHOKE_INTERVAL);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let seeding = status.is_complete().unwrap_or(false);
                if let Ok(candidates) = status.choke_candidates(seeding) {
                    let unchoked = controller.decide(candidates);
                    let _ = status.apply_unchoke_set(&unchoked);
                }
            },
        }
    }
}

/// Publishes a state snapshot once a second so speeds stay fresh.
async fn stats_loop(status: Arc<SwarmStatus>, token: CancellationToken) {
    let mut ticker = interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => status.publish(),
        }
    }
}
