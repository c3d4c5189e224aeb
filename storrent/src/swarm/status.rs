use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex};

use crate::choker::controller::ChokeCandidate;
use crate::config::cfg::Cfg;
use crate::peer::peer_info::PeerInfo;
use crate::peer::peer_message::{Bitfield, BlockRequest};
use crate::peer::session_status::SessionStatus;
use crate::scheduler::piece_state::PeerHandle;
use crate::scheduler::request_scheduler::{BlockReceipt, RequestScheduler, SweepOutcome};
use crate::stats::rate::SessionStatistics;
use crate::storage::file_store::{FileStore, StorageError};
use crate::torrent_parser::torrent::Torrent;

use super::torrent_state::TorrentState;

/// Peers that dropped with a transport error are not re-dialed for this long.
const REDIAL_COOLDOWN: Duration = Duration::from_secs(60);

/// Instructions the swarm pushes into a peer session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Choke,
    Unchoke,
    Have(u32),
    Cancel(BlockRequest),
    /// The request pool changed; top up the pipeline if there is room.
    Refill,
    Disconnect,
}

/// Events the swarm raises for its supervisor.
#[derive(Debug, PartialEq)]
pub enum SwarmEvent {
    /// Every selected piece is downloaded and verified.
    Completed,
    /// Disk I/O failed; the torrent must pause.
    StorageFailure(String),
}

/// What happened to an incoming block.
#[derive(Debug, PartialEq)]
pub enum WriteOutcome {
    /// The piece is validating or already downloaded; nothing was written.
    Ignored,
    Stored {
        /// Duplicate endgame holders that should receive a cancel.
        cancels: Vec<(PeerHandle, BlockRequest)>,
        piece_complete: bool,
    },
}

/// Possible `SwarmStatus` errors.
#[derive(Debug)]
pub enum SwarmStatusError {
    PoisonedSchedulerLock,
    PoisonedRosterLock,
    PoisonedStatisticsLock,
    Storage(StorageError),
}

/// Why a peer could not be admitted to the roster.
#[derive(Debug, PartialEq)]
pub enum AdmissionError {
    AlreadyConnected,
    Banned,
    RosterFull,
}

struct SessionEntry {
    info: PeerInfo,
    status: SessionStatus,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

/// Connected peers plus the `(ip, port)` secondary index, the re-dial
/// cooldown list and the session-scoped ban list.
struct Roster {
    next_handle: PeerHandle,
    entries: HashMap<PeerHandle, SessionEntry>,
    by_addr: HashMap<SocketAddr, PeerHandle>,
    cooldown: HashMap<SocketAddr, Instant>,
    banned: HashSet<SocketAddr>,
}

impl Roster {
    fn new() -> Self {
        Self {
            next_handle: 1,
            entries: HashMap::new(),
            by_addr: HashMap::new(),
            cooldown: HashMap::new(),
            banned: HashSet::new(),
        }
    }
}

/// Shared state of one torrent's swarm.
///
/// The file store mutex serializes all content mutation: block writes,
/// piece reads for validation and the validating/downloaded checks all
/// happen while holding it, so a piece can never validate while a late
/// block write is in progress. The remaining mutexes guard quick lookups
/// and are never held across an await.
pub struct SwarmStatus {
    torrent: Torrent,
    config: Cfg,
    client_peer_id: [u8; 20],
    store: Mutex<FileStore>,
    scheduler: StdMutex<RequestScheduler>,
    roster: StdMutex<Roster>,
    statistics: StdMutex<SessionStatistics>,
    swarm_counts: StdMutex<(u32, u32)>,
    paused: AtomicBool,
    error: StdMutex<Option<String>>,
    state_sender: watch::Sender<TorrentState>,
    events: mpsc::UnboundedSender<SwarmEvent>,
}

impl SwarmStatus {
    /// Creates the status hub for one torrent, returning the control-plane
    /// watch receiver and the supervisor event receiver alongside it.
    pub fn new(
        torrent: Torrent,
        config: Cfg,
        client_peer_id: [u8; 20],
    ) -> (
        Self,
        watch::Receiver<TorrentState>,
        mpsc::UnboundedReceiver<SwarmEvent>,
    ) {
        let store = FileStore::new(&torrent, Path::new(&config.download_directory));
        let scheduler = RequestScheduler::new(
            torrent.piece_length(),
            torrent.total_length(),
            config.pipelining_size,
            config.endgame_threshold,
        );

        let initial = TorrentState::new(torrent.name(), torrent.info_hash(), torrent.total_length());
        let (state_sender, state_receiver) = watch::channel(initial);
        let (events, event_receiver) = mpsc::unbounded_channel();

        (
            Self {
                torrent,
                config,
                client_peer_id,
                store: Mutex::new(store),
                scheduler: StdMutex::new(scheduler),
                roster: StdMutex::new(Roster::new()),
                statistics: StdMutex::new(SessionStatistics::default()),
                swarm_counts: StdMutex::new((0, 0)),
                paused: AtomicBool::new(false),
                error: StdMutex::new(None),
                state_sender,
                events,
            },
            state_receiver,
            event_receiver,
        )
    }

    pub fn torrent(&self) -> &Torrent {
        &self.torrent
    }

    pub fn config(&self) -> &Cfg {
        &self.config
    }

    pub fn client_peer_id(&self) -> [u8; 20] {
        self.client_peer_id
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.torrent.info_hash()
    }

    // ------------------------------------------------------------------
    // Roster

    /// Admits a peer and hands back its handle plus the command channel the
    /// session must drain.
    pub fn register_peer(
        &self,
        info: PeerInfo,
    ) -> Result<Result<(PeerHandle, mpsc::UnboundedReceiver<SessionCommand>), AdmissionError>, SwarmStatusError>
    {
        let mut roster = self.lock_roster()?;

        if roster.banned.contains(&info.addr) {
            return Ok(Err(AdmissionError::Banned));
        }
        if roster.by_addr.contains_key(&info.addr) {
            return Ok(Err(AdmissionError::AlreadyConnected));
        }
        if roster.entries.len() >= self.config.max_outbound_peers as usize {
            return Ok(Err(AdmissionError::RosterFull));
        }

        let handle = roster.next_handle;
        roster.next_handle += 1;

        let (sender, receiver) = mpsc::unbounded_channel();
        roster.by_addr.insert(info.addr, handle);
        roster.entries.insert(
            handle,
            SessionEntry {
                info,
                status: SessionStatus::new(),
                commands: sender,
            },
        );
        drop(roster);

        self.lock_scheduler()?.register_peer(handle);
        self.publish();
        Ok(Ok((handle, receiver)))
    }

    pub fn set_peer_id(&self, handle: PeerHandle, peer_id: [u8; 20]) -> Result<(), SwarmStatusError> {
        if let Some(entry) = self.lock_roster()?.entries.get_mut(&handle) {
            entry.info.peer_id = Some(peer_id);
        }
        Ok(())
    }

    /// Drops a session from the roster and starts its re-dial cooldown.
    pub fn unregister_peer(&self, handle: PeerHandle) -> Result<(), SwarmStatusError> {
        let mut roster = self.lock_roster()?;
        if let Some(entry) = roster.entries.remove(&handle) {
            roster.by_addr.remove(&entry.info.addr);
            roster.cooldown.insert(entry.info.addr, Instant::now());
        }
        drop(roster);

        self.lock_scheduler()?.remove_peer(handle);
        self.publish();
        Ok(())
    }

    pub fn connected_count(&self) -> Result<u32, SwarmStatusError> {
        Ok(self.lock_roster()?.entries.len() as u32)
    }

    /// Whether dialing this address makes sense right now.
    pub fn should_dial(&self, addr: SocketAddr) -> Result<bool, SwarmStatusError> {
        let roster = self.lock_roster()?;
        if roster.banned.contains(&addr) || roster.by_addr.contains_key(&addr) {
            return Ok(false);
        }
        if roster.entries.len() >= self.config.max_outbound_peers as usize {
            return Ok(false);
        }
        match roster.cooldown.get(&addr) {
            Some(since) => Ok(since.elapsed() >= REDIAL_COOLDOWN),
            None => Ok(true),
        }
    }

    pub fn send_command(&self, handle: PeerHandle, command: SessionCommand) {
        if let Ok(roster) = self.roster.lock() {
            if let Some(entry) = roster.entries.get(&handle) {
                let _ = entry.commands.send(command);
            }
        }
    }

    /// Queues a HAVE for every connected session, in roster order.
    pub fn broadcast_have(&self, piece_index: u32) {
        if let Ok(roster) = self.roster.lock() {
            for entry in roster.entries.values() {
                let _ = entry.commands.send(SessionCommand::Have(piece_index));
            }
        }
    }

    /// Bans the peer for the rest of the session and tells it to hang up.
    pub fn ban_peer(&self, handle: PeerHandle) -> Result<(), SwarmStatusError> {
        let mut roster = self.lock_roster()?;
        if let Some(entry) = roster.entries.get(&handle) {
            let addr = entry.info.addr;
            let _ = entry.commands.send(SessionCommand::Disconnect);
            roster.banned.insert(addr);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Per-session protocol state

    pub fn set_peer_choking(&self, handle: PeerHandle, choking: bool) -> Result<(), SwarmStatusError> {
        if let Some(entry) = self.lock_roster()?.entries.get_mut(&handle) {
            entry.status.peer_choking = choking;
        }
        self.lock_scheduler()?.set_peer_choking(handle, choking);
        Ok(())
    }

    pub fn set_peer_interested(
        &self,
        handle: PeerHandle,
        interested: bool,
    ) -> Result<(), SwarmStatusError> {
        if let Some(entry) = self.lock_roster()?.entries.get_mut(&handle) {
            entry.status.peer_interested = interested;
        }
        Ok(())
    }

    pub fn set_am_choking(&self, handle: PeerHandle, choking: bool) -> Result<(), SwarmStatusError> {
        if let Some(entry) = self.lock_roster()?.entries.get_mut(&handle) {
            entry.status.am_choking = choking;
        }
        Ok(())
    }

    pub fn set_am_interested(
        &self,
        handle: PeerHandle,
        interested: bool,
    ) -> Result<(), SwarmStatusError> {
        if let Some(entry) = self.lock_roster()?.entries.get_mut(&handle) {
            entry.status.am_interested = interested;
        }
        Ok(())
    }

    pub fn peer_interested(&self, handle: PeerHandle) -> Result<bool, SwarmStatusError> {
        Ok(self
            .lock_roster()?
            .entries
            .get(&handle)
            .map_or(false, |entry| entry.status.peer_interested))
    }

    pub fn add_downloaded(&self, handle: PeerHandle, bytes: u64) -> Result<(), SwarmStatusError> {
        if let Some(entry) = self.lock_roster()?.entries.get_mut(&handle) {
            entry.status.add_downloaded(bytes);
        }
        self.lock_statistics()?.add_downloaded(bytes);
        Ok(())
    }

    pub fn add_uploaded(&self, handle: PeerHandle, bytes: u64) -> Result<(), SwarmStatusError> {
        if let Some(entry) = self.lock_roster()?.entries.get_mut(&handle) {
            entry.status.add_uploaded(bytes);
        }
        self.lock_statistics()?.add_uploaded(bytes);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduling

    pub fn mark_owner(&self, handle: PeerHandle, piece_index: u32) -> Result<bool, SwarmStatusError> {
        Ok(self.lock_scheduler()?.mark_owner(handle, piece_index))
    }

    pub fn peer_has_interesting(&self, handle: PeerHandle) -> Result<bool, SwarmStatusError> {
        Ok(self.lock_scheduler()?.peer_has_interesting(handle))
    }

    pub fn next_requests(&self, handle: PeerHandle) -> Result<Vec<BlockRequest>, SwarmStatusError> {
        Ok(self.lock_scheduler()?.next_requests(handle))
    }

    pub fn sweep_timeouts(&self, now: Instant) -> Result<SweepOutcome, SwarmStatusError> {
        Ok(self.lock_scheduler()?.sweep_timeouts(now))
    }

    pub fn bitfield(&self) -> Result<Bitfield, SwarmStatusError> {
        Ok(self.lock_scheduler()?.bitfield())
    }

    pub fn has_piece(&self, piece_index: u32) -> Result<bool, SwarmStatusError> {
        Ok(self.lock_scheduler()?.has_piece(piece_index))
    }

    pub fn downloaded_piece_count(&self) -> Result<u32, SwarmStatusError> {
        Ok(self.lock_scheduler()?.downloaded_count())
    }

    pub fn is_complete(&self) -> Result<bool, SwarmStatusError> {
        Ok(self.lock_scheduler()?.is_complete())
    }

    pub fn mark_piece_verified(&self, piece_index: u32) -> Result<(), SwarmStatusError> {
        self.lock_scheduler()?.mark_piece_verified(piece_index);
        Ok(())
    }

    pub fn reset_piece(&self, piece_index: u32) -> Result<(), SwarmStatusError> {
        self.lock_scheduler()?.reset_piece(piece_index);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Content

    /// Serves a block out of the store for upload.
    pub async fn read_block(&self, request: &BlockRequest) -> Result<Vec<u8>, SwarmStatusError> {
        let mut store = self.store.lock().await;
        store
            .read(
                request.offset(self.torrent.piece_length()),
                request.length,
            )
            .await
            .map_err(SwarmStatusError::Storage)
    }

    /// Reads one whole piece back for hashing.
    pub async fn read_piece(&self, piece_index: u32) -> Result<Vec<u8>, SwarmStatusError> {
        let offset = u64::from(piece_index) * u64::from(self.torrent.piece_length());
        let length = self.torrent.info.real_piece_length(piece_index);

        let mut store = self.store.lock().await;
        store
            .read(offset, length)
            .await
            .map_err(SwarmStatusError::Storage)
    }

    /// Stores an incoming block.
    ///
    /// The store lock is held across the state check and the write, so a
    /// validating or downloaded piece can never be overwritten by a late
    /// block from another session.
    pub async fn write_block(
        &self,
        handle: PeerHandle,
        piece_index: u32,
        begin: u32,
        block: &[u8],
    ) -> Result<WriteOutcome, SwarmStatusError> {
        let mut store = self.store.lock().await;

        {
            let scheduler = self.lock_scheduler()?;
            if scheduler.is_validating(piece_index) || scheduler.has_piece(piece_index) {
                return Ok(WriteOutcome::Ignored);
            }
        }

        let offset =
            u64::from(piece_index) * u64::from(self.torrent.piece_length()) + u64::from(begin);
        store
            .write(offset, block)
            .await
            .map_err(SwarmStatusError::Storage)?;

        let receipt = self
            .lock_scheduler()?
            .block_received(handle, piece_index, begin);
        drop(store);

        match receipt {
            BlockReceipt::Ignored => Ok(WriteOutcome::Ignored),
            BlockReceipt::Accepted {
                cancels,
                piece_complete,
            } => {
                self.add_downloaded(handle, block.len() as u64)?;
                Ok(WriteOutcome::Stored {
                    cancels,
                    piece_complete,
                })
            }
        }
    }

    /// Applies a finished hash check and fans out its consequences: HAVE
    /// broadcast and completion event on success, bans on repeat offenders.
    pub fn finish_validation(&self, piece_index: u32, ok: bool) -> Result<bool, SwarmStatusError> {
        let outcome = self.lock_scheduler()?.piece_validated(piece_index, ok);

        if outcome.downloaded {
            self.broadcast_have(piece_index);
            if outcome.complete {
                let _ = self.events.send(SwarmEvent::Completed);
            }
        }
        for handle in &outcome.blacklisted {
            self.ban_peer(*handle)?;
        }

        self.publish();
        Ok(outcome.downloaded)
    }

    pub async fn flush_store(&self) -> Result<(), SwarmStatusError> {
        let mut store = self.store.lock().await;
        store.flush().await.map_err(SwarmStatusError::Storage)
    }

    // ------------------------------------------------------------------
    // Choking

    /// One candidate per connected peer; rate is download-from while we
    /// leech, upload-to once we seed.
    pub fn choke_candidates(&self, seeding: bool) -> Result<Vec<ChokeCandidate>, SwarmStatusError> {
        let mut roster = self.lock_roster()?;
        Ok(roster
            .entries
            .iter_mut()
            .map(|(handle, entry)| ChokeCandidate {
                handle: *handle,
                interested: entry.status.peer_interested,
                rate: if seeding {
                    entry.status.upload_rate.rate()
                } else {
                    entry.status.download_rate.rate()
                },
            })
            .collect())
    }

    /// Sends choke/unchoke commands to every session whose slot changed.
    pub fn apply_unchoke_set(&self, unchoked: &HashSet<PeerHandle>) -> Result<(), SwarmStatusError> {
        let roster = self.lock_roster()?;
        for (handle, entry) in &roster.entries {
            let should_unchoke = unchoked.contains(handle);
            if should_unchoke && entry.status.am_choking {
                let _ = entry.commands.send(SessionCommand::Unchoke);
            } else if !should_unchoke && !entry.status.am_choking {
                let _ = entry.commands.send(SessionCommand::Choke);
            }
        }
        Ok(())
    }

    /// Nudges every unchoked session to refill its pipeline.
    pub fn nudge_refill(&self) {
        if let Ok(roster) = self.roster.lock() {
            for entry in roster.entries.values() {
                if !entry.status.peer_choking {
                    let _ = entry.commands.send(SessionCommand::Refill);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Control plane

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
        self.publish();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_error(&self, message: String) {
        if let Ok(mut error) = self.error.lock() {
            *error = Some(message);
        }
        self.publish();
    }

    pub fn report_storage_failure(&self, message: String) {
        let _ = self.events.send(SwarmEvent::StorageFailure(message));
    }

    pub fn update_swarm_counts(&self, seeders: u32, leechers: u32) {
        if let Ok(mut counts) = self.swarm_counts.lock() {
            *counts = (seeders, leechers);
        }
        self.publish();
    }

    /// Progress totals for the next announce.
    pub fn announce_progress(&self) -> Result<(u64, u64, u64), SwarmStatusError> {
        let downloaded_pieces = u64::from(self.lock_scheduler()?.downloaded_count());
        let verified_bytes =
            (downloaded_pieces * u64::from(self.torrent.piece_length())).min(self.torrent.total_length());
        let left = self.torrent.total_length() - verified_bytes;

        let statistics = self.lock_statistics()?;
        Ok((statistics.uploaded, statistics.downloaded, left))
    }

    /// Publishes a fresh `TorrentState` snapshot.
    pub fn publish(&self) {
        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(_) => return,
        };
        let _ = self.state_sender.send(snapshot);
    }

    fn snapshot(&self) -> Result<TorrentState, SwarmStatusError> {
        let (downloaded_pieces, complete) = {
            let scheduler = self.lock_scheduler()?;
            (scheduler.downloaded_count(), scheduler.is_complete())
        };
        let verified_bytes = (u64::from(downloaded_pieces)
            * u64::from(self.torrent.piece_length()))
        .min(self.torrent.total_length());

        let connected = self.lock_roster()?.entries.len() as u32;
        let (seeders, leechers) = *self
            .swarm_counts
            .lock()
            .map_err(|_| SwarmStatusError::PoisonedStatisticsLock)?;

        let mut statistics = self.lock_statistics()?;
        let error = self
            .error
            .lock()
            .map_err(|_| SwarmStatusError::PoisonedStatisticsLock)?
            .clone();

        Ok(TorrentState {
            name: self.torrent.name(),
            info_hash: self.torrent.info_hash(),
            downloaded_bytes: verified_bytes,
            total_bytes: self.torrent.total_length(),
            uploaded_bytes: statistics.uploaded,
            ratio: statistics.ratio(),
            connected_peers: connected,
            seeders,
            leechers,
            download_speed: statistics.download_rate(),
            upload_speed: statistics.upload_rate(),
            paused: self.is_paused(),
            complete,
            error,
        })
    }

    // ------------------------------------------------------------------
    // Locks

    fn lock_scheduler(&self) -> Result<MutexGuard<RequestScheduler>, SwarmStatusError> {
        self.scheduler
            .lock()
            .map_err(|_| SwarmStatusError::PoisonedSchedulerLock)
    }

    fn lock_roster(&self) -> Result<MutexGuard<Roster>, SwarmStatusError> {
        self.roster
            .lock()
            .map_err(|_| SwarmStatusError::PoisonedRosterLock)
    }

    fn lock_statistics(&self) -> Result<MutexGuard<SessionStatistics>, SwarmStatusError> {
        self.statistics
            .lock()
            .map_err(|_| SwarmStatusError::PoisonedStatisticsLock)
    }
}
