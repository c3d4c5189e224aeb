use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::swarm::status::{
    AdmissionError, SessionCommand, SwarmStatus, SwarmStatusError, WriteOutcome,
};
use crate::verifier::integrity;

use super::handshake::Handshake;
use super::peer_info::PeerInfo;
use super::peer_message::{BlockRequest, Message, MessageError, MAX_REQUEST_LENGTH};
use super::peer_stream::{self, FrameReader, FrameWriter, PeerStreamError};

/// Interval at which the output gap is checked against the keep-alive
/// deadline.
const KEEP_ALIVE_CHECK: Duration = Duration::from_secs(15);

/// Output gap that triggers a keep-alive, comfortably under the 90 s limit.
const KEEP_ALIVE_AFTER: Duration = Duration::from_secs(60);

/// Fatal wire violations; the session drops without further penalty.
#[derive(Debug, PartialEq)]
pub enum ProtocolViolation {
    InfoHashMismatch,
    SelfConnection,
    UnexpectedPeerId,
    /// A bitfield arrived after other traffic.
    BitfieldAfterStart,
    /// Wrong length or set spare bits.
    BadBitfield,
    /// A piece index past the end of the torrent.
    BadPieceIndex,
    BlockOutOfBounds,
}

/// Possible `PeerSession` errors.
#[derive(Debug)]
pub enum PeerSessionError {
    Stream(PeerStreamError),
    Protocol(ProtocolViolation),
    Status(SwarmStatusError),
    Rejected(AdmissionError),
}

/// Session-local protocol state. The roster mirror exists for observers;
/// these flags are what the wire actually saw.
struct SessionState {
    am_choking: bool,
    am_interested: bool,
    saw_first_message: bool,
    last_write: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            saw_first_message: false,
            last_write: Instant::now(),
        }
    }
}

/// Dials a peer and runs the session until it ends. Errors are logged, not
/// propagated: one peer's failure never touches another session.
pub async fn run_outgoing(status: Arc<SwarmStatus>, peer: PeerInfo, token: CancellationToken) {
    let addr = peer.addr;
    match outgoing_session(status, peer, token).await {
        Ok(()) => info!(peer = %addr, "session closed"),
        Err(PeerSessionError::Rejected(reason)) => {
            debug!(peer = %addr, "session rejected: {:?}", reason)
        }
        Err(e) => debug!(peer = %addr, "session ended: {:?}", e),
    }
}

/// Takes over an accepted connection whose handshake was already read by
/// the acceptor.
pub async fn run_incoming(
    status: Arc<SwarmStatus>,
    stream: TcpStream,
    remote: Handshake,
    token: CancellationToken,
) {
    let addr = stream.peer_addr().ok();
    match incoming_session(status, stream, remote, token).await {
        Ok(()) => info!(peer = ?addr, "inbound session closed"),
        Err(e) => debug!(peer = ?addr, "inbound session ended: {:?}", e),
    }
}

async fn outgoing_session(
    status: Arc<SwarmStatus>,
    peer: PeerInfo,
    token: CancellationToken,
) -> Result<(), PeerSessionError> {
    let mut stream = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        result = peer_stream::connect(peer.addr) => result.map_err(PeerSessionError::Stream)?,
    };

    let ours = Handshake::new(status.info_hash(), status.client_peer_id());
    peer_stream::send_handshake(&mut stream, &ours)
        .await
        .map_err(PeerSessionError::Stream)?;
    let remote = peer_stream::read_handshake(&mut stream)
        .await
        .map_err(PeerSessionError::Stream)?;

    verify_handshake(&status, &peer, &remote)?;

    run_session(status, peer, remote, stream, token).await
}

async fn incoming_session(
    status: Arc<SwarmStatus>,
    mut stream: TcpStream,
    remote: Handshake,
    token: CancellationToken,
) -> Result<(), PeerSessionError> {
    if remote.peer_id == status.client_peer_id() {
        return Err(PeerSessionError::Protocol(ProtocolViolation::SelfConnection));
    }

    let ours = Handshake::new(status.info_hash(), status.client_peer_id());
    peer_stream::send_handshake(&mut stream, &ours)
        .await
        .map_err(PeerSessionError::Stream)?;

    let addr = stream
        .peer_addr()
        .map_err(|e| PeerSessionError::Stream(PeerStreamError::Io(e)))?;
    let peer = PeerInfo {
        addr,
        peer_id: Some(remote.peer_id),
    };

    run_session(status, peer, remote, stream, token).await
}

fn verify_handshake(
    status: &Arc<SwarmStatus>,
    peer: &PeerInfo,
    remote: &Handshake,
) -> Result<(), PeerSessionError> {
    if remote.info_hash != status.info_hash() {
        return Err(PeerSessionError::Protocol(
            ProtocolViolation::InfoHashMismatch,
        ));
    }
    if remote.peer_id == status.client_peer_id() {
        return Err(PeerSessionError::Protocol(ProtocolViolation::SelfConnection));
    }
    if let Some(expected) = peer.peer_id {
        if expected != remote.peer_id {
            return Err(PeerSessionError::Protocol(
                ProtocolViolation::UnexpectedPeerId,
            ));
        }
    }
    Ok(())
}

async fn run_session(
    status: Arc<SwarmStatus>,
    peer: PeerInfo,
    remote: Handshake,
    stream: TcpStream,
    token: CancellationToken,
) -> Result<(), PeerSessionError> {
    let (handle, mut commands) = match status
        .register_peer(peer.clone())
        .map_err(PeerSessionError::Status)?
    {
        Ok(admitted) => admitted,
        Err(reason) => return Err(PeerSessionError::Rejected(reason)),
    };
    status
        .set_peer_id(handle, remote.peer_id)
        .map_err(PeerSessionError::Status)?;

    let result = drive_session(&status, handle, stream, &mut commands, &token).await;

    status
        .unregister_peer(handle)
        .map_err(PeerSessionError::Status)?;
    result
}

async fn drive_session(
    status: &Arc<SwarmStatus>,
    handle: u64,
    stream: TcpStream,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    token: &CancellationToken,
) -> Result<(), PeerSessionError> {
    let (reader, mut writer) = peer_stream::split(stream);
    let mut session = SessionState::new();

    // advertise what we already have; an empty bitfield is elided
    let bitfield = status.bitfield().map_err(PeerSessionError::Status)?;
    if !bitfield.is_empty() {
        send(&mut writer, &mut session, &Message::Bitfield(bitfield)).await?;
    }

    let (frames_sender, mut frames) = mpsc::channel(64);
    let reader_token = token.child_token();
    let reader_task = tokio::spawn(read_frames(reader, frames_sender, reader_token.clone()));

    let mut keepalive = tokio::time::interval(KEEP_ALIVE_CHECK);

    let result = loop {
        tokio::select! {
            _ = token.cancelled() => break Ok(()),
            received = frames.recv() => match received {
                Some(Ok(message)) => {
                    if let Err(e) =
                        handle_message(status, handle, message, &mut writer, &mut session).await
                    {
                        break Err(e);
                    }
                }
                Some(Err(e)) => break Err(PeerSessionError::Stream(e)),
                None => break Err(PeerSessionError::Stream(PeerStreamError::Closed)),
            },
            received = commands.recv() => match received {
                Some(command) => {
                    match handle_command(status, handle, command, &mut writer, &mut session).await {
                        Ok(true) => (),
                        Ok(false) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                None => break Ok(()),
            },
            _ = keepalive.tick() => {
                if session.last_write.elapsed() >= KEEP_ALIVE_AFTER {
                    if let Err(e) = send(&mut writer, &mut session, &Message::KeepAlive).await {
                        break Err(e);
                    }
                }
            },
        }
    };

    // close the writer first, then wind the reader down
    writer.shutdown().await;
    reader_token.cancel();
    let _ = reader_task.await;
    result
}

/// Reader half of the session: turns the byte stream into framed messages.
/// Unknown message ids are skipped; everything else ends the stream.
async fn read_frames(
    mut reader: FrameReader<OwnedReadHalf>,
    frames: mpsc::Sender<Result<Message, PeerStreamError>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            result = reader.read_message() => match result {
                Ok(message) => {
                    if frames.send(Ok(message)).await.is_err() {
                        break;
                    }
                }
                Err(PeerStreamError::Message(MessageError::UnknownId(id))) => {
                    debug!("ignoring unknown message id {}", id);
                }
                Err(e) => {
                    let _ = frames.send(Err(e)).await;
                    break;
                }
            },
        }
    }
}

async fn handle_message(
    status: &Arc<SwarmStatus>,
    handle: u64,
    message: Message,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    session: &mut SessionState,
) -> Result<(), PeerSessionError> {
    if message == Message::KeepAlive {
        return Ok(());
    }
    let first_message = !session.saw_first_message;
    session.saw_first_message = true;

    let piece_count = status.torrent().total_pieces();

    match message {
        Message::KeepAlive => Ok(()),
        Message::Choke => status
            .set_peer_choking(handle, true)
            .map_err(PeerSessionError::Status),
        Message::Unchoke => {
            status
                .set_peer_choking(handle, false)
                .map_err(PeerSessionError::Status)?;
            refill(status, handle, writer, session).await
        }
        Message::Interested => status
            .set_peer_interested(handle, true)
            .map_err(PeerSessionError::Status),
        Message::NotInterested => status
            .set_peer_interested(handle, false)
            .map_err(PeerSessionError::Status),
        Message::Have(piece_index) => {
            if piece_index >= piece_count {
                return Err(PeerSessionError::Protocol(ProtocolViolation::BadPieceIndex));
            }
            let interesting = status
                .mark_owner(handle, piece_index)
                .map_err(PeerSessionError::Status)?;
            if interesting {
                declare_interest(status, handle, writer, session).await?;
            }
            refill(status, handle, writer, session).await
        }
        Message::Bitfield(bitfield) => {
            if !first_message {
                return Err(PeerSessionError::Protocol(
                    ProtocolViolation::BitfieldAfterStart,
                ));
            }
            if !bitfield.is_valid_for(piece_count) {
                return Err(PeerSessionError::Protocol(ProtocolViolation::BadBitfield));
            }

            let mut interesting = false;
            for piece_index in 0..piece_count {
                if bitfield.has_piece(piece_index) {
                    interesting |= status
                        .mark_owner(handle, piece_index)
                        .map_err(PeerSessionError::Status)?;
                }
            }
            if interesting {
                declare_interest(status, handle, writer, session).await?;
            }
            Ok(())
        }
        Message::Request(request) => {
            handle_request(status, handle, request, writer, session).await
        }
        Message::Piece {
            piece_index,
            begin,
            block,
        } => handle_block(status, handle, piece_index, begin, block, writer, session).await,
        // we answer requests immediately or drop them, so there is nothing
        // pending for a cancel to forget
        Message::Cancel(_) => Ok(()),
        // no DHT
        Message::Port(_) => Ok(()),
    }
}

/// Serves a block request, or silently ignores it when policy says no.
async fn handle_request(
    status: &Arc<SwarmStatus>,
    handle: u64,
    request: BlockRequest,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    session: &mut SessionState,
) -> Result<(), PeerSessionError> {
    let torrent = status.torrent();
    if !request.is_within(
        torrent.total_pieces(),
        torrent.piece_length(),
        torrent.total_length(),
    ) {
        return Err(PeerSessionError::Protocol(
            ProtocolViolation::BlockOutOfBounds,
        ));
    }

    let serve = request.length <= MAX_REQUEST_LENGTH
        && !session.am_choking
        && status
            .peer_interested(handle)
            .map_err(PeerSessionError::Status)?
        && status
            .has_piece(request.piece_index)
            .map_err(PeerSessionError::Status)?;
    if !serve {
        return Ok(());
    }

    let block = match status.read_block(&request).await {
        Ok(block) => block,
        Err(SwarmStatusError::Storage(e)) => {
            status.report_storage_failure(format!("{:?}", e));
            return Err(PeerSessionError::Status(SwarmStatusError::Storage(e)));
        }
        Err(e) => return Err(PeerSessionError::Status(e)),
    };
    if block.len() != request.length as usize {
        warn!(
            piece = request.piece_index,
            "short read while serving a block, dropping request"
        );
        return Ok(());
    }

    let length = block.len() as u64;
    send(
        writer,
        session,
        &Message::Piece {
            piece_index: request.piece_index,
            begin: request.begin,
            block,
        },
    )
    .await?;
    status
        .add_uploaded(handle, length)
        .map_err(PeerSessionError::Status)
}

/// Stores an incoming block and follows up: cancels duplicate holders,
/// kicks off validation on completion, refills the pipeline.
async fn handle_block(
    status: &Arc<SwarmStatus>,
    handle: u64,
    piece_index: u32,
    begin: u32,
    block: Vec<u8>,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    session: &mut SessionState,
) -> Result<(), PeerSessionError> {
    let torrent = status.torrent();
    let request = BlockRequest::new(piece_index, begin, block.len() as u32);
    if !request.is_within(
        torrent.total_pieces(),
        torrent.piece_length(),
        torrent.total_length(),
    ) {
        return Err(PeerSessionError::Protocol(
            ProtocolViolation::BlockOutOfBounds,
        ));
    }
    if block.is_empty() {
        return Ok(());
    }

    let outcome = match status.write_block(handle, piece_index, begin, &block).await {
        Ok(outcome) => outcome,
        Err(SwarmStatusError::Storage(e)) => {
            status.report_storage_failure(format!("{:?}", e));
            return Err(PeerSessionError::Status(SwarmStatusError::Storage(e)));
        }
        Err(e) => return Err(PeerSessionError::Status(e)),
    };

    match outcome {
        WriteOutcome::Ignored => Ok(()),
        WriteOutcome::Stored {
            cancels,
            piece_complete,
        } => {
            for (holder, duplicate) in cancels {
                status.send_command(holder, SessionCommand::Cancel(duplicate));
            }
            if piece_complete {
                let validation_status = status.clone();
                tokio::spawn(async move {
                    if let Err(e) = integrity::validate_piece(validation_status, piece_index).await
                    {
                        warn!(piece = piece_index, "validation failed to run: {:?}", e);
                    }
                });
            }
            refill(status, handle, writer, session).await
        }
    }
}

async fn handle_command(
    status: &Arc<SwarmStatus>,
    handle: u64,
    command: SessionCommand,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    session: &mut SessionState,
) -> Result<bool, PeerSessionError> {
    match command {
        SessionCommand::Choke => {
            if !session.am_choking {
                session.am_choking = true;
                status
                    .set_am_choking(handle, true)
                    .map_err(PeerSessionError::Status)?;
                send(writer, session, &Message::Choke).await?;
            }
        }
        SessionCommand::Unchoke => {
            if session.am_choking {
                session.am_choking = false;
                status
                    .set_am_choking(handle, false)
                    .map_err(PeerSessionError::Status)?;
                send(writer, session, &Message::Unchoke).await?;
            }
        }
        SessionCommand::Have(piece_index) => {
            send(writer, session, &Message::Have(piece_index)).await?;
            // a finished piece may have exhausted what this peer offers
            let still_interesting = status
                .peer_has_interesting(handle)
                .map_err(PeerSessionError::Status)?;
            if session.am_interested && !still_interesting {
                session.am_interested = false;
                status
                    .set_am_interested(handle, false)
                    .map_err(PeerSessionError::Status)?;
                send(writer, session, &Message::NotInterested).await?;
            }
        }
        SessionCommand::Cancel(request) => {
            send(writer, session, &Message::Cancel(request)).await?;
        }
        SessionCommand::Refill => {
            refill(status, handle, writer, session).await?;
        }
        SessionCommand::Disconnect => return Ok(false),
    }
    Ok(true)
}

/// Flips `am_interested` on and tells the peer, once.
async fn declare_interest(
    status: &Arc<SwarmStatus>,
    handle: u64,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    session: &mut SessionState,
) -> Result<(), PeerSessionError> {
    if session.am_interested {
        return Ok(());
    }
    session.am_interested = true;
    status
        .set_am_interested(handle, true)
        .map_err(PeerSessionError::Status)?;
    send(writer, session, &Message::Interested).await
}

/// Tops the request pipeline up and puts the new requests on the wire.
async fn refill(
    status: &Arc<SwarmStatus>,
    handle: u64,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    session: &mut SessionState,
) -> Result<(), PeerSessionError> {
    let requests = status
        .next_requests(handle)
        .map_err(PeerSessionError::Status)?;
    for request in requests {
        send(writer, session, &Message::Request(request)).await?;
    }
    Ok(())
}

async fn send(
    writer: &mut FrameWriter<OwnedWriteHalf>,
    session: &mut SessionState,
    message: &Message,
) -> Result<(), PeerSessionError> {
    writer
        .send(message)
        .await
        .map_err(PeerSessionError::Stream)?;
    session.last_write = Instant::now();
    Ok(())
}
