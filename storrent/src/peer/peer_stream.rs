use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::handshake::{Handshake, HANDSHAKE_LEN};
use super::peer_message::{Message, MessageError, MAX_MESSAGE_LENGTH};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// A peer that stays silent longer than this is considered gone.
pub const SILENCE_TIMEOUT: Duration = Duration::from_secs(60);
/// We emit a keep-alive before this much time passes with no output.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(90);

/// Possible peer stream errors. `Message` and `OversizeFrame` are protocol
/// violations; everything else is transport trouble.
#[derive(Debug)]
pub enum PeerStreamError {
    ConnectTimeout,
    ReadTimeout,
    WriteTimeout,
    Closed,
    Io(io::Error),
    Message(MessageError),
    OversizeFrame(u32),
    InvalidHandshake,
}

impl PeerStreamError {
    fn from_io(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            PeerStreamError::Closed
        } else {
            PeerStreamError::Io(error)
        }
    }
}

/// Dials a peer with the connect deadline applied.
pub async fn connect(addr: SocketAddr) -> Result<TcpStream, PeerStreamError> {
    timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerStreamError::ConnectTimeout)?
        .map_err(PeerStreamError::Io)
}

/// Writes the 68-byte handshake.
pub async fn send_handshake<W>(stream: &mut W, handshake: &Handshake) -> Result<(), PeerStreamError>
where
    W: AsyncWrite + Unpin,
{
    timeout(WRITE_TIMEOUT, stream.write_all(&handshake.as_bytes()))
        .await
        .map_err(|_| PeerStreamError::WriteTimeout)?
        .map_err(PeerStreamError::from_io)
}

/// Reads and parses the 68-byte handshake.
pub async fn read_handshake<R>(stream: &mut R) -> Result<Handshake, PeerStreamError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; HANDSHAKE_LEN];
    timeout(READ_TIMEOUT, stream.read_exact(&mut buffer))
        .await
        .map_err(|_| PeerStreamError::ReadTimeout)?
        .map_err(PeerStreamError::from_io)?;

    Handshake::from_bytes(&buffer).map_err(|_| PeerStreamError::InvalidHandshake)
}

/// Splits a connected stream into its framed halves.
pub fn split(stream: TcpStream) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read_half, write_half) = stream.into_split();
    (FrameReader::new(read_half), FrameWriter::new(write_half))
}

/// Reads length-prefixed frames off the wire.
pub struct FrameReader<R> {
    stream: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self { stream }
    }

    /// Reads the next message. The length prefix may take up to the
    /// silence window to arrive; the body must follow within the read
    /// deadline.
    pub async fn read_message(&mut self) -> Result<Message, PeerStreamError> {
        let mut length = [0u8; 4];
        timeout(SILENCE_TIMEOUT, self.stream.read_exact(&mut length))
            .await
            .map_err(|_| PeerStreamError::ReadTimeout)?
            .map_err(PeerStreamError::from_io)?;

        let length = u32::from_be_bytes(length);
        if length > MAX_MESSAGE_LENGTH {
            return Err(PeerStreamError::OversizeFrame(length));
        }
        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        let mut frame = vec![0u8; length as usize];
        timeout(READ_TIMEOUT, self.stream.read_exact(&mut frame))
            .await
            .map_err(|_| PeerStreamError::ReadTimeout)?
            .map_err(PeerStreamError::from_io)?;

        Message::from_frame(&frame).map_err(PeerStreamError::Message)
    }
}

/// Writes frames with the write deadline applied.
pub struct FrameWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), PeerStreamError> {
        let bytes = message.as_bytes();
        timeout(WRITE_TIMEOUT, self.stream.write_all(&bytes))
            .await
            .map_err(|_| PeerStreamError::WriteTimeout)?
            .map_err(PeerStreamError::from_io)?;
        timeout(WRITE_TIMEOUT, self.stream.flush())
            .await
            .map_err(|_| PeerStreamError::WriteTimeout)?
            .map_err(PeerStreamError::from_io)
    }

    /// Best-effort close of the write side; used on session teardown.
    pub async fn shutdown(&mut self) {
        let _ = timeout(WRITE_TIMEOUT, self.stream.shutdown()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::peer_message::BlockRequest;

    #[tokio::test]
    async fn test_message_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let message = Message::Request(BlockRequest::new(3, 16384, 16384));
        writer.send(&message).await.unwrap();

        assert_eq!(reader.read_message().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_keep_alive_round_trip() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.send(&Message::KeepAlive).await.unwrap();

        assert_eq!(reader.read_message().await.unwrap(), Message::KeepAlive);
    }

    #[tokio::test]
    async fn test_oversize_frame_is_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        let length = MAX_MESSAGE_LENGTH + 1;
        client.write_all(&length.to_be_bytes()).await.unwrap();

        assert!(matches!(
            reader.read_message().await,
            Err(PeerStreamError::OversizeFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_stream_is_reported() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);
        drop(client);

        assert!(matches!(
            reader.read_message().await,
            Err(PeerStreamError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_handshake_round_trip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let handshake = Handshake::new([1; 20], [2; 20]);

        send_handshake(&mut client, &handshake).await.unwrap();

        assert_eq!(read_handshake(&mut server).await.unwrap(), handshake);
    }
}
