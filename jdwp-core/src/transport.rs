// Frame transport
//
// The engine needs three things from a transport: read one frame, write one
// frame, close. StreamReader/StreamWriter provide them over any tokio byte
// stream; connect_tcp adds the JDWP handshake on top of a TCP socket.

use crate::error::{JdwpError, JdwpResult};
use crate::protocol::{HEADER_SIZE, JDWP_HANDSHAKE};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Inbound half of a transport. Owned exclusively by the dispatcher.
pub trait FrameRead: Send + 'static {
    /// Read the next complete frame, header included. `Ok(None)` is an orderly EOF.
    fn read_frame(&mut self) -> impl Future<Output = JdwpResult<Option<Vec<u8>>>> + Send;
}

/// Outbound half of a transport. Owned exclusively by the writer task.
pub trait FrameWrite: Send + 'static {
    fn write_frame(&mut self, frame: &[u8]) -> impl Future<Output = JdwpResult<()>> + Send;

    fn close(&mut self) -> impl Future<Output = JdwpResult<()>> + Send;
}

/// Length-delimited frame reader over a byte stream
#[derive(Debug)]
pub struct StreamReader<R> {
    inner: R,
    max_packet_size: usize,
}

impl<R> StreamReader<R> {
    pub fn new(inner: R, max_packet_size: usize) -> Self {
        Self {
            inner,
            max_packet_size,
        }
    }
}

impl<R> FrameRead for StreamReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> JdwpResult<Option<Vec<u8>>> {
        let mut length_bytes = [0u8; 4];

        // EOF before the first byte of a frame is an orderly close
        if self.inner.read(&mut length_bytes[..1]).await? == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut length_bytes[1..]).await?;

        let length = u32::from_be_bytes(length_bytes) as usize;

        if length < HEADER_SIZE {
            return Err(JdwpError::WireFormat(format!(
                "Invalid packet length: {}",
                length
            )));
        }

        if length > self.max_packet_size {
            return Err(JdwpError::WireFormat(format!(
                "Packet too large: {} bytes (max: {} bytes)",
                length, self.max_packet_size
            )));
        }

        let mut frame = vec![0u8; length];
        frame[..4].copy_from_slice(&length_bytes);
        self.inner.read_exact(&mut frame[4..]).await?;

        Ok(Some(frame))
    }
}

/// Frame writer over a byte stream
#[derive(Debug)]
pub struct StreamWriter<W> {
    inner: W,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> FrameWrite for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, frame: &[u8]) -> JdwpResult<()> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> JdwpResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Perform JDWP handshake
pub async fn handshake<S>(stream: &mut S) -> JdwpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Performing JDWP handshake");

    stream.write_all(JDWP_HANDSHAKE).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
    stream.read_exact(&mut buf).await?;

    if buf != JDWP_HANDSHAKE {
        warn!("Invalid handshake response: {:?}", buf);
        return Err(JdwpError::InvalidHandshake);
    }

    info!("JDWP handshake successful");
    Ok(())
}

/// Connect to a JVM over TCP, handshake, and split into frame halves
pub async fn connect_tcp(
    host: &str,
    port: u16,
    max_packet_size: usize,
) -> JdwpResult<(StreamReader<OwnedReadHalf>, StreamWriter<OwnedWriteHalf>)> {
    info!("Connecting to JDWP at {}:{}", host, port);

    let mut stream = TcpStream::connect((host, port)).await?;
    handshake(&mut stream).await?;

    let (reader, writer) = stream.into_split();
    Ok((
        StreamReader::new(reader, max_packet_size),
        StreamWriter::new(writer),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandPacket, ReplyPacket};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_reads_consecutive_frames_then_eof() {
        let (client, mut server) = duplex(1024);
        let mut reader = StreamReader::new(client, 1024);

        let first = CommandPacket::with_data(1, 64, 100, vec![0, 0, 0, 0, 0]).encode();
        let second = ReplyPacket::new(2, 0, Vec::new()).encode();
        server.write_all(&first).await.unwrap();
        server.write_all(&second).await.unwrap();
        drop(server);

        assert_eq!(reader.read_frame().await.unwrap(), Some(first));
        assert_eq!(reader.read_frame().await.unwrap(), Some(second));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame() {
        let (client, mut server) = duplex(1024);
        let mut reader = StreamReader::new(client, 64);

        server.write_all(&1000u32.to_be_bytes()).await.unwrap();

        assert!(matches!(
            reader.read_frame().await,
            Err(JdwpError::WireFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_length_below_header() {
        let (client, mut server) = duplex(1024);
        let mut reader = StreamReader::new(client, 1024);

        server.write_all(&5u32.to_be_bytes()).await.unwrap();

        assert!(matches!(
            reader.read_frame().await,
            Err(JdwpError::WireFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_io_error() {
        let (client, mut server) = duplex(1024);
        let mut reader = StreamReader::new(client, 1024);

        let frame = CommandPacket::with_data(1, 1, 1, vec![1, 2, 3, 4]).encode();
        server.write_all(&frame[..7]).await.unwrap();
        drop(server);

        assert!(matches!(reader.read_frame().await, Err(JdwpError::Io(_))));
    }

    #[tokio::test]
    async fn test_handshake_roundtrip() {
        let (mut client, mut server) = duplex(64);

        let vm = tokio::spawn(async move {
            let mut buf = [0u8; 14];
            server.read_exact(&mut buf).await.unwrap();
            server.write_all(&buf).await.unwrap();
        });

        handshake(&mut client).await.unwrap();
        vm.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejects_garbage() {
        let (mut client, mut server) = duplex(64);

        tokio::spawn(async move {
            let mut buf = [0u8; 14];
            server.read_exact(&mut buf).await.unwrap();
            server.write_all(b"HTTP/1.1 400 B").await.unwrap();
        });

        assert!(matches!(
            handshake(&mut client).await,
            Err(JdwpError::InvalidHandshake)
        ));
    }
}
