//! Connection state machine for a single accepted client.
//!
//! A connection carries exactly one request/response cycle:
//!
//! ```text
//! Accepted -> ReadingLength -> ReadingPayload -> Parsed -> Stored ------> Responded -> Closed
//!                   |                |              |   \-> StoreFailed -/
//!                   +--- ReadError --+              +-> Malformed -> Closed
//!                           |
//!                           +-> Closed
//! ```
//!
//! No response is written on the `ReadError` or `Malformed` paths.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::protocol::{FrameDecoder, FrameError, FrameState, Framing, ParseError, Response};

/// Read buffer size
const BUFFER_SIZE: usize = 1024;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Accepted,
    ReadingLength,
    ReadingPayload,
    Parsed,
    Stored,
    StoreFailed,
    Responded,
    /// Socket error or malformed frame header while reading.
    ReadError,
    /// Frame arrived but the payload is not a valid bet.
    Malformed,
    Closed,
}

/// Failure that aborts a connection without a response.
#[derive(Debug)]
pub enum ConnectionError {
    Io(io::Error),
    Frame(FrameError),
    Parse(ParseError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "socket error: {}", e),
            ConnectionError::Frame(e) => write!(f, "malformed frame: {}", e),
            ConnectionError::Parse(e) => write!(f, "malformed bet: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Io(e) => Some(e),
            ConnectionError::Frame(e) => Some(e),
            ConnectionError::Parse(e) => Some(e),
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        ConnectionError::Frame(e)
    }
}

impl From<ParseError> for ConnectionError {
    fn from(e: ParseError) -> Self {
        ConnectionError::Parse(e)
    }
}

/// One accepted client socket.
///
/// Generic over the stream so tests can drive it with scripted I/O.
pub struct Connection<S> {
    stream: S,
    peer: Option<SocketAddr>,
    state: ConnState,
    buffer: BytesMut,
    decoder: FrameDecoder,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: Option<SocketAddr>,
        framing: Framing,
        max_payload_size: usize,
    ) -> Self {
        Connection {
            stream,
            peer,
            state: ConnState::Accepted,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            decoder: FrameDecoder::new(framing, max_payload_size),
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Move to `next`, recording the transition.
    pub fn transition(&mut self, next: ConnState) {
        trace!(peer = ?self.peer, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }

    /// Read until one complete frame payload is buffered.
    ///
    /// A peer close before the frame is complete is reported as
    /// `UnexpectedEof`.
    pub async fn read_frame(&mut self) -> Result<Bytes, ConnectionError> {
        self.transition(ConnState::ReadingLength);
        match self.read_frame_inner().await {
            Ok(payload) => Ok(payload),
            Err(e) => {
                self.transition(ConnState::ReadError);
                Err(e)
            }
        }
    }

    async fn read_frame_inner(&mut self) -> Result<Bytes, ConnectionError> {
        loop {
            let decoded = self.decoder.decode(&mut self.buffer)?;
            let length_known = decoded.is_some()
                || matches!(self.decoder.state(), FrameState::ReadingPayload { .. });
            if length_known && self.state != ConnState::ReadingPayload {
                debug!(peer = ?self.peer, buffered = self.buffer.len(), "Length prefix received");
                self.transition(ConnState::ReadingPayload);
            }
            if let Some(payload) = decoded {
                return Ok(payload);
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                let msg = format!(
                    "peer closed with {} bytes of an incomplete frame buffered",
                    self.buffer.len()
                );
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, msg).into());
            }
            trace!(peer = ?self.peer, bytes = n, "Read chunk");
        }
    }

    /// Write the full response, retrying after short writes.
    pub async fn respond(&mut self, response: Response) -> io::Result<()> {
        self.stream.write_all(response.as_bytes()).await?;
        self.stream.flush().await?;
        self.transition(ConnState::Responded);
        Ok(())
    }

    /// Shut down the write half and drop the socket.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            trace!(peer = ?self.peer, error = %e, "Shutdown on close failed");
        }
        self.transition(ConnState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use tokio_test::io::Builder;

    const FRAME: &[u8] = b"37 1;Juan;Perez;30904465;1999-03-17;7723";
    const PAYLOAD: &[u8] = b"1;Juan;Perez;30904465;1999-03-17;7723";

    #[tokio::test]
    async fn test_read_frame_single_read() {
        let mock = Builder::new().read(FRAME).build();
        let mut conn = Connection::new(mock, None, Framing::Text, 8192);

        assert_eq!(conn.state(), ConnState::Accepted);
        let payload = conn.read_frame().await.unwrap();
        assert_eq!(&payload[..], PAYLOAD);
        assert_eq!(conn.state(), ConnState::ReadingPayload);
    }

    #[tokio::test]
    async fn test_read_frame_across_short_reads() {
        let mut builder = Builder::new();
        for chunk in FRAME.chunks(3) {
            builder.read(chunk);
        }
        let mut conn = Connection::new(builder.build(), None, Framing::Text, 8192);

        let payload = conn.read_frame().await.unwrap();
        assert_eq!(&payload[..], PAYLOAD);
    }

    #[tokio::test]
    async fn test_read_frame_eof_after_length() {
        let mock = Builder::new().read(b"37 ").build();
        let mut conn = Connection::new(mock, None, Framing::Text, 8192);

        let err = conn.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
        assert_eq!(conn.state(), ConnState::ReadError);
    }

    #[tokio::test]
    async fn test_read_frame_socket_error() {
        let mock = Builder::new()
            .read(b"37 1;Ju")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut conn = Connection::new(mock, None, Framing::Text, 8192);

        let err = conn.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset
        ));
        assert_eq!(conn.state(), ConnState::ReadError);
    }

    #[tokio::test]
    async fn test_read_frame_bad_header() {
        let mock = Builder::new().read(b"abc 1;Juan").build();
        let mut conn = Connection::new(mock, None, Framing::Text, 8192);

        let err = conn.read_frame().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Frame(FrameError::InvalidLength(_))));
        assert_eq!(conn.state(), ConnState::ReadError);
    }

    /// Stream that accepts at most one byte per write call.
    #[derive(Default)]
    struct Trickle {
        written: Vec<u8>,
        write_calls: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.write_calls += 1;
            match buf.first() {
                Some(&b) => {
                    self.written.push(b);
                    Poll::Ready(Ok(1))
                }
                None => Poll::Ready(Ok(0)),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_respond_survives_one_byte_writes() {
        for response in [Response::Ok, Response::StoreFailed] {
            let mut conn = Connection::new(Trickle::default(), None, Framing::Text, 8192);

            conn.respond(response).await.unwrap();
            assert_eq!(conn.state(), ConnState::Responded);
            assert_eq!(conn.stream.written, response.as_bytes());
            assert_eq!(conn.stream.write_calls, response.as_bytes().len());
        }
    }

    #[tokio::test]
    async fn test_respond_with_scripted_stream() {
        let mock = Builder::new().write(b"OK\n").build();
        let mut conn = Connection::new(mock, None, Framing::Text, 8192);

        conn.respond(Response::Ok).await.unwrap();
        conn.close().await;
    }
}
