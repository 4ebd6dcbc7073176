//! In-memory doubles for the results log and the chat server connection.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use crate::connector::Connector;
use crate::protocol::{ChatCodec, ChatMessage};
use crate::sink::ResultsLog;

#[derive(Debug, Default)]
struct LogState {
    bytes: Vec<u8>,
    writes: usize,
}

/// An append target that keeps everything in memory. Optionally accepts at
/// most `max_chunk` bytes per write, fails every n-th write, or refuses to
/// be truncated.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    state: Arc<Mutex<LogState>>,
    max_chunk: Option<usize>,
    fail_every: Option<usize>,
    fail_truncate: bool,
}

impl MemoryLog {
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk);
        self
    }

    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn failing_truncate(mut self) -> Self {
        self.fail_truncate = true;
        self
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.state.lock().unwrap().bytes.clone()).unwrap()
    }
}

impl ResultsLog for MemoryLog {
    async fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        if self.fail_truncate {
            return Err(io::Error::other("read-only file system"));
        }
        let len = usize::try_from(len).map_err(io::Error::other)?;
        self.state.lock().unwrap().bytes.truncate(len);
        Ok(())
    }
}

impl AsyncWrite for MemoryLog {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        if matches!(self.fail_every, Some(n) if state.writes % n == 0) {
            return Poll::Ready(Err(io::Error::other("disk full")));
        }
        let len = self.max_chunk.map_or(buf.len(), |max| buf.len().min(max));
        state.bytes.extend_from_slice(&buf[..len]);
        Poll::Ready(Ok(len))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Default)]
struct WireState {
    bytes: Vec<u8>,
    shutdowns: usize,
    released: usize,
}

/// What one mock connection saw from its session.
#[derive(Debug, Clone, Default)]
pub struct Wire {
    state: Arc<Mutex<WireState>>,
}

impl Wire {
    pub fn frames(&self) -> Vec<ChatMessage> {
        let bytes = self.state.lock().unwrap().bytes.clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| ChatMessage::try_from(line).unwrap())
            .collect()
    }

    pub fn shutdowns(&self) -> usize {
        self.state.lock().unwrap().shutdowns
    }

    pub fn released(&self) -> usize {
        self.state.lock().unwrap().released
    }
}

pub struct MockTransport {
    wire: Wire,
    writes: usize,
    fail_write: Option<usize>,
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.writes += 1;
        if self.fail_write == Some(self.writes) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        self.wire.state.lock().unwrap().bytes.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.wire.state.lock().unwrap().shutdowns += 1;
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.wire.state.lock().unwrap().released += 1;
    }
}

/// Hands out [`MockTransport`]s and keeps every [`Wire`] for inspection.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    attempts: Arc<AtomicUsize>,
    wires: Arc<Mutex<Vec<Wire>>>,
    refuse_attempt: Option<usize>,
    fail_write: Option<usize>,
    stall: bool,
}

impl MockConnector {
    /// Refuses the n-th connection attempt (1-based).
    pub fn refusing_attempt(mut self, n: usize) -> Self {
        self.refuse_attempt = Some(n);
        self
    }

    /// Fails the n-th write (1-based) on every connection. The LOGIN frame is
    /// write 1, so message k goes out as write k + 2.
    pub fn failing_write(mut self, n: usize) -> Self {
        self.fail_write = Some(n);
        self
    }

    /// Connection attempts never resolve.
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn wires(&self) -> Vec<Wire> {
        self.wires.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> io::Result<MockTransport> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.refuse_attempt == Some(attempt) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }
        let wire = Wire::default();
        self.wires.lock().unwrap().push(wire.clone());
        Ok(MockTransport {
            wire,
            writes: 0,
            fail_write: self.fail_write,
        })
    }
}

/// A loopback chat server that accepts everyone and remembers what each
/// connection sent, reported once the client hangs up.
pub struct ChatServer {
    port: u16,
    session_rx: mpsc::UnboundedReceiver<Vec<ChatMessage>>,
}

impl ChatServer {
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let session_tx = session_tx.clone();
                tokio::spawn(async move {
                    let mut frames = FramedRead::new(stream, ChatCodec::default());
                    let mut seen = Vec::new();
                    while let Some(Ok(frame)) = frames.next().await {
                        seen.push(frame);
                    }
                    let _ = session_tx.send(seen);
                });
            }
        });
        Ok(Self { port, session_rx })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for `count` connections to close and returns their frames.
    pub async fn sessions(mut self, count: usize) -> Vec<Vec<ChatMessage>> {
        let mut sessions = Vec::with_capacity(count);
        for _ in 0..count {
            sessions.push(self.session_rx.recv().await.unwrap());
        }
        sessions
    }
}
