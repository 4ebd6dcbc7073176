use std::future::Future;
use std::io;

use tokio::io::AsyncWrite;
use tokio::net::TcpStream;

// Sessions never share a connection. Each one calls `connect` once and owns the transport it
// gets back until it hangs up, so the server sees one client per simulated user. We only ever
// write to the server, which is why the transport needs nothing more than `AsyncWrite`.
pub trait Connector: Send + Sync + 'static {
    type Transport: AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Transport>> + Send;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Transport = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        // No timeout here: a server that never accepts keeps the session stuck, and the tier
        // wait bound is what gets us past it.
        TcpStream::connect(&self.addr).await
    }
}
