use std::sync::Arc;
use std::time::Instant;

use futures_util::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::FramedWrite;

use crate::connector::Connector;
use crate::error::LoadError;
use crate::protocol::{ChatCodec, ChatMessage};
use crate::sink::{TimingSample, TimingSinkHandle};
use crate::tier::TierParams;

type Connection<C> = FramedWrite<<C as Connector>::Transport, ChatCodec>;

/// One simulated chat user: connect, log in, send a paced burst of timed
/// messages, log out and hang up.
pub struct Session<C: Connector> {
    client_id: usize,
    username: String,
    connector: Arc<C>,
    sink: TimingSinkHandle,
    params: TierParams,
}

/// What a session managed to do before it ended.
#[derive(Debug)]
pub struct SessionReport {
    pub client_id: usize,
    pub messages_sent: usize,
    pub samples_recorded: usize,
    pub logged_out: bool,
    pub error: Option<LoadError>,
}

impl SessionReport {
    fn new(client_id: usize) -> Self {
        Self {
            client_id,
            messages_sent: 0,
            samples_recorded: 0,
            logged_out: false,
            error: None,
        }
    }
}

impl<C: Connector> Session<C> {
    pub fn new(
        client_id: usize,
        connector: Arc<C>,
        sink: TimingSinkHandle,
        params: TierParams,
    ) -> Self {
        Self {
            client_id,
            username: format!("User{}", client_id),
            connector,
            sink,
            params,
        }
    }

    /// Runs the whole session. Never fails: errors end the session, get logged
    /// against the client id and are handed back in the report.
    pub async fn run(self) -> SessionReport {
        let mut report = SessionReport::new(self.client_id);
        let transport = match self.connector.connect().await {
            Ok(transport) => transport,
            Err(source) => {
                let err = LoadError::Connection {
                    client_id: self.client_id,
                    source,
                };
                tracing::error!(client_id = self.client_id, "{}", err);
                report.error = Some(err);
                return report;
            }
        };
        tracing::debug!(client_id = self.client_id, "Connected");

        let mut connection = FramedWrite::new(transport, ChatCodec::default());
        if let Err(err) = self.exchange(&mut connection, &mut report).await {
            tracing::error!(client_id = self.client_id, "{}", err);
            report.error = Some(err);
        }
        self.release(connection).await;
        report
    }

    async fn exchange(
        &self,
        connection: &mut Connection<C>,
        report: &mut SessionReport,
    ) -> Result<(), LoadError> {
        self.send(connection, ChatMessage::Login(self.username.clone()))
            .await?;

        for ordinal in 0..self.params.messages_per_client {
            let message =
                ChatMessage::Text(format!("Message {} from {}", ordinal, self.username));
            let start = Instant::now();
            self.send(connection, message).await?;
            let sample = TimingSample::from(start.elapsed());
            report.messages_sent += 1;

            // A lost sample never ends the session.
            match self.sink.record(sample).await {
                Ok(()) => report.samples_recorded += 1,
                Err(err) => tracing::warn!(client_id = self.client_id, "{}", err),
            }
            tokio::time::sleep(self.params.message_delay).await;
        }

        self.send(connection, ChatMessage::Logout).await?;
        report.logged_out = true;
        Ok(())
    }

    async fn send(
        &self,
        connection: &mut Connection<C>,
        message: ChatMessage,
    ) -> Result<(), LoadError> {
        let frame = message.kind();
        connection
            .send(message)
            .await
            .map_err(|source| LoadError::Transmission {
                client_id: self.client_id,
                frame,
                source,
            })
    }

    // Consumes the connection so the transport is dropped exactly once, on
    // every path out of `run` that got past connect.
    async fn release(&self, connection: Connection<C>) {
        let mut transport = connection.into_inner();
        if let Err(err) = transport.shutdown().await {
            tracing::debug!(client_id = self.client_id, "Unclean disconnect: {}", err);
        }
        tracing::debug!(client_id = self.client_id, "Disconnected");
    }
}
