use std::io;

use thiserror::Error;

use crate::sink::TimingSample;

/// Everything that can go wrong while a load test is running. None of these
/// are fatal to the run: each one is logged where it happens and the affected
/// session, sample or tier wait degrades on its own.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The client could not reach the chat server. No messages are attempted.
    #[error("client {client_id} could not connect: {source}")]
    Connection {
        client_id: usize,
        #[source]
        source: io::Error,
    },

    /// Sending a frame failed midway through the session.
    #[error("client {client_id} failed to send {frame}: {source}")]
    Transmission {
        client_id: usize,
        frame: &'static str,
        #[source]
        source: io::Error,
    },

    /// A single timing sample could not be appended to the results log.
    #[error("failed to record timing sample of {sample}: {source}")]
    SinkWrite {
        sample: TimingSample,
        #[source]
        source: io::Error,
    },

    /// The tier wait was cut short by an operator interrupt.
    #[error("wait for tier of {tier_size} clients interrupted with {outstanding} sessions still running")]
    WaitInterrupted { tier_size: usize, outstanding: usize },
}
