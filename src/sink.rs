use std::fmt;
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::LoadError;

// Sessions wait for the reply of every record they send, so at most one request per live
// session sits in the channel. Tiers top out around a thousand clients, this leaves room.
const EVENT_BUFFER: usize = 4096;

/// Milliseconds spent transmitting a single chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimingSample(u64);

impl TimingSample {
    pub fn millis(self) -> u64 {
        self.0
    }
}

impl From<Duration> for TimingSample {
    fn from(elapsed: Duration) -> Self {
        Self(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for TimingSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// Anything the sink appends records to. Besides writing, it must be able to cut itself back
// to a given length: a write can fail after part of a record already landed, and we never
// want those stray bytes to glue onto the next record.
pub trait ResultsLog: AsyncWrite + Unpin + Send + 'static {
    fn truncate_to(&mut self, len: u64) -> impl Future<Output = io::Result<()>> + Send;
}

impl ResultsLog for File {
    async fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        // The file is opened in append mode, so later writes still land at the new end.
        self.set_len(len).await
    }
}

// This is the only owner of the results log. A single instance runs on its own task and
// appends the records one at a time, in the order the requests arrive. Since nothing else
// ever touches the writer, two records can't interleave and we don't need a lock around it.
// We keep track of how many bytes hold complete records, so a failed append can be undone.
struct TimingSink<W> {
    log: W,
    // Length of the log up to the end of the last complete record.
    committed: u64,
    recorded: u64,
    // Set when a partial record could not be removed. From then on we refuse to append
    // anything else, as it would extend the torn line into a bogus sample.
    poisoned: bool,
}

impl<W: ResultsLog> TimingSink<W> {
    fn start(log: W, committed: u64) -> TimingSinkHandle {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let sink = Self {
            log,
            committed,
            recorded: 0,
            poisoned: false,
        };
        tokio::spawn(sink.listen(event_rx));
        tracing::debug!("TimingSink started");
        TimingSinkHandle { event_tx }
    }

    async fn listen(mut self, mut event_rx: mpsc::Receiver<Event>) {
        let mut close_reply = None;
        while let Some(event) = event_rx.recv().await {
            match event {
                Event::Record(sample, reply) => {
                    let result = self.append(sample).await;
                    // The session may be gone by now (abandoned tiers). The outcome of the
                    // append doesn't depend on anybody listening, so we ignore the error.
                    let _ = reply.send(result);
                }
                Event::Close(reply) => {
                    tracing::debug!("Waiting for queued timing samples to drain");
                    // Closing the receiver stops new requests but still yields the buffered
                    // ones, so the loop ends once every queued record has been appended.
                    event_rx.close();
                    close_reply = Some(reply);
                }
            }
        }
        if let Err(err) = self.log.shutdown().await {
            tracing::warn!("Failed to close results log: {}", err);
        }
        tracing::debug!("TimingSink closed after {} records", self.recorded);
        if let Some(reply) = close_reply {
            let _ = reply.send(self.recorded);
        }
    }

    async fn append(&mut self, sample: TimingSample) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "results log ends with a partial record and is no longer appended to",
            ));
        }
        let record = format!("{}\n", sample.millis());
        let written = match self.log.write_all(record.as_bytes()).await {
            Ok(()) => self.log.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            // Part of the record may already be in the log. Cut it back to the last complete
            // record before reporting the failure.
            if let Err(rollback) = self.log.truncate_to(self.committed).await {
                tracing::error!("Failed to remove partial timing record: {}", rollback);
                self.poisoned = true;
            }
            return Err(err);
        }
        self.committed += record.len() as u64;
        self.recorded += 1;
        Ok(())
    }
}

#[derive(Debug)]
enum Event {
    Record(TimingSample, oneshot::Sender<io::Result<()>>),
    Close(oneshot::Sender<u64>),
}

// This is what sessions hold on to. Every session gets its own clone, and all of them feed
// the same writer task through one channel. Each record carries a oneshot so the session
// learns whether its own line made it into the log, not just that it was queued.
#[derive(Debug, Clone)]
pub struct TimingSinkHandle {
    event_tx: mpsc::Sender<Event>,
}

impl TimingSinkHandle {
    /// Opens `path` for appending, creating it if needed, and starts the writer.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        let len = file.metadata().await?.len();
        tracing::info!("Appending timing samples to {}", path.as_ref().display());
        Ok(Self::from_log(file, len))
    }

    // `len` is the current length of the log; nothing before it is ever truncated.
    pub fn from_log<W: ResultsLog>(log: W, len: u64) -> Self {
        TimingSink::start(log, len)
    }

    pub async fn record(&self, sample: TimingSample) -> Result<(), LoadError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .event_tx
            .send(Event::Record(sample, reply_tx))
            .await
            .is_err()
        {
            return Err(closed(sample));
        }
        match reply_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(LoadError::SinkWrite { sample, source }),
            Err(_) => Err(closed(sample)),
        }
    }

    // After this every `record` fails. The ones already queued are still appended, and we get
    // back the number of records this sink wrote.
    pub async fn close(&self) -> anyhow::Result<u64> {
        tracing::debug!("Sending Close signal to TimingSink");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.event_tx.send(Event::Close(reply_tx)).await?;
        Ok(reply_rx.await?)
    }
}

fn closed(sample: TimingSample) -> LoadError {
    LoadError::SinkWrite {
        sample,
        source: io::Error::new(io::ErrorKind::BrokenPipe, "timing sink is closed"),
    }
}
