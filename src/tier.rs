use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use crate::connector::Connector;
use crate::error::LoadError;
use crate::session::{Session, SessionReport};
use crate::sink::TimingSinkHandle;

// Settings shared by every session of every tier. `wait_bound` is how long we wait for a
// tier's sessions before moving on without them.
#[derive(Debug, Clone, Copy)]
pub struct TierParams {
    pub messages_per_client: usize,
    pub message_delay: Duration,
    pub wait_bound: Duration,
}

/// Runs one concurrency level at a time against the chat server.
pub struct TierRunner<C: Connector> {
    connector: Arc<C>,
    sink: TimingSinkHandle,
    params: TierParams,
}

impl<C: Connector> TierRunner<C> {
    pub fn new(connector: Arc<C>, sink: TimingSinkHandle, params: TierParams) -> Self {
        Self {
            connector,
            sink,
            params,
        }
    }

    pub async fn run(
        &self,
        tier_size: usize,
        interrupt_rx: &mut mpsc::Receiver<()>,
    ) -> TierReport {
        // A press that arrived after the previous tier stopped waiting is still sitting in the
        // channel. It was meant for that tier, so we throw it away before starting this one.
        while interrupt_rx.try_recv().is_ok() {}

        // We start the whole tier at once: every client id gets its own task right away, so
        // the tracker holds exactly `tier_size` sessions and nothing queues behind anything
        // else. Each task adds its session's outcome to the shared tally when it ends.
        let tally = Arc::new(Tally::default());
        let tracker = TaskTracker::new();
        let mut spawned = 0;
        for client_id in 0..tier_size {
            let session = Session::new(
                client_id,
                self.connector.clone(),
                self.sink.clone(),
                self.params,
            );
            let tally = tally.clone();
            tracker.spawn(async move {
                let report = session.run().await;
                tally.add(&report);
            });
            spawned += 1;
        }
        tracker.close();
        tracing::debug!(tier_size, "All sessions started");

        // Now we wait for the sessions to finish, but never longer than the wait bound, and a
        // Ctrl-C cuts the wait short as well. Whatever is still running after that is abandoned, not cancelled. The tasks
        // keep going on their own and may still record samples while the next tier runs. If
        // the interrupt sender is gone, `recv` yields `None` and that branch is disabled, so
        // we just wait on the other two.
        let outcome = tokio::select! {
            _ = tracker.wait() => WaitOutcome::Completed,
            _ = tokio::time::sleep(self.params.wait_bound) => WaitOutcome::TimedOut,
            Some(()) = interrupt_rx.recv() => WaitOutcome::Interrupted,
        };

        let report = tally.report(tier_size, spawned, outcome);
        match outcome {
            WaitOutcome::Completed => {}
            WaitOutcome::TimedOut => tracing::warn!(
                tier_size,
                "Gave up waiting after {:?}, abandoning {} sessions",
                self.params.wait_bound,
                report.abandoned()
            ),
            WaitOutcome::Interrupted => {
                let err = LoadError::WaitInterrupted {
                    tier_size,
                    outstanding: report.abandoned(),
                };
                tracing::warn!(tier_size, "{}", err);
            }
        }
        tracing::info!(tier_size, "{}", report);
        report
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Interrupted,
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed out",
            Self::Interrupted => "interrupted",
        })
    }
}

#[derive(Debug, Default)]
struct Tally {
    finished: AtomicUsize,
    failed: AtomicUsize,
    samples: AtomicUsize,
}

impl Tally {
    fn add(&self, report: &SessionReport) {
        tracing::debug!(
            client_id = report.client_id,
            messages = report.messages_sent,
            logged_out = report.logged_out,
            "Session ended"
        );
        self.samples
            .fetch_add(report.samples_recorded, Ordering::Relaxed);
        if report.error.is_some() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.finished.fetch_add(1, Ordering::Release);
    }

    fn report(&self, tier_size: usize, spawned: usize, outcome: WaitOutcome) -> TierReport {
        let finished = self.finished.load(Ordering::Acquire);
        TierReport {
            tier_size,
            spawned,
            finished,
            failed: self.failed.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            outcome,
        }
    }
}

// A snapshot of a tier taken the moment we stopped waiting. Sessions that finish later are
// not counted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierReport {
    pub tier_size: usize,
    pub spawned: usize,
    pub finished: usize,
    pub failed: usize,
    pub samples: usize,
    pub outcome: WaitOutcome,
}

impl TierReport {
    pub fn abandoned(&self) -> usize {
        self.spawned.saturating_sub(self.finished)
    }
}

impl fmt::Display for TierReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tier of {} clients {}: {} sessions finished ({} failed), {} abandoned, {} samples recorded",
            self.tier_size,
            self.outcome,
            self.finished,
            self.failed,
            self.abandoned(),
            self.samples
        )
    }
}
