use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::connector::Connector;
use crate::tier::{TierReport, TierRunner};

/// Two Ctrl-C presses closer together than this abort the whole run.
const ABORT_WINDOW: Duration = Duration::from_secs(1);

/// Walks the configured tiers in order, one full tier at a time.
pub struct Driver<C: Connector> {
    runner: TierRunner<C>,
    tiers: Vec<usize>,
    interrupt_rx: mpsc::Receiver<()>,
}

impl<C: Connector> Driver<C> {
    pub fn new(
        runner: TierRunner<C>,
        tiers: Vec<usize>,
        interrupt_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            runner,
            tiers,
            interrupt_rx,
        }
    }

    pub async fn run(mut self) -> Vec<TierReport> {
        let mut reports = Vec::with_capacity(self.tiers.len());
        for &tier_size in &self.tiers {
            tracing::info!(tier_size, "Testing with {} clients...", tier_size);
            let report = self.runner.run(tier_size, &mut self.interrupt_rx).await;
            reports.push(report);
        }
        reports
    }
}

// We listen for Ctrl-C in the background and hand each press to the tier runner, which stops
// waiting on the current tier. The channel only holds one press; more presses during the same
// wait mean nothing extra. If the user presses again within the abort window we assume they
// want out and exit the whole process.
pub fn interrupt_on_ctrl_c() -> mpsc::Receiver<()> {
    let (interrupt_tx, interrupt_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut last_press: Option<Instant> = None;
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                // Without the handler we simply never interrupt a tier.
                tracing::debug!("{}", err);
                break;
            }
            if last_press.is_some_and(|at| at.elapsed() < ABORT_WINDOW) {
                tracing::warn!("Interrupted twice, aborting load test");
                std::process::exit(130);
            }
            last_press = Some(Instant::now());
            tracing::info!("Interrupt received, skipping the rest of this tier");
            if interrupt_tx.try_send(()).is_err() && interrupt_tx.is_closed() {
                break;
            }
        }
    });
    interrupt_rx
}
