use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::connector::TcpConnector;
use crate::driver::Driver;
use crate::sink::TimingSinkHandle;
use crate::tier::TierRunner;

mod config;
mod connector;
mod driver;
mod error;
mod protocol;
mod session;
mod sink;
#[cfg(test)]
mod testing;
mod tier;

const CONFIG_FILE: &str = "config.toml";

fn main() -> anyhow::Result<()> {
    let config = Config::new(CONFIG_FILE).context("Error loading config")?;
    tracing_subscriber::fmt()
        .with_max_level(config.log_level()?)
        .init();

    // Every session is its own task; the worker threads are what let a tier's
    // sessions actually run in parallel rather than just interleave.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("Error building runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let sink = TimingSinkHandle::open(&config.results_file)
        .await
        .with_context(|| format!("Error opening results file {}", config.results_file))?;
    let connector = TcpConnector::new(&config.host, config.port);
    tracing::info!(
        "Load testing chat server at {} with tiers {:?}",
        connector.addr(),
        config.tiers
    );

    let runner = TierRunner::new(Arc::new(connector), sink.clone(), config.tier_params());
    let driver = Driver::new(runner, config.tiers.clone(), driver::interrupt_on_ctrl_c());
    let reports = driver.run().await;

    // Sessions abandoned by the last tier may still be recording; whatever they
    // queued before this point is drained, anything later is dropped.
    let recorded = sink.close().await?;
    let failed: usize = reports.iter().map(|report| report.failed).sum();
    let abandoned: usize = reports.iter().map(|report| report.abandoned()).sum();
    tracing::info!(
        "Load test finished: {} tiers, {} samples written to {}, {} failed sessions, {} abandoned",
        reports.len(),
        recorded,
        config.results_file,
        failed,
        abandoned
    );
    Ok(())
}
