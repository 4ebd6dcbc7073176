use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use config::{Config as CConfig, Environment, Map, Source};

use crate::tier::TierParams;

/// Environment variables with this prefix override the config file, e.g.
/// `CHATLOAD_TIERS=10,20,30` or `CHATLOAD_PORT=4000`.
const ENV_PREFIX: &str = "CHATLOAD";

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub host: String,
    pub port: u16,
    /// Concurrency levels to test, strictly ascending.
    pub tiers: Vec<usize>,
    pub messages_per_client: usize,
    pub message_delay_ms: u64,
    pub tier_wait_secs: u64,
    pub results_file: String,
    pub worker_threads: usize,
}

impl Config {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        Self::load(config::File::with_name(path).required(false), None)
    }

    // `env` replaces the process environment when set.
    fn load<S>(file: S, env: Option<Map<String, String>>) -> anyhow::Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let env = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("tiers")
            .source(env);
        let config: Self = CConfig::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.log_level()?;
        if self.host.is_empty() {
            bail!("host must not be empty");
        }
        if self.tiers.is_empty() {
            bail!("at least one tier is required");
        }
        if self.tiers[0] == 0 {
            bail!("tier sizes must be greater than zero");
        }
        if let Some(pair) = self.tiers.windows(2).find(|pair| pair[0] >= pair[1]) {
            bail!("tiers must be strictly ascending, found {} before {}", pair[0], pair[1]);
        }
        if self.messages_per_client == 0 {
            bail!("messages_per_client must be greater than zero");
        }
        if self.worker_threads == 0 {
            bail!("worker_threads must be greater than zero");
        }
        Ok(())
    }

    pub fn log_level(&self) -> anyhow::Result<tracing::Level> {
        self.log_level
            .parse()
            .map_err(|_| anyhow!("Unknown log level {:?}", self.log_level))
    }

    pub fn tier_params(&self) -> TierParams {
        TierParams {
            messages_per_client: self.messages_per_client,
            message_delay: Duration::from_millis(self.message_delay_ms),
            wait_bound: Duration::from_secs(self.tier_wait_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "localhost".to_string(),
            port: 1500,
            tiers: (100..=1000).step_by(100).collect(),
            messages_per_client: 10,
            message_delay_ms: 100,
            tier_wait_secs: 60,
            results_file: "latencies.log".to_string(),
            worker_threads: num_cpus::get(),
        }
    }
}
