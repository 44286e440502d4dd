//! Coordinator Configuration
//!
//! Read from environment variables with defaults. `--bind <addr:port>` on the command line
//! overrides `COORDINATOR_BIND`.

use crate::search::orchestrator::OrchestratorSettings;
use crate::workers::client::ClientSettings;
use anyhow::{Context, Result, bail};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind_addr: SocketAddr,
    pub photos_directory: PathBuf,
    pub workers_file: PathBuf,
    pub assignments_file: PathBuf,

    pub health_interval: Duration,
    pub scheduler_interval: Duration,
    pub probe_timeout: Duration,
    pub call_timeout: Duration,
    pub upload_timeout: Duration,
    pub retry_attempts: usize,
    /// `None` when in-flight shards never expire.
    pub result_deadline: Option<Duration>,
    pub settle_delay: Duration,
    pub stats_interval: Duration,
    pub log_level: tracing::Level,

    pub load_assignments: bool,
    pub load_directories: bool,
    pub check_distribution: bool,
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; missing keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            bind_addr: parse_or(&get, "COORDINATOR_BIND", "0.0.0.0:9010".parse()?)?,
            photos_directory: get("PHOTOS_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("images/")),
            workers_file: get("SERVERS_INFO_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("server.db")),
            assignments_file: get("DISTRIBUTOR_DB_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("distrib.db")),

            health_interval: Duration::from_secs(parse_or(&get, "SERVER_CHECKER_TIMEOUT", 60u64)?.max(1)),
            scheduler_interval: Duration::from_millis(parse_or(&get, "SCHEDULER_INTERVAL_MS", 100u64)?.max(1)),
            probe_timeout: Duration::from_millis(parse_or(&get, "PROBE_TIMEOUT_MS", 2000u64)?),
            call_timeout: Duration::from_millis(parse_or(&get, "REMOTE_CALL_TIMEOUT_MS", 10_000u64)?),
            upload_timeout: Duration::from_millis(parse_or(&get, "UPLOAD_TIMEOUT_MS", 60_000u64)?),
            retry_attempts: parse_or(&get, "REMOTE_RETRY_ATTEMPTS", 3usize)?,
            result_deadline: match parse_or(&get, "RESULT_DEADLINE_SECS", 3600u64)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            settle_delay: Duration::from_millis(parse_or(&get, "REDISTRIBUTION_SETTLE_MS", 0u64)?),
            stats_interval: Duration::from_secs(parse_or(&get, "STATS_INTERVAL_SECS", 30u64)?.max(1)),
            log_level: parse_or(&get, "LOG_LEVEL", tracing::Level::INFO)?,

            load_assignments: parse_flag(&get, "LOAD_ASSIGNMENTS", true)?,
            load_directories: parse_flag(&get, "LOAD_DIRECTORIES", true)?,
            check_distribution: parse_flag(&get, "CHECK_DISTRIBUTION", true)?,
        })
    }

    /// Applies `--bind <addr:port>` from the command line.
    pub fn apply_args(&mut self, args: &[String]) -> Result<()> {
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--bind" => {
                    let Some(value) = args.get(i + 1) else {
                        bail!("--bind needs an <addr:port> value");
                    };
                    self.bind_addr = value
                        .parse()
                        .with_context(|| format!("invalid --bind address {:?}", value))?;
                    i += 2;
                }
                _ => {
                    i += 1;
                }
            }
        }
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            probe_timeout: self.probe_timeout,
            call_timeout: self.call_timeout,
            upload_timeout: self.upload_timeout,
            attempts: self.retry_attempts,
        }
    }

    /// Scheduler deadlines cover the client's whole retry budget, so they only cut
    /// off calls the client itself would keep retrying.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let client = self.client_settings();
        OrchestratorSettings {
            tick_interval: self.scheduler_interval,
            call_deadline: client.retry_budget(self.call_timeout),
            upload_deadline: client.retry_budget(self.upload_timeout),
            result_deadline: self.result_deadline,
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid {}={:?}: expected a boolean", key, other),
    }
}
