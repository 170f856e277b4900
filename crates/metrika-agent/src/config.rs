use anyhow::{bail, Context};
use clap::Parser;
use metrika_common::settings::{parse_bool, parse_interval, IntervalValue};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags. Environment variables override these, and a config
/// file overrides both.
#[derive(Debug, Clone, Parser)]
#[command(name = "metrika-agent", version, about = "Samples runtime metrics and pushes them to a metrika server")]
pub struct Cli {
    /// Server address (host:port)
    #[arg(short = 'a', long, default_value = "localhost:8080")]
    pub address: String,

    /// Poll interval, seconds or with a unit suffix
    #[arg(short = 'p', long = "poll-interval", default_value = "2", value_parser = parse_interval)]
    pub poll_interval: Duration,

    /// Report interval, seconds or with a unit suffix
    #[arg(short = 'r', long = "report-interval", default_value = "10", value_parser = parse_interval)]
    pub report_interval: Duration,

    /// Shared key for the HashSHA256 integrity header
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Number of concurrent send workers, 0 means one per metric
    #[arg(short = 'l', long = "rate-limit", default_value_t = 0)]
    pub rate_limit: usize,

    /// Send the whole report as one request to /updates
    #[arg(short = 'b', long)]
    pub batch: bool,

    /// Path to a TOML config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Optional overrides read from the TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub poll_interval: Option<IntervalValue>,
    pub report_interval: Option<IntervalValue>,
    pub key: Option<String>,
    pub rate_limit: Option<usize>,
    pub batch: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Resolved agent settings, built once at startup and passed to the
/// scheduler and dispatcher.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub address: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub key: Option<String>,
    pub rate_limit: usize,
    pub batch: bool,
}

impl AgentConfig {
    /// Parses process arguments and environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::resolve(Cli::parse(), |name| std::env::var(name).ok())
    }

    /// Layers `cli`, then variables from `env`, then the config file named
    /// by `CONFIG` or `-c`.
    pub fn resolve<E>(cli: Cli, env: E) -> anyhow::Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            address: cli.address,
            poll_interval: cli.poll_interval,
            report_interval: cli.report_interval,
            key: cli.key,
            rate_limit: cli.rate_limit,
            batch: cli.batch,
        };

        if let Some(address) = env("ADDRESS") {
            config.address = address;
        }
        if let Some(raw) = env("POLL_INTERVAL") {
            config.poll_interval = parse_interval(&raw)
                .map_err(anyhow::Error::msg)
                .context("POLL_INTERVAL")?;
        }
        if let Some(raw) = env("REPORT_INTERVAL") {
            config.report_interval = parse_interval(&raw)
                .map_err(anyhow::Error::msg)
                .context("REPORT_INTERVAL")?;
        }
        if let Some(key) = env("KEY") {
            config.key = Some(key);
        }
        if let Some(raw) = env("RATE_LIMIT") {
            config.rate_limit = raw.trim().parse().context("RATE_LIMIT")?;
        }
        if let Some(raw) = env("BATCH") {
            config.batch = parse_bool(&raw)
                .map_err(anyhow::Error::msg)
                .context("BATCH")?;
        }

        let config_path = env("CONFIG").map(PathBuf::from).or(cli.config);
        if let Some(path) = config_path {
            let file = FileConfig::load(&path)?;
            config.apply_file(file)?;
        }

        config.key = config.key.filter(|k| !k.is_empty());
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> anyhow::Result<()> {
        if let Some(address) = file.address {
            self.address = address;
        }
        if let Some(value) = file.poll_interval {
            self.poll_interval = value
                .to_duration()
                .map_err(anyhow::Error::msg)
                .context("poll_interval")?;
        }
        if let Some(value) = file.report_interval {
            self.report_interval = value
                .to_duration()
                .map_err(anyhow::Error::msg)
                .context("report_interval")?;
        }
        if let Some(key) = file.key {
            self.key = Some(key);
        }
        if let Some(rate_limit) = file.rate_limit {
            self.rate_limit = rate_limit;
        }
        if let Some(batch) = file.batch {
            self.batch = batch;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        if self.report_interval.is_zero() {
            bail!("report interval must be greater than zero");
        }
        if self.address.trim().is_empty() {
            bail!("server address must not be empty");
        }
        Ok(())
    }

    /// Base URL of the server, adding `http://` when no scheme is given.
    pub fn server_url(&self) -> String {
        let addr = self.address.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["metrika-agent"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn defaults() {
        let config = AgentConfig::resolve(cli(&[]), env_of(&[])).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.key, None);
        assert_eq!(config.rate_limit, 0);
        assert!(!config.batch);
        assert_eq!(config.server_url(), "http://localhost:8080");
    }

    #[test]
    fn env_overrides_flags() {
        let config = AgentConfig::resolve(
            cli(&["-a", "flag:1", "-p", "3", "-l", "2"]),
            env_of(&[("ADDRESS", "env:2"), ("RATE_LIMIT", "5"), ("KEY", "s3cret")]),
        )
        .unwrap();
        assert_eq!(config.address, "env:2");
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.rate_limit, 5);
        assert_eq!(config.key.as_deref(), Some("s3cret"));
    }

    #[test]
    fn config_file_overrides_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "address = \"file:3\"\nreport_interval = \"1m\"\npoll_interval = 1\nbatch = true\n",
        )
        .unwrap();
        let path_str = path.to_string_lossy().to_string();
        let config = AgentConfig::resolve(
            cli(&[]),
            env_of(&[("ADDRESS", "env:2"), ("CONFIG", path_str.as_str())]),
        )
        .unwrap();
        assert_eq!(config.address, "file:3");
        assert_eq!(config.report_interval, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.batch);
    }

    #[test]
    fn empty_key_disables_signing() {
        let config = AgentConfig::resolve(cli(&["-k", ""]), env_of(&[])).unwrap();
        assert_eq!(config.key, None);
    }

    #[test]
    fn rejects_zero_interval_and_bad_env() {
        assert!(AgentConfig::resolve(cli(&["-p", "0"]), env_of(&[])).is_err());
        assert!(AgentConfig::resolve(cli(&[]), env_of(&[("RATE_LIMIT", "many")])).is_err());
        assert!(AgentConfig::resolve(cli(&[]), env_of(&[("CONFIG", "/nonexistent/agent.toml")])).is_err());
    }

    #[test]
    fn explicit_scheme_is_kept() {
        let config =
            AgentConfig::resolve(cli(&["-a", "https://metrics.example:8443/"]), env_of(&[])).unwrap();
        assert_eq!(config.server_url(), "https://metrics.example:8443");
    }
}
