use crate::subnet::TrustedSubnet;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use metrika_common::settings::{parse_bool, parse_interval, IntervalValue};
use metrika_storage::StorageOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags. Environment variables override these, and a config
/// file overrides both.
#[derive(Debug, Clone, Parser)]
#[command(name = "metrika-server", version, about = "Receives and stores metrics pushed by metrika agents")]
pub struct Cli {
    /// Listen address (host:port)
    #[arg(short = 'a', long, default_value = "localhost:8080")]
    pub address: String,

    /// Shared key for the HashSHA256 integrity header
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// Checkpoint interval, 0 writes after every update
    #[arg(short = 'i', long = "store-interval", default_value = "300", value_parser = parse_interval)]
    pub store_interval: Duration,

    /// Checkpoint file, empty disables checkpointing
    #[arg(short = 'f', long = "file-storage-path", default_value = "/tmp/metrics-db.json")]
    pub file_storage_path: String,

    /// Restore metrics from the checkpoint file on start
    #[arg(short = 'r', long, default_value_t = true, action = ArgAction::Set)]
    pub restore: bool,

    /// Relational database connection string
    #[arg(short = 'd', long = "database-dsn")]
    pub database_dsn: Option<String>,

    /// Only accept requests from this CIDR
    #[arg(short = 't', long = "trusted-subnet")]
    pub trusted_subnet: Option<String>,

    /// Path to a TOML config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub key: Option<String>,
    pub store_interval: Option<IntervalValue>,
    pub file_storage_path: Option<String>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub trusted_subnet: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub key: Option<String>,
    pub store_interval: Duration,
    pub file_storage_path: String,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub trusted_subnet: Option<TrustedSubnet>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            key: None,
            store_interval: Duration::from_secs(300),
            file_storage_path: "/tmp/metrics-db.json".to_string(),
            restore: true,
            database_dsn: None,
            trusted_subnet: None,
        }
    }
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        Self::resolve(Cli::parse(), |name| std::env::var(name).ok())
    }

    /// Layers `cli`, then variables from `env`, then the config file named
    /// by `CONFIG` or `-c`.
    pub fn resolve<E>(cli: Cli, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut address = cli.address;
        let mut key = cli.key;
        let mut store_interval = cli.store_interval;
        let mut file_storage_path = cli.file_storage_path;
        let mut restore = cli.restore;
        let mut database_dsn = cli.database_dsn;
        let mut trusted_subnet = cli.trusted_subnet;

        if let Some(value) = env("ADDRESS") {
            address = value;
        }
        if let Some(value) = env("KEY") {
            key = Some(value);
        }
        if let Some(raw) = env("STORE_INTERVAL") {
            store_interval = parse_interval(&raw)
                .map_err(anyhow::Error::msg)
                .context("STORE_INTERVAL")?;
        }
        if let Some(value) = env("FILE_STORAGE_PATH") {
            file_storage_path = value;
        }
        if let Some(raw) = env("RESTORE") {
            restore = parse_bool(&raw)
                .map_err(anyhow::Error::msg)
                .context("RESTORE")?;
        }
        if let Some(value) = env("DATABASE_DSN") {
            database_dsn = Some(value);
        }
        if let Some(value) = env("TRUSTED_SUBNET") {
            trusted_subnet = Some(value);
        }

        let config_path = env("CONFIG").map(PathBuf::from).or(cli.config);
        if let Some(path) = config_path {
            let file = FileConfig::load(&path)?;
            if let Some(value) = file.address {
                address = value;
            }
            if let Some(value) = file.key {
                key = Some(value);
            }
            if let Some(value) = file.store_interval {
                store_interval = value
                    .to_duration()
                    .map_err(anyhow::Error::msg)
                    .context("store_interval")?;
            }
            if let Some(value) = file.file_storage_path {
                file_storage_path = value;
            }
            if let Some(value) = file.restore {
                restore = value;
            }
            if let Some(value) = file.database_dsn {
                database_dsn = Some(value);
            }
            if let Some(value) = file.trusted_subnet {
                trusted_subnet = Some(value);
            }
        }

        let trusted_subnet = match trusted_subnet.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(cidr) => Some(
                cidr.parse::<TrustedSubnet>()
                    .map_err(anyhow::Error::msg)
                    .context("trusted subnet")?,
            ),
        };

        if address.trim().is_empty() {
            anyhow::bail!("listen address must not be empty");
        }

        Ok(Self {
            address,
            key: key.filter(|k| !k.is_empty()),
            store_interval,
            file_storage_path,
            restore,
            database_dsn: database_dsn.filter(|d| !d.trim().is_empty()),
            trusted_subnet,
        })
    }

    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            database_dsn: self.database_dsn.clone(),
            file_storage_path: self.file_storage_path.clone(),
            store_interval: self.store_interval,
            restore: self.restore,
        }
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
        let mut argv = vec!["metrika-server"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::resolve(cli(&[]), env_of(&[])).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert_eq!(config.file_storage_path, "/tmp/metrics-db.json");
        assert!(config.restore);
        assert!(config.key.is_none());
        assert!(config.database_dsn.is_none());
        assert!(config.trusted_subnet.is_none());
    }

    #[test]
    fn restore_flag_takes_a_value() {
        let config = ServerConfig::resolve(cli(&["-r", "false", "-i", "0"]), env_of(&[])).unwrap();
        assert!(!config.restore);
        assert!(config.store_interval.is_zero());
    }

    #[test]
    fn env_overrides_flags() {
        let config = ServerConfig::resolve(
            cli(&["-a", ":9000", "-f", "/tmp/flag.json"]),
            env_of(&[
                ("ADDRESS", "0.0.0.0:9100"),
                ("RESTORE", "false"),
                ("STORE_INTERVAL", "10s"),
                ("TRUSTED_SUBNET", "10.0.0.0/8"),
                ("DATABASE_DSN", "sqlite::memory:"),
            ]),
        )
        .unwrap();
        assert_eq!(config.address, "0.0.0.0:9100");
        assert_eq!(config.file_storage_path, "/tmp/flag.json");
        assert!(!config.restore);
        assert_eq!(config.store_interval, Duration::from_secs(10));
        assert_eq!(config.trusted_subnet.map(|s| s.to_string()).as_deref(), Some("10.0.0.0/8"));
        assert_eq!(config.storage_options().database_dsn.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn config_file_overrides_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "address = \"127.0.0.1:7000\"\nstore_interval = 5\nrestore = true\nkey = \"from-file\"\n",
        )
        .unwrap();
        let path_str = path.to_string_lossy().to_string();
        let config = ServerConfig::resolve(
            cli(&[]),
            env_of(&[
                ("ADDRESS", "env:1"),
                ("RESTORE", "false"),
                ("CONFIG", path_str.as_str()),
            ]),
        )
        .unwrap();
        assert_eq!(config.address, "127.0.0.1:7000");
        assert_eq!(config.store_interval, Duration::from_secs(5));
        assert!(config.restore);
        assert_eq!(config.key.as_deref(), Some("from-file"));
    }

    #[test]
    fn empty_values_disable_features() {
        let config = ServerConfig::resolve(
            cli(&["-k", "", "-t", "", "-d", "  "]),
            env_of(&[]),
        )
        .unwrap();
        assert!(config.key.is_none());
        assert!(config.trusted_subnet.is_none());
        assert!(config.database_dsn.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ServerConfig::resolve(cli(&["-t", "10.0.0.0"]), env_of(&[])).is_err());
        assert!(ServerConfig::resolve(cli(&[]), env_of(&[("RESTORE", "maybe")])).is_err());
        assert!(ServerConfig::resolve(cli(&[]), env_of(&[("STORE_INTERVAL", "often")])).is_err());
    }
}
