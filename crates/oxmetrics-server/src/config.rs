use anyhow::{Context, Result};
use clap::Parser;
use ipnet::IpNet;
use oxmetrics_common::duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags. All of them are optional so that the JSON file and
/// the built-in defaults can fill whatever is not given.
#[derive(Debug, Default, Parser)]
#[command(name = "oxmetrics-server", version, about = "Metrics ingest server")]
pub struct ServerArgs {
    /// HTTP listen address
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// gRPC listen address; the gRPC listener is off when unset
    #[arg(short = 'g', long)]
    pub grpc_address: Option<String>,

    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Snapshot interval in seconds (or "5m"); 1s or less snapshots on every write
    #[arg(short = 'i', long, value_parser = duration::parse)]
    pub store_interval: Option<Duration>,

    /// Snapshot file; an empty value disables the file persister
    #[arg(short = 'f', long)]
    pub file_storage_path: Option<String>,

    /// Restore the store from the persister on boot
    #[arg(short = 'r', long, num_args = 0..=1, default_missing_value = "true")]
    pub restore: Option<bool>,

    /// Database DSN; takes precedence over the snapshot file
    #[arg(short = 'd', long)]
    pub database_dsn: Option<String>,

    /// HMAC key shared with the agents
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// PEM private key for payload decryption
    #[arg(long)]
    pub crypto_key: Option<PathBuf>,

    /// CIDR the X-Real-IP header must fall into
    #[arg(short = 't', long)]
    pub trusted_subnet: Option<IpNet>,

    /// JSON config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub grpc_address: Option<String>,
    pub log_level: String,
    #[serde(deserialize_with = "duration::deserialize")]
    pub store_interval: Duration,
    #[serde(alias = "store_file")]
    pub file_storage_path: Option<PathBuf>,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<IpNet>,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_file_storage_path() -> PathBuf {
    PathBuf::from("/tmp/metrics-db.json")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: None,
            log_level: default_log_level(),
            store_interval: default_store_interval(),
            file_storage_path: Some(default_file_storage_path()),
            restore: true,
            database_dsn: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
        }
    }
}

impl ServerConfig {
    /// Resolves the configuration from the process environment.
    ///
    /// Precedence: environment > flags > JSON file > defaults.
    pub fn load(args: ServerArgs) -> Result<Self> {
        Self::load_with(args, |name| std::env::var(name).ok())
    }

    /// Same as [`ServerConfig::load`] with an injectable environment.
    pub fn load_with(args: ServerArgs, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |name: &str| env(name).filter(|v| !v.is_empty());

        let file = env("CONFIG").map(PathBuf::from).or(args.config.clone());
        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.apply_env(env)?;
        config.normalize();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    /// Snapshots run after every write instead of on a ticker.
    pub fn sync_snapshots(&self) -> bool {
        self.store_interval <= Duration::from_secs(1)
    }

    fn apply_args(&mut self, args: ServerArgs) {
        if let Some(v) = args.address {
            self.address = v;
        }
        if let Some(v) = args.grpc_address {
            self.grpc_address = Some(v);
        }
        if let Some(v) = args.log_level {
            self.log_level = v;
        }
        if let Some(v) = args.store_interval {
            self.store_interval = v;
        }
        if let Some(v) = args.file_storage_path {
            self.file_storage_path = Some(PathBuf::from(v));
        }
        if let Some(v) = args.restore {
            self.restore = v;
        }
        if let Some(v) = args.database_dsn {
            self.database_dsn = Some(v);
        }
        if let Some(v) = args.key {
            self.key = Some(v);
        }
        if let Some(v) = args.crypto_key {
            self.crypto_key = Some(v);
        }
        if let Some(v) = args.trusted_subnet {
            self.trusted_subnet = Some(v);
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("ADDRESS") {
            self.address = v;
        }
        if let Some(v) = env("GRPC_ADDRESS") {
            self.grpc_address = Some(v);
        }
        if let Some(v) = env("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = env("STORE_INTERVAL") {
            self.store_interval = duration::parse(&v)
                .map_err(|e| anyhow::anyhow!("STORE_INTERVAL: {e}"))?;
        }
        if let Some(v) = env("FILE_STORAGE_PATH") {
            self.file_storage_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("RESTORE") {
            self.restore = v
                .parse()
                .with_context(|| format!("RESTORE: expected true or false, got {v:?}"))?;
        }
        if let Some(v) = env("DATABASE_DSN") {
            self.database_dsn = Some(v);
        }
        if let Some(v) = env("KEY") {
            self.key = Some(v);
        }
        if let Some(v) = env("CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TRUSTED_SUBNET") {
            self.trusted_subnet = Some(
                v.parse()
                    .with_context(|| format!("TRUSTED_SUBNET: invalid CIDR {v:?}"))?,
            );
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.grpc_address = self.grpc_address.take().filter(|v| !v.is_empty());
        self.file_storage_path = self
            .file_storage_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        self.database_dsn = self.database_dsn.take().filter(|v| !v.is_empty());
        self.key = self.key.take().filter(|v| !v.is_empty());
        self.crypto_key = self.crypto_key.take().filter(|p| !p.as_os_str().is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::load_with(ServerArgs::default(), no_env).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert_eq!(
            config.file_storage_path.as_deref(),
            Some(Path::new("/tmp/metrics-db.json"))
        );
        assert!(config.restore);
        assert!(!config.sync_snapshots());
        assert!(config.grpc_address.is_none());
    }

    #[test]
    fn flags_parse() {
        let args = ServerArgs::try_parse_from([
            "oxmetrics-server",
            "-a",
            "0.0.0.0:9000",
            "-i",
            "0",
            "-r",
            "false",
            "-t",
            "10.0.0.0/24",
            "--crypto-key",
            "/keys/private.pem",
        ])
        .unwrap();
        let config = ServerConfig::load_with(args, no_env).unwrap();
        assert_eq!(config.address, "0.0.0.0:9000");
        assert!(config.sync_snapshots());
        assert!(!config.restore);
        assert_eq!(config.trusted_subnet, Some("10.0.0.0/24".parse().unwrap()));
        assert_eq!(config.crypto_key, Some(PathBuf::from("/keys/private.pem")));
    }

    #[test]
    fn env_beats_flag_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server.json");
        std::fs::write(
            &file,
            r#"{"address":"file:1","store_interval":"5m","store_file":"/file/path","key":"from-file"}"#,
        )
        .unwrap();

        let args = ServerArgs::try_parse_from([
            "oxmetrics-server",
            "-c",
            file.to_str().unwrap(),
            "-a",
            "flag:2",
            "-k",
            "from-flag",
        ])
        .unwrap();
        let env: HashMap<&str, &str> = [("ADDRESS", "env:3"), ("FILE_STORAGE_PATH", "")].into();
        let config =
            ServerConfig::load_with(args, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.address, "env:3");
        assert_eq!(config.key.as_deref(), Some("from-flag"));
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert_eq!(config.file_storage_path, Some(PathBuf::from("/file/path")));
    }

    #[test]
    fn bad_env_values_are_fatal() {
        let err = ServerConfig::load_with(ServerArgs::default(), |k| {
            (k == "TRUSTED_SUBNET").then(|| "not-a-cidr".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("TRUSTED_SUBNET"));
    }

    #[test]
    fn empty_file_path_disables_persistence() {
        let args = ServerArgs::try_parse_from(["oxmetrics-server", "-f", ""]).unwrap();
        let config = ServerConfig::load_with(args, no_env).unwrap();
        assert!(config.file_storage_path.is_none());
    }
}
