use anyhow::{Context, Result};
use clap::Parser;
use oxmetrics_common::duration;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags, all optional so the JSON file and defaults can fill
/// the gaps.
#[derive(Debug, Default, Parser)]
#[command(name = "oxmetrics-agent", version, about = "Metrics reporting agent")]
pub struct AgentArgs {
    /// Server HTTP address
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Server gRPC address; reports go over gRPC when set
    #[arg(short = 'g', long)]
    pub grpc_address: Option<String>,

    /// Poll interval in seconds (or "2s")
    #[arg(short = 'p', long, value_parser = duration::parse)]
    pub poll_interval: Option<Duration>,

    /// Report interval in seconds (or "10s")
    #[arg(short = 'r', long, value_parser = duration::parse)]
    pub report_interval: Option<Duration>,

    /// Number of concurrent report workers
    #[arg(short = 'l', long)]
    pub rate_limit: Option<usize>,

    /// HMAC key shared with the server
    #[arg(short = 'k', long)]
    pub key: Option<String>,

    /// PEM certificate or public key for payload encryption
    #[arg(long)]
    pub crypto_key: Option<PathBuf>,

    /// Address sent in X-Real-IP; discovered from the route to the server
    /// when unset
    #[arg(short = 't', long)]
    pub real_ip: Option<IpAddr>,

    #[arg(long)]
    pub log_level: Option<String>,

    /// JSON config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub address: String,
    pub grpc_address: Option<String>,
    #[serde(deserialize_with = "duration::deserialize")]
    pub poll_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub report_interval: Duration,
    pub rate_limit: usize,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub real_ip: Option<IpAddr>,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            grpc_address: None,
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            rate_limit: 1,
            key: None,
            crypto_key: None,
            real_ip: None,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Precedence: environment > flags > JSON file > defaults.
    pub fn load(args: AgentArgs) -> Result<Self> {
        Self::load_with(args, |name| std::env::var(name).ok())
    }

    pub fn load_with(args: AgentArgs, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |name: &str| env(name).filter(|v| !v.is_empty());

        let file = env("CONFIG").map(PathBuf::from).or(args.config.clone());
        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.apply_env(env)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    fn apply_args(&mut self, args: AgentArgs) {
        if let Some(v) = args.address {
            self.address = v;
        }
        if let Some(v) = args.grpc_address {
            self.grpc_address = Some(v);
        }
        if let Some(v) = args.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = args.report_interval {
            self.report_interval = v;
        }
        if let Some(v) = args.rate_limit {
            self.rate_limit = v;
        }
        if let Some(v) = args.key {
            self.key = Some(v);
        }
        if let Some(v) = args.crypto_key {
            self.crypto_key = Some(v);
        }
        if let Some(v) = args.real_ip {
            self.real_ip = Some(v);
        }
        if let Some(v) = args.log_level {
            self.log_level = v;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("ADDRESS") {
            self.address = v;
        }
        if let Some(v) = env("GRPC_ADDRESS") {
            self.grpc_address = Some(v);
        }
        if let Some(v) = env("POLL_INTERVAL") {
            self.poll_interval =
                duration::parse(&v).map_err(|e| anyhow::anyhow!("POLL_INTERVAL: {e}"))?;
        }
        if let Some(v) = env("REPORT_INTERVAL") {
            self.report_interval =
                duration::parse(&v).map_err(|e| anyhow::anyhow!("REPORT_INTERVAL: {e}"))?;
        }
        if let Some(v) = env("RATE_LIMIT") {
            self.rate_limit = v
                .parse()
                .with_context(|| format!("RATE_LIMIT: expected a count, got {v:?}"))?;
        }
        if let Some(v) = env("KEY") {
            self.key = Some(v);
        }
        if let Some(v) = env("CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(v));
        }
        if let Some(v) = env("REAL_IP") {
            self.real_ip = Some(
                v.parse()
                    .with_context(|| format!("REAL_IP: invalid address {v:?}"))?,
            );
        }
        if let Some(v) = env("LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.grpc_address = self.grpc_address.take().filter(|v| !v.is_empty());
        self.key = self.key.take().filter(|v| !v.is_empty());
        self.crypto_key = self.crypto_key.take().filter(|p| !p.as_os_str().is_empty());
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.rate_limit >= 1, "rate limit must be at least 1");
        anyhow::ensure!(!self.poll_interval.is_zero(), "poll interval must be positive");
        anyhow::ensure!(!self.report_interval.is_zero(), "report interval must be positive");
        Ok(())
    }

    /// The address reports are sent to and the route used for IP discovery.
    pub fn target(&self) -> &str {
        self.grpc_address.as_deref().unwrap_or(&self.address)
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
        let config = AgentConfig::load_with(AgentArgs::default(), no_env).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.rate_limit, 1);
        assert_eq!(config.target(), "localhost:8080");
    }

    #[test]
    fn flags_parse() {
        let args = AgentArgs::try_parse_from([
            "oxmetrics-agent",
            "-a",
            "10.0.0.1:8080",
            "-p",
            "1",
            "-r",
            "5s",
            "-l",
            "4",
            "-t",
            "10.0.0.7",
            "-g",
            "10.0.0.1:3200",
        ])
        .unwrap();
        let config = AgentConfig::load_with(args, no_env).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.report_interval, Duration::from_secs(5));
        assert_eq!(config.rate_limit, 4);
        assert_eq!(config.real_ip, Some("10.0.0.7".parse().unwrap()));
        assert_eq!(config.target(), "10.0.0.1:3200");
    }

    #[test]
    fn env_beats_flag_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("agent.json");
        std::fs::write(
            &file,
            r#"{"address":"file:1","report_interval":"1m","poll_interval":3,"key":"from-file"}"#,
        )
        .unwrap();

        let args = AgentArgs::try_parse_from([
            "oxmetrics-agent",
            "-c",
            file.to_str().unwrap(),
            "-p",
            "7",
        ])
        .unwrap();
        let env: HashMap<&str, &str> = [("ADDRESS", "env:3"), ("RATE_LIMIT", "2"), ("KEY", "")].into();
        let config =
            AgentConfig::load_with(args, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.address, "env:3");
        assert_eq!(config.poll_interval, Duration::from_secs(7));
        assert_eq!(config.report_interval, Duration::from_secs(60));
        assert_eq!(config.rate_limit, 2);
        assert_eq!(config.key.as_deref(), Some("from-file"));
    }

    #[test]
    fn zero_workers_is_fatal() {
        let args = AgentArgs::try_parse_from(["oxmetrics-agent", "-l", "0"]).unwrap();
        assert!(AgentConfig::load_with(args, no_env).is_err());
    }
}
