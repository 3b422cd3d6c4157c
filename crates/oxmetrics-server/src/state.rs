use crate::config::ServerConfig;
use crate::ingest::MetricsController;
use anyhow::{Context, Result};
use ipnet::IpNet;
use oxmetrics_common::cipher::Decryptor;
use oxmetrics_common::hashing::Hasher;
use oxmetrics_storage::memory::MetricStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub controller: MetricsController,
    pub hasher: Hasher,
    pub decryptor: Option<Arc<Decryptor>>,
    pub trusted_subnet: Option<IpNet>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Builds the request-facing state around an existing store. Fails if the
    /// configured private key cannot be loaded.
    pub fn new(config: ServerConfig, store: Arc<MetricStore>) -> Result<Self> {
        let decryptor = match &config.crypto_key {
            Some(path) => {
                let decryptor = Decryptor::load(path)
                    .with_context(|| format!("Failed to load private key '{}'", path.display()))?;
                Some(Arc::new(decryptor))
            }
            None => None,
        };
        Ok(Self {
            controller: MetricsController::new(store),
            hasher: Hasher::new(config.key.as_deref().unwrap_or_default()),
            decryptor,
            trusted_subnet: config.trusted_subnet,
            config: Arc::new(config),
        })
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        self.controller.store()
    }
}
