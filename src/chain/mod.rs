//! Chain module - resolves prerequisite transactions from on-chain receipts
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Confirmation depth tracking per chain
//! - Receipt polling that feeds terminal statuses into the ledger

pub mod confirmation;
pub mod provider;
pub mod watcher;

pub use confirmation::{ConfirmationTracker, ReceiptResolution};
pub use provider::{ChainProvider, ReceiptSource};
pub use watcher::ReceiptWatcher;

use crate::config::Settings;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::Ledger;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Manages connections to all configured chains
pub struct ChainManager {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
    /// Receipt watchers indexed by chain ID
    watchers: DashMap<u64, Arc<ReceiptWatcher>>,
    shutdown: Arc<RwLock<bool>>,
}

impl ChainManager {
    /// Create providers and watchers for all enabled chains
    pub fn new(settings: &Settings, ledger: Arc<dyn Ledger>) -> CoordinatorResult<Self> {
        let providers = DashMap::new();
        let watchers = DashMap::new();

        for (_, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                chain_config.name, chain_config.chain_id
            );

            let provider = Arc::new(ChainProvider::new(chain_config.clone())?);
            providers.insert(chain_config.chain_id, provider.clone());

            let watcher = ReceiptWatcher::new(chain_config, provider, ledger.clone());
            watchers.insert(chain_config.chain_id, Arc::new(watcher));
        }

        Ok(Self {
            providers,
            watchers,
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Run every receipt watcher until `stop` is called
    pub async fn run_watchers(&self) -> CoordinatorResult<()> {
        let mut handles = Vec::new();

        for entry in self.watchers.iter() {
            let watcher = entry.value().clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move { watcher.run(shutdown).await }));
        }

        futures::future::join_all(handles).await;
        Ok(())
    }

    pub fn get_provider(&self, chain_id: u64) -> CoordinatorResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(CoordinatorError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let mut results = Vec::new();

        for entry in self.providers.iter() {
            let chain_id = *entry.key();
            let healthy = entry.value().health_check().await;
            results.push((chain_id, healthy));

            crate::metrics::record_chain_health(chain_id, healthy);
        }

        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        self.providers.iter().map(|e| *e.key()).collect()
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Chain manager stopped");
    }
}
