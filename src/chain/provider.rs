//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Read access to block height and receipts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn block_number(&self) -> CoordinatorResult<u64>;

    async fn receipt(&self, tx_hash: H256) -> CoordinatorResult<Option<TransactionReceipt>>;
}

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    config: ChainConfig,
    /// HTTP providers, tried in order on failure
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    /// Last block number seen by any call
    last_block: AtomicU64,
}

impl ChainProvider {
    pub fn new(config: ChainConfig) -> CoordinatorResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(CoordinatorError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            last_block: AtomicU64::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> CoordinatorResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => {
                    let block_num = block.as_u64();
                    self.last_block.store(block_num, Ordering::Relaxed);
                    return Ok(block_num);
                }
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(CoordinatorError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Get transaction receipt with failover. `None` while unmined.
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> CoordinatorResult<Option<TransactionReceipt>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        "Failed to get receipt {:?} from chain {}: {}",
                        tx_hash, self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(CoordinatorError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed to get receipt".to_string(),
        })
    }

    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn last_block(&self) -> u64 {
        self.last_block.load(Ordering::Relaxed)
    }

    pub fn confirmation_blocks(&self) -> u64 {
        self.config.confirmation_blocks
    }
}

#[async_trait]
impl ReceiptSource for ChainProvider {
    async fn block_number(&self) -> CoordinatorResult<u64> {
        self.get_block_number().await
    }

    async fn receipt(&self, tx_hash: H256) -> CoordinatorResult<Option<TransactionReceipt>> {
        self.get_transaction_receipt(tx_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(rpc_urls: Vec<&str>) -> ChainConfig {
        ChainConfig {
            chain_id: 1,
            name: "mainnet".to_string(),
            rpc_urls: rpc_urls.into_iter().map(str::to_string).collect(),
            confirmation_blocks: 2,
            receipt_poll_interval_ms: 2000,
            enabled: true,
        }
    }

    #[test]
    fn test_requires_a_valid_rpc_url() {
        let err = ChainProvider::new(chain(vec!["not a url"])).err().unwrap();
        assert!(matches!(err, CoordinatorError::ChainConnection { chain_id: 1, .. }));
    }

    #[test]
    fn test_failover_cycles_providers() {
        let provider =
            ChainProvider::new(chain(vec!["http://127.0.0.1:1", "http://127.0.0.1:2"])).unwrap();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);

        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        assert_eq!(provider.confirmation_blocks(), 2);
    }
}
