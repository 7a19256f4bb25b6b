// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node assembly: builds the shared components from configuration and spawns
//! the background loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use prometheus::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{KvCache, MemoryKv};
use crate::config::LedgerNodeConfig;
use crate::indexer::{IndexerConfig, LogIndexer};
use crate::metered_provider::MeteredHttpProvider;
use crate::metrics::LedgerMetrics;
use crate::monitor::{MonitorConfig, ReceiptErrorPolicy, TxMonitor};
use crate::provider::ProviderRegistry;
use crate::rpc::RetryPolicy;
use crate::service::LedgerService;
use crate::store::{LedgerStore, MemoryStore};
use crate::types::FundToken;

pub struct LedgerNode {
    pub service: Arc<LedgerService<MeteredHttpProvider>>,
    pub prometheus_registry: Registry,
    pub cancel: CancellationToken,
    pub handles: Vec<JoinHandle<()>>,
}

impl LedgerNode {
    /// Cancels the background loops and waits for them to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

pub async fn start_ledger_node(config: LedgerNodeConfig) -> Result<LedgerNode> {
    let prometheus_registry = Registry::new();
    let metrics = Arc::new(LedgerMetrics::new(&prometheus_registry));
    let registry = Arc::new(ProviderRegistry::from_config(&config.chains, metrics.clone())?);

    let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
    for fund in &config.funds {
        store
            .insert_fund(FundToken {
                address: fund.address.clone(),
                chain_id: fund.chain_id,
            })
            .await?;
    }
    let kv: Arc<dyn KvCache> = Arc::new(MemoryKv::new());

    let retry = RetryPolicy::new(
        config.retry.max_retries,
        Duration::from_millis(config.retry.base_delay_ms),
    );
    let service = Arc::new(LedgerService::new(
        registry.clone(),
        store.clone(),
        kv.clone(),
        metrics.clone(),
        retry.clone(),
    ));

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    // The indexer tracks a single fund contract on a single chain; the
    // monitor covers pending transactions on every configured chain.
    if let Some(fund) = config.funds.first() {
        let fund_address = fund
            .address
            .parse()
            .map_err(|e| anyhow!("invalid fund address {}: {e}", fund.address))?;
        let mut indexer_config = IndexerConfig::new(fund_address, fund.chain_id);
        indexer_config.interval = Duration::from_secs(config.indexer.interval_secs);
        indexer_config.lookback_blocks = config.indexer.lookback_blocks;
        indexer_config.cursor_key = config.indexer.cursor_key.clone();
        indexer_config.retry = retry.clone();

        let indexer = LogIndexer::new(
            registry.client_for(fund.chain_id)?,
            store.clone(),
            kv.clone(),
            metrics.clone(),
            indexer_config,
        );
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            indexer.run(token).await;
        }));
    } else {
        info!("no fund configured, indexer not started");
    }

    let monitor_config = MonitorConfig {
        interval: Duration::from_secs(config.monitor.interval_secs),
        max_retries: config.monitor.max_retries,
        receipt_error_policy: if config.monitor.fail_on_rpc_error {
            ReceiptErrorPolicy::MarkFailed
        } else {
            ReceiptErrorPolicy::KeepPending
        },
        retry,
    };
    let monitor = TxMonitor::new(registry, store, metrics, monitor_config);
    let token = cancel.clone();
    handles.push(tokio::spawn(async move {
        monitor.run(token).await;
    }));

    info!(
        chains = config.chains.len(),
        funds = config.funds.len(),
        "ledger node started"
    );
    Ok(LedgerNode {
        service,
        prometheus_registry,
        cancel,
        handles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainConfig, FundConfig};

    fn test_config() -> LedgerNodeConfig {
        LedgerNodeConfig {
            chains: vec![
                ChainConfig {
                    rpc_url: "http://localhost:8545".into(),
                    chain_id: 84532,
                },
                ChainConfig {
                    rpc_url: "http://localhost:8546".into(),
                    chain_id: 80002,
                },
            ],
            funds: vec![FundConfig {
                address: "0xcDF53d6fbd1d92FB623765D863eDB1604D77E636".into(),
                chain_id: 84532,
            }],
            indexer: Default::default(),
            monitor: Default::default(),
            retry: Default::default(),
        }
    }

    #[tokio::test]
    async fn starts_and_shuts_down_cleanly() {
        let node = start_ledger_node(test_config()).await.unwrap();
        assert_eq!(node.handles.len(), 2);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_bad_fund_address() {
        let mut config = test_config();
        config.funds[0].address = "not-an-address".into();
        assert!(start_ledger_node(config).await.is_err());
    }
}
