// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction lifecycle monitor.
//!
//! Polls receipts for every pending transaction on an interval. A missing
//! receipt bumps the retry count until the bound gives the transaction up as
//! `Failed`; a present receipt settles it by its status field. What happens
//! when the receipt fetch itself keeps failing is an explicit policy choice,
//! see [`ReceiptErrorPolicy`].

use std::sync::Arc;
use std::time::Duration;

use ethers::providers::JsonRpcClient;
use ethers::types::{H256, U64};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::metrics::LedgerMetrics;
use crate::provider::ProviderRegistry;
use crate::rpc::{call_with_resilience, RetryPolicy};
use crate::store::LedgerStore;
use crate::types::{TransactionRecord, TxStatus};

pub const DEFAULT_MAX_RECEIPT_RETRIES: u32 = 10;
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Policy for a transaction whose receipt fetch failed even after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiptErrorPolicy {
    /// Mark the transaction `Failed` right away. Decisive, but an endpoint
    /// outage can fail transactions that later confirm on chain.
    #[default]
    MarkFailed,
    /// Leave the transaction `Pending` and let a later cycle retry it; the
    /// retry bound still applies through the missing-receipt path.
    KeepPending,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub max_retries: u32,
    pub receipt_error_policy: ReceiptErrorPolicy,
    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_MONITOR_INTERVAL,
            max_retries: DEFAULT_MAX_RECEIPT_RETRIES,
            receipt_error_policy: ReceiptErrorPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct TxMonitor<P> {
    registry: Arc<ProviderRegistry<P>>,
    store: Arc<dyn LedgerStore>,
    metrics: Arc<LedgerMetrics>,
    config: MonitorConfig,
}

impl<P: JsonRpcClient + 'static> TxMonitor<P> {
    pub fn new(
        registry: Arc<ProviderRegistry<P>>,
        store: Arc<dyn LedgerStore>,
        metrics: Arc<LedgerMetrics>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            metrics,
            config,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("starting transaction monitor");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("transaction monitor cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "monitor cycle failed");
                    }
                }
            }
        }
    }

    /// One pass over all pending transactions. A failure on one transaction
    /// never blocks the rest of the batch.
    pub async fn run_cycle(&self) -> LedgerResult<()> {
        let pending = self.store.pending_transactions().await?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "checking pending transactions");
        for tx in &pending {
            if let Err(e) = self.check_transaction(tx).await {
                error!(hash = %tx.hash, error = %e, "failed to check transaction");
            }
        }
        Ok(())
    }

    async fn check_transaction(&self, tx: &TransactionRecord) -> LedgerResult<()> {
        let client = self.registry.client_for(tx.chain_id)?;
        let hash: H256 = tx
            .hash
            .parse()
            .map_err(|_| LedgerError::validation("hash", format!("malformed hash {}", tx.hash)))?;

        let receipt =
            call_with_resilience(&self.config.retry, || client.get_transaction_receipt(hash)).await;

        match receipt {
            Ok(Some(receipt)) => {
                let status = if receipt.status == Some(U64::one()) {
                    TxStatus::Success
                } else {
                    TxStatus::Failed
                };
                self.store
                    .update_transaction_status(&tx.hash, status, tx.retry_count)
                    .await?;
                match status {
                    TxStatus::Success => {
                        self.metrics.monitor_tx_confirmed.inc();
                        info!(hash = %tx.hash, "transaction confirmed");
                    }
                    _ => {
                        self.metrics.monitor_tx_failed.inc();
                        warn!(hash = %tx.hash, "transaction reverted on chain");
                    }
                }
            }
            Ok(None) => {
                let retry_count = tx.retry_count + 1;
                if retry_count >= self.config.max_retries {
                    self.store
                        .update_transaction_status(&tx.hash, TxStatus::Failed, retry_count)
                        .await?;
                    self.metrics.monitor_tx_failed.inc();
                    warn!(
                        hash = %tx.hash,
                        retry_count,
                        "giving up on transaction without receipt"
                    );
                } else {
                    self.store
                        .update_transaction_status(&tx.hash, TxStatus::Pending, retry_count)
                        .await?;
                    debug!(hash = %tx.hash, retry_count, "receipt not yet available");
                }
            }
            Err(e) => {
                error!(hash = %tx.hash, error = %e, "receipt fetch failed");
                match self.config.receipt_error_policy {
                    ReceiptErrorPolicy::MarkFailed => {
                        self.store
                            .update_transaction_status(&tx.hash, TxStatus::Failed, tx.retry_count)
                            .await?;
                        self.metrics.monitor_tx_failed.inc();
                    }
                    ReceiptErrorPolicy::KeepPending => {
                        debug!(hash = %tx.hash, "keeping transaction pending after rpc failure");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EvmClient;
    use crate::store::MemoryStore;
    use crate::types::{TxKind, BASE_SEPOLIA_CHAIN_ID};
    use ethers::providers::{MockProvider, Provider};
    use ethers::types::TransactionReceipt;

    const FUND: &str = "0xcdf53d6fbd1d92fb623765d863edb1604d77e636";
    const ALICE: &str = "0x00000000000000000000000000000000000000a1";
    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    struct Harness {
        monitor: TxMonitor<MockProvider>,
        mock: MockProvider,
        store: Arc<MemoryStore>,
    }

    fn harness(policy: ReceiptErrorPolicy) -> Harness {
        let (provider, mock) = Provider::mocked();
        let registry = Arc::new(
            ProviderRegistry::new()
                .with_client(EvmClient::from_provider(provider, BASE_SEPOLIA_CHAIN_ID)),
        );
        let store = Arc::new(MemoryStore::new());
        let config = MonitorConfig {
            interval: Duration::from_secs(60),
            max_retries: DEFAULT_MAX_RECEIPT_RETRIES,
            receipt_error_policy: policy,
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        };
        let monitor = TxMonitor::new(registry, store.clone(), Arc::new(LedgerMetrics::new_for_testing()), config);
        Harness {
            monitor,
            mock,
            store,
        }
    }

    async fn seed_pending(store: &MemoryStore, retry_count: u32) {
        let mut tx =
            TransactionRecord::new_pending(HASH, ALICE, FUND, BASE_SEPOLIA_CHAIN_ID, TxKind::Invest);
        tx.retry_count = retry_count;
        store.insert_transaction(tx).await.unwrap();
    }

    fn receipt(status: u64) -> TransactionReceipt {
        TransactionReceipt {
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_receipt_confirms() {
        let h = harness(ReceiptErrorPolicy::MarkFailed);
        seed_pending(&h.store, 0).await;
        h.mock.push(receipt(1)).unwrap();
        h.monitor.run_cycle().await.unwrap();
        let tx = h.store.find_transaction(HASH).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Success);
    }

    #[tokio::test]
    async fn reverted_receipt_fails() {
        let h = harness(ReceiptErrorPolicy::MarkFailed);
        seed_pending(&h.store, 0).await;
        h.mock.push(receipt(0)).unwrap();
        h.monitor.run_cycle().await.unwrap();
        let tx = h.store.find_transaction(HASH).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn missing_receipt_bumps_retry_count() {
        let h = harness(ReceiptErrorPolicy::MarkFailed);
        seed_pending(&h.store, 0).await;
        h.mock.push(serde_json::Value::Null).unwrap();
        h.monitor.run_cycle().await.unwrap();
        let tx = h.store.find_transaction(HASH).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.retry_count, 1);
    }

    #[tokio::test]
    async fn retry_bound_gives_up() {
        let h = harness(ReceiptErrorPolicy::MarkFailed);
        seed_pending(&h.store, DEFAULT_MAX_RECEIPT_RETRIES - 1).await;
        h.mock.push(serde_json::Value::Null).unwrap();
        h.monitor.run_cycle().await.unwrap();
        let tx = h.store.find_transaction(HASH).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(tx.retry_count, DEFAULT_MAX_RECEIPT_RETRIES);
    }

    #[tokio::test]
    async fn rpc_failure_marks_failed_by_default() {
        let h = harness(ReceiptErrorPolicy::MarkFailed);
        seed_pending(&h.store, 2).await;
        // No queued response: the receipt fetch errors out.
        h.monitor.run_cycle().await.unwrap();
        let tx = h.store.find_transaction(HASH).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(tx.retry_count, 2);
    }

    #[tokio::test]
    async fn rpc_failure_can_keep_pending() {
        let h = harness(ReceiptErrorPolicy::KeepPending);
        seed_pending(&h.store, 2).await;
        h.monitor.run_cycle().await.unwrap();
        let tx = h.store.find_transaction(HASH).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.retry_count, 2);
    }

    #[tokio::test]
    async fn settled_transactions_are_not_polled() {
        let h = harness(ReceiptErrorPolicy::MarkFailed);
        seed_pending(&h.store, 0).await;
        h.store.confirm_transaction(HASH, "100").await.unwrap();
        // No mock responses queued; a poll attempt would fail the cycle's
        // transaction and flip it, so reaching Success proves no poll ran.
        h.monitor.run_cycle().await.unwrap();
        let tx = h.store.find_transaction(HASH).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Success);
    }
}
