// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Incremental log indexer.
//!
//! Each cycle resolves a block range from the stored cursor (or a bounded
//! lookback on first run), fetches the fund contract's logs, decodes and
//! persists the recognized events, then advances the cursor. The cursor is
//! written only after the whole range has been handled, so a crashed cycle
//! re-scans its range and relies on event dedup for idempotency.

use std::sync::Arc;
use std::time::Duration;

use ethers::providers::JsonRpcClient;
use ethers::types::{Address, Log};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{metrics_cache_key, KvCache, INDEXER_CURSOR_KEY};
use crate::error::{LedgerError, LedgerResult};
use crate::events::{decode_fund_event, FundEvent};
use crate::metrics::LedgerMetrics;
use crate::provider::EvmClient;
use crate::rpc::{call_with_resilience, RetryPolicy};
use crate::store::LedgerStore;
use crate::types::{now_ms, CachedMetrics, FundEventRecord, FundMetrics};

pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 5000;
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub fund_address: Address,
    pub chain_id: u64,
    pub lookback_blocks: u64,
    pub interval: Duration,
    pub cursor_key: String,
    pub retry: RetryPolicy,
}

impl IndexerConfig {
    pub fn new(fund_address: Address, chain_id: u64) -> Self {
        Self {
            fund_address,
            chain_id,
            lookback_blocks: DEFAULT_LOOKBACK_BLOCKS,
            interval: DEFAULT_SCAN_INTERVAL,
            cursor_key: INDEXER_CURSOR_KEY.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct LogIndexer<P> {
    client: Arc<EvmClient<P>>,
    store: Arc<dyn LedgerStore>,
    kv: Arc<dyn KvCache>,
    metrics: Arc<LedgerMetrics>,
    config: IndexerConfig,
}

impl<P: JsonRpcClient + 'static> LogIndexer<P> {
    pub fn new(
        client: Arc<EvmClient<P>>,
        store: Arc<dyn LedgerStore>,
        kv: Arc<dyn KvCache>,
        metrics: Arc<LedgerMetrics>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            client,
            store,
            kv,
            metrics,
            config,
        }
    }

    /// Runs scan cycles on the configured interval until cancelled. A failed
    /// cycle leaves the cursor untouched and the next tick retries the range.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            fund = ?self.config.fund_address,
            chain_id = self.config.chain_id,
            "starting log indexer"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("log indexer cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, error_type = e.error_type(), "indexer cycle failed");
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> LedgerResult<()> {
        let head = call_with_resilience(&self.config.retry, || self.client.get_block_number()).await?;
        let cursor = self
            .kv
            .get(&self.config.cursor_key)
            .await?
            .and_then(|raw| raw.parse::<u64>().ok());
        let from_block = match cursor {
            Some(last) => last,
            None => head.saturating_sub(self.config.lookback_blocks),
        };
        if head < from_block {
            // Stale or load-balanced endpoint answering behind the cursor.
            // Never move the cursor backwards; just wait for the head to
            // catch up.
            warn!(head, from_block, "chain head behind cursor, skipping cycle");
            return Ok(());
        }

        let logs = call_with_resilience(&self.config.retry, || {
            self.client
                .get_logs_in_range(self.config.fund_address, from_block, head)
        })
        .await?;
        debug!(from_block, to_block = head, count = logs.len(), "fetched fund logs");

        for log in &logs {
            if let Err(e) = self.process_log(log).await {
                self.metrics.indexer_log_failures.inc();
                error!(
                    tx_hash = ?log.transaction_hash,
                    error = %e,
                    "failed to handle log"
                );
            }
        }

        self.kv
            .set(&self.config.cursor_key, &head.to_string())
            .await?;
        self.metrics.last_synced_block.set(head as i64);
        Ok(())
    }

    async fn process_log(&self, log: &Log) -> LedgerResult<()> {
        let Some(event) = decode_fund_event(log) else {
            self.metrics.indexer_events_skipped.inc();
            return Ok(());
        };
        self.metrics.indexer_events_decoded.inc();

        let tx_hash = log
            .transaction_hash
            .map(|h| format!("{h:?}"))
            .ok_or_else(|| LedgerError::Provider("log carries no transaction hash".into()))?;

        let kind = event.kind();
        if self.store.event_exists(kind, &tx_hash).await? {
            self.metrics.indexer_duplicate_events.inc();
            debug!(%tx_hash, kind = kind.as_str(), "event already persisted");
            return Ok(());
        }

        if let Some(usd_amount) = event.usd_amount() {
            let updated = self
                .store
                .confirm_transaction(&tx_hash, &usd_amount.to_string())
                .await?;
            if updated {
                info!(%tx_hash, kind = kind.as_str(), "transaction confirmed from event");
            } else {
                // Events also arrive for transactions not submitted through
                // this engine.
                debug!(%tx_hash, "no pending transaction row for event");
            }
        }

        if let FundEvent::MetricsUpdated {
            total_asset_value,
            shares_supply,
            share_price,
        } = &event
        {
            self.publish_metrics(total_asset_value.to_string(), shares_supply.to_string(), share_price.to_string())
                .await?;
        }

        self.store
            .insert_event(FundEventRecord {
                tx_hash,
                fund_address: format!("{:?}", self.config.fund_address),
                chain_id: self.config.chain_id,
                event,
            })
            .await?;
        Ok(())
    }

    /// Pushes fresh fund metrics into the cache without expiry, so reads stay
    /// served even if the chain goes quiet.
    async fn publish_metrics(
        &self,
        total_asset_value: String,
        shares_supply: String,
        share_price: String,
    ) -> LedgerResult<()> {
        let key = metrics_cache_key(&format!("{:?}", self.config.fund_address), self.config.chain_id);
        let payload = CachedMetrics {
            metrics: FundMetrics {
                total_asset_value,
                shares_supply,
                share_price,
            },
            updated_at: now_ms(),
        };
        let raw = serde_json::to_string(&payload)
            .map_err(|e| LedgerError::Serialization(format!("metrics encode failed: {e}")))?;
        self.kv.set(&key, &raw).await?;
        Ok(())
    }
}
