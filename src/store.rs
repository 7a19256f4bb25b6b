// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persistence seam of the engine.
//!
//! [`LedgerStore`] is the contract the indexer, monitor and service layers
//! write against; [`MemoryStore`] is the in-process reference implementation.
//! Each trait method is atomic with respect to the others.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::types::{
    normalize_address, EventKind, FundEventRecord, FundToken, TransactionRecord, TxStatus,
};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_fund(&self, fund: FundToken) -> LedgerResult<()>;
    async fn find_fund(&self, address: &str, chain_id: u64) -> LedgerResult<Option<FundToken>>;

    /// Inserts a new transaction row. The hash is the primary key; a
    /// duplicate insert is a storage error.
    async fn insert_transaction(&self, tx: TransactionRecord) -> LedgerResult<()>;
    async fn find_transaction(&self, hash: &str) -> LedgerResult<Option<TransactionRecord>>;

    /// Moves a transaction to `status` with the given retry count. Records
    /// already in a terminal state are left untouched.
    async fn update_transaction_status(
        &self,
        hash: &str,
        status: TxStatus,
        retry_count: u32,
    ) -> LedgerResult<()>;

    /// Marks the transaction `Success` and records its settled amount.
    /// Returns whether a row was updated; a missing row is not an error,
    /// since events also arrive for transactions submitted elsewhere.
    async fn confirm_transaction(&self, hash: &str, amount: &str) -> LedgerResult<bool>;

    async fn pending_transactions(&self) -> LedgerResult<Vec<TransactionRecord>>;

    /// Transactions of one investor, newest first.
    async fn transaction_history(
        &self,
        investor: &str,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<Vec<TransactionRecord>>;

    async fn event_exists(&self, kind: EventKind, tx_hash: &str) -> LedgerResult<bool>;

    /// Persists an event record. Keyed on `(kind, tx_hash)`; an existing
    /// record is kept and the insert is a no-op.
    async fn insert_event(&self, record: FundEventRecord) -> LedgerResult<()>;
}

#[derive(Default)]
struct StoreInner {
    funds: Vec<FundToken>,
    transactions: HashMap<String, TransactionRecord>,
    events: HashMap<(EventKind, String), FundEventRecord>,
}

pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_fund(&self, fund: FundToken) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        let fund = FundToken {
            address: normalize_address(&fund.address),
            chain_id: fund.chain_id,
        };
        if !inner.funds.contains(&fund) {
            inner.funds.push(fund);
        }
        Ok(())
    }

    async fn find_fund(&self, address: &str, chain_id: u64) -> LedgerResult<Option<FundToken>> {
        let address = normalize_address(address);
        let inner = self.inner.read().await;
        Ok(inner
            .funds
            .iter()
            .find(|f| f.address == address && f.chain_id == chain_id)
            .cloned())
    }

    async fn insert_transaction(&self, tx: TransactionRecord) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        if inner.transactions.contains_key(&tx.hash) {
            return Err(LedgerError::Storage(format!(
                "duplicate transaction hash {}",
                tx.hash
            )));
        }
        inner.transactions.insert(tx.hash.clone(), tx);
        Ok(())
    }

    async fn find_transaction(&self, hash: &str) -> LedgerResult<Option<TransactionRecord>> {
        Ok(self.inner.read().await.transactions.get(hash).cloned())
    }

    async fn update_transaction_status(
        &self,
        hash: &str,
        status: TxStatus,
        retry_count: u32,
    ) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        match inner.transactions.get_mut(hash) {
            Some(tx) if tx.status.is_terminal() => {
                debug!(hash, current = tx.status.as_str(), "transaction already settled");
            }
            Some(tx) => {
                tx.status = status;
                tx.retry_count = retry_count;
            }
            None => {
                return Err(LedgerError::Storage(format!(
                    "no transaction row for hash {hash}"
                )))
            }
        }
        Ok(())
    }

    async fn confirm_transaction(&self, hash: &str, amount: &str) -> LedgerResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.transactions.get_mut(hash) {
            Some(tx) if tx.status.is_terminal() => Ok(false),
            Some(tx) => {
                tx.status = TxStatus::Success;
                tx.amount = amount.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pending_transactions(&self) -> LedgerResult<Vec<TransactionRecord>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<_> = inner
            .transactions
            .values()
            .filter(|tx| tx.status == TxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|tx| tx.created_at_ms);
        Ok(pending)
    }

    async fn transaction_history(
        &self,
        investor: &str,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        let investor = normalize_address(investor);
        let inner = self.inner.read().await;
        let mut history: Vec<_> = inner
            .transactions
            .values()
            .filter(|tx| tx.investor == investor)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms).then(a.hash.cmp(&b.hash)));
        Ok(history.into_iter().skip(offset).take(limit).collect())
    }

    async fn event_exists(&self, kind: EventKind, tx_hash: &str) -> LedgerResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.events.contains_key(&(kind, tx_hash.to_string())))
    }

    async fn insert_event(&self, record: FundEventRecord) -> LedgerResult<()> {
        let mut inner = self.inner.write().await;
        let key = (record.kind(), record.tx_hash.clone());
        inner.events.entry(key).or_insert(record);
        Ok(())
    }
}
