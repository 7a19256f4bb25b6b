// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core record types shared by the indexer, monitor and service layers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::events::FundEvent;

pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;
pub const POLYGON_AMOY_CHAIN_ID: u64 = 80002;

/// Lifecycle state of a submitted transaction. `Success` and `Failed` are
/// terminal; the store refuses to move a record out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Success | TxStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Invest,
    Redeem,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Invest => "invest",
            TxKind::Redeem => "redeem",
        }
    }
}

/// A transaction submitted through the publication pipeline, tracked until
/// the monitor or the indexer settles it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub investor: String,
    pub fund_address: String,
    pub chain_id: u64,
    pub kind: TxKind,
    pub status: TxStatus,
    pub retry_count: u32,
    /// Settled USD amount as a decimal string in base units. Stays `"0"`
    /// until the indexer confirms the transaction from its emitted event.
    pub amount: String,
    pub created_at_ms: u64,
}

impl TransactionRecord {
    pub fn new_pending(
        hash: impl Into<String>,
        investor: &str,
        fund_address: &str,
        chain_id: u64,
        kind: TxKind,
    ) -> Self {
        Self {
            hash: hash.into(),
            investor: normalize_address(investor),
            fund_address: normalize_address(fund_address),
            chain_id,
            kind,
            status: TxStatus::Pending,
            retry_count: 0,
            amount: "0".to_string(),
            created_at_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Investment,
    Redemption,
    MetricsUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Investment => "investment",
            EventKind::Redemption => "redemption",
            EventKind::MetricsUpdated => "metrics-updated",
        }
    }
}

/// A decoded fund event as persisted by the indexer. Uniqueness is keyed on
/// `(kind, tx_hash)` so re-scanned ranges cannot double-insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundEventRecord {
    pub tx_hash: String,
    pub fund_address: String,
    pub chain_id: u64,
    pub event: FundEvent,
}

impl FundEventRecord {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// A fund contract the engine is serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundToken {
    pub address: String,
    pub chain_id: u64,
}

/// Aggregate fund figures, kept as decimal strings so arbitrary uint256
/// values survive JSON round-trips unclipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundMetrics {
    pub total_asset_value: String,
    pub shares_supply: String,
    pub share_price: String,
}

/// Cache payload for fund metrics, stamped with the write time so consumers
/// can judge staleness themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMetrics {
    #[serde(flatten)]
    pub metrics: FundMetrics,
    #[serde(rename = "updatedAt")]
    pub updated_at: u64,
}

/// Addresses are compared and stored in lowercase hex form.
pub fn normalize_address(addr: &str) -> String {
    addr.trim().to_ascii_lowercase()
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
