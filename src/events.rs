// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decoding of fund contract logs into typed events.
//!
//! Three events are recognized, dispatched on topic 0:
//!
//! - `Investment(address indexed investor, uint256 usdAmount, uint256 sharesIssued, uint256 sharePrice)`
//! - `Redemption(address indexed investor, uint256 shares, uint256 usdAmount, uint256 sharePrice)`
//! - `MetricsUpdated(uint256 totalAssetValue, uint256 sharesSupply, uint256 sharePrice)`
//!
//! Unknown topics are not an error; a malformed payload under a known topic
//! is logged and skipped so one bad log cannot stall a scan cycle.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::types::EventKind;

pub static INVESTMENT_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("Investment(address,uint256,uint256,uint256)")));
pub static REDEMPTION_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("Redemption(address,uint256,uint256,uint256)")));
pub static METRICS_UPDATED_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("MetricsUpdated(uint256,uint256,uint256)")));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundEvent {
    Investment {
        investor: String,
        usd_amount: U256,
        shares_issued: U256,
        share_price: U256,
    },
    Redemption {
        investor: String,
        shares: U256,
        usd_amount: U256,
        share_price: U256,
    },
    MetricsUpdated {
        total_asset_value: U256,
        shares_supply: U256,
        share_price: U256,
    },
}

impl FundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FundEvent::Investment { .. } => EventKind::Investment,
            FundEvent::Redemption { .. } => EventKind::Redemption,
            FundEvent::MetricsUpdated { .. } => EventKind::MetricsUpdated,
        }
    }

    /// The settled USD amount for flow events. `MetricsUpdated` carries none.
    pub fn usd_amount(&self) -> Option<U256> {
        match self {
            FundEvent::Investment { usd_amount, .. } | FundEvent::Redemption { usd_amount, .. } => {
                Some(*usd_amount)
            }
            FundEvent::MetricsUpdated { .. } => None,
        }
    }
}

/// Decodes a raw log into a [`FundEvent`].
///
/// Returns `None` both for foreign topics and for recognized topics whose
/// payload fails to decode; the latter is surfaced at warn level.
pub fn decode_fund_event(log: &Log) -> Option<FundEvent> {
    let topic0 = log.topics.first()?;
    let decoded = if *topic0 == *INVESTMENT_TOPIC {
        decode_investment(log)
    } else if *topic0 == *REDEMPTION_TOPIC {
        decode_redemption(log)
    } else if *topic0 == *METRICS_UPDATED_TOPIC {
        decode_metrics_updated(log)
    } else {
        return None;
    };
    match decoded {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                tx_hash = ?log.transaction_hash,
                topic = ?topic0,
                error = %e,
                "skipping undecodable fund event"
            );
            None
        }
    }
}

fn decode_investment(log: &Log) -> LedgerResult<FundEvent> {
    let investor = indexed_address(log, 1)?;
    let words = decode_uint_words(log, 3)?;
    Ok(FundEvent::Investment {
        investor,
        usd_amount: words[0],
        shares_issued: words[1],
        share_price: words[2],
    })
}

fn decode_redemption(log: &Log) -> LedgerResult<FundEvent> {
    let investor = indexed_address(log, 1)?;
    let words = decode_uint_words(log, 3)?;
    Ok(FundEvent::Redemption {
        investor,
        shares: words[0],
        usd_amount: words[1],
        share_price: words[2],
    })
}

fn decode_metrics_updated(log: &Log) -> LedgerResult<FundEvent> {
    let words = decode_uint_words(log, 3)?;
    Ok(FundEvent::MetricsUpdated {
        total_asset_value: words[0],
        shares_supply: words[1],
        share_price: words[2],
    })
}

/// Extracts an address stored right-aligned in the given indexed topic,
/// rendered in lowercase hex.
fn indexed_address(log: &Log, index: usize) -> LedgerResult<String> {
    let topic = log.topics.get(index).ok_or_else(|| {
        LedgerError::Serialization(format!("missing indexed topic {index}"))
    })?;
    let address = Address::from_slice(&topic.as_bytes()[12..]);
    Ok(format!("{address:?}"))
}

fn decode_uint_words(log: &Log, count: usize) -> LedgerResult<Vec<U256>> {
    let params = vec![ParamType::Uint(256); count];
    let tokens = abi::decode(&params, &log.data)
        .map_err(|e| LedgerError::Serialization(format!("event data decode failed: {e}")))?;
    tokens
        .into_iter()
        .map(|t| match t {
            Token::Uint(u) => Ok(u),
            other => Err(LedgerError::Serialization(format!(
                "expected uint word, got {other:?}"
            ))),
        })
        .collect()
}
