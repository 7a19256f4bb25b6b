// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ledger synchronization engine for an on-chain investment fund.
//!
//! The engine keeps a local read model (balances, fund metrics, transaction
//! status) consistent with chain state despite unreliable RPC endpoints,
//! re-delivered logs and partial failures. It is built from four pieces:
//!
//! - [`rpc`]: failure classification and bounded retry around every outbound
//!   chain call.
//! - [`cache`]: a TTL-backed read-through cache shielding the chain from
//!   redundant balance/metrics queries.
//! - [`indexer`]: incremental log scanning, event decoding and idempotent
//!   persistence driven by a sync cursor.
//! - [`monitor`]: receipt polling that evolves submitted transactions through
//!   a retry-bounded state machine.
//!
//! The HTTP surface, persistent storage technology and wallet custody are
//! external collaborators; they interact with the engine through the
//! [`service::LedgerService`] operations and the [`store::LedgerStore`] /
//! [`cache::KvCache`] traits.

pub mod cache;
pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod indexer;
pub mod metered_provider;
pub mod metrics;
pub mod monitor;
pub mod node;
pub mod provider;
pub mod rpc;
pub mod service;
pub mod store;
pub mod types;
