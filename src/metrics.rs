// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry,
};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1., 2.5, 5., 10., 20., 30., 60., 90.,
];

#[derive(Clone, Debug)]
pub struct LedgerMetrics {
    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) rpc_endpoint_connected: IntGauge,

    pub(crate) last_synced_block: IntGauge,
    pub(crate) indexer_events_decoded: IntCounter,
    pub(crate) indexer_events_skipped: IntCounter,
    pub(crate) indexer_duplicate_events: IntCounter,
    pub(crate) indexer_log_failures: IntCounter,

    pub(crate) monitor_tx_confirmed: IntCounter,
    pub(crate) monitor_tx_failed: IntCounter,
    pub(crate) tx_submitted: IntCounter,

    pub(crate) cache_hits: IntCounterVec,
    pub(crate) cache_misses: IntCounterVec,
}

impl LedgerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            rpc_queries: register_int_counter_vec_with_registry!(
                "ledger_rpc_queries",
                "Total number of RPC queries per method",
                &["method"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "ledger_rpc_queries_latency",
                "Latency of RPC queries per method",
                &["method"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_endpoint_connected: register_int_gauge_with_registry!(
                "ledger_rpc_endpoint_connected",
                "Whether the last RPC request to the endpoint succeeded",
                registry,
            )
            .unwrap(),
            last_synced_block: register_int_gauge_with_registry!(
                "ledger_last_synced_block",
                "Last block fully processed by the log indexer",
                registry,
            )
            .unwrap(),
            indexer_events_decoded: register_int_counter_with_registry!(
                "ledger_indexer_events_decoded",
                "Total number of fund events decoded from logs",
                registry,
            )
            .unwrap(),
            indexer_events_skipped: register_int_counter_with_registry!(
                "ledger_indexer_events_skipped",
                "Total number of logs skipped as foreign or undecodable",
                registry,
            )
            .unwrap(),
            indexer_duplicate_events: register_int_counter_with_registry!(
                "ledger_indexer_duplicate_events",
                "Total number of already-persisted events seen again",
                registry,
            )
            .unwrap(),
            indexer_log_failures: register_int_counter_with_registry!(
                "ledger_indexer_log_failures",
                "Total number of logs whose handling failed",
                registry,
            )
            .unwrap(),
            monitor_tx_confirmed: register_int_counter_with_registry!(
                "ledger_monitor_tx_confirmed",
                "Total number of transactions confirmed by receipt",
                registry,
            )
            .unwrap(),
            monitor_tx_failed: register_int_counter_with_registry!(
                "ledger_monitor_tx_failed",
                "Total number of transactions marked failed by the monitor",
                registry,
            )
            .unwrap(),
            tx_submitted: register_int_counter_with_registry!(
                "ledger_tx_submitted",
                "Total number of signed transactions published",
                registry,
            )
            .unwrap(),
            cache_hits: register_int_counter_vec_with_registry!(
                "ledger_cache_hits",
                "Total number of read-through cache hits",
                &["cache"],
                registry,
            )
            .unwrap(),
            cache_misses: register_int_counter_vec_with_registry!(
                "ledger_cache_misses",
                "Total number of read-through cache misses",
                &["cache"],
                registry,
            )
            .unwrap(),
        }
    }

    #[cfg(test)]
    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}
