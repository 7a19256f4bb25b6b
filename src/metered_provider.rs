// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP JSON-RPC transport instrumented with per-method metrics.

use std::fmt::Debug;
use std::sync::Arc;

use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::metrics::LedgerMetrics;

#[derive(Debug, Clone)]
pub struct MeteredHttpProvider {
    inner: Http,
    metrics: Arc<LedgerMetrics>,
}

impl MeteredHttpProvider {
    pub fn new(url: Url, metrics: Arc<LedgerMetrics>) -> Self {
        Self {
            inner: Http::new(url),
            metrics,
        }
    }
}

#[async_trait::async_trait]
impl JsonRpcClient for MeteredHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, Self::Error> {
        self.metrics.rpc_queries.with_label_values(&[method]).inc();
        let timer = self
            .metrics
            .rpc_queries_latency
            .with_label_values(&[method])
            .start_timer();
        let result = self.inner.request(method, params).await;
        timer.observe_duration();
        match &result {
            Ok(_) => self.metrics.rpc_endpoint_connected.set(1),
            Err(_) => self.metrics.rpc_endpoint_connected.set(0),
        }
        result
    }
}

pub fn new_metered_provider(
    rpc_url: &str,
    metrics: Arc<LedgerMetrics>,
) -> Result<Provider<MeteredHttpProvider>, url::ParseError> {
    let url = rpc_url.parse::<Url>()?;
    Ok(Provider::new(MeteredHttpProvider::new(url, metrics)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        let metrics = Arc::new(LedgerMetrics::new_for_testing());
        assert!(new_metered_provider("not a url", metrics).is_err());
    }

    #[test]
    fn accepts_http_url() {
        let metrics = Arc::new(LedgerMetrics::new_for_testing());
        assert!(new_metered_provider("http://localhost:8545", metrics).is_ok());
    }
}
