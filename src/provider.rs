// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain access: a thin typed client per endpoint and a registry keyed by
//! chain id.
//!
//! [`EvmClient`] methods return raw `ProviderError`s so callers can wrap them
//! in [`crate::rpc::call_with_resilience`]; classification happens there, not
//! here.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::providers::{JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Filter, Log, TransactionReceipt, TransactionRequest, H256, U64,
};

use crate::config::ChainConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::metered_provider::{new_metered_provider, MeteredHttpProvider};
use crate::metrics::LedgerMetrics;

#[derive(Debug)]
pub struct EvmClient<P> {
    provider: Provider<P>,
    chain_id: u64,
}

impl EvmClient<MeteredHttpProvider> {
    pub fn new(rpc_url: &str, chain_id: u64, metrics: Arc<LedgerMetrics>) -> LedgerResult<Self> {
        let provider = new_metered_provider(rpc_url, metrics)
            .map_err(|e| LedgerError::Api(format!("invalid rpc url for chain {chain_id}: {e}")))?;
        Ok(Self { provider, chain_id })
    }
}

impl<P: JsonRpcClient + 'static> EvmClient<P> {
    pub fn from_provider(provider: Provider<P>, chain_id: u64) -> Self {
        Self { provider, chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn get_block_number(&self) -> Result<u64, ProviderError> {
        let number: U64 = self.provider.request("eth_blockNumber", ()).await?;
        Ok(number.as_u64())
    }

    /// Fetches logs emitted by `address` over the inclusive block range.
    ///
    /// Some endpoints ignore filter fields under load; a response carrying a
    /// log from any other contract is rejected rather than passed on.
    pub async fn get_logs_in_range(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ProviderError> {
        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await?;
        if logs.iter().any(|log| log.address != address) {
            return Err(ProviderError::CustomError(format!(
                "get_logs returned logs from an unexpected contract, expected {address:?}"
            )));
        }
        Ok(logs)
    }

    pub async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        self.provider.get_transaction_receipt(hash).await
    }

    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ProviderError> {
        self.provider.request("eth_sendRawTransaction", [raw]).await
    }

    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider.call(&tx, None).await
    }
}

/// Immutable chain-id to client map, built once at startup. Lookups for a
/// chain the engine was not configured for fail fast.
pub struct ProviderRegistry<P> {
    clients: HashMap<u64, Arc<EvmClient<P>>>,
}

impl<P: JsonRpcClient + 'static> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    pub fn with_client(mut self, client: EvmClient<P>) -> Self {
        self.clients.insert(client.chain_id(), Arc::new(client));
        self
    }

    pub fn client_for(&self, chain_id: u64) -> LedgerResult<Arc<EvmClient<P>>> {
        self.clients
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| LedgerError::Api(format!("unsupported chainId: {chain_id}")))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.clients.keys().copied().collect()
    }
}

impl<P: JsonRpcClient + 'static> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry<MeteredHttpProvider> {
    pub fn from_config(
        chains: &[ChainConfig],
        metrics: Arc<LedgerMetrics>,
    ) -> LedgerResult<Self> {
        let mut registry = Self::new();
        for chain in chains {
            registry = registry.with_client(EvmClient::new(
                &chain.rpc_url,
                chain.chain_id,
                metrics.clone(),
            )?);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BASE_SEPOLIA_CHAIN_ID, POLYGON_AMOY_CHAIN_ID};
    use ethers::providers::MockProvider;

    fn mocked_client(chain_id: u64) -> (EvmClient<MockProvider>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        (EvmClient::from_provider(provider, chain_id), mock)
    }

    #[tokio::test]
    async fn block_number_round_trips() {
        let (client, mock) = mocked_client(BASE_SEPOLIA_CHAIN_ID);
        mock.push(U64::from(123456u64)).unwrap();
        assert_eq!(client.get_block_number().await.unwrap(), 123456);
    }

    #[tokio::test]
    async fn log_safeguard_rejects_foreign_logs() {
        let (client, mock) = mocked_client(BASE_SEPOLIA_CHAIN_ID);
        let fund: Address = "0xcDF53d6fbd1d92FB623765D863eDB1604D77E636".parse().unwrap();
        let foreign = Log {
            address: "0x00000000000000000000000000000000000000ee".parse().unwrap(),
            ..Default::default()
        };
        mock.push::<Vec<Log>, _>(vec![foreign]).unwrap();
        let err = client.get_logs_in_range(fund, 1, 10).await.unwrap_err();
        assert!(err.to_string().contains("unexpected contract"));
    }

    #[tokio::test]
    async fn log_safeguard_accepts_matching_logs() {
        let (client, mock) = mocked_client(BASE_SEPOLIA_CHAIN_ID);
        let fund: Address = "0xcDF53d6fbd1d92FB623765D863eDB1604D77E636".parse().unwrap();
        let log = Log {
            address: fund,
            ..Default::default()
        };
        mock.push::<Vec<Log>, _>(vec![log]).unwrap();
        let logs = client.get_logs_in_range(fund, 1, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn missing_receipt_is_none() {
        let (client, mock) = mocked_client(BASE_SEPOLIA_CHAIN_ID);
        mock.push(serde_json::Value::Null).unwrap();
        let receipt = client
            .get_transaction_receipt(H256::zero())
            .await
            .unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn registry_fails_fast_on_unknown_chain() {
        let (client, _mock) = mocked_client(BASE_SEPOLIA_CHAIN_ID);
        let registry = ProviderRegistry::new().with_client(client);
        assert!(registry.client_for(BASE_SEPOLIA_CHAIN_ID).is_ok());
        let err = registry.client_for(POLYGON_AMOY_CHAIN_ID).unwrap_err();
        assert_eq!(err.error_type(), "api");
        assert!(err.to_string().contains("80002"));
    }
}
