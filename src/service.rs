// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The operations the engine exposes to its HTTP surface: unsigned
//! transaction construction, verified publication of signed transactions,
//! and cached fund reads.

use std::sync::Arc;
use std::time::Duration;

use ethers::providers::JsonRpcClient;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};
use ethers::utils::rlp::Rlp;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{balance_cache_key, metrics_cache_key, read_through, KvCache};
use crate::contract;
use crate::error::{LedgerError, LedgerResult};
use crate::metrics::LedgerMetrics;
use crate::provider::ProviderRegistry;
use crate::rpc::{call_with_resilience, RetryPolicy};
use crate::store::LedgerStore;
use crate::types::{
    normalize_address, CachedMetrics, FundToken, TransactionRecord, TxKind, now_ms,
};

pub const BALANCE_CACHE_TTL: Duration = Duration::from_secs(300);
pub const METRICS_CACHE_TTL: Duration = Duration::from_secs(60);

/// An unsigned call for the client to sign. Matches the JSON shape wallets
/// expect from `eth_sendTransaction`-style payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub from: String,
    pub to: String,
    pub data: String,
    pub value: String,
}

pub struct LedgerService<P> {
    registry: Arc<ProviderRegistry<P>>,
    store: Arc<dyn LedgerStore>,
    kv: Arc<dyn KvCache>,
    metrics: Arc<LedgerMetrics>,
    retry: RetryPolicy,
}

impl<P: JsonRpcClient + 'static> LedgerService<P> {
    pub fn new(
        registry: Arc<ProviderRegistry<P>>,
        store: Arc<dyn LedgerStore>,
        kv: Arc<dyn KvCache>,
        metrics: Arc<LedgerMetrics>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            store,
            kv,
            metrics,
            retry,
        }
    }

    /// Builds the unsigned `invest` call for the given USD amount.
    pub async fn get_invest_transaction(
        &self,
        fund: &str,
        investor: &str,
        usd_amount: f64,
        chain_id: u64,
    ) -> LedgerResult<UnsignedTx> {
        let fund_token = self.require_fund(fund, chain_id).await?;
        let investor_addr = parse_address(investor, "investor")?;
        let data = contract::invest_call_data(investor_addr, usd_amount)?;
        Ok(unsigned_tx(investor, &fund_token, data))
    }

    /// Builds the unsigned `redeem` call for the given share amount.
    pub async fn get_redeem_transaction(
        &self,
        fund: &str,
        investor: &str,
        shares: f64,
        chain_id: u64,
    ) -> LedgerResult<UnsignedTx> {
        let fund_token = self.require_fund(fund, chain_id).await?;
        let investor_addr = parse_address(investor, "investor")?;
        let data = contract::redeem_call_data(investor_addr, shares)?;
        Ok(unsigned_tx(investor, &fund_token, data))
    }

    /// Verifies a client-signed transaction against the claimed investor,
    /// fund and chain, broadcasts it, and records it as pending. Returns the
    /// transaction hash reported by the endpoint.
    ///
    /// Rejection happens before broadcast: a transaction signed by someone
    /// else, or aimed at another contract or chain, never reaches the
    /// mempool through this path.
    pub async fn verify_and_publish_transaction(
        &self,
        fund: &str,
        investor: &str,
        kind: TxKind,
        signed_tx: &[u8],
        chain_id: u64,
    ) -> LedgerResult<String> {
        let fund_token = self.require_fund(fund, chain_id).await?;
        let client = self.registry.client_for(chain_id)?;

        let decoded = decode_signed_transaction(signed_tx)?;
        if decoded.chain_id != chain_id {
            return Err(LedgerError::validation(
                "chainId",
                format!(
                    "signed transaction targets chain {}, expected {chain_id}",
                    decoded.chain_id
                ),
            ));
        }
        if normalize_address(&format!("{:?}", decoded.sender)) != normalize_address(investor) {
            return Err(LedgerError::validation(
                "from",
                "signature does not recover to the claimed investor",
            ));
        }
        let to = decoded
            .recipient
            .map(|a| normalize_address(&format!("{a:?}")));
        if to.as_deref() != Some(fund_token.address.as_str()) {
            return Err(LedgerError::validation(
                "to",
                "signed transaction is not addressed to the fund contract",
            ));
        }

        let raw = Bytes::from(signed_tx.to_vec());
        let hash = call_with_resilience(&self.retry, || client.send_raw_transaction(raw.clone()))
            .await?;
        let hash_str = format!("{hash:?}");

        self.store
            .insert_transaction(TransactionRecord::new_pending(
                hash_str.clone(),
                investor,
                &fund_token.address,
                chain_id,
                kind,
            ))
            .await?;
        self.metrics.tx_submitted.inc();
        info!(hash = %hash_str, kind = kind.as_str(), chain_id, "transaction published");
        Ok(hash_str)
    }

    /// The investor's share balance, served from cache for up to five
    /// minutes.
    pub async fn get_fund_balance(
        &self,
        fund: &str,
        investor: &str,
        chain_id: u64,
    ) -> LedgerResult<String> {
        let fund_token = self.require_fund(fund, chain_id).await?;
        let client = self.registry.client_for(chain_id)?;
        let fund_addr = parse_address(&fund_token.address, "fund")?;
        let investor_addr = parse_address(investor, "investor")?;
        let key = balance_cache_key(fund, investor, chain_id);
        let retry = self.retry.clone();
        read_through(
            self.kv.as_ref(),
            &key,
            BALANCE_CACHE_TTL,
            &self.metrics,
            "balance",
            || async move {
                contract::get_balance_of(client.as_ref(), fund_addr, investor_addr, &retry).await
            },
        )
        .await
    }

    /// Aggregate fund metrics, served from cache for up to a minute. The
    /// indexer refreshes the same key on every `MetricsUpdated` event, so a
    /// chain read only happens when both sources have gone stale.
    pub async fn get_fund_stats(&self, fund: &str, chain_id: u64) -> LedgerResult<CachedMetrics> {
        let fund_token = self.require_fund(fund, chain_id).await?;
        let client = self.registry.client_for(chain_id)?;
        let fund_addr = parse_address(&fund_token.address, "fund")?;
        let key = metrics_cache_key(fund, chain_id);
        let retry = self.retry.clone();
        read_through(
            self.kv.as_ref(),
            &key,
            METRICS_CACHE_TTL,
            &self.metrics,
            "metrics",
            || async move {
                let metrics = contract::get_fund_metrics(client.as_ref(), fund_addr, &retry).await?;
                Ok(CachedMetrics {
                    metrics,
                    updated_at: now_ms(),
                })
            },
        )
        .await
    }

    /// The investor's transactions, newest first.
    pub async fn fetch_transaction_history(
        &self,
        investor: &str,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        self.store.transaction_history(investor, limit, offset).await
    }

    async fn require_fund(&self, fund: &str, chain_id: u64) -> LedgerResult<FundToken> {
        self.store.find_fund(fund, chain_id).await?.ok_or_else(|| {
            LedgerError::NotFound(format!(
                "no fund token at {fund} on chain {chain_id}"
            ))
        })
    }
}

fn unsigned_tx(investor: &str, fund: &FundToken, data: Bytes) -> UnsignedTx {
    UnsignedTx {
        from: normalize_address(investor),
        to: fund.address.clone(),
        data: format!("0x{}", hex::encode(&data)),
        value: "0x0".to_string(),
    }
}

fn parse_address(raw: &str, field: &str) -> LedgerResult<Address> {
    raw.trim()
        .parse()
        .map_err(|_| LedgerError::validation(field, format!("invalid address: {raw}")))
}

struct DecodedTx {
    chain_id: u64,
    sender: Address,
    recipient: Option<Address>,
}

/// Decodes a signed transaction envelope (legacy or typed) and recovers the
/// signer from its signature.
fn decode_signed_transaction(raw: &[u8]) -> LedgerResult<DecodedTx> {
    let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(raw)).map_err(|e| {
        LedgerError::validation("signedTx", format!("undecodable signed transaction: {e}"))
    })?;
    let sender = signature.recover(tx.sighash()).map_err(|e| {
        LedgerError::validation("signedTx", format!("signature recovery failed: {e}"))
    })?;
    let chain_id = tx
        .chain_id()
        .map(|id| id.as_u64())
        .ok_or_else(|| LedgerError::validation("signedTx", "transaction carries no chain id"))?;
    let recipient = tx.to().and_then(|to| to.as_address()).copied();
    Ok(DecodedTx {
        chain_id,
        sender,
        recipient,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKv;
    use crate::provider::EvmClient;
    use crate::store::MemoryStore;
    use crate::types::{TxStatus, BASE_SEPOLIA_CHAIN_ID, POLYGON_AMOY_CHAIN_ID};
    use ethers::abi::{self, Token};
    use ethers::providers::{MockProvider, Provider};
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::{TransactionRequest, H256, U256};

    const FUND: &str = "0xcdf53d6fbd1d92fb623765d863edb1604d77e636";
    // Deterministic test key, never used on a real network.
    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe51296170827936ea5cce4b76994b0f";

    struct Harness {
        service: LedgerService<MockProvider>,
        mock: MockProvider,
        store: Arc<MemoryStore>,
        kv: Arc<MemoryKv>,
    }

    async fn harness() -> Harness {
        let (provider, mock) = Provider::mocked();
        let registry = Arc::new(
            ProviderRegistry::new()
                .with_client(EvmClient::from_provider(provider, BASE_SEPOLIA_CHAIN_ID)),
        );
        let store = Arc::new(MemoryStore::new());
        store
            .insert_fund(FundToken {
                address: FUND.into(),
                chain_id: BASE_SEPOLIA_CHAIN_ID,
            })
            .await
            .unwrap();
        let kv = Arc::new(MemoryKv::new());
        let service = LedgerService::new(
            registry,
            store.clone(),
            kv.clone(),
            Arc::new(LedgerMetrics::new_for_testing()),
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        Harness {
            service,
            mock,
            store,
            kv,
        }
    }

    fn wallet() -> LocalWallet {
        TEST_KEY
            .parse::<LocalWallet>()
            .unwrap()
            .with_chain_id(BASE_SEPOLIA_CHAIN_ID)
    }

    fn signed_invest_tx(w: &LocalWallet, to: &str, chain_id: u64) -> Vec<u8> {
        let data = contract::invest_call_data(w.address(), 500.0).unwrap();
        let tx: TypedTransaction = TransactionRequest::new()
            .to(to.parse::<Address>().unwrap())
            .data(data)
            .chain_id(chain_id)
            .nonce(0u64)
            .gas(200_000u64)
            .gas_price(1_000_000_000u64)
            .into();
        let signature = w.sign_transaction_sync(&tx).unwrap();
        tx.rlp_signed(&signature).to_vec()
    }

    #[tokio::test]
    async fn builds_invest_transaction() {
        let h = harness().await;
        let investor = format!("{:?}", wallet().address());
        let tx = h
            .service
            .get_invest_transaction(FUND, &investor, 500.0, BASE_SEPOLIA_CHAIN_ID)
            .await
            .unwrap();
        assert_eq!(tx.to, FUND);
        assert_eq!(tx.from, investor);
        assert_eq!(tx.value, "0x0");
        assert!(tx.data.starts_with("0x"));
        let raw = hex::decode(&tx.data[2..]).unwrap();
        assert_eq!(&raw[..4], ethers::utils::id("invest(address,uint256)").as_slice());
    }

    #[tokio::test]
    async fn unknown_fund_is_not_found() {
        let h = harness().await;
        let investor = format!("{:?}", wallet().address());
        let err = h
            .service
            .get_invest_transaction(FUND, &investor, 500.0, POLYGON_AMOY_CHAIN_ID)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "not_found");
    }

    #[tokio::test]
    async fn publishes_valid_signed_transaction() {
        let h = harness().await;
        let w = wallet();
        let investor = format!("{:?}", w.address());
        let raw = signed_invest_tx(&w, FUND, BASE_SEPOLIA_CHAIN_ID);
        let expected_hash = H256::from_low_u64_be(0xfeed);
        h.mock.push(expected_hash).unwrap();

        let hash = h
            .service
            .verify_and_publish_transaction(FUND, &investor, TxKind::Invest, &raw, BASE_SEPOLIA_CHAIN_ID)
            .await
            .unwrap();
        assert_eq!(hash, format!("{expected_hash:?}"));

        let tx = h.store.find_transaction(&hash).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.kind, TxKind::Invest);
        assert_eq!(tx.investor, investor);
        assert_eq!(tx.fund_address, FUND);
    }

    #[tokio::test]
    async fn rejects_wrong_signer() {
        let h = harness().await;
        let w = wallet();
        let raw = signed_invest_tx(&w, FUND, BASE_SEPOLIA_CHAIN_ID);
        let err = h
            .service
            .verify_and_publish_transaction(
                FUND,
                "0x00000000000000000000000000000000000000b2",
                TxKind::Invest,
                &raw,
                BASE_SEPOLIA_CHAIN_ID,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "validation");
        assert!(err.to_string().contains("from"));
    }

    #[tokio::test]
    async fn rejects_wrong_recipient() {
        let h = harness().await;
        let w = wallet();
        let investor = format!("{:?}", w.address());
        let raw = signed_invest_tx(&w, "0x00000000000000000000000000000000000000ee", BASE_SEPOLIA_CHAIN_ID);
        let err = h
            .service
            .verify_and_publish_transaction(FUND, &investor, TxKind::Invest, &raw, BASE_SEPOLIA_CHAIN_ID)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "validation");
        assert!(err.to_string().contains("to"));
    }

    #[tokio::test]
    async fn rejects_garbage_payload() {
        let h = harness().await;
        let investor = format!("{:?}", wallet().address());
        let err = h
            .service
            .verify_and_publish_transaction(
                FUND,
                &investor,
                TxKind::Invest,
                &[0xde, 0xad, 0xbe, 0xef],
                BASE_SEPOLIA_CHAIN_ID,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "validation");
    }

    #[tokio::test]
    async fn balance_read_is_cached() {
        let h = harness().await;
        let investor = format!("{:?}", wallet().address());
        let output = Bytes::from(abi::encode(&[Token::Uint(U256::from(777u64))]));
        h.mock.push::<Bytes, _>(output).unwrap();

        let first = h
            .service
            .get_fund_balance(FUND, &investor, BASE_SEPOLIA_CHAIN_ID)
            .await
            .unwrap();
        assert_eq!(first, "777");
        // Second read must not touch the provider: nothing is queued.
        let second = h
            .service
            .get_fund_balance(FUND, &investor, BASE_SEPOLIA_CHAIN_ID)
            .await
            .unwrap();
        assert_eq!(second, "777");
    }

    #[tokio::test]
    async fn stats_prefer_indexer_published_cache() {
        let h = harness().await;
        let key = metrics_cache_key(FUND, BASE_SEPOLIA_CHAIN_ID);
        let cached = CachedMetrics {
            metrics: crate::types::FundMetrics {
                total_asset_value: "42".into(),
                shares_supply: "7".into(),
                share_price: "6".into(),
            },
            updated_at: 123,
        };
        h.kv.set(&key, &serde_json::to_string(&cached).unwrap())
            .await
            .unwrap();
        // No mock response queued: a chain read would fail the call.
        let stats = h
            .service
            .get_fund_stats(FUND, BASE_SEPOLIA_CHAIN_ID)
            .await
            .unwrap();
        assert_eq!(stats, cached);
    }

    #[tokio::test]
    async fn stats_fall_back_to_multicall() {
        let h = harness().await;
        let metrics_ret = abi::encode(&[Token::Tuple(vec![
            Token::Uint(U256::from(1_000u64)),
            Token::Uint(U256::from(10u64)),
            Token::Uint(U256::from(0u64)),
        ])]);
        let price_ret = abi::encode(&[Token::Uint(U256::from(100u64))]);
        let output = Bytes::from(abi::encode(&[Token::Array(vec![
            Token::Tuple(vec![Token::Bool(true), Token::Bytes(metrics_ret)]),
            Token::Tuple(vec![Token::Bool(true), Token::Bytes(price_ret)]),
        ])]));
        h.mock.push::<Bytes, _>(output).unwrap();

        let stats = h
            .service
            .get_fund_stats(FUND, BASE_SEPOLIA_CHAIN_ID)
            .await
            .unwrap();
        assert_eq!(stats.metrics.total_asset_value, "1000");
        assert_eq!(stats.metrics.shares_supply, "10");
        assert_eq!(stats.metrics.share_price, "100");
        assert!(stats.updated_at > 0);
    }

    #[test]
    fn decode_recovers_sender_and_chain() {
        let w = wallet();
        let raw = signed_invest_tx(&w, FUND, BASE_SEPOLIA_CHAIN_ID);
        let decoded = decode_signed_transaction(&raw).unwrap();
        assert_eq!(decoded.sender, w.address());
        assert_eq!(decoded.chain_id, BASE_SEPOLIA_CHAIN_ID);
        assert_eq!(decoded.recipient, Some(FUND.parse().unwrap()));
    }
}
