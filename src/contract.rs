// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fund contract call encoding and read paths.
//!
//! Amount conventions follow the contract: USD amounts are 6-decimal fixed
//! point, share amounts 18-decimal. Metrics reads go through Multicall3 so
//! `getFundMetrics` and `getSharePrice` come from one consistent state.

use ethers::abi::{self, ParamType, Token};
use ethers::providers::JsonRpcClient;
use ethers::types::{Address, Bytes, Selector, U256};
use ethers::utils::{id, parse_units};

use crate::error::{LedgerError, LedgerResult};
use crate::provider::EvmClient;
use crate::rpc::{call_with_resilience, RetryPolicy};
use crate::types::FundMetrics;

/// Multicall3, deployed at the same address on every supported chain.
pub const MULTICALL_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

const USD_DECIMALS: u32 = 6;
const SHARE_DECIMALS: u32 = 18;

fn encode_call(selector: Selector, tokens: &[Token]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend(abi::encode(tokens));
    Bytes::from(data)
}

fn to_base_units(amount: f64, decimals: u32, field: &str) -> LedgerResult<U256> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::validation(field, "amount must be positive"));
    }
    parse_units(amount.to_string(), decimals)
        .map(U256::from)
        .map_err(|e| LedgerError::validation(field, format!("unrepresentable amount: {e}")))
}

/// Calldata for `invest(address,uint256)` with the USD amount in 6-decimal
/// base units.
pub fn invest_call_data(investor: Address, usd_amount: f64) -> LedgerResult<Bytes> {
    let amount = to_base_units(usd_amount, USD_DECIMALS, "usdAmount")?;
    Ok(encode_call(
        id("invest(address,uint256)"),
        &[Token::Address(investor), Token::Uint(amount)],
    ))
}

/// Calldata for `redeem(address,uint256)` with shares in 18-decimal base
/// units.
pub fn redeem_call_data(investor: Address, shares: f64) -> LedgerResult<Bytes> {
    let amount = to_base_units(shares, SHARE_DECIMALS, "shares")?;
    Ok(encode_call(
        id("redeem(address,uint256)"),
        &[Token::Address(investor), Token::Uint(amount)],
    ))
}

/// `balanceOf(investor)` on the fund contract, as a decimal string of
/// 18-decimal share base units.
pub async fn get_balance_of<P: JsonRpcClient + 'static>(
    client: &EvmClient<P>,
    fund: Address,
    investor: Address,
    retry: &RetryPolicy,
) -> LedgerResult<String> {
    let data = encode_call(id("balanceOf(address)"), &[Token::Address(investor)]);
    let output = call_with_resilience(retry, || client.call(fund, data.clone())).await?;
    let balance = decode_single_uint(&output, "balanceOf")?;
    Ok(balance.to_string())
}

/// Reads `getFundMetrics()` and `getSharePrice()` through one Multicall3
/// `aggregate3` call.
pub async fn get_fund_metrics<P: JsonRpcClient + 'static>(
    client: &EvmClient<P>,
    fund: Address,
    retry: &RetryPolicy,
) -> LedgerResult<FundMetrics> {
    let multicall: Address = MULTICALL_ADDRESS
        .parse()
        .map_err(|e| LedgerError::Api(format!("bad multicall address: {e}")))?;

    let calls = Token::Array(vec![
        aggregate3_call(fund, encode_call(id("getFundMetrics()"), &[])),
        aggregate3_call(fund, encode_call(id("getSharePrice()"), &[])),
    ]);
    let data = encode_call(id("aggregate3((address,bool,bytes)[])"), &[calls]);
    let output = call_with_resilience(retry, || client.call(multicall, data.clone())).await?;

    let results = decode_aggregate3_results(&output)?;
    let [metrics_ret, price_ret]: [Vec<u8>; 2] = results.try_into().map_err(|_| {
        LedgerError::Serialization("aggregate3 returned a wrong-arity result set".into())
    })?;

    // getFundMetrics returns (totalAssetValue, sharesSupply, lastUpdateTime);
    // the timestamp is superseded by the cache write time.
    let tokens = abi::decode(
        &[ParamType::Tuple(vec![
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ])],
        &metrics_ret,
    )
    .map_err(|e| LedgerError::Serialization(format!("getFundMetrics decode failed: {e}")))?;
    let fields = match tokens.into_iter().next() {
        Some(Token::Tuple(fields)) => fields,
        other => {
            return Err(LedgerError::Serialization(format!(
                "getFundMetrics returned {other:?}"
            )))
        }
    };
    let total_asset_value = as_uint(fields.first(), "totalAssetValue")?;
    let shares_supply = as_uint(fields.get(1), "sharesSupply")?;
    let share_price = decode_single_uint(&price_ret, "getSharePrice")?;

    Ok(FundMetrics {
        total_asset_value: total_asset_value.to_string(),
        shares_supply: shares_supply.to_string(),
        share_price: share_price.to_string(),
    })
}

fn aggregate3_call(target: Address, call_data: Bytes) -> Token {
    // (target, allowFailure=false, callData)
    Token::Tuple(vec![
        Token::Address(target),
        Token::Bool(false),
        Token::Bytes(call_data.to_vec()),
    ])
}

fn decode_aggregate3_results(output: &[u8]) -> LedgerResult<Vec<Vec<u8>>> {
    let tokens = abi::decode(
        &[ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::Bool,
            ParamType::Bytes,
        ])))],
        output,
    )
    .map_err(|e| LedgerError::Serialization(format!("aggregate3 decode failed: {e}")))?;
    let entries = match tokens.into_iter().next() {
        Some(Token::Array(entries)) => entries,
        other => {
            return Err(LedgerError::Serialization(format!(
                "aggregate3 returned {other:?}"
            )))
        }
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Token::Tuple(fields) => match (fields.first(), fields.get(1)) {
                (Some(Token::Bool(true)), Some(Token::Bytes(data))) => Ok(data.clone()),
                (Some(Token::Bool(false)), _) => Err(LedgerError::Contract {
                    reason: None,
                    code: None,
                    message: "multicall sub-call failed".into(),
                }),
                _ => Err(LedgerError::Serialization(
                    "malformed aggregate3 result tuple".into(),
                )),
            },
            other => Err(LedgerError::Serialization(format!(
                "expected aggregate3 tuple, got {other:?}"
            ))),
        })
        .collect()
}

fn decode_single_uint(output: &[u8], what: &str) -> LedgerResult<U256> {
    let tokens = abi::decode(&[ParamType::Uint(256)], output)
        .map_err(|e| LedgerError::Serialization(format!("{what} decode failed: {e}")))?;
    as_uint(tokens.first(), what)
}

fn as_uint(token: Option<&Token>, what: &str) -> LedgerResult<U256> {
    match token {
        Some(Token::Uint(value)) => Ok(*value),
        other => Err(LedgerError::Serialization(format!(
            "{what}: expected uint, got {other:?}"
        ))),
    }
}
