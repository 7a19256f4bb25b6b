// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry around provider calls.
//!
//! Every outbound chain call goes through [`call_with_resilience`]. Failures
//! are classified first: contract rejections and unknown errors propagate on
//! the first attempt, transients are retried with a linear backoff of
//! `attempt * base_delay` up to the attempt bound.

use std::future::Future;
use std::time::Duration;

use ethers::providers::ProviderError;
use tracing::warn;

use crate::error::{classify_provider_error, contract_error, FailureKind, LedgerError, LedgerResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }
}

/// Runs `op`, retrying transient provider failures.
///
/// The delay before attempt `n + 1` is `n * base_delay`, so a default policy
/// sleeps 1s then 2s before giving up after the third attempt.
pub async fn call_with_resilience<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.max_retries.max(1);
    let mut last_message = String::new();
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match classify_provider_error(&err) {
                FailureKind::Contract => return Err(contract_error(&err)),
                FailureKind::Unknown => return Err(LedgerError::Provider(err.to_string())),
                FailureKind::Transient => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "transient rpc failure"
                    );
                    last_message = err.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(policy.base_delay * attempt).await;
                    }
                }
            },
        }
    }
    Err(LedgerError::Rpc {
        attempts,
        message: last_message,
    })
}
