// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error surface of the ledger engine.
//!
//! The enum is closed on purpose: every failure an operation can surface maps
//! to one variant, and [`LedgerError::error_type`] gives each a stable label
//! for metric tagging. Provider failures additionally go through
//! [`classify_provider_error`] to decide whether a retry can help.

use ethers::providers::{ProviderError, RpcError};
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("{0}")]
    NotFound(String),
    #[error("contract execution error: {message}")]
    Contract {
        reason: Option<String>,
        code: Option<i64>,
        message: String,
    },
    #[error("rpc communication failure after {attempts} attempt(s): {message}")]
    Rpc { attempts: u32, message: String },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable label used when tagging error metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "validation",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Contract { .. } => "contract",
            LedgerError::Rpc { .. } => "rpc",
            LedgerError::Provider(_) => "provider",
            LedgerError::Api(_) => "api",
            LedgerError::Storage(_) => "storage",
            LedgerError::Cache(_) => "cache",
            LedgerError::Serialization(_) => "serialization",
        }
    }
}

/// How a raw provider failure should be handled by the resilience layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Deterministic contract-level rejection. Retrying cannot help.
    Contract,
    /// Transport or endpoint fault, including retryable submission races.
    Transient,
    /// Anything else. Propagated as-is, never retried.
    Unknown,
}

const CONTRACT_MARKERS: &[&str] = &[
    "execution reverted",
    "invalid opcode",
    "gas required exceeds allowance",
    "call_exception",
    "always failing transaction",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "server error",
    "service unavailable",
    "bad gateway",
    "too many requests",
    "rate limit",
    "could not detect network",
    "missing response",
    "nonce too low",
    "replacement transaction underpriced",
];

/// Classifies a failure message into a [`FailureKind`].
///
/// Contract markers win over transient ones: a reverted call stays a revert
/// even when the endpoint wraps it in a generic server-error envelope.
pub fn classify_failure(message: &str) -> FailureKind {
    let message = message.to_ascii_lowercase();
    if CONTRACT_MARKERS.iter().any(|m| message.contains(m)) {
        FailureKind::Contract
    } else if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
        FailureKind::Transient
    } else {
        FailureKind::Unknown
    }
}

pub fn classify_provider_error(err: &ProviderError) -> FailureKind {
    // JSON-RPC error payloads carry the revert reason in `message`; transport
    // faults only show up in the Display form of the outer error.
    if let Some(rpc_err) = err.as_error_response() {
        return classify_failure(&rpc_err.message);
    }
    classify_failure(&err.to_string())
}

/// Converts a classified-as-contract provider failure, keeping the revert
/// reason and JSON-RPC code when the endpoint exposed them.
pub fn contract_error(err: &ProviderError) -> LedgerError {
    let response = err.as_error_response();
    LedgerError::Contract {
        reason: response.map(|e| e.message.clone()),
        code: response.map(|e| e.code),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_is_contract() {
        assert_eq!(
            classify_failure("execution reverted: insufficient shares"),
            FailureKind::Contract
        );
        assert_eq!(classify_failure("Invalid Opcode"), FailureKind::Contract);
    }

    #[test]
    fn transport_faults_are_transient() {
        for msg in [
            "connection reset by peer",
            "request timed out",
            "503 Service Unavailable",
            "Too Many Requests",
            "nonce too low",
            "replacement transaction underpriced",
        ] {
            assert_eq!(classify_failure(msg), FailureKind::Transient, "{msg}");
        }
    }

    #[test]
    fn contract_marker_wins_over_transient() {
        assert_eq!(
            classify_failure("server error: execution reverted"),
            FailureKind::Contract
        );
    }

    #[test]
    fn unrecognized_is_unknown() {
        assert_eq!(
            classify_failure("unexpected end of JSON input"),
            FailureKind::Unknown
        );
    }

    #[test]
    fn error_type_labels_are_stable() {
        assert_eq!(
            LedgerError::validation("amount", "must be positive").error_type(),
            "validation"
        );
        assert_eq!(
            LedgerError::Rpc {
                attempts: 3,
                message: "boom".into()
            }
            .error_type(),
            "rpc"
        );
        assert_eq!(LedgerError::NotFound("fund".into()).error_type(), "not_found");
    }
}
