// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node configuration, loaded from YAML (or JSON) with kebab-case keys.

use std::path::Path;

use anyhow::{anyhow, Context};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::INDEXER_CURSOR_KEY;

pub trait Config
where
    Self: DeserializeOwned + Serialize,
{
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let reader = std::fs::File::open(path)
            .with_context(|| format!("unable to load config from {}", path.display()))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Ok(serde_json::from_reader(reader)?)
        } else {
            Ok(serde_yaml::from_reader(reader)?)
        }
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let path = path.as_ref();
        let config = serde_yaml::to_string(&self)?;
        std::fs::write(path, config)
            .map_err(|e| anyhow!("unable to save config to {}: {e}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FundConfig {
    pub address: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct IndexerSettings {
    pub interval_secs: u64,
    pub lookback_blocks: u64,
    pub cursor_key: String,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            lookback_blocks: 5000,
            cursor_key: INDEXER_CURSOR_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MonitorSettings {
    pub interval_secs: u64,
    pub max_retries: u32,
    /// When false, a transaction whose receipt fetch keeps erroring stays
    /// pending instead of being marked failed.
    pub fail_on_rpc_error: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_retries: 10,
            fail_on_rpc_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerNodeConfig {
    pub chains: Vec<ChainConfig>,
    pub funds: Vec<FundConfig>,
    #[serde(default)]
    pub indexer: IndexerSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Config for LedgerNodeConfig {}
