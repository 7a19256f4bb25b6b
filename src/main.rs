// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use fund_ledger::config::{Config, LedgerNodeConfig};
use fund_ledger::node::start_ledger_node;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(name = "fund-ledger", rename_all = "kebab-case", author, version)]
struct Args {
    /// Path to the node config file (YAML or JSON).
    #[clap(long, env = "FUND_LEDGER_CONFIG", default_value = "fund-ledger.yaml")]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = LedgerNodeConfig::load(&args.config_path)
        .with_context(|| format!("reading {}", args.config_path.display()))?;

    let node = start_ledger_node(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    node.shutdown().await;
    Ok(())
}
