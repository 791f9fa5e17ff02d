use anyhow::{bail, Result};
use log::error;
use std::sync::Arc;
use structopt::StructOpt;

use tenk::storage::SledStore;
use tenk::{Config, Pipeline};

#[derive(Debug, StructOpt)]
#[structopt(name = "tenk", about = "10-K filing analysis pipeline")]
enum Command {
    /// Process every watchlist company once
    Backfill,
    /// Continuously poll the EDGAR feed for new filings
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let command = Command::from_args();

    let config = Config::from_env()?;
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("config error: {}", e);
        }
        bail!("invalid configuration, set variables in .env and retry");
    }

    let store = Arc::new(SledStore::open(&config.db_path)?);
    let pipeline = Pipeline::new(config, store)?;

    match command {
        Command::Backfill => pipeline.backfill().await,
        Command::Watch => pipeline.watch().await,
    }
}
