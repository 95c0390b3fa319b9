//! telehashd - basic Telehash node daemon
//!
//! Loads or creates an on-disk identity, starts the switch, opens a line
//! to the configured seed, and runs the sample seeker channel until
//! interrupted.

mod config;
mod seeker;
mod storage;

use clap::Parser;
use config::Config;
use std::process::ExitCode;
use telehash_core::{Crypto, Identity, Node};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive(format!("telehashd={default_level}").parse().unwrap())
                .add_directive(format!("telehash_net={default_level}").parse().unwrap()),
        )
        .init();

    info!("telehashd v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("daemon error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let crypto = Crypto::new();

    // load the identity, or mint one on first run
    let identity = match storage::read_identity(&config.data_dir, &config.identity_name) {
        Ok(identity) => identity,
        Err(storage::StorageError::NotFound) => {
            info!("no identity found, generating a fresh one");
            let identity = Identity::generate(&crypto)?;
            storage::write_identity(&config.data_dir, &config.identity_name, &identity)?;
            identity
        }
        Err(e) => return Err(e.into()),
    };
    info!(hashname = %identity.hashname(), "identity loaded");

    let seed = match (&config.seed_pubkey, config.seed_addr) {
        (Some(path), Some(addr)) => {
            let key = storage::read_public_key(path)?;
            Some(Node::new(key, Some(addr))?)
        }
        _ => None,
    };

    let seeds: Vec<Node> = seed.iter().cloned().collect();
    let switch =
        telehash_net::Switch::start(config.switch_config(), identity, seeds, crypto).await?;
    seeker::register(&switch);

    if let Some(seed) = seed {
        info!(seed = %seed.hashname().short(), "opening line to seed");
        let line = switch.connect(seed).await?;
        seeker::seek_self(&switch, &line)?;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    switch.stop();

    Ok(())
}
