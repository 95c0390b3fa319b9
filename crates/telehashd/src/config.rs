//! Configuration for telehashd

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use telehash_net::SwitchConfig;

/// telehashd - Telehash node daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "telehashd")]
#[command(about = "Telehash switch daemon with a sample seeker channel")]
pub struct Config {
    /// UDP listen address
    #[arg(short, long, default_value = "0.0.0.0:42424")]
    pub listen: SocketAddr,

    /// Data directory holding the identity key blobs
    #[arg(short, long, default_value = "./data/telehashd", env = "TELEHASH_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Base filename of the identity key blobs
    #[arg(long, default_value = "telehash-node")]
    pub identity_name: String,

    /// Path to the seed's DER-encoded RSA public key
    #[arg(long)]
    pub seed_pubkey: Option<PathBuf>,

    /// UDP address of the seed
    #[arg(long)]
    pub seed_addr: Option<SocketAddr>,

    /// Seconds an outstanding open waits for a reply
    #[arg(long, default_value = "10")]
    pub open_timeout_secs: u64,

    /// Seconds before an idle line is torn down
    #[arg(long, default_value = "60")]
    pub idle_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.seed_pubkey.is_some() != self.seed_addr.is_some() {
            anyhow::bail!("--seed-pubkey and --seed-addr must be given together");
        }
        if self.open_timeout_secs == 0 {
            anyhow::bail!("open timeout must be at least one second");
        }
        Ok(())
    }

    /// Switch tunables derived from the flags.
    pub fn switch_config(&self) -> SwitchConfig {
        SwitchConfig {
            listen: self.listen,
            open_timeout: Duration::from_secs(self.open_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            ..SwitchConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::parse_from(["telehashd"])
    }

    #[test]
    fn defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn seed_flags_must_pair() {
        let mut config = base_config();
        config.seed_addr = Some("127.0.0.1:5001".parse().unwrap());
        assert!(config.validate().is_err());

        config.seed_pubkey = Some(PathBuf::from("seed.pub"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn switch_config_reflects_timeouts() {
        let mut config = base_config();
        config.open_timeout_secs = 3;
        let switch = config.switch_config();
        assert_eq!(switch.open_timeout, Duration::from_secs(3));
        assert_eq!(switch.listen, config.listen);
    }
}
