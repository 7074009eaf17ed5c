use std::path::PathBuf;
use std::time::Duration;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Runtime configuration, passed explicitly into component constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub testnet: bool,
    /// Override for the platform data directory; `None` resolves the default.
    pub data_dir: Option<PathBuf>,
    /// String key of the blockchain data source, e.g. "blockchain.info".
    pub api_source: String,
    /// Fiat currency code for the price feed.
    pub currency: String,
    /// Seconds between refresher ticks. Clamped to a 5 second minimum.
    pub refresh_rate: u64,
    /// Bound on every network request.
    pub request_timeout: u64,
    /// PBKDF2 rounds for the wallet file key.
    pub kdf_iterations: u32,
}

pub const MIN_REFRESH_RATE: u64 = 5;

impl Config {
    pub fn network(&self) -> Network {
        if self.testnet {
            Network::Testnet
        } else {
            Network::Bitcoin
        }
    }

    /// `%APPDATA%/Bit-Store` on Windows, `~/.Bit-Store` elsewhere.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        if cfg!(windows) {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Bit-Store")
        } else {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".Bit-Store")
        }
    }

    pub fn wallets_dir(&self) -> PathBuf {
        self.data_dir().join("wallets")
    }

    pub fn refresh_rate(&self) -> Duration {
        Duration::from_secs(self.refresh_rate.max(MIN_REFRESH_RATE))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            testnet: false,
            data_dir: None,
            api_source: "blockchain.info".to_string(),
            currency: "USD".to_string(),
            refresh_rate: 10,
            request_timeout: 10,
            kdf_iterations: 100_000,
        }
    }
}
