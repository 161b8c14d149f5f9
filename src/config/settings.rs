use crate::error::{BlockchainError, Result};
use crate::network::WireFormat;
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH_KEY: &str = "SETTLEMENT_CONFIG";
const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";

static DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:12000";
const DEFAULT_LISTENER_PORT: u16 = 12000;
const DEFAULT_PENDING_THRESHOLD: usize = 2;
const DEFAULT_MINING_WORKERS: usize = 2;
const DEFAULT_MINING_QUEUE: usize = 16;
const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;
const MAX_DIFFICULTY: usize = 64; // A SHA-256 hex digest has 64 characters

/// A statically provisioned miner endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerEntry {
    pub id: u32,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the listener accepts proposals
    pub listen_addr: String,
    /// Port miner endpoints listen on when the tip is broadcast to them
    pub listener_port: u16,
    pub difficulty: usize,
    /// Tip broadcast happens once more than this many transactions are pending
    pub pending_threshold: usize,
    pub mining_workers: usize,
    pub mining_queue: usize,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub wire_format: WireFormat,
    pub db_path: PathBuf,
    pub miners: Vec<MinerEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: String::from(DEFAULT_LISTEN_ADDR),
            listener_port: DEFAULT_LISTENER_PORT,
            difficulty: crate::core::DEFAULT_DIFFICULTY,
            pending_threshold: DEFAULT_PENDING_THRESHOLD,
            mining_workers: DEFAULT_MINING_WORKERS,
            mining_queue: DEFAULT_MINING_QUEUE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            wire_format: WireFormat::default(),
            db_path: PathBuf::from("./data"),
            miners: vec![MinerEntry {
                id: 12345,
                address: String::from("127.0.0.1"),
            }],
        }
    }
}

impl Config {
    /// Read a TOML file; keys it leaves out keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// The file named by `SETTLEMENT_CONFIG` if set, otherwise defaults.
    /// `NODE_ADDRESS` overrides the listen address either way.
    pub fn from_env_or_default() -> Result<Config> {
        let mut config = match env::var(CONFIG_PATH_KEY) {
            Ok(path) => Config::load(path)?,
            Err(_) => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// `explicit` wins over `SETTLEMENT_CONFIG`
    pub fn resolve(explicit: Option<&Path>) -> Result<Config> {
        match explicit {
            Some(path) => {
                let mut config = Config::load(path)?;
                config.apply_env_overrides();
                Ok(config)
            }
            None => Config::from_env_or_default(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            self.listen_addr = addr;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mining_workers == 0 {
            return Err(BlockchainError::Config(
                "mining_workers must be at least 1".to_string(),
            ));
        }
        if self.mining_queue == 0 {
            return Err(BlockchainError::Config(
                "mining_queue must be at least 1".to_string(),
            ));
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(BlockchainError::Config(format!(
                "difficulty {} exceeds {MAX_DIFFICULTY}",
                self.difficulty
            )));
        }
        if self.max_message_bytes == 0 {
            return Err(BlockchainError::Config(
                "max_message_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "127.0.0.1:12000");
        assert_eq!(config.difficulty, 3);
        assert_eq!(config.pending_threshold, 2);
        assert_eq!(config.wire_format, WireFormat::Framed);
        assert_eq!(config.miners.len(), 1);
        assert_eq!(config.miners[0].id, 12345);
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("node.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
difficulty = 2
wire_format = "legacy"

[[miners]]
id = 7
address = "10.0.0.7"

[[miners]]
id = 8
address = "10.0.0.8"
"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.wire_format, WireFormat::Legacy);
        assert_eq!(config.miners.len(), 2);
        assert_eq!(config.miners[1].address, "10.0.0.8");
        assert_eq!(config.listener_port, 12000);
    }

    #[test]
    fn test_load_rejects_bad_values() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("node.toml");
        fs::write(&path, "mining_workers = 0\n").unwrap();
        assert!(matches!(Config::load(&path), Err(BlockchainError::Config(_))));

        fs::write(&path, "difficulty = \"three\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(BlockchainError::Config(_))));
    }

    #[test]
    fn test_validate_limits() {
        let mut config = Config::default();
        config.difficulty = 65;
        assert!(config.validate().is_err());

        config.difficulty = 64;
        assert!(config.validate().is_ok());

        config.mining_queue = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = tempdir().unwrap();
        let result = Config::load(temp_dir.path().join("absent.toml"));
        assert!(matches!(result, Err(BlockchainError::Config(_))));
    }
}
