use scash_util::ChainRpcConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn default_interval_secs() -> u64 {
    10
}

fn default_start_delay_secs() -> u64 {
    5
}

fn default_transaction_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    // Period of the sync timer
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    // Delay before the first pass after startup
    #[serde(default = "default_start_delay_secs")]
    pub start_delay_secs: u64,

    // Budget of one block's ledger transaction, exceeding it rolls the block back
    #[serde(default = "default_transaction_timeout_secs")]
    pub transaction_timeout_secs: u64,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            start_delay_secs: default_start_delay_secs(),
            transaction_timeout_secs: default_transaction_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    // Used for store data and logs separately, default is none,
    // So data is stored in {root}/data, or {root}/{isolate}/data if set
    #[serde(default)]
    pub isolate: Option<String>,

    #[serde(default)]
    pub rpc: ChainRpcConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl IndexerConfig {
    pub fn load(root_dir: &Path) -> Result<Self, String> {
        let path = root_dir.join("config.toml");
        if !path.exists() {
            let default_config = IndexerConfig::default();
            info!(
                "Config file {} does not exist. Using default configuration.",
                path.display()
            );
            return Ok(default_config);
        }

        info!("Loading config from {}", path.display());
        let config_data = std::fs::read_to_string(&path).map_err(|e| {
            let msg = format!("Failed to read config file {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })?;

        toml::from_str(&config_data).map_err(|e| {
            let msg = format!("Failed to parse config file {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })
    }
}

pub struct ConfigManager {
    root_dir: PathBuf,
    config: IndexerConfig,
}

impl ConfigManager {
    /// Load `config.toml` from `root_dir` and apply the RPC environment
    /// overrides on top of it.
    pub fn load(root_dir: &Path) -> Result<Self, String> {
        Self::load_with_env(root_dir, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(root_dir: &Path, lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !root_dir.exists() {
            std::fs::create_dir_all(root_dir).map_err(|e| {
                let msg = format!(
                    "Could not create root directory at {}: {}",
                    root_dir.display(),
                    e
                );
                error!("{}", msg);
                msg
            })?;
        }

        let mut config = IndexerConfig::load(root_dir)?;
        config.rpc.apply_overrides(lookup);
        info!("Chain RPC endpoint: {}", config.rpc.rpc_url());

        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            config,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn data_dir(&self) -> Result<PathBuf, String> {
        let dir = match &self.config.isolate {
            Some(isolate) => self.root_dir.join(isolate).join("data"),
            None => self.root_dir.join("data"),
        };

        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                let msg = format!("Could not create data directory {}: {}", dir.display(), e);
                error!("{}", msg);
                msg
            })?;
        }

        Ok(dir)
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }
}

pub type ConfigManagerRef = Arc<ConfigManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use scash_util::RpcAuth;

    fn test_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("scash_indexer_config_test").join(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let root = test_root("defaults");
        let manager = ConfigManager::load_with_env(&root, |_| None).unwrap();

        let config = manager.config();
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.sync.interval(), Duration::from_secs(10));
        assert_eq!(config.sync.start_delay(), Duration::from_secs(5));
        assert_eq!(config.sync.transaction_timeout(), Duration::from_secs(180));
        assert_eq!(config.rpc, ChainRpcConfig::default());

        let data_dir = manager.data_dir().unwrap();
        assert_eq!(data_dir, root.join("data"));
        assert!(data_dir.exists());
    }

    #[test]
    fn test_load_config_file_with_env_override() {
        let root = test_root("file");
        std::fs::write(
            root.join("config.toml"),
            r#"
isolate = "testnet"

[rpc]
rpc_url = "http://192.168.1.5:8342"
auth = { CookieFile = "/var/lib/scash/.cookie" }

[sync]
interval_secs = 30
"#,
        )
        .unwrap();

        let manager = ConfigManager::load_with_env(&root, |_| None).unwrap();
        let config = manager.config();
        assert_eq!(config.rpc.rpc_url(), "http://192.168.1.5:8342");
        assert_eq!(
            config.rpc.auth,
            Some(RpcAuth::CookieFile(PathBuf::from("/var/lib/scash/.cookie")))
        );
        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.sync.transaction_timeout_secs, 180);
        assert_eq!(manager.data_dir().unwrap(), root.join("testnet").join("data"));

        let manager = ConfigManager::load_with_env(&root, |k| match k {
            "RPC_PORT" => Some("18443".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(manager.config().rpc.rpc_url(), "http://192.168.1.5:18443");
    }

    #[test]
    fn test_invalid_config_file() {
        let root = test_root("invalid");
        std::fs::write(root.join("config.toml"), "[sync]\ninterval_secs = \"often\"\n").unwrap();
        assert!(ConfigManager::load_with_env(&root, |_| None).is_err());
    }
}
