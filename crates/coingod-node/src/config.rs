//! Node configuration.

use crate::Args;
use anyhow::{anyhow, Context, Result};
use coingod_consensus::{NetworkParams, ParamsOverrides};
use coingod_mempool::MempoolConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_name: String,
    /// Network profile: mainnet, wisdom or solonet.
    pub network: String,
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Replacements for profile parameters.
    #[serde(default)]
    pub overrides: ParamsOverrides,
    #[serde(default)]
    pub mempool: MempoolConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(args.network.as_deref().unwrap_or("mainnet"))
        };

        // Only override if explicitly provided via CLI
        if let Some(ref network) = args.network {
            config.network = network.clone();
        }
        if let Some(ref data_dir) = args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(ref level) = args.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        let data_dir = match network {
            "mainnet" => PathBuf::from(".coingod"),
            other => PathBuf::from(format!(".coingod-{other}")),
        };

        Self {
            node_name: "coingod-node".to_string(),
            network: network.to_string(),
            data_dir,
            log_level: default_log_level(),
            overrides: ParamsOverrides::default(),
            mempool: MempoolConfig::default(),
        }
    }

    /// Profile parameters with the configured overrides applied.
    pub fn network_params(&self) -> Result<NetworkParams> {
        let params = NetworkParams::from_name(&self.network)
            .ok_or_else(|| anyhow!("Unknown network '{}'", self.network))?
            .with_overrides(&self.overrides);
        params
            .validate()
            .with_context(|| format!("Invalid parameters for network '{}'", self.network))?;
        Ok(params)
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default_for_network("mainnet");
        assert_eq!(config.network, "mainnet");
        assert_eq!(config.data_dir, PathBuf::from(".coingod"));
        assert_eq!(config.network_params().unwrap().name, "mainnet");
    }

    #[test]
    fn test_solonet_config() {
        let config = NodeConfig::default_for_network("solonet");
        assert!(config.data_dir.to_string_lossy().contains("solonet"));
        assert_eq!(config.network_params().unwrap().max_time_offset_ms, 24_000);
    }

    #[test]
    fn test_overrides_from_toml() {
        let config: NodeConfig = toml::from_str(
            r#"
            node_name = "local"
            network = "solonet"
            data_dir = "/tmp/coingod"

            [overrides]
            vm_gas_rate = 100
            genesis_program = "51"

            [mempool]
            max_transactions = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.mempool.max_transactions, 5);
        let params = config.network_params().unwrap();
        assert_eq!(params.vm_gas_rate, 100);
        assert_eq!(params.genesis_program, "51");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = NodeConfig::default_for_network("solonet");
        config.overrides.blocks_of_epoch = Some(0);
        assert!(config.network_params().is_err());

        config.network = "nowhere".into();
        assert!(config.network_params().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        let config = NodeConfig::default_for_network("wisdom");
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let reloaded: NodeConfig = toml::from_str(&content).unwrap();
        assert_eq!(reloaded, config);
    }
}
