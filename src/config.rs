use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub market: MarketConfig,
    #[serde(default)]
    pub airdrop: AirdropConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_http: String,
    pub rpc_ws: Option<String>,
    pub start_block: Option<u64>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_tx_topic")]
    pub tx_topic: String,
    #[serde(default = "default_nft_topic")]
    pub nft_topic: String,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_publish_retries")]
    pub publish_retries: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            tx_topic: default_tx_topic(),
            nft_topic: default_nft_topic(),
            capacity: default_capacity(),
            publish_timeout_ms: default_publish_timeout_ms(),
            publish_retries: default_publish_retries(),
        }
    }
}

fn default_tx_topic() -> String {
    "transactions".to_string()
}

fn default_nft_topic() -> String {
    "nft-transactions".to_string()
}

fn default_capacity() -> usize {
    1024
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_publish_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    /// Hex-encoded private key used to sign purchase commitments.
    pub signer_key: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AirdropConfig {
    /// Hex-encoded Merkle root of eligible address leaves. Claims are
    /// rejected outright when unset.
    pub merkle_root: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.chain.rpc_http.is_empty() {
            return Err(eyre::eyre!(
                "Chain '{}' must have an HTTP RPC endpoint",
                self.chain.name
            ));
        }
        let key = self
            .market
            .signer_key
            .strip_prefix("0x")
            .unwrap_or(&self.market.signer_key);
        if key.len() != 64 || hex::decode(key).is_err() {
            return Err(eyre::eyre!("market.signer_key must be a 32-byte hex key"));
        }
        if let Some(root) = &self.airdrop.merkle_root {
            let root = root.strip_prefix("0x").unwrap_or(root);
            if root.len() != 64 || hex::decode(root).is_err() {
                return Err(eyre::eyre!("airdrop.merkle_root must be a 32-byte hex hash"));
            }
        }
        if self.bus.capacity == 0 {
            return Err(eyre::eyre!("bus.capacity must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNER_KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn base_toml() -> String {
        format!(
            r#"
[database]
url = "postgres://localhost/test"
max_connections = 5

[chain]
name = "local"
chain_id = 31337
rpc_http = "http://localhost:8545"

[market]
signer_key = "{SIGNER_KEY}"
"#
        )
    }

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(&base_toml()).unwrap();
        assert_eq!(config.chain.name, "local");
        assert_eq!(config.chain.chain_id, 31337);
        assert_eq!(config.chain.poll_interval_ms, 2000); // default
        assert_eq!(config.bus.tx_topic, "transactions"); // default
        assert_eq!(config.bus.nft_topic, "nft-transactions"); // default
        assert_eq!(config.api.port, 3000); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_signer_key() {
        let mut config: Config = toml::from_str(&base_toml()).unwrap();
        config.market.signer_key = "not-a-key".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_merkle_root() {
        let mut config: Config = toml::from_str(&base_toml()).unwrap();
        config.airdrop.merkle_root = Some("0x1234".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config: Config = toml::from_str(&base_toml()).unwrap();
        config.bus.capacity = 0;
        assert!(config.validate().is_err());
    }
}
