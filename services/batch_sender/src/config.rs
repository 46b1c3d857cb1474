//! Configuration module for the batch sender

use anyhow::{Context, Result};
use nft_transfer_runtime::{KeypairSigner, TransferConfig};
use serde::Deserialize;
use solana_sdk::signature::Keypair;
use std::{fs, path::Path};

/// Environment variable holding a base58-encoded sender secret key
pub const SENDER_KEY_VAR: &str = "SENDER_PRIVATE_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Solana RPC URL
    pub rpc_url: String,

    /// Path to the sender keypair file; `SENDER_PRIVATE_KEY` is used when absent
    #[serde(default)]
    pub keypair_path: Option<String>,

    /// Pipeline settings
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load configuration from file or environment variables
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Load from .env file if it exists
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("Could not load .env file: {}", e);
        }

        let config = if let Some(path) = config_path {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;

            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?
        } else {
            Self::from_env()?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut transfer = TransferConfig::default();

        if let Some(value) = var("MAX_PER_CHUNK") {
            transfer.max_per_chunk = Some(value.parse().context("Invalid MAX_PER_CHUNK")?);
        }
        if let Some(value) = var("COMMITMENT") {
            transfer.commitment = value.parse()?;
        }
        if let Some(value) = var("MAX_CONCURRENT_LOOKUPS") {
            transfer.max_concurrent_lookups =
                value.parse().context("Invalid MAX_CONCURRENT_LOOKUPS")?;
        }
        if let Some(value) = var("MAX_RETRIES") {
            transfer.retry.max_retries = value.parse().context("Invalid MAX_RETRIES")?;
        }
        if let Some(value) = var("CONFIRM_TIMEOUT_SECS") {
            transfer.confirm_timeout_secs =
                value.parse().context("Invalid CONFIRM_TIMEOUT_SECS")?;
        }

        Ok(Config {
            rpc_url: var("RPC_URL").context("RPC_URL environment variable is required")?,
            keypair_path: var("KEYPAIR_PATH"),
            transfer,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.rpc_url.starts_with("http") {
            anyhow::bail!("RPC URL must start with http or https");
        }

        if let Some(path) = self.expanded_keypair_path() {
            if !Path::new(&path).exists() {
                anyhow::bail!("Keypair file does not exist: {}", path);
            }
        }

        self.transfer.validate()?;
        Ok(())
    }

    fn expanded_keypair_path(&self) -> Option<String> {
        self.keypair_path
            .as_deref()
            .map(|path| shellexpand::tilde(path).to_string())
    }

    /// Build the sender's signer from the keypair file or `SENDER_PRIVATE_KEY`
    pub fn load_signer(&self) -> Result<KeypairSigner> {
        if let Some(path) = self.expanded_keypair_path() {
            return Ok(KeypairSigner::new(load_keypair(Path::new(&path))?));
        }

        let secret = std::env::var(SENDER_KEY_VAR).with_context(|| {
            format!("Either keypair_path or the {SENDER_KEY_VAR} environment variable is required")
        })?;
        Ok(KeypairSigner::from_base58(&secret)?)
    }
}

/// Read a keypair file: 64 raw secret key bytes or a JSON byte array
pub fn load_keypair(path: &Path) -> Result<Keypair> {
    let keypair_data = fs::read(path)
        .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

    let keypair = if keypair_data.len() == 64 {
        Keypair::from_bytes(&keypair_data)?
    } else {
        let json: Vec<u8> =
            serde_json::from_slice(&keypair_data).context("Failed to parse keypair JSON")?;
        Keypair::from_bytes(&json)?
    };

    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nft_transfer_runtime::{CommitmentTier, FailurePolicy, TransactionSigner};
    use solana_sdk::signer::Signer;
    use std::{collections::HashMap, io::Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_toml_config() {
        let config: Config = toml::from_str(
            r#"
            rpc_url = "https://api.devnet.solana.com"

            [transfer]
            max_per_chunk = 5
            commitment = "confirmed"
            failure_policy = "continue-on-error"

            [transfer.retry]
            max_retries = 5
            "#,
        )
        .unwrap();

        assert!(config.keypair_path.is_none());
        assert_eq!(config.transfer.max_per_chunk, Some(5));
        assert_eq!(config.transfer.commitment, CommitmentTier::Confirmed);
        assert_eq!(config.transfer.failure_policy, FailurePolicy::ContinueOnError);
        assert_eq!(config.transfer.retry.max_retries, 5);
        assert_eq!(config.transfer.retry.initial_delay_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transfer_section_is_optional() {
        let config: Config = toml::from_str(r#"rpc_url = "http://127.0.0.1:8899""#).unwrap();
        assert_eq!(config.transfer.max_per_chunk, None);
        assert_eq!(config.transfer.commitment, CommitmentTier::Finalized);
    }

    #[test]
    fn test_validate_rejects_bad_url_and_missing_keypair() {
        let mut config: Config = toml::from_str(r#"rpc_url = "localhost:8899""#).unwrap();
        assert!(config.validate().is_err());

        config.rpc_url = "http://localhost:8899".to_string();
        config.keypair_path = Some("/nonexistent/id.json".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("RPC_URL", "http://localhost:8899"),
            ("MAX_PER_CHUNK", "4"),
            ("COMMITMENT", "processed"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8899");
        assert_eq!(config.transfer.max_per_chunk, Some(4));
        assert_eq!(config.transfer.commitment, CommitmentTier::Processed);
        assert!(config.keypair_path.is_none());

        assert!(Config::from_lookup(|_| None).is_err());
    }

    #[test]
    fn test_load_keypair_json_and_raw() {
        let keypair = Keypair::new();

        let mut json = NamedTempFile::new().unwrap();
        json.write_all(serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap().as_bytes())
            .unwrap();
        assert_eq!(load_keypair(json.path()).unwrap().pubkey(), keypair.pubkey());

        let mut raw = NamedTempFile::new().unwrap();
        raw.write_all(&keypair.to_bytes()).unwrap();
        assert_eq!(load_keypair(raw.path()).unwrap().pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_load_signer_from_keypair_path() {
        let keypair = Keypair::new();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap().as_bytes())
            .unwrap();

        let config = Config {
            rpc_url: "http://localhost:8899".to_string(),
            keypair_path: Some(file.path().display().to_string()),
            transfer: TransferConfig::default(),
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.load_signer().unwrap().pubkey(), keypair.pubkey());
    }
}
