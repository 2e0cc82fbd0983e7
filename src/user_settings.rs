use crate::operation_log::app_data_dir;
use crate::types::TokenSpec;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

fn default_selected_chain_id() -> u64 {
    1
}

fn default_ledger_index() -> u32 {
    0
}

/// User settings that persist between sessions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSettings {
    /// Chain the wallet is expected on
    #[serde(default = "default_selected_chain_id")]
    pub selected_chain_id: u64,
    /// Custom RPC overrides per chain ID
    #[serde(default)]
    pub custom_rpcs: HashMap<u64, String>,
    /// Individually added tokens, always listed
    #[serde(default)]
    pub custom_tokens: Vec<TokenSpec>,
    /// Token list files (Uniswap JSON or CSV)
    #[serde(default)]
    pub token_lists: Vec<PathBuf>,
    /// Sign with a Ledger instead of PRIVATE_KEY
    #[serde(default)]
    pub use_ledger: bool,
    /// Ledger Live account index
    #[serde(default = "default_ledger_index")]
    pub ledger_index: u32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            selected_chain_id: default_selected_chain_id(),
            custom_rpcs: HashMap::new(),
            custom_tokens: Vec::new(),
            token_lists: Vec::new(),
            use_ledger: false,
            ledger_index: default_ledger_index(),
        }
    }
}

impl UserSettings {
    /// Get the settings file path
    pub fn settings_path() -> PathBuf {
        app_data_dir().join(SETTINGS_FILE)
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        Self::load_from(&Self::settings_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(settings) => {
                        tracing::info!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse settings file: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read settings file: {}", e);
                }
            }
        }
        tracing::info!("Using default settings");
        Self::default()
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        tracing::info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Get custom RPC for a chain, or None if using default
    pub fn get_custom_rpc(&self, chain_id: u64) -> Option<&String> {
        self.custom_rpcs.get(&chain_id).filter(|s| !s.is_empty())
    }

    /// Set custom RPC for a chain (empty string removes the override)
    pub fn set_custom_rpc(&mut self, chain_id: u64, rpc: String) {
        if rpc.trim().is_empty() {
            self.custom_rpcs.remove(&chain_id);
        } else {
            self.custom_rpcs.insert(chain_id, rpc.trim().to_string());
        }
    }

    /// Add a custom token; an existing entry with the same address is replaced.
    pub fn add_custom_token(&mut self, token: TokenSpec) {
        let token = token.forced();
        match self.custom_tokens.iter_mut().find(|t| t.address == token.address) {
            Some(existing) => *existing = token,
            None => self.custom_tokens.push(token),
        }
    }

    pub fn remove_custom_token(&mut self, address: ethers::types::Address) -> bool {
        let initial_len = self.custom_tokens.len();
        self.custom_tokens.retain(|t| t.address != address);
        self.custom_tokens.len() < initial_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    // ==================== UserSettings::default tests ====================

    #[test]
    fn test_user_settings_default_values() {
        let settings = UserSettings::default();
        assert_eq!(settings.selected_chain_id, 1);
        assert!(settings.custom_tokens.is_empty());
        assert!(settings.token_lists.is_empty());
        assert!(!settings.use_ledger);
        assert_eq!(settings.ledger_index, 0);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: UserSettings = serde_json::from_str(r#"{"use_ledger": true}"#).unwrap();
        assert!(settings.use_ledger);
        assert_eq!(settings.selected_chain_id, 1);
        assert!(settings.custom_rpcs.is_empty());
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = std::env::temp_dir().join(format!("token-migrator-settings-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(SETTINGS_FILE);

        let mut settings = UserSettings::default();
        settings.selected_chain_id = 10;
        settings.add_custom_token(TokenSpec::new(Address::repeat_byte(1), "TKN", 8));
        settings.save_to(&path).unwrap();

        assert_eq!(UserSettings::load_from(&path), settings);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_corrupt_file_falls_back_to_default() {
        let dir = std::env::temp_dir().join(format!("token-migrator-corrupt-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(SETTINGS_FILE);
        fs::write(&path, "{not json").unwrap();

        assert_eq!(UserSettings::load_from(&path), UserSettings::default());
        let _ = fs::remove_dir_all(&dir);
    }

    // ==================== custom token tests ====================

    #[test]
    fn test_add_custom_token_forces_and_replaces() {
        let mut settings = UserSettings::default();
        let address = Address::repeat_byte(1);
        settings.add_custom_token(TokenSpec::new(address, "OLD", 18));
        settings.add_custom_token(TokenSpec::new(address, "NEW", 6));

        assert_eq!(settings.custom_tokens.len(), 1);
        assert_eq!(settings.custom_tokens[0].symbol, "NEW");
        assert!(settings.custom_tokens[0].force);
        assert!(settings.remove_custom_token(address));
        assert!(!settings.remove_custom_token(address));
    }

    // ==================== get_custom_rpc / set_custom_rpc tests ====================

    #[test]
    fn test_set_and_get_custom_rpc() {
        let mut settings = UserSettings::default();
        settings.set_custom_rpc(1, "  https://my-eth-node.com  ".to_string());
        assert_eq!(settings.get_custom_rpc(1).unwrap(), "https://my-eth-node.com");

        settings.set_custom_rpc(1, "   ".to_string());
        assert!(settings.get_custom_rpc(1).is_none());
    }
}
