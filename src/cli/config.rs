//! CLI Configuration.
//!
//! Operator settings for the `ausd` tool, stored as `config.json` in the
//! data directory and overridable through `AUSD_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cli::output::OutputFormat;
use crate::core::config::ProtocolParams;
use crate::utils::crypto::Address;

/// Config file name inside the data directory
pub const CONFIG_FILE: &str = "config.json";

// ═══════════════════════════════════════════════════════════════════════════════
// CLI CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// CLI Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Data directory holding state and session files
    pub data_dir: PathBuf,
    /// Account acting as protocol, oracle and fee admin
    pub admin: String,
    /// First treasury fee recipient
    pub fee_address_1: String,
    /// Second treasury fee recipient
    pub fee_address_2: String,
    /// Default output format
    pub output: OutputFormat,
    /// Parameters used by `init`
    pub params: ProtocolParams,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            admin: "admin".into(),
            fee_address_1: "treasury-1".into(),
            fee_address_2: "treasury-2".into(),
            output: OutputFormat::Text,
            params: ProtocolParams::default(),
        }
    }
}

impl CliConfig {
    /// Configuration rooted at `data_dir`
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Load from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load `config.json` from `data_dir`, or defaults when it is missing
    pub fn load_or_default(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE);
        if path.exists() {
            let mut config = Self::load(&path)?;
            config.data_dir = data_dir.to_path_buf();
            Ok(config)
        } else {
            Ok(Self::new(data_dir.to_path_buf()))
        }
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Apply `AUSD_*` environment overrides
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(dir) = std::env::var("AUSD_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(admin) = std::env::var("AUSD_ADMIN") {
            self.admin = admin;
        }

        if let Ok(fee) = std::env::var("AUSD_FEE_ADDRESS_1") {
            self.fee_address_1 = fee;
        }

        if let Ok(fee) = std::env::var("AUSD_FEE_ADDRESS_2") {
            self.fee_address_2 = fee;
        }

        if let Ok(format) = std::env::var("AUSD_OUTPUT") {
            self.output = format.parse().map_err(ConfigError::Validation)?;
        }

        Ok(self)
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Admin account
    pub fn admin_address(&self) -> Result<Address, ConfigError> {
        resolve_address(&self.admin)
    }

    /// Treasury accounts
    pub fn fee_addresses(&self) -> Result<(Address, Address), ConfigError> {
        Ok((resolve_address(&self.fee_address_1)?, resolve_address(&self.fee_address_2)?))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin.trim().is_empty() {
            return Err(ConfigError::Validation("admin cannot be empty".into()));
        }

        let (first, second) = self.fee_addresses()?;
        if first == second {
            return Err(ConfigError::Validation("fee addresses must differ".into()));
        }

        self.params
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolve an account given as 64 hex digits (optionally `0x`-prefixed) or as
/// a label, which is hashed into a deterministic address.
pub fn resolve_address(account: &str) -> Result<Address, ConfigError> {
    let account = account.trim();
    if account.is_empty() {
        return Err(ConfigError::Validation("account cannot be empty".into()));
    }

    let hex = account.trim_start_matches("0x");
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Address::from_hex(hex).map_err(|e| ConfigError::Validation(e.to_string()));
    }

    Ok(Address::derive(account))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration error
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),
    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Get default data directory
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/aUSD");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("aUSD");
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".ausd");
    }

    PathBuf::from(".ausd")
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
