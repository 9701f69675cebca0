//! Store configuration via `cellar.toml`
//!
//! On first open of a disk store, a default `cellar.toml` is created in the
//! store directory. To change settings, edit the file and reopen the store,
//! or pass a config to `Store::open_with_config`, which persists it.
//! In-memory stores never read or write a config file.

use cellar_core::{Error, ErrorMask, Result};
use cellar_durability::DurabilityMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the store directory.
pub const CONFIG_FILE_NAME: &str = "cellar.toml";

/// Store configuration loaded from `cellar.toml`.
///
/// # Example
///
/// ```toml
/// durability = "standard"
/// sync_interval_ms = 100
/// sync_batch_size = 1000
/// checkpoint_wal_bytes = 8388608
/// exceptional = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellarConfig {
    /// Durability mode: `"standard"` or `"always"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Maximum time between WAL fsyncs in standard mode.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Maximum WAL appends between fsyncs in standard mode.
    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,
    /// WAL size above which open writes a checkpoint.
    #[serde(default = "default_checkpoint_wal_bytes")]
    pub checkpoint_wal_bytes: u64,
    /// Report the exceptional error set as raisable.
    #[serde(default)]
    pub exceptional: bool,
}

fn default_durability_str() -> String {
    "standard".to_string()
}

fn default_sync_interval_ms() -> u64 {
    100
}

fn default_sync_batch_size() -> usize {
    1000
}

fn default_checkpoint_wal_bytes() -> u64 {
    8 * 1024 * 1024
}

impl Default for CellarConfig {
    fn default() -> Self {
        Self {
            durability: default_durability_str(),
            sync_interval_ms: default_sync_interval_ms(),
            sync_batch_size: default_sync_batch_size(),
            checkpoint_wal_bytes: default_checkpoint_wal_bytes(),
            exceptional: false,
        }
    }
}

impl CellarConfig {
    /// Parse the durability settings into a `DurabilityMode`.
    ///
    /// # Errors
    ///
    /// Returns `INVALID` if the string is not `"standard"` or `"always"`.
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        match self.durability.as_str() {
            "standard" => Ok(DurabilityMode::Standard {
                interval_ms: self.sync_interval_ms,
                batch_size: self.sync_batch_size,
            }),
            "always" => Ok(DurabilityMode::Always),
            other => Err(Error::invalid(format!(
                "Invalid durability mode '{}' in cellar.toml. Expected \"standard\" or \"always\".",
                other
            ))),
        }
    }

    /// Error codes to report as raisable
    pub fn error_mask(&self) -> ErrorMask {
        if self.exceptional {
            ErrorMask::EXCEPTIONAL
        } else {
            ErrorMask::empty()
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# cellardb store configuration
#
# Durability mode: "standard" (default) or "always"
#   "standard" = fsync every sync_interval_ms or sync_batch_size appends
#   "always"   = fsync every update
durability = "standard"
sync_interval_ms = 100
sync_batch_size = 1000

# Write a checkpoint on open when the WAL is larger than this (bytes)
checkpoint_wal_bytes = 8388608

# Treat NOIMPL, INVALID, NOREPOS, NOPERM, BROKEN, SYSTEM and MISC as
# raisable errors (default: false)
exceptional = false
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::system(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: CellarConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.durability_mode()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::system(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::system(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::system(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_core::ErrorCode;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_standard() {
        let config = CellarConfig::default();
        assert_eq!(config.durability, "standard");
        assert_eq!(
            config.durability_mode().unwrap(),
            DurabilityMode::Standard {
                interval_ms: 100,
                batch_size: 1000
            }
        );
        assert!(config.error_mask().is_empty());
    }

    #[test]
    fn parse_always() {
        let config: CellarConfig = toml::from_str("durability = \"always\"").unwrap();
        assert_eq!(config.durability_mode().unwrap(), DurabilityMode::Always);
    }

    #[test]
    fn parse_invalid_mode_returns_error() {
        let config: CellarConfig = toml::from_str("durability = \"turbo\"").unwrap();
        assert_eq!(
            config.durability_mode().unwrap_err().code(),
            Some(ErrorCode::InvalidArgument)
        );
    }

    #[test]
    fn default_toml_parses_to_default() {
        let config: CellarConfig = toml::from_str(CellarConfig::default_toml()).unwrap();
        assert_eq!(config, CellarConfig::default());
    }

    #[test]
    fn exceptional_selects_mask() {
        let config: CellarConfig = toml::from_str("exceptional = true").unwrap();
        assert_eq!(config.error_mask(), ErrorMask::EXCEPTIONAL);
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "durability = \"always\"\n").unwrap();

        CellarConfig::write_default_if_missing(&path).unwrap();

        let config = CellarConfig::from_file(&path).unwrap();
        assert_eq!(config.durability, "always");
        assert_eq!(config.sync_batch_size, 1000);
    }

    #[test]
    fn write_to_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = CellarConfig {
            durability: "always".to_string(),
            checkpoint_wal_bytes: 4096,
            exceptional: true,
            ..CellarConfig::default()
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(CellarConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn unparsable_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "durability = [").unwrap();
        assert_eq!(
            CellarConfig::from_file(&path).unwrap_err().code(),
            Some(ErrorCode::InvalidArgument)
        );
    }
}
