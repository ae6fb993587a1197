//! Engine configuration via `jellyfish.toml`
//!
//! A single flat config file: write the commented default once, edit it,
//! reconnect. Every field has a default so an empty file is a valid
//! configuration.

use jellyfish_core::{Error, PropertyPath, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "jellyfish.toml";

/// Engine configuration loaded from `jellyfish.toml`.
///
/// # Example
///
/// ```toml
/// fan_out_concurrency = 3
/// default_sort_by = "data.timestamp"
/// max_slug_length = 255
/// cache_enabled = true
/// stream_channel_capacity = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JellyfishConfig {
    /// Buckets scanned in parallel by one multi-bucket query
    #[serde(default = "default_fan_out_concurrency")]
    pub fan_out_concurrency: usize,
    /// Sort path used when a query gives no `sort_by`
    #[serde(default = "default_sort_by")]
    pub default_sort_by: String,
    /// Longest accepted slug, in bytes
    #[serde(default = "default_max_slug_length")]
    pub max_slug_length: usize,
    /// When false every read goes to the backing store
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// Buffered events per change stream before feeds block
    #[serde(default = "default_stream_channel_capacity")]
    pub stream_channel_capacity: usize,
}

fn default_fan_out_concurrency() -> usize {
    3
}

fn default_sort_by() -> String {
    "data.timestamp".to_string()
}

fn default_max_slug_length() -> usize {
    255
}

fn default_cache_enabled() -> bool {
    true
}

fn default_stream_channel_capacity() -> usize {
    1024
}

impl Default for JellyfishConfig {
    fn default() -> Self {
        Self {
            fan_out_concurrency: default_fan_out_concurrency(),
            default_sort_by: default_sort_by(),
            max_slug_length: default_max_slug_length(),
            cache_enabled: default_cache_enabled(),
            stream_channel_capacity: default_stream_channel_capacity(),
        }
    }
}

impl JellyfishConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for zero-sized pools, slugs or buffers and for
    /// an unparseable `default_sort_by`.
    pub fn validate(&self) -> Result<()> {
        if self.fan_out_concurrency == 0 {
            return Err(Error::Config("fan_out_concurrency must be at least 1".into()));
        }
        if self.max_slug_length == 0 {
            return Err(Error::Config("max_slug_length must be at least 1".into()));
        }
        if self.stream_channel_capacity == 0 {
            return Err(Error::Config("stream_channel_capacity must be at least 1".into()));
        }
        self.default_sort_path()?;
        Ok(())
    }

    /// `default_sort_by` as a path
    pub fn default_sort_path(&self) -> Result<PropertyPath> {
        self.default_sort_by.parse().map_err(|e| {
            Error::Config(format!(
                "Invalid default_sort_by '{}': {}",
                self.default_sort_by, e
            ))
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Jellyfish engine configuration
#
# Buckets scanned in parallel when a query has no fixed type (default: 3)
fan_out_concurrency = 3

# Sort path applied when a query does not pass sort_by
default_sort_by = "data.timestamp"

# Longest accepted slug in bytes
max_slug_length = 255

# Disable to send every read to the backing store
cache_enabled = true

# Events buffered per change stream before feeds apply backpressure
stream_channel_capacity = 1024
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: JellyfishConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
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
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
