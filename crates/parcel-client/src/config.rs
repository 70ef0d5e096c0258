//! Drive configuration loaded from environment variables.
//!
//! Every setting has a default so a drive can be opened with zero
//! configuration.

use std::path::PathBuf;

use parcel_shared::constants::{DEFAULT_DESTINATION_LIMIT, DEFAULT_LIST_LIMIT, MAX_UPLOAD_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveConfig {
    /// Directory holding the index and the session file.
    /// Env: `PARCEL_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Largest accepted upload in bytes.
    /// Env: `PARCEL_MAX_UPLOAD_BYTES`
    /// Default: 2 GiB.
    pub max_upload_size: u64,

    /// Uploads running at once in a batch.
    /// Env: `PARCEL_UPLOAD_CONCURRENCY`
    /// Default: `1` (sequential).
    pub upload_concurrency: usize,

    /// How many remote records a refresh reads.
    /// Env: `PARCEL_LIST_LIMIT`
    pub list_limit: usize,

    /// How many conversations the destination picker offers.
    /// Env: `PARCEL_DESTINATION_LIMIT`
    pub destination_limit: usize,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_upload_size: MAX_UPLOAD_SIZE,
            upload_concurrency: 1,
            list_limit: DEFAULT_LIST_LIMIT,
            destination_limit: DEFAULT_DESTINATION_LIMIT,
        }
    }
}

impl DriveConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = var("PARCEL_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(val) = var("PARCEL_MAX_UPLOAD_BYTES") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid PARCEL_MAX_UPLOAD_BYTES, using default"),
            }
        }

        if let Some(val) = var("PARCEL_UPLOAD_CONCURRENCY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.upload_concurrency = n,
                _ => tracing::warn!(value = %val, "Invalid PARCEL_UPLOAD_CONCURRENCY, using default"),
            }
        }

        if let Some(val) = var("PARCEL_LIST_LIMIT") {
            if let Ok(n) = val.parse::<usize>() {
                config.list_limit = n;
            } else {
                tracing::warn!(value = %val, "Invalid PARCEL_LIST_LIMIT, using default");
            }
        }

        if let Some(val) = var("PARCEL_DESTINATION_LIMIT") {
            if let Ok(n) = val.parse::<usize>() {
                config.destination_limit = n;
            } else {
                tracing::warn!(value = %val, "Invalid PARCEL_DESTINATION_LIMIT, using default");
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> DriveConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DriveConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = DriveConfig::default();
        assert_eq!(config.max_upload_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.upload_concurrency, 1);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("PARCEL_DATA_DIR", "/tmp/parcel"),
            ("PARCEL_MAX_UPLOAD_BYTES", "1024"),
            ("PARCEL_UPLOAD_CONCURRENCY", "4"),
            ("PARCEL_LIST_LIMIT", "50"),
        ]);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/parcel")));
        assert_eq!(config.max_upload_size, 1024);
        assert_eq!(config.upload_concurrency, 4);
        assert_eq!(config.list_limit, 50);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_map(&[
            ("PARCEL_MAX_UPLOAD_BYTES", "lots"),
            ("PARCEL_UPLOAD_CONCURRENCY", "0"),
            ("PARCEL_DESTINATION_LIMIT", "-3"),
        ]);
        assert_eq!(config, DriveConfig::default());
    }
}
