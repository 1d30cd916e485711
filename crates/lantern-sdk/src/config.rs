use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use lantern_blob::DEFAULT_COMPRESSION_THRESHOLD;
use lantern_store::{StoreSettings, SyncMode};
use lantern_types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Name of the configuration file inside a store directory.
pub const CONFIG_FILE: &str = "lantern.toml";

/// Store configuration, usually read from a TOML file.
///
/// ```toml
/// compression_threshold = 4096
/// refresh_interval_ms = 250
/// checkpoint_wal_bytes = 8388608
/// sync = "os_default"
/// max_age_days = 7
///
/// [app_info]
/// name = "demo"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Payloads larger than this are compressed at rest.
    pub compression_threshold: usize,
    /// Minimum age of a reader snapshot before it refreshes. Unset refreshes
    /// on every read after a commit.
    pub refresh_interval_ms: Option<u64>,
    pub checkpoint_wal_bytes: u64,
    pub sync: SyncMode,
    /// Records older than this are removed by `sweep`. Unset keeps
    /// everything.
    pub max_age_days: Option<u32>,
    /// Copied into session metadata and exported documents.
    pub app_info: BTreeMap<String, String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            refresh_interval_ms: None,
            checkpoint_wal_bytes: 8 * 1024 * 1024,
            sync: SyncMode::default(),
            max_age_days: Some(7),
            app_info: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Self::from_toml(&text)
    }

    /// Load the configuration kept in a store directory.
    pub fn load_for_store(dir: &Path) -> SdkResult<Self> {
        Self::load(&dir.join(CONFIG_FILE))
    }

    pub fn from_toml(text: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SdkError::Config(e.to_string()))?;
        if let Some(days) = config.max_age_days {
            retention_cutoff(days, Utc::now())?;
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn settings(&self) -> StoreSettings {
        StoreSettings {
            compression_threshold: self.compression_threshold,
            refresh_interval: self.refresh_interval_ms.map(Duration::from_millis),
            checkpoint_wal_bytes: self.checkpoint_wal_bytes,
            sync: self.sync,
        }
    }
}

/// The instant `days` before `now`; records created earlier have expired.
pub fn retention_cutoff(days: u32, now: Timestamp) -> SdkResult<Timestamp> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| SdkError::Config(format!("max_age_days = {days} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::load(&dir.path().join("lantern.toml")).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = StoreConfig::from_toml(
            r#"
            refresh_interval_ms = 100
            sync = "every_write"

            [app_info]
            name = "demo"
            "#,
        )
        .unwrap();
        assert_eq!(config.refresh_interval_ms, Some(100));
        assert_eq!(config.sync, SyncMode::EveryWrite);
        assert_eq!(config.app_info.get("name").map(String::as_str), Some("demo"));
        assert_eq!(config.compression_threshold, DEFAULT_COMPRESSION_THRESHOLD);

        let settings = config.settings();
        assert_eq!(settings.refresh_interval, Some(Duration::from_millis(100)));
    }

    #[test]
    fn written_config_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lantern.toml");
        let config = StoreConfig {
            max_age_days: None,
            ..StoreConfig::default()
        };
        fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        assert!(matches!(
            StoreConfig::from_toml("sync = 12"),
            Err(SdkError::Config(_))
        ));
    }

    #[test]
    fn retention_out_of_range_is_a_config_error() {
        assert!(matches!(
            StoreConfig::from_toml("max_age_days = 200000000"),
            Err(SdkError::Config(_))
        ));
        assert!(matches!(
            retention_cutoff(u32::MAX, Utc::now()),
            Err(SdkError::Config(_))
        ));

        let now = Utc::now();
        assert_eq!(retention_cutoff(7, now).unwrap(), now - TimeDelta::days(7));
    }
}
