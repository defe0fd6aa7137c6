//! Session configuration
//!
//! All fields have defaults, so a partial JSON document is a valid config.

use crate::error::{CoreError, Result};
use crate::fetch::DefaultStateReference;
use crate::store::Schema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prompt printed by the guest shell once it is interactive
pub const DEFAULT_SENTINEL: &str = "localhost:~# ";

/// Persistent slot location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_name: String,
    pub version: u32,
    pub collection: String,
    pub key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_name: "v86-state".to_string(),
            version: 1,
            collection: "states".to_string(),
            key: "alpine-state".to_string(),
        }
    }
}

impl StoreConfig {
    /// Schema the slot's database is opened with
    pub fn schema(&self) -> Schema {
        Schema {
            name: self.db_name.clone(),
            version: self.version,
            collections: vec![self.collection.clone()],
        }
    }
}

/// Boot detection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Exact trailing text that marks a ready shell prompt
    pub sentinel: String,
    /// Period of the "still waiting" diagnostic during a cold boot
    pub diagnostic_interval_secs: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            diagnostic_interval_secs: 5,
        }
    }
}

impl BootConfig {
    pub fn diagnostic_interval(&self) -> Duration {
        Duration::from_secs(self.diagnostic_interval_secs.max(1))
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Distribution name shown in the loading banner
    pub distro_name: String,
    pub store: StoreConfig,
    /// Baked-in snapshot used when nothing is saved; `None` disables it
    pub default_state: Option<DefaultStateReference>,
    pub boot: BootConfig,
    pub flush_delay_ms: u64,
    pub resize_settle_ms: u64,
    pub attach_settle_ms: u64,
    /// Autosave period; 0 disables autosave
    pub autosave_interval_secs: u64,
    pub export_delay_ms: u64,
    pub export_file_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            distro_name: "Alpine".to_string(),
            store: StoreConfig::default(),
            default_state: Some(DefaultStateReference::new("./alpine-state.bin")),
            boot: BootConfig::default(),
            flush_delay_ms: 100,
            resize_settle_ms: 1000,
            attach_settle_ms: 500,
            autosave_interval_secs: 60,
            export_delay_ms: 3000,
            export_file_name: "v86state.bin".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn resize_settle(&self) -> Duration {
        Duration::from_millis(self.resize_settle_ms)
    }

    pub fn attach_settle(&self) -> Duration {
        Duration::from_millis(self.attach_settle_ms)
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_interval_secs > 0).then(|| Duration::from_secs(self.autosave_interval_secs))
    }

    pub fn export_delay(&self) -> Duration {
        Duration::from_millis(self.export_delay_ms)
    }

    /// Set the default-state location (`None` disables the default)
    pub fn with_default_state(mut self, location: Option<String>) -> Self {
        self.default_state = location.map(DefaultStateReference::new);
        self
    }

    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.boot.sentinel = sentinel.into();
        self
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval_secs = interval.as_secs();
        self
    }

    pub fn with_export_delay(mut self, delay: Duration) -> Self {
        self.export_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Reject settings a session cannot run with
    ///
    /// An empty sentinel would end a cold boot on the first output byte.
    pub fn validate(&self) -> Result<()> {
        if self.boot.sentinel.is_empty() {
            return Err(CoreError::InvalidState("boot sentinel must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_distro_name(mut self, name: impl Into<String>) -> Self {
        self.distro_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.store.db_name, "v86-state");
        assert_eq!(config.store.key, "alpine-state");
        assert_eq!(config.boot.sentinel, "localhost:~# ");
        assert_eq!(config.flush_delay(), Duration::from_millis(100));
        assert_eq!(config.resize_settle(), Duration::from_secs(1));
        assert_eq!(config.attach_settle(), Duration::from_millis(500));
        assert_eq!(config.autosave_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.export_file_name, "v86state.bin");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{ "distro_name": "Debian", "boot": { "sentinel": "$ " }, "autosave_interval_secs": 0 }"#,
        )
        .unwrap();

        assert_eq!(config.distro_name, "Debian");
        assert_eq!(config.boot.sentinel, "$ ");
        assert_eq!(config.boot.diagnostic_interval_secs, 5);
        assert_eq!(config.autosave_interval(), None);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::default()
            .with_default_state(None)
            .with_sentinel("# ")
            .with_autosave_interval(Duration::from_secs(10))
            .with_export_delay(Duration::ZERO);

        assert!(config.default_state.is_none());
        assert_eq!(config.boot.sentinel, "# ");
        assert_eq!(config.autosave_interval_secs, 10);
        assert_eq!(config.export_delay(), Duration::ZERO);
    }

    #[test]
    fn test_empty_sentinel_rejected() {
        assert!(SessionConfig::default().validate().is_ok());

        let config: SessionConfig =
            serde_json::from_str(r#"{ "boot": { "sentinel": "" } }"#).unwrap();
        assert!(matches!(config.validate(), Err(CoreError::InvalidState(_))));
        assert!(SessionConfig::default().with_sentinel("").validate().is_err());
    }

    #[test]
    fn test_store_schema() {
        let schema = StoreConfig::default().schema();
        assert_eq!(schema.name, "v86-state");
        assert_eq!(schema.version, 1);
        assert_eq!(schema.collections, vec!["states".to_string()]);
    }
}
