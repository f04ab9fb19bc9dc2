//! Config Entry types
//!
//! A ConfigEntry represents a single instance of an integration's configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state_machine::InvalidTransition;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Currently being configured (non-recoverable)
    SetupInProgress,
    /// Successfully set up (recoverable)
    Loaded,
    /// Setup failed (recoverable)
    SetupError,
    /// Version migration failed (not recoverable)
    MigrationError,
    /// Currently unloading (non-recoverable)
    UnloadInProgress,
    /// Unload failed (not recoverable)
    FailedUnload,
}

impl ConfigEntryState {
    /// Check if the entry can be unloaded/reloaded from this state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigEntryState::Loaded | ConfigEntryState::SetupError | ConfigEntryState::NotLoaded
        )
    }
}

/// Source of the config entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Configured via UI/API
    #[default]
    User,
    /// Imported from YAML config
    Import,
    /// Generic discovery
    Discovery,
    /// User reconfiguring existing entry
    Reconfigure,
}

/// Reason an entry was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    /// Disabled by the user
    User,
}

/// A configuration entry for an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g., "tuya_local_lawnmowers")
    pub domain: String,

    /// Human-readable display name
    pub title: String,

    /// Configuration data, only rewritten by migration
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// User-configurable options, overriding `data` where both hold a key
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    /// Major schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Minor schema version
    #[serde(default = "default_minor_version")]
    pub minor_version: u32,

    /// Optional unique identifier for duplicate prevention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Origin type
    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Human-readable explanation for failed states
    #[serde(skip, default)]
    pub reason: Option<String>,

    /// What disabled this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

fn default_minor_version() -> u32 {
    1
}

impl ConfigEntry {
    /// Create a new config entry
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            version: 1,
            minor_version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Set entry data
    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    /// Set entry options
    pub fn with_options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = options;
        self
    }

    /// Set unique_id
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Set source
    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    /// Set version
    pub fn with_version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = version;
        self.minor_version = minor_version;
        self
    }

    /// Value of `key` as the integration sees it at runtime: options first, then data
    pub fn effective_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key).or_else(|| self.data.get(key))
    }

    /// Data overlaid with options
    pub fn effective_config(&self) -> HashMap<String, serde_json::Value> {
        let mut merged = self.data.clone();
        merged.extend(self.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Check if entry is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    /// Check if entry is loaded
    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Attempt to transition to a new state with validation.
    ///
    /// Returns an error if the transition is invalid according to the FSM rules.
    /// On success, updates the state and reason fields.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state.try_transition(new_state)?;
        self.state = new_state;
        self.reason = reason;
        Ok(())
    }
}

/// Update data for a config entry
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<HashMap<String, serde_json::Value>>,
    pub options: Option<HashMap<String, serde_json::Value>>,
    pub unique_id: Option<Option<String>>,
    pub version: Option<u32>,
    pub minor_version: Option<u32>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn version(mut self, version: u32, minor_version: u32) -> Self {
        self.version = Some(version);
        self.minor_version = Some(minor_version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_entry_new() {
        let entry = ConfigEntry::new("tuya_local_lawnmowers", "Back lawn");
        assert_eq!(entry.domain, "tuya_local_lawnmowers");
        assert_eq!(entry.title, "Back lawn");
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
        assert_eq!(entry.version, 1);
        assert!(!entry.entry_id.is_empty());
    }

    #[test]
    fn test_config_entry_builder() {
        let mut data = HashMap::new();
        data.insert("host".to_string(), json!("192.168.1.40"));

        let entry = ConfigEntry::new("tuya_local_lawnmowers", "Mower")
            .with_data(data)
            .with_unique_id("bf1234")
            .with_version(13, 1)
            .with_source(ConfigEntrySource::Import);

        assert_eq!(entry.unique_id, Some("bf1234".to_string()));
        assert_eq!(entry.source, ConfigEntrySource::Import);
        assert_eq!(entry.version, 13);
        assert!(entry.data.contains_key("host"));
    }

    #[test]
    fn test_options_override_data() {
        let entry = ConfigEntry::new("tuya_local_lawnmowers", "Mower")
            .with_data(HashMap::from([
                ("host".to_string(), json!("old.local")),
                ("device_id".to_string(), json!("bf1234")),
            ]))
            .with_options(HashMap::from([("host".to_string(), json!("new.local"))]));

        assert_eq!(entry.effective_value("host"), Some(&json!("new.local")));
        assert_eq!(entry.effective_value("device_id"), Some(&json!("bf1234")));
        assert_eq!(entry.effective_value("missing"), None);

        let merged = entry.effective_config();
        assert_eq!(merged["host"], json!("new.local"));
        assert_eq!(entry.data["host"], json!("old.local"));
    }

    #[test]
    fn test_state_recoverable() {
        assert!(ConfigEntryState::NotLoaded.is_recoverable());
        assert!(ConfigEntryState::Loaded.is_recoverable());
        assert!(ConfigEntryState::SetupError.is_recoverable());

        assert!(!ConfigEntryState::SetupInProgress.is_recoverable());
        assert!(!ConfigEntryState::MigrationError.is_recoverable());
        assert!(!ConfigEntryState::UnloadInProgress.is_recoverable());
        assert!(!ConfigEntryState::FailedUnload.is_recoverable());
    }

    #[test]
    fn test_try_set_state_rejects_invalid() {
        let mut entry = ConfigEntry::new("tuya_local_lawnmowers", "Mower");
        assert!(entry.try_set_state(ConfigEntryState::Loaded, None).is_err());
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);

        entry
            .try_set_state(ConfigEntryState::SetupInProgress, None)
            .unwrap();
        entry
            .try_set_state(
                ConfigEntryState::MigrationError,
                Some("type could not be inferred".to_string()),
            )
            .unwrap();
        assert_eq!(entry.reason.as_deref(), Some("type could not be inferred"));
    }

    #[test]
    fn test_serde_roundtrip_skips_runtime_state() {
        let mut entry = ConfigEntry::new("tuya_local_lawnmowers", "Mower")
            .with_unique_id("bf1234")
            .with_version(13, 1);
        entry.state = ConfigEntryState::SetupError;

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: ConfigEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.unique_id, Some("bf1234".to_string()));
        assert_eq!(parsed.version, 13);
        assert_eq!(parsed.state, ConfigEntryState::NotLoaded);
    }
}
