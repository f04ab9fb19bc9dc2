//! Host fixtures
//!
//! Builds config entries and flow managers backed by a temporary config
//! directory, with the integration registered.

use std::collections::HashMap;
use std::sync::Arc;

use ha_config_entries::{ConfigEntries, ConfigEntry, FlowData, FlowManager, Storage};
use serde_json::Value;
use tempfile::TempDir;
use tuya_local_lawnmowers::{DeviceProfiles, LawnmowerIntegration, DOMAIN};

use super::MockConnector;

/// Designed to contain "special" characters that users constantly suspect.
pub const TESTKEY: &str = ")<jO<@)'P1|kR$Kd";

/// A host with the integration registered
pub struct TestHost {
    /// Keeps the config directory alive
    pub dir: TempDir,
    pub entries: Arc<ConfigEntries>,
    pub flows: FlowManager,
    pub integration: Arc<LawnmowerIntegration>,
    pub connector: Arc<MockConnector>,
}

impl TestHost {
    /// Create a host whose devices come from `connector`
    pub fn new(connector: MockConnector) -> Self {
        let dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let flows = FlowManager::new(entries.clone());
        let connector = Arc::new(connector);
        let integration = Arc::new(LawnmowerIntegration::new(
            DeviceProfiles::builtin().unwrap(),
            connector.clone(),
        ));
        integration.register(&entries, &flows);

        Self {
            dir,
            entries,
            flows,
            integration,
            connector,
        }
    }

    /// Add an entry and return its id
    pub async fn add_entry(&self, entry: ConfigEntry) -> String {
        self.entries.add(entry).await.unwrap().entry_id
    }

    pub fn entry(&self, entry_id: &str) -> ConfigEntry {
        self.entries.get(entry_id).unwrap()
    }
}

/// Turn a JSON object into flow data
pub fn flow_data(value: Value) -> FlowData {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Build an entry of this domain at `version`
pub fn mock_entry(version: u32, data: Value, options: Value) -> ConfigEntry {
    ConfigEntry::new(DOMAIN, "test")
        .with_data(flow_data(data))
        .with_options(flow_data(options))
        .with_version(version, 1)
}

/// Entity keys that must never end up in entry data
pub const ENTITY_KEYS: &[&str] = &[
    "lawn_mower",
    "sensor_battery",
    "binary_sensor_problem",
    "sensor_problem_state",
];

pub fn assert_no_entity_keys(data: &HashMap<String, Value>) {
    for key in ENTITY_KEYS {
        assert!(!data.contains_key(*key), "unexpected {} in {:?}", key, data);
    }
}
