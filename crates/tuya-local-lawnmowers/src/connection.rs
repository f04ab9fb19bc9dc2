//! Connection parameters of a local Tuya device

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ha_config_entries::ConfigEntry;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::constants::{CONF_DEVICE_ID, CONF_HOST, CONF_LOCAL_KEY};
use crate::error::ConnectionConfigError;

/// Tuya local protocol version.
///
/// Stored as a JSON number (`3.3`), except `auto` which is stored as the
/// string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// Let the probe find a version the device answers on
    #[default]
    Auto,
    V3_1,
    V3_2,
    V3_3,
    V3_4,
    V3_5,
    V3_22,
}

impl ProtocolVersion {
    /// Order `auto` tries versions in; 3.3 is by far the most common
    pub const PROBE_ORDER: [ProtocolVersion; 6] = [
        ProtocolVersion::V3_3,
        ProtocolVersion::V3_1,
        ProtocolVersion::V3_2,
        ProtocolVersion::V3_4,
        ProtocolVersion::V3_5,
        ProtocolVersion::V3_22,
    ];

    /// Selectable versions, as offered in forms
    pub const ALL: [ProtocolVersion; 7] = [
        ProtocolVersion::Auto,
        ProtocolVersion::V3_1,
        ProtocolVersion::V3_2,
        ProtocolVersion::V3_3,
        ProtocolVersion::V3_4,
        ProtocolVersion::V3_5,
        ProtocolVersion::V3_22,
    ];

    pub fn as_f64(self) -> Option<f64> {
        match self {
            ProtocolVersion::Auto => None,
            ProtocolVersion::V3_1 => Some(3.1),
            ProtocolVersion::V3_2 => Some(3.2),
            ProtocolVersion::V3_3 => Some(3.3),
            ProtocolVersion::V3_4 => Some(3.4),
            ProtocolVersion::V3_5 => Some(3.5),
            ProtocolVersion::V3_22 => Some(3.22),
        }
    }

    fn from_f64(version: f64) -> Option<Self> {
        // Hundredths keep 3.2 and 3.22 apart
        match (version * 100.0).round() as i64 {
            310 => Some(ProtocolVersion::V3_1),
            320 => Some(ProtocolVersion::V3_2),
            330 => Some(ProtocolVersion::V3_3),
            340 => Some(ProtocolVersion::V3_4),
            350 => Some(ProtocolVersion::V3_5),
            322 => Some(ProtocolVersion::V3_22),
            _ => None,
        }
    }

    /// Persisted form: `"auto"` or a number
    pub fn to_value(self) -> Value {
        match self.as_f64() {
            None => Value::String("auto".to_string()),
            Some(version) => serde_json::Number::from_f64(version)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }

    /// Accepts `"auto"`, a number, or a numeric string
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64().and_then(Self::from_f64),
            _ => None,
        }
    }

    /// Form select options
    pub fn choices() -> Vec<Value> {
        Self::ALL.iter().map(|v| v.to_value()).collect()
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ProtocolVersion::Auto);
        }
        s.parse::<f64>()
            .ok()
            .and_then(Self::from_f64)
            .ok_or_else(|| format!("unknown protocol version '{}'", s))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_f64() {
            None => f.write_str("auto"),
            Some(version) => write!(f, "{}", version),
        }
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_f64() {
            None => serializer.serialize_str("auto"),
            Some(version) => serializer.serialize_f64(version),
        }
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown protocol version {}", value)))
    }
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Everything needed to talk to one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub device_id: String,
    pub host: String,
    pub local_key: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    /// Sub-device id behind a gateway
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub device_cid: Option<String>,
    /// Read-only mode: no commands are sent
    #[serde(default)]
    pub poll_only: bool,
}

impl ConnectionConfig {
    pub fn new(
        device_id: impl Into<String>,
        host: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            local_key: local_key.into(),
            protocol_version: ProtocolVersion::Auto,
            device_cid: None,
            poll_only: false,
        }
    }

    pub fn with_protocol_version(mut self, protocol_version: ProtocolVersion) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    pub fn with_device_cid(mut self, device_cid: impl Into<String>) -> Self {
        self.device_cid = Some(device_cid.into()).filter(|cid: &String| !cid.is_empty());
        self
    }

    pub fn with_poll_only(mut self, poll_only: bool) -> Self {
        self.poll_only = poll_only;
        self
    }

    /// Build from flow or entry data; unrelated keys are ignored
    pub fn from_map(map: &HashMap<String, Value>) -> Result<Self, ConnectionConfigError> {
        let object: serde_json::Map<String, Value> =
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let config: Self = serde_json::from_value(Value::Object(object))?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration an entry runs with: options over data
    pub fn from_entry(entry: &ConfigEntry) -> Result<Self, ConnectionConfigError> {
        Self::from_map(&entry.effective_config())
    }

    pub fn validate(&self) -> Result<(), ConnectionConfigError> {
        for (key, value) in [
            (CONF_DEVICE_ID, &self.device_id),
            (CONF_HOST, &self.host),
            (CONF_LOCAL_KEY, &self.local_key),
        ] {
            if value.trim().is_empty() {
                return Err(ConnectionConfigError::Empty(key));
            }
        }
        Ok(())
    }

    /// Key a running device is registered under: the sub-device id if any
    pub fn probe_key(&self) -> &str {
        self.device_cid.as_deref().unwrap_or(&self.device_id)
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(object)) => object.into_iter().collect(),
            _ => HashMap::new(),
        }
    }
}
