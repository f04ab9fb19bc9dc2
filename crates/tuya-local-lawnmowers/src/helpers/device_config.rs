//! Device type profiles
//!
//! Each supported device type is described by a YAML document naming the
//! data points (dps) its entities read. The file stem is the profile's
//! `config_type`, the value stored as `type` in config entries.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::device::TuyaDevice;
use crate::error::{DeviceConfigError, DeviceConfigResult};

/// Profiles compiled into the crate, in declaration order
const BUILTIN_PROFILES: &[(&str, &str)] = &[(
    "moebot_s_mower",
    include_str!("../../devices/moebot_s_mower.yaml"),
)];

/// Score of a profile that lists one of the device's product ids
pub const PRODUCT_MATCH: u8 = 100;

/// Value type of a data point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DpType {
    Boolean,
    Integer,
    String,
    Bitfield,
    Base64,
    Hex,
    Json,
}

impl DpType {
    /// Whether a reported value can be read as this type
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            DpType::Boolean => value.is_boolean(),
            DpType::Integer | DpType::Bitfield => value.is_i64() || value.is_u64(),
            DpType::String | DpType::Base64 | DpType::Hex | DpType::Json => value.is_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DpConfig {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub dp_type: DpType,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub entity: String,
    #[serde(default)]
    pub class: Option<String>,
    pub dps: Vec<DpConfig>,
}

impl EntityConfig {
    /// Identifier of the entity within its device, e.g. `sensor_battery`
    pub fn config_id(&self) -> String {
        match &self.class {
            Some(class) => format!("{}_{}", self.entity, class),
            None => self.entity.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileDocument {
    name: String,
    #[serde(default)]
    legacy_type: Option<String>,
    #[serde(default)]
    products: Vec<ProductConfig>,
    entities: Vec<EntityConfig>,
}

/// What a responding device tells us about itself
#[derive(Debug, Clone, Default)]
pub struct DeviceSignals {
    pub product_ids: Vec<String>,
    /// Reported data points keyed by dp id
    pub dps: HashMap<String, Value>,
}

impl DeviceSignals {
    pub fn from_device(device: &dyn TuyaDevice) -> Self {
        Self {
            product_ids: device.product_ids(),
            dps: device.cached_state(),
        }
    }
}

/// One supported device type
#[derive(Debug, Clone)]
pub struct DeviceTypeProfile {
    config_type: String,
    name: String,
    legacy_type: Option<String>,
    products: Vec<ProductConfig>,
    entities: Vec<EntityConfig>,
}

impl DeviceTypeProfile {
    /// Parse a profile document; `config_type` is the file stem
    pub fn from_yaml(config_type: &str, content: &str) -> DeviceConfigResult<Self> {
        let doc: ProfileDocument =
            serde_yaml::from_str(content).map_err(|e| DeviceConfigError::ParseYaml {
                config_type: config_type.to_string(),
                source: e,
            })?;

        if doc.entities.is_empty() {
            return Err(DeviceConfigError::Invalid {
                config_type: config_type.to_string(),
                reason: "no entities".to_string(),
            });
        }

        Ok(Self {
            config_type: config_type.to_string(),
            name: doc.name,
            legacy_type: doc.legacy_type,
            products: doc.products,
            entities: doc.entities,
        })
    }

    pub fn config_type(&self) -> &str {
        &self.config_type
    }

    /// Display name, offered as the default entry title
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name older entries stored; the config type when none is declared
    pub fn legacy_type(&self) -> &str {
        self.legacy_type.as_deref().unwrap_or(&self.config_type)
    }

    pub fn products(&self) -> &[ProductConfig] {
        &self.products
    }

    pub fn all_entities(&self) -> &[EntityConfig] {
        &self.entities
    }

    fn all_dps(&self) -> impl Iterator<Item = &DpConfig> {
        self.entities.iter().flat_map(|e| e.dps.iter())
    }

    fn find_dp(&self, id: &str) -> Option<&DpConfig> {
        self.all_dps().find(|dp| dp.id.to_string() == id)
    }

    /// How well this profile fits a device, 0 (no fit) to 100 (product match)
    pub fn match_quality(&self, signals: &DeviceSignals) -> u8 {
        if self
            .products
            .iter()
            .any(|p| signals.product_ids.iter().any(|id| *id == p.id))
        {
            return PRODUCT_MATCH;
        }

        for dp in self.all_dps() {
            match signals.dps.get(&dp.id.to_string()) {
                Some(value) if !dp.dp_type.accepts(value) => return 0,
                None if !dp.optional => return 0,
                _ => {}
            }
        }

        if signals.dps.is_empty() {
            return 0;
        }

        let known = signals
            .dps
            .keys()
            .filter(|id| self.find_dp(id).is_some())
            .count();
        let percent = known * 100 / signals.dps.len();
        percent.min(usize::from(PRODUCT_MATCH - 1)) as u8
    }
}

/// The immutable set of supported device types, in declaration order
#[derive(Debug, Clone, Default)]
pub struct DeviceProfiles {
    profiles: IndexMap<String, Arc<DeviceTypeProfile>>,
}

impl DeviceProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// The profiles shipped with the crate
    pub fn builtin() -> DeviceConfigResult<Self> {
        let mut profiles = Self::new();
        for (config_type, content) in BUILTIN_PROFILES {
            profiles.insert(DeviceTypeProfile::from_yaml(config_type, content)?)?;
        }
        Ok(profiles)
    }

    pub fn insert(&mut self, profile: DeviceTypeProfile) -> DeviceConfigResult<()> {
        if self.profiles.contains_key(profile.config_type()) {
            return Err(DeviceConfigError::Duplicate {
                config_type: profile.config_type().to_string(),
            });
        }
        debug!("Loaded device profile {}", profile.config_type());
        self.profiles
            .insert(profile.config_type().to_string(), Arc::new(profile));
        Ok(())
    }

    /// Add every `*.yaml` / `*.yml` profile in `dir`, sorted by file name
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> DeviceConfigResult<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(DeviceConfigError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| DeviceConfigError::ReadFile {
                path: dir.to_path_buf(),
                source: e,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        for path in &files {
            let config_type = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            let content = fs::read_to_string(path).map_err(|e| DeviceConfigError::ReadFile {
                path: path.clone(),
                source: e,
            })?;
            self.insert(DeviceTypeProfile::from_yaml(&config_type, &content)?)?;
        }

        info!("Loaded {} device profiles from {}", files.len(), dir.display());
        Ok(files.len())
    }

    pub fn get(&self, config_type: &str) -> Option<Arc<DeviceTypeProfile>> {
        self.profiles.get(config_type).cloned()
    }

    /// Resolve a stored type: config type first, then legacy alias
    pub fn lookup(&self, stored_type: &str) -> Option<Arc<DeviceTypeProfile>> {
        self.get(stored_type).or_else(|| {
            self.profiles
                .values()
                .find(|p| p.legacy_type() == stored_type)
                .cloned()
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceTypeProfile>> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
