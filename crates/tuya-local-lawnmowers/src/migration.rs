//! Config entry migration
//!
//! Steps run in order on a working copy of the entry. The entry is only
//! replaced once the last step has brought the copy to [`CONFIG_VERSION`].

use std::ops::RangeInclusive;
use std::sync::Arc;

use ha_config_entries::ConfigEntry;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionConfig, ProtocolVersion};
use crate::constants::{
    CONFIG_VERSION, CONF_DEVICE_CID, CONF_POLL_ONLY, CONF_PROTOCOL_VERSION,
    CONF_TYPE, LEGACY_FEATURE_FLAGS, TYPE_AUTO,
};
use crate::error::MigrationError;
use crate::matcher::TypeMatcher;
use crate::probe::DeviceProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    /// Feature flags move from data to options
    SplitOptions,
    /// `type: auto` is replaced by the type the device is detected as
    ResolveAutoType,
    /// Legacy type names become config types
    RenameLegacyTypes,
    /// Protocol versions are stored as numbers, or `"auto"`
    NormalizeProtocolVersion,
    /// `poll_only` always present, empty `device_cid` dropped
    NormalizeDeviceFields,
}

impl MigrationStep {
    pub const ALL: [MigrationStep; 5] = [
        MigrationStep::SplitOptions,
        MigrationStep::ResolveAutoType,
        MigrationStep::RenameLegacyTypes,
        MigrationStep::NormalizeProtocolVersion,
        MigrationStep::NormalizeDeviceFields,
    ];

    /// Entry versions this step upgrades
    pub fn applies_to(self) -> RangeInclusive<u32> {
        match self {
            MigrationStep::SplitOptions => 1..=1,
            MigrationStep::ResolveAutoType => 2..=3,
            MigrationStep::RenameLegacyTypes => 4..=9,
            MigrationStep::NormalizeProtocolVersion => 10..=11,
            MigrationStep::NormalizeDeviceFields => 12..=12,
        }
    }

    /// Entry version after the step
    pub fn target(self) -> u32 {
        match self {
            MigrationStep::SplitOptions => 2,
            MigrationStep::ResolveAutoType => 4,
            MigrationStep::RenameLegacyTypes => 10,
            MigrationStep::NormalizeProtocolVersion => 12,
            MigrationStep::NormalizeDeviceFields => 13,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MigrationStep::SplitOptions => "split_options",
            MigrationStep::ResolveAutoType => "resolve_auto_type",
            MigrationStep::RenameLegacyTypes => "rename_legacy_types",
            MigrationStep::NormalizeProtocolVersion => "normalize_protocol_version",
            MigrationStep::NormalizeDeviceFields => "normalize_device_fields",
        }
    }

    /// The step that upgrades `version`, if any
    pub fn for_version(version: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|step| step.applies_to().contains(&version))
    }
}

pub struct EntryMigrator {
    probe: Arc<DeviceProbe>,
    matcher: Arc<TypeMatcher>,
}

impl EntryMigrator {
    pub fn new(probe: Arc<DeviceProbe>, matcher: Arc<TypeMatcher>) -> Self {
        Self { probe, matcher }
    }

    /// Bring `entry` to the current version; false leaves it untouched
    pub async fn migrate_entry(&self, entry: &mut ConfigEntry) -> bool {
        let from = entry.version;
        match self.migrate(entry).await {
            Ok(()) => {
                if from != entry.version {
                    info!(
                        "Migrated entry {} from version {} to {}",
                        entry.entry_id, from, entry.version
                    );
                }
                true
            }
            Err(err) => {
                warn!(
                    "Migration of entry {} from version {} failed: {}",
                    entry.entry_id, from, err
                );
                false
            }
        }
    }

    pub async fn migrate(&self, entry: &mut ConfigEntry) -> Result<(), MigrationError> {
        if entry.version > CONFIG_VERSION {
            return Err(MigrationError::FromFuture(entry.version));
        }

        if entry.version == CONFIG_VERSION {
            return Ok(());
        }

        let mut working = entry.clone();
        while working.version < CONFIG_VERSION {
            let step = MigrationStep::for_version(working.version)
                .ok_or(MigrationError::NoStep(working.version))?;
            debug!(
                "Entry {}: running {} (version {} -> {})",
                working.entry_id,
                step.name(),
                working.version,
                step.target()
            );
            self.apply(step, &mut working).await?;
            working.version = step.target();
        }

        // Whatever version it came from, a migrated entry names a known type
        self.resolve_auto_type(&mut working).await?;
        self.rename_legacy_type(&mut working)?;

        *entry = working;
        Ok(())
    }

    async fn apply(&self, step: MigrationStep, entry: &mut ConfigEntry) -> Result<(), MigrationError> {
        match step {
            MigrationStep::SplitOptions => {
                carry_feature_flags(entry, true);
                Ok(())
            }
            MigrationStep::ResolveAutoType => self.resolve_auto_type(entry).await,
            MigrationStep::RenameLegacyTypes => self.rename_legacy_type(entry),
            MigrationStep::NormalizeProtocolVersion => normalize_protocol_version(entry),
            MigrationStep::NormalizeDeviceFields => {
                normalize_device_fields(entry);
                Ok(())
            }
        }
    }

    async fn resolve_auto_type(&self, entry: &mut ConfigEntry) -> Result<(), MigrationError> {
        let stored = entry.data.get(CONF_TYPE).and_then(Value::as_str);
        if !matches!(stored, None | Some(TYPE_AUTO)) {
            return Ok(());
        }

        let config = ConnectionConfig::from_entry(entry)?;
        let unresolved = || MigrationError::UnresolvedType(config.device_id.clone());
        let device = self
            .probe
            .test_connection(&config)
            .await
            .ok_or_else(unresolved)?;
        let inferred = self.matcher.inferred_type(device.as_ref());
        device.async_close().await;

        let inferred = inferred.ok_or_else(unresolved)?;
        info!("Device {} detected as {}", config.device_id, inferred);
        entry.data.insert(CONF_TYPE.to_string(), Value::String(inferred));
        Ok(())
    }

    fn rename_legacy_type(&self, entry: &mut ConfigEntry) -> Result<(), MigrationError> {
        let stored = entry
            .data
            .get(CONF_TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let profile = self
            .matcher
            .lookup(&stored)
            .ok_or(MigrationError::UnknownType(stored))?;
        entry.data.insert(
            CONF_TYPE.to_string(),
            Value::String(profile.config_type().to_string()),
        );
        Ok(())
    }
}

/// Move feature flags out of data. Options win when both hold a flag.
fn carry_feature_flags(entry: &mut ConfigEntry, default_absent: bool) {
    for flag in LEGACY_FEATURE_FLAGS {
        let from_data = entry.data.remove(*flag);
        if entry.options.contains_key(*flag) {
            continue;
        }
        match from_data {
            Some(value) => {
                entry.options.insert(flag.to_string(), value);
            }
            None if default_absent => {
                entry.options.insert(flag.to_string(), Value::Bool(false));
            }
            None => {}
        }
    }
}

fn normalize_protocol_version(entry: &mut ConfigEntry) -> Result<(), MigrationError> {
    let version = match entry.data.get(CONF_PROTOCOL_VERSION) {
        None | Some(Value::Null) => ProtocolVersion::Auto,
        Some(value) => ProtocolVersion::from_value(value)
            .ok_or_else(|| MigrationError::InvalidProtocolVersion(value.clone()))?,
    };
    entry
        .data
        .insert(CONF_PROTOCOL_VERSION.to_string(), version.to_value());
    Ok(())
}

fn normalize_device_fields(entry: &mut ConfigEntry) {
    entry
        .data
        .entry(CONF_POLL_ONLY.to_string())
        .or_insert(Value::Bool(false));

    let empty_cid = match entry.data.get(CONF_DEVICE_CID) {
        Some(Value::String(cid)) => cid.trim().is_empty(),
        Some(Value::Null) => true,
        _ => false,
    };
    if empty_cid {
        entry.data.remove(CONF_DEVICE_CID);
    }

    // Flags some releases left behind in data
    carry_feature_flags(entry, false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_cover_every_version() {
        let mut version = 1;
        for step in MigrationStep::ALL {
            assert!(step.applies_to().contains(&version), "{}", step.name());
            assert!(step.target() > *step.applies_to().end());
            version = step.target();
        }
        assert_eq!(version, CONFIG_VERSION);

        for v in 1..CONFIG_VERSION {
            assert!(MigrationStep::for_version(v).is_some(), "version {}", v);
        }
        assert!(MigrationStep::for_version(CONFIG_VERSION).is_none());
        assert!(MigrationStep::for_version(0).is_none());
    }

    #[test]
    fn test_carry_feature_flags_prefers_options() {
        let mut entry = ConfigEntry::new("tuya_local_lawnmowers", "Mower")
            .with_data(
                [
                    ("lawn_mower".to_string(), Value::Bool(false)),
                    ("sensor_battery".to_string(), Value::Bool(true)),
                ]
                .into(),
            )
            .with_options([("lawn_mower".to_string(), Value::Bool(true))].into());

        carry_feature_flags(&mut entry, true);

        assert!(entry.data.is_empty());
        assert_eq!(entry.options["lawn_mower"], Value::Bool(true));
        assert_eq!(entry.options["sensor_battery"], Value::Bool(true));
        assert_eq!(entry.options["binary_sensor_problem"], Value::Bool(false));
        assert_eq!(entry.options["sensor_problem_state"], Value::Bool(false));
    }

    #[test]
    fn test_normalize_fields() {
        let mut entry = ConfigEntry::new("tuya_local_lawnmowers", "Mower").with_data(
            [
                (CONF_PROTOCOL_VERSION.to_string(), Value::String("3.4".into())),
                (CONF_DEVICE_CID.to_string(), Value::String(String::new())),
            ]
            .into(),
        );

        normalize_protocol_version(&mut entry).unwrap();
        normalize_device_fields(&mut entry);

        assert_eq!(entry.data[CONF_PROTOCOL_VERSION], serde_json::json!(3.4));
        assert_eq!(entry.data[CONF_POLL_ONLY], Value::Bool(false));
        assert!(!entry.data.contains_key(CONF_DEVICE_CID));
        assert!(entry.options.is_empty());

        entry
            .data
            .insert(CONF_PROTOCOL_VERSION.to_string(), serde_json::json!(4.0));
        assert!(matches!(
            normalize_protocol_version(&mut entry),
            Err(MigrationError::InvalidProtocolVersion(_))
        ));
    }
}
