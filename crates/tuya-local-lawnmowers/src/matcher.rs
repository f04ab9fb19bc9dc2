//! Ranks device type profiles against a responding device

use std::sync::Arc;

use tracing::debug;

use crate::device::TuyaDevice;
use crate::helpers::{DeviceProfiles, DeviceSignals, DeviceTypeProfile};

pub struct TypeMatcher {
    profiles: Arc<DeviceProfiles>,
}

impl TypeMatcher {
    pub fn new(profiles: Arc<DeviceProfiles>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &DeviceProfiles {
        &self.profiles
    }

    /// Profiles that fit the device's signals, best first.
    ///
    /// Equal scores keep declaration order; profiles scoring 0 are left out.
    pub fn rank(&self, signals: &DeviceSignals) -> Vec<Arc<DeviceTypeProfile>> {
        let mut scored: Vec<(u8, Arc<DeviceTypeProfile>)> = self
            .profiles
            .iter()
            .map(|profile| (profile.match_quality(signals), profile.clone()))
            .filter(|(quality, _)| *quality > 0)
            .collect();
        // sort_by is stable
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        for (quality, profile) in &scored {
            debug!("Candidate type {} scored {}", profile.config_type(), quality);
        }
        scored.into_iter().map(|(_, profile)| profile).collect()
    }

    pub fn possible_types(&self, device: &dyn TuyaDevice) -> Vec<Arc<DeviceTypeProfile>> {
        self.rank(&DeviceSignals::from_device(device))
    }

    /// Config type of the best candidate
    pub fn inferred_type(&self, device: &dyn TuyaDevice) -> Option<String> {
        self.possible_types(device)
            .first()
            .map(|profile| profile.config_type().to_string())
    }

    /// Resolve a stored type by config type or legacy alias
    pub fn lookup(&self, stored_type: &str) -> Option<Arc<DeviceTypeProfile>> {
        self.profiles.lookup(stored_type)
    }
}
