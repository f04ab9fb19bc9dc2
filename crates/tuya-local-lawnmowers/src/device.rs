//! Device handles and the registry of running devices
//!
//! The Tuya transport itself lives behind [`TuyaDevice`]; the integration
//! only needs to refresh state, read what the device reported, and pause a
//! running poller while a probe talks to the same device.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::connection::ConnectionConfig;
use crate::error::DeviceError;

/// A connection to one Tuya device
#[async_trait]
pub trait TuyaDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Ask the device for its current state
    async fn async_refresh(&self) -> Result<(), DeviceError>;

    /// Whether at least one valid state read has completed
    fn has_returned_state(&self) -> bool;

    /// Last reported data points, keyed by dp id
    fn cached_state(&self) -> HashMap<String, Value>;

    /// Product ids the device announced, if any
    fn product_ids(&self) -> Vec<String>;

    /// Stop polling until [`TuyaDevice::resume`]
    fn pause(&self);

    fn resume(&self);

    async fn async_close(&self);
}

pub type DeviceHandle = Arc<dyn TuyaDevice>;

/// Opens device handles; one call per protocol attempt
pub trait DeviceConnector: Send + Sync {
    fn connect(&self, config: &ConnectionConfig) -> DeviceHandle;
}

/// Devices of loaded entries, keyed by probe key
#[derive(Default)]
pub struct RunningDevices {
    devices: DashMap<String, DeviceHandle>,
}

impl RunningDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, device: DeviceHandle) {
        let key = key.into();
        debug!("Registered running device {}", key);
        self.devices.insert(key, device);
    }

    pub fn unregister(&self, key: &str) -> Option<DeviceHandle> {
        self.devices.remove(key).map(|(_, device)| device)
    }

    pub fn get(&self, key: &str) -> Option<DeviceHandle> {
        self.devices.get(key).map(|d| d.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.devices.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Pause the device running under `key` until the guard drops
    pub fn pause(&self, key: &str) -> PauseGuard {
        let device = self.get(key);
        if let Some(device) = &device {
            debug!("Pausing running device {} for probe", key);
            device.pause();
        }
        PauseGuard { device }
    }
}

/// Resumes a paused running device when dropped
#[must_use = "the device resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    device: Option<DeviceHandle>,
}

impl PauseGuard {
    /// Whether a running device was actually paused
    pub fn is_active(&self) -> bool {
        self.device.is_some()
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            device.resume();
        }
    }
}
