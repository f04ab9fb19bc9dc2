//! Mock Tuya devices
//!
//! A [`MockConnector`] hands out [`MockDevice`]s whose behaviour is fixed
//! when the connector is built, and records every connection attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tuya_local_lawnmowers::{
    ConnectionConfig, DeviceConnector, DeviceError, DeviceHandle, ProtocolVersion, TuyaDevice,
};

/// How a mock device answers a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Returns state
    Answers,
    /// Refresh succeeds but no state arrives
    Silent,
    /// Refresh fails with a connection error
    Refuses,
    /// Rejects the local key
    BadKey,
    /// Never completes
    Hangs,
}

/// A scripted device
pub struct MockDevice {
    name: String,
    behaviour: Behaviour,
    dps: HashMap<String, Value>,
    product_ids: Vec<String>,
    returned_state: AtomicBool,
    pub refreshes: AtomicUsize,
    pub paused: AtomicUsize,
    pub resumed: AtomicUsize,
    pub closed: AtomicUsize,
}

impl MockDevice {
    /// Create a device with the given behaviour and reported data points
    pub fn new(name: impl Into<String>, behaviour: Behaviour, dps: HashMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            behaviour,
            dps,
            product_ids: Vec::new(),
            returned_state: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            paused: AtomicUsize::new(0),
            resumed: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    /// Set the announced product ids
    pub fn with_product_ids(mut self, product_ids: Vec<String>) -> Self {
        self.product_ids = product_ids;
        self
    }

    pub fn pause_count(&self) -> usize {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resumed.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TuyaDevice for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn async_refresh(&self) -> Result<(), DeviceError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Answers => {
                self.returned_state.store(true, Ordering::SeqCst);
                Ok(())
            }
            Behaviour::Silent => Ok(()),
            Behaviour::Refuses => Err(DeviceError::Connection("connection refused".into())),
            Behaviour::BadKey => Err(DeviceError::Auth),
            Behaviour::Hangs => std::future::pending().await,
        }
    }

    fn has_returned_state(&self) -> bool {
        self.returned_state.load(Ordering::SeqCst)
    }

    fn cached_state(&self) -> HashMap<String, Value> {
        if self.has_returned_state() {
            self.dps.clone()
        } else {
            HashMap::new()
        }
    }

    fn product_ids(&self) -> Vec<String> {
        self.product_ids.clone()
    }

    fn pause(&self) {
        self.paused.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }

    async fn async_close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Data points a MoeBot S mower reports while docked
pub fn mower_dps() -> HashMap<String, Value> {
    HashMap::from([
        ("6".to_string(), json!(100)),
        ("101".to_string(), json!("STANDBY")),
        ("102".to_string(), json!(0)),
        ("103".to_string(), json!(0)),
        ("104".to_string(), json!(false)),
        ("105".to_string(), json!(0)),
    ])
}

/// Transport handing out mock devices
pub struct MockConnector {
    behaviour: Behaviour,
    /// Versions the device answers on; None means every version
    answers_on: Option<Vec<ProtocolVersion>>,
    dps: HashMap<String, Value>,
    product_ids: Vec<String>,
    attempts: Mutex<Vec<ConnectionConfig>>,
    devices: Mutex<Vec<Arc<MockDevice>>>,
}

impl MockConnector {
    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            answers_on: None,
            dps: mower_dps(),
            product_ids: Vec::new(),
            attempts: Mutex::new(Vec::new()),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// A reachable mower
    pub fn responding() -> Self {
        Self::with_behaviour(Behaviour::Answers)
    }

    /// Nothing answers
    pub fn unreachable() -> Self {
        Self::with_behaviour(Behaviour::Refuses)
    }

    pub fn with_bad_key() -> Self {
        Self::with_behaviour(Behaviour::BadKey)
    }

    pub fn silent() -> Self {
        Self::with_behaviour(Behaviour::Silent)
    }

    /// Connections never complete
    pub fn hanging() -> Self {
        Self::with_behaviour(Behaviour::Hangs)
    }

    /// A reachable device that only speaks the given versions
    pub fn answering_on(versions: Vec<ProtocolVersion>) -> Self {
        Self {
            answers_on: Some(versions),
            ..Self::responding()
        }
    }

    /// Replace the reported data points
    pub fn with_dps(mut self, dps: HashMap<String, Value>) -> Self {
        self.dps = dps;
        self
    }

    pub fn with_product_ids(mut self, product_ids: Vec<String>) -> Self {
        self.product_ids = product_ids;
        self
    }

    /// Every connection opened so far, in order
    pub fn attempts(&self) -> Vec<ConnectionConfig> {
        self.attempts.lock().unwrap().clone()
    }

    /// Protocol versions tried so far, in order
    pub fn attempted_versions(&self) -> Vec<ProtocolVersion> {
        self.attempts()
            .iter()
            .map(|config| config.protocol_version)
            .collect()
    }

    /// Devices handed out so far, in order
    pub fn devices(&self) -> Vec<Arc<MockDevice>> {
        self.devices.lock().unwrap().clone()
    }
}

impl DeviceConnector for MockConnector {
    fn connect(&self, config: &ConnectionConfig) -> DeviceHandle {
        self.attempts.lock().unwrap().push(config.clone());

        let behaviour = match &self.answers_on {
            Some(versions) if !versions.contains(&config.protocol_version) => Behaviour::Silent,
            _ => self.behaviour,
        };
        let device = Arc::new(
            MockDevice::new(config.probe_key(), behaviour, self.dps.clone())
                .with_product_ids(self.product_ids.clone()),
        );
        self.devices.lock().unwrap().push(device.clone());
        device
    }
}
