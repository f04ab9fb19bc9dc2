//! Tuya local lawn mowers
//!
//! Config flow, options flow and entry migration for lawn mowers that speak
//! the Tuya local protocol. The wire protocol itself is provided through a
//! [`DeviceConnector`].

pub mod config_flow;
pub mod connection;
pub mod constants;
pub mod device;
pub mod error;
pub mod helpers;
pub mod matcher;
pub mod migration;
pub mod options_flow;
pub mod probe;

use std::sync::Arc;

use async_trait::async_trait;
use ha_config_entries::{
    ConfigEntries, ConfigEntry, EntryHandler, FlowHandler, FlowHandlerFactory, FlowManager,
};
use serde_json::Value;
use tracing::{debug, info};

pub use config_flow::{ConfigFlow, ConfigFlowStep, FlowState};
pub use connection::{ConnectionConfig, ProtocolVersion};
pub use constants::{CONFIG_VERSION, DOMAIN};
pub use device::{DeviceConnector, DeviceHandle, PauseGuard, RunningDevices, TuyaDevice};
pub use error::{ConnectionConfigError, DeviceConfigError, DeviceError, MigrationError};
pub use helpers::{DeviceProfiles, DeviceSignals, DeviceTypeProfile};
pub use matcher::TypeMatcher;
pub use migration::{EntryMigrator, MigrationStep};
pub use options_flow::OptionsFlow;
pub use probe::DeviceProbe;

use constants::CONF_TYPE;

/// The integration, wired to one set of device profiles and one transport
pub struct LawnmowerIntegration {
    connector: Arc<dyn DeviceConnector>,
    running: Arc<RunningDevices>,
    matcher: Arc<TypeMatcher>,
    probe: Arc<DeviceProbe>,
    migrator: EntryMigrator,
}

impl LawnmowerIntegration {
    pub fn new(profiles: DeviceProfiles, connector: Arc<dyn DeviceConnector>) -> Self {
        let running = Arc::new(RunningDevices::new());
        let matcher = Arc::new(TypeMatcher::new(Arc::new(profiles)));
        let probe = Arc::new(DeviceProbe::new(connector.clone(), running.clone()));
        let migrator = EntryMigrator::new(probe.clone(), matcher.clone());

        Self {
            connector,
            running,
            matcher,
            probe,
            migrator,
        }
    }

    /// Hook the integration into the host's entries and flows
    pub fn register(self: &Arc<Self>, entries: &ConfigEntries, flows: &FlowManager) {
        entries.register_setup_handler(DOMAIN, self.clone());
        flows.register_handler(DOMAIN, self.clone());
        info!(
            "Registered {} with {} device profiles",
            DOMAIN,
            self.matcher.profiles().len()
        );
    }

    pub fn running_devices(&self) -> &Arc<RunningDevices> {
        &self.running
    }

    pub fn matcher(&self) -> &Arc<TypeMatcher> {
        &self.matcher
    }

    pub fn probe(&self) -> &Arc<DeviceProbe> {
        &self.probe
    }

    pub async fn async_test_connection(&self, config: &ConnectionConfig) -> Option<DeviceHandle> {
        self.probe.test_connection(config).await
    }

    pub async fn async_migrate_entry(&self, entry: &mut ConfigEntry) -> bool {
        self.migrator.migrate_entry(entry).await
    }
}

impl FlowHandlerFactory for LawnmowerIntegration {
    fn create_flow(&self) -> Box<dyn FlowHandler> {
        Box::new(ConfigFlow::new(self.probe.clone(), self.matcher.clone()))
    }

    fn create_options_flow(&self, entry: &ConfigEntry) -> Option<Box<dyn FlowHandler>> {
        Some(Box::new(OptionsFlow::new(
            self.probe.clone(),
            self.matcher.clone(),
            entry.clone(),
        )))
    }
}

#[async_trait]
impl EntryHandler for LawnmowerIntegration {
    fn entry_version(&self) -> u32 {
        CONFIG_VERSION
    }

    async fn migrate_entry(&self, entry: &mut ConfigEntry) -> bool {
        self.async_migrate_entry(entry).await
    }

    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        let config = ConnectionConfig::from_entry(entry).map_err(|e| e.to_string())?;
        let stored_type = entry
            .effective_value(CONF_TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let profile = self
            .matcher
            .lookup(stored_type)
            .ok_or_else(|| format!("unsupported device type '{}'", stored_type))?;

        debug!(
            "Setting up {} as {}",
            config.probe_key(),
            profile.config_type()
        );
        let device = self.connector.connect(&config);
        self.running.register(config.probe_key(), device);
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        let config = ConnectionConfig::from_entry(entry).map_err(|e| e.to_string())?;
        if let Some(device) = self.running.unregister(config.probe_key()) {
            device.async_close().await;
        }
        Ok(())
    }
}
