//! Options flow: edit the connection of a configured device

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ha_config_entries::{
    ConfigEntry, DataSchema, FieldType, FlowData, FlowHandler, FlowResult, FormField,
    OPTIONS_FLOW_STEP,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::connection::{ConnectionConfig, ProtocolVersion};
use crate::constants::{
    ABORT_NOT_SUPPORTED, CONF_HOST, CONF_LOCAL_KEY, CONF_POLL_ONLY, CONF_PROTOCOL_VERSION,
    CONF_TYPE, ERROR_BASE, ERROR_CONNECTION, LEGACY_FEATURE_FLAGS,
};
use crate::matcher::TypeMatcher;
use crate::probe::DeviceProbe;

pub struct OptionsFlow {
    probe: Arc<DeviceProbe>,
    matcher: Arc<TypeMatcher>,
    entry: ConfigEntry,
}

impl OptionsFlow {
    pub fn new(probe: Arc<DeviceProbe>, matcher: Arc<TypeMatcher>, entry: ConfigEntry) -> Self {
        Self {
            probe,
            matcher,
            entry,
        }
    }

    fn is_supported(&self) -> bool {
        self.entry
            .effective_value(CONF_TYPE)
            .and_then(Value::as_str)
            .and_then(|stored| self.matcher.lookup(stored))
            .is_some()
    }

    /// Form pre-filled from `defaults`, falling back to the entry's effective config
    fn schema(&self, defaults: &FlowData) -> DataSchema {
        let current = |key: &str| {
            defaults
                .get(key)
                .or_else(|| self.entry.effective_value(key))
                .cloned()
        };
        let protocol_version = current(CONF_PROTOCOL_VERSION)
            .and_then(|v| ProtocolVersion::from_value(&v))
            .unwrap_or_default();
        let poll_only = current(CONF_POLL_ONLY)
            .filter(Value::is_boolean)
            .unwrap_or(json!(false));

        DataSchema::new()
            .field(FormField::required(CONF_HOST, FieldType::String).with_default(current(CONF_HOST)))
            .field(
                FormField::required(CONF_LOCAL_KEY, FieldType::String)
                    .with_default(current(CONF_LOCAL_KEY)),
            )
            .field(
                FormField::select(CONF_PROTOCOL_VERSION, ProtocolVersion::choices())
                    .with_default(Some(protocol_version.to_value())),
            )
            .field(FormField::optional(CONF_POLL_ONLY, FieldType::Boolean).with_default(Some(poll_only)))
    }

    pub async fn async_step_user(&mut self, user_input: Option<FlowData>) -> FlowResult {
        if !self.is_supported() {
            info!(
                "Entry {} has an unsupported device type",
                self.entry.entry_id
            );
            return FlowResult::abort(ABORT_NOT_SUPPORTED);
        }

        let Some(input) = user_input else {
            return FlowResult::form(OPTIONS_FLOW_STEP, self.schema(&FlowData::new()));
        };

        let valid = match self.schema(&FlowData::new()).validate(&input) {
            Ok(valid) => valid,
            Err(err) => {
                return FlowResult::form(OPTIONS_FLOW_STEP, self.schema(&input))
                    .with_errors(err.errors)
            }
        };

        let mut candidate = self.entry.effective_config();
        candidate.extend(valid.clone());
        let device = match ConnectionConfig::from_map(&candidate) {
            Ok(config) => self.probe.test_connection(&config).await,
            Err(err) => {
                debug!("Rejected connection parameters: {}", err);
                None
            }
        };

        match device {
            Some(device) => {
                device.async_close().await;
                let mut options = valid;
                for flag in LEGACY_FEATURE_FLAGS {
                    if let Some(value) = self.entry.options.get(*flag) {
                        options.insert(flag.to_string(), value.clone());
                    }
                }
                info!("Updated connection of entry {}", self.entry.entry_id);
                FlowResult::create_entry("", options)
            }
            None => FlowResult::form(OPTIONS_FLOW_STEP, self.schema(&valid)).with_errors(
                HashMap::from([(ERROR_BASE.to_string(), ERROR_CONNECTION.to_string())]),
            ),
        }
    }
}

#[async_trait]
impl FlowHandler for OptionsFlow {
    async fn async_step(&mut self, _step_id: &str, user_input: Option<FlowData>) -> FlowResult {
        self.async_step_user(user_input).await
    }
}
