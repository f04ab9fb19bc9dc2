//! Config flow
//!
//! `user` picks the setup mode, `local` collects and probes the connection,
//! `select_type` picks a matching device profile and `choose_entities`
//! names the entry.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use ha_config_entries::{
    DataSchema, FieldType, FlowData, FlowHandler, FlowResult, FormField, SchemaError,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::connection::{ConnectionConfig, ProtocolVersion};
use crate::constants::{
    ABORT_NOT_SUPPORTED, CONFIG_VERSION, CONNECTION_KEYS, CONF_DEVICE_CID, CONF_DEVICE_ID, CONF_HOST,
    CONF_LOCAL_KEY, CONF_NAME, CONF_POLL_ONLY, CONF_PROTOCOL_VERSION, CONF_SETUP_MODE, CONF_TYPE,
    ERROR_BASE, ERROR_CONNECTION, SETUP_MODE_MANUAL,
};
use crate::device::DeviceHandle;
use crate::helpers::DeviceTypeProfile;
use crate::matcher::TypeMatcher;
use crate::probe::DeviceProbe;

const ABORT_UNKNOWN_STEP: &str = "unknown_step";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFlowStep {
    User,
    Local,
    SelectType,
    ChooseEntities,
}

impl ConfigFlowStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigFlowStep::User => "user",
            ConfigFlowStep::Local => "local",
            ConfigFlowStep::SelectType => "select_type",
            ConfigFlowStep::ChooseEntities => "choose_entities",
        }
    }
}

impl FromStr for ConfigFlowStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ConfigFlowStep::User),
            "local" => Ok(ConfigFlowStep::Local),
            "select_type" => Ok(ConfigFlowStep::SelectType),
            "choose_entities" => Ok(ConfigFlowStep::ChooseEntities),
            _ => Err(format!("unknown config flow step '{}'", s)),
        }
    }
}

impl fmt::Display for ConfigFlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one config flow has collected so far
#[derive(Default)]
pub struct FlowState {
    pub current_step: Option<ConfigFlowStep>,
    /// Accumulated entry data
    pub data: FlowData,
    /// Handle that answered the `local` probe
    pub device: Option<DeviceHandle>,
    /// Ranked profiles offered by `select_type`
    pub candidates: Vec<Arc<DeviceTypeProfile>>,
}

pub struct ConfigFlow {
    probe: Arc<DeviceProbe>,
    matcher: Arc<TypeMatcher>,
    state: FlowState,
}

impl ConfigFlow {
    pub fn new(probe: Arc<DeviceProbe>, matcher: Arc<TypeMatcher>) -> Self {
        Self {
            probe,
            matcher,
            state: FlowState::default(),
        }
    }

    /// Start with an already probed device, as if `local` had succeeded
    pub fn with_device(mut self, device: DeviceHandle) -> Self {
        self.state.device = Some(device);
        self
    }

    /// Start with already collected data
    pub fn with_data(mut self, data: FlowData) -> Self {
        self.state.data.extend(data);
        self
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    fn show_form(&mut self, step: ConfigFlowStep, schema: DataSchema) -> FlowResult {
        self.state.current_step = Some(step);
        FlowResult::form(step.as_str(), schema)
    }

    pub async fn async_step_user(&mut self, user_input: Option<FlowData>) -> FlowResult {
        let schema = DataSchema::new().field(
            FormField::select(CONF_SETUP_MODE, vec![json!(SETUP_MODE_MANUAL)])
                .with_default(Some(json!(SETUP_MODE_MANUAL))),
        );

        match user_input.map(|input| schema.validate(&input)) {
            Some(Ok(_)) => self.async_step_local(None).await,
            Some(Err(err)) => self
                .show_form(ConfigFlowStep::User, schema)
                .with_errors(err.errors),
            None => self.show_form(ConfigFlowStep::User, schema),
        }
    }

    pub async fn async_step_local(&mut self, user_input: Option<FlowData>) -> FlowResult {
        let Some(input) = user_input else {
            let schema = local_schema(&self.state.data);
            return self
                .show_form(ConfigFlowStep::Local, schema)
                .with_errors(HashMap::new());
        };

        let errors = match local_schema(&FlowData::new()).validate(&input) {
            Ok(valid) => match self.test_connection(&valid).await {
                Some((config, device)) => {
                    self.replace_connection_data(config.to_map());
                    self.state.device = Some(device);
                    return self.async_step_select_type(None).await;
                }
                None => {
                    self.replace_connection_data(valid);
                    HashMap::from([(ERROR_BASE.to_string(), ERROR_CONNECTION.to_string())])
                }
            },
            Err(SchemaError { errors }) => {
                // Rejected values are not offered back as defaults
                let accepted: FlowData = input
                    .into_iter()
                    .filter(|(key, _)| !errors.contains_key(key))
                    .collect();
                self.replace_connection_data(accepted);
                errors
            }
        };

        let schema = local_schema(&self.state.data);
        self.show_form(ConfigFlowStep::Local, schema)
            .with_errors(errors)
    }

    /// The latest submission's connection fields, and nothing left from earlier ones
    fn replace_connection_data(&mut self, values: FlowData) {
        for key in CONNECTION_KEYS {
            self.state.data.remove(*key);
        }
        self.state.data.extend(
            values
                .into_iter()
                .filter(|(key, _)| CONNECTION_KEYS.contains(&key.as_str())),
        );
    }

    async fn test_connection(&self, input: &FlowData) -> Option<(ConnectionConfig, DeviceHandle)> {
        let config = ConnectionConfig::from_map(input)
            .map_err(|err| debug!("Rejected connection parameters: {}", err))
            .ok()?;
        let device = self.probe.test_connection(&config).await?;
        Some((config, device))
    }

    pub async fn async_step_select_type(&mut self, user_input: Option<FlowData>) -> FlowResult {
        if self.state.candidates.is_empty() {
            if let Some(device) = &self.state.device {
                self.state.candidates = self.matcher.possible_types(device.as_ref());
            }
        }
        if self.state.candidates.is_empty() {
            info!("No device profile matches the probed device");
            return FlowResult::abort(ABORT_NOT_SUPPORTED);
        }

        let options: Vec<Value> = self
            .state
            .candidates
            .iter()
            .map(|profile| json!(profile.config_type()))
            .collect();
        let best = options.first().cloned();
        let schema =
            DataSchema::new().field(FormField::select(CONF_TYPE, options).with_default(best));

        match user_input.map(|input| schema.validate(&input)) {
            Some(Ok(valid)) => {
                self.state.data.extend(valid);
                self.async_step_choose_entities(None).await
            }
            Some(Err(err)) => self
                .show_form(ConfigFlowStep::SelectType, schema)
                .with_errors(err.errors),
            None => self.show_form(ConfigFlowStep::SelectType, schema),
        }
    }

    fn selected_profile(&self) -> Option<Arc<DeviceTypeProfile>> {
        let selected = self.state.data.get(CONF_TYPE)?.as_str()?;
        self.state
            .candidates
            .iter()
            .find(|profile| profile.config_type() == selected)
            .cloned()
            .or_else(|| self.matcher.lookup(selected))
    }

    pub async fn async_step_choose_entities(
        &mut self,
        user_input: Option<FlowData>,
    ) -> FlowResult {
        let default_name = self.selected_profile().map(|p| json!(p.name()));
        let schema = DataSchema::new()
            .field(FormField::required(CONF_NAME, FieldType::String).with_default(default_name));

        let valid = match user_input.map(|input| schema.validate(&input)) {
            Some(Ok(valid)) => valid,
            Some(Err(err)) => {
                return self
                    .show_form(ConfigFlowStep::ChooseEntities, schema)
                    .with_errors(err.errors)
            }
            None => return self.show_form(ConfigFlowStep::ChooseEntities, schema),
        };

        let title = valid
            .get(CONF_NAME)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let data = self.state.data.clone();
        info!("Creating entry {} of type {:?}", title, data.get(CONF_TYPE));

        let mut result = FlowResult::create_entry(title, data.clone()).with_version(CONFIG_VERSION);
        if let Some(unique_id) = unique_id(&data) {
            result = result.with_unique_id(unique_id);
        }
        result
    }
}

/// Sub-device id if set, else device id
fn unique_id(data: &FlowData) -> Option<String> {
    [CONF_DEVICE_CID, CONF_DEVICE_ID]
        .iter()
        .filter_map(|key| data.get(*key).and_then(Value::as_str))
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

fn local_schema(defaults: &FlowData) -> DataSchema {
    let default = |key: &str| defaults.get(key).cloned();
    let protocol_version = default(CONF_PROTOCOL_VERSION).unwrap_or_else(|| ProtocolVersion::Auto.to_value());
    let poll_only = default(CONF_POLL_ONLY).unwrap_or(json!(false));

    DataSchema::new()
        .field(FormField::required(CONF_DEVICE_ID, FieldType::String).with_default(default(CONF_DEVICE_ID)))
        .field(FormField::required(CONF_HOST, FieldType::String).with_default(default(CONF_HOST)))
        .field(FormField::required(CONF_LOCAL_KEY, FieldType::String).with_default(default(CONF_LOCAL_KEY)))
        .field(
            FormField::select(CONF_PROTOCOL_VERSION, ProtocolVersion::choices())
                .with_default(Some(protocol_version)),
        )
        .field(FormField::optional(CONF_POLL_ONLY, FieldType::Boolean).with_default(Some(poll_only)))
        .field(FormField::optional(CONF_DEVICE_CID, FieldType::String).with_default(default(CONF_DEVICE_CID)))
}

#[async_trait]
impl FlowHandler for ConfigFlow {
    async fn async_step(&mut self, step_id: &str, user_input: Option<FlowData>) -> FlowResult {
        let result = match step_id.parse::<ConfigFlowStep>() {
            Ok(ConfigFlowStep::User) => self.async_step_user(user_input).await,
            Ok(ConfigFlowStep::Local) => self.async_step_local(user_input).await,
            Ok(ConfigFlowStep::SelectType) => self.async_step_select_type(user_input).await,
            Ok(ConfigFlowStep::ChooseEntities) => {
                self.async_step_choose_entities(user_input).await
            }
            Err(err) => {
                debug!("{}", err);
                FlowResult::abort(ABORT_UNKNOWN_STEP)
            }
        };

        if result.is_terminal() {
            if let Some(device) = self.state.device.take() {
                device.async_close().await;
            }
        }
        result
    }
}
