//! Flow Manager
//!
//! Runs config flows (which create entries) and options flows (which replace
//! an entry's options). Each in-flight flow owns its handler; the manager
//! only remembers which step the last form showed and commits the terminal
//! result.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::entry::{ConfigEntry, ConfigEntryUpdate};
use crate::flow::{FlowData, FlowResult, FlowResultType};
use crate::manager::{ConfigEntries, ConfigEntriesError};

/// First (and usually only) step of an options flow
pub const OPTIONS_FLOW_STEP: &str = "user";

/// Abort reason when a config flow would duplicate an existing unique id
const ABORT_ALREADY_CONFIGURED: &str = "already_configured";

/// Flow manager errors
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Flow {0} not found")]
    UnknownFlow(String),

    #[error("No flow handler registered for {0}")]
    UnknownHandler(String),

    #[error("Entry not found: {0}")]
    UnknownEntry(String),

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),
}

pub type FlowManagerResult<T> = Result<T, FlowError>;

/// One in-flight flow's step logic
#[async_trait]
pub trait FlowHandler: Send {
    /// Run `step_id`. `None` input asks for the step's form.
    async fn async_step(&mut self, step_id: &str, user_input: Option<FlowData>) -> FlowResult;
}

/// Creates flow handlers for one integration domain
pub trait FlowHandlerFactory: Send + Sync {
    fn create_flow(&self) -> Box<dyn FlowHandler>;

    /// None when the integration has no options
    fn create_options_flow(&self, entry: &ConfigEntry) -> Option<Box<dyn FlowHandler>>;
}

/// What a flow's create_entry result is applied to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowContext {
    /// Creates a new entry; `source` names the first step
    Config { source: String },
    /// Replaces the options of an existing entry
    Options { entry_id: String },
}

/// Active flow state
struct ActiveFlow {
    handler: String,
    context: FlowContext,
    current_step: String,
    /// Set once a terminal result was committed
    finished: bool,
    flow: Box<dyn FlowHandler>,
}

/// Manages active configuration and options flows
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    factories: DashMap<String, Arc<dyn FlowHandlerFactory>>,
    flows: RwLock<HashMap<String, Arc<Mutex<ActiveFlow>>>>,
}

impl FlowManager {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self {
            entries,
            factories: DashMap::new(),
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Register the flow factory for a domain
    pub fn register_handler(&self, domain: &str, factory: Arc<dyn FlowHandlerFactory>) {
        self.factories.insert(domain.to_string(), factory);
        debug!("Registered flow handler for domain: {}", domain);
    }

    fn factory(&self, domain: &str) -> FlowManagerResult<Arc<dyn FlowHandlerFactory>> {
        self.factories
            .get(domain)
            .map(|f| f.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(domain.to_string()))
    }

    /// Start a config flow at the step named by `source` (usually "user")
    pub async fn async_init(&self, domain: &str, source: &str) -> FlowManagerResult<FlowResult> {
        let flow = self.factory(domain)?.create_flow();
        let context = FlowContext::Config {
            source: source.to_string(),
        };
        self.start(domain, context, source, flow).await
    }

    /// Start the options flow of an existing entry
    pub async fn async_init_options(&self, entry_id: &str) -> FlowManagerResult<FlowResult> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| FlowError::UnknownEntry(entry_id.to_string()))?;
        let flow = self
            .factory(&entry.domain)?
            .create_options_flow(&entry)
            .ok_or_else(|| FlowError::UnknownHandler(entry.domain.clone()))?;
        let context = FlowContext::Options {
            entry_id: entry_id.to_string(),
        };
        self.start(&entry.domain, context, OPTIONS_FLOW_STEP, flow)
            .await
    }

    async fn start(
        &self,
        handler: &str,
        context: FlowContext,
        step_id: &str,
        flow: Box<dyn FlowHandler>,
    ) -> FlowManagerResult<FlowResult> {
        let flow_id = Ulid::new().to_string().to_lowercase();
        info!(
            "Starting flow {} for {} at step {}",
            flow_id, handler, step_id
        );

        let mut active = ActiveFlow {
            handler: handler.to_string(),
            context,
            current_step: step_id.to_string(),
            finished: false,
            flow,
        };
        let result = active.flow.async_step(step_id, None).await;
        let result = self.finish_step(&flow_id, &mut active, result).await?;

        if !result.is_terminal() {
            let mut flows = self.flows.write().await;
            flows.insert(flow_id, Arc::new(Mutex::new(active)));
        }

        Ok(result)
    }

    /// Continue a flow with user input for the step its last form showed
    pub async fn async_configure(
        &self,
        flow_id: &str,
        user_input: FlowData,
    ) -> FlowManagerResult<FlowResult> {
        let active = {
            let flows = self.flows.read().await;
            flows
                .get(flow_id)
                .cloned()
                .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?
        };

        let result = {
            // Held across the step so a double submit waits for the first one
            let mut active = active.lock().await;
            if active.finished {
                return Err(FlowError::UnknownFlow(flow_id.to_string()));
            }
            let step_id = active.current_step.clone();
            info!(
                "Progressing flow {} for {} at step {}",
                flow_id, active.handler, step_id
            );

            let result = active.flow.async_step(&step_id, Some(user_input)).await;
            let result = self.finish_step(flow_id, &mut active, result).await?;
            active.finished = result.is_terminal();
            result
        };

        // The flow lock is released before the table lock is taken
        if result.is_terminal() {
            let mut flows = self.flows.write().await;
            flows.remove(flow_id);
        }

        Ok(result)
    }

    /// Drop an in-flight flow without committing anything
    pub async fn async_abort(&self, flow_id: &str) -> FlowManagerResult<()> {
        let mut flows = self.flows.write().await;
        flows
            .remove(flow_id)
            .map(|_| debug!("Aborted flow {}", flow_id))
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    /// Stamp ids on a step result, remember the next step, commit terminal results
    async fn finish_step(
        &self,
        flow_id: &str,
        active: &mut ActiveFlow,
        result: FlowResult,
    ) -> FlowManagerResult<FlowResult> {
        let mut result = match result.result_type {
            FlowResultType::Form => {
                if let Some(step_id) = &result.step_id {
                    active.current_step = step_id.clone();
                }
                result
            }
            FlowResultType::CreateEntry => {
                self.commit(&active.handler, &active.context, result).await?
            }
            FlowResultType::Abort => result,
        };

        if result.is_terminal() {
            info!(
                "Flow {} completed with result type: {:?}",
                flow_id, result.result_type
            );
        }

        result.flow_id = flow_id.to_string();
        result.handler = active.handler.clone();
        Ok(result)
    }

    async fn commit(
        &self,
        handler: &str,
        context: &FlowContext,
        result: FlowResult,
    ) -> FlowManagerResult<FlowResult> {
        let data = result.data.clone().unwrap_or_default();

        match context {
            FlowContext::Config { .. } => {
                let mut entry = ConfigEntry::new(
                    handler,
                    result.title.clone().unwrap_or_default(),
                )
                .with_data(data)
                .with_version(result.version.unwrap_or(1), 1);
                if let Some(unique_id) = &result.unique_id {
                    entry = entry.with_unique_id(unique_id.clone());
                }

                match self.entries.add(entry).await {
                    Ok(_) => Ok(result),
                    Err(ConfigEntriesError::AlreadyExists { unique_id, .. }) => {
                        info!(
                            "Entry with unique_id {} already configured for {}",
                            unique_id, handler
                        );
                        Ok(FlowResult::abort(ABORT_ALREADY_CONFIGURED))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            FlowContext::Options { entry_id } => {
                self.entries
                    .update(entry_id, ConfigEntryUpdate::new().options(data))
                    .await?;
                Ok(result)
            }
        }
    }

    /// Get list of active flows
    pub async fn list_flows(&self) -> Vec<serde_json::Value> {
        let flows: Vec<(String, Arc<Mutex<ActiveFlow>>)> = {
            let flows = self.flows.read().await;
            flows
                .iter()
                .map(|(flow_id, active)| (flow_id.clone(), active.clone()))
                .collect()
        };

        let mut listed = Vec::with_capacity(flows.len());
        for (flow_id, active) in flows {
            let active = active.lock().await;
            if active.finished {
                continue;
            }
            let context = match &active.context {
                FlowContext::Config { source } => serde_json::json!({ "source": source }),
                FlowContext::Options { entry_id } => {
                    serde_json::json!({ "source": "options", "entry_id": entry_id })
                }
            };
            listed.push(serde_json::json!({
                "flow_id": flow_id,
                "handler": active.handler,
                "step_id": active.current_step,
                "context": context,
            }));
        }
        listed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{DataSchema, FieldType, FormField};
    use crate::storage::Storage;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const DOMAIN: &str = "demo";

    /// Two-step flow: `user` asks for a name, `confirm` creates the entry
    struct NameFlow;

    #[async_trait]
    impl FlowHandler for NameFlow {
        async fn async_step(&mut self, step_id: &str, user_input: Option<FlowData>) -> FlowResult {
            match (step_id, user_input) {
                ("user", None) => FlowResult::form(
                    "user",
                    DataSchema::new().field(FormField::required("name", FieldType::String)),
                ),
                ("user", Some(input)) => {
                    let name = input["name"].as_str().unwrap_or_default().to_string();
                    FlowResult::create_entry(name.clone(), FlowData::from([("name".to_string(), json!(name))]))
                        .with_unique_id(name)
                        .with_version(2)
                }
                _ => FlowResult::abort("unknown_step"),
            }
        }
    }

    struct OptionsOnly;

    #[async_trait]
    impl FlowHandler for OptionsOnly {
        async fn async_step(&mut self, _step_id: &str, user_input: Option<FlowData>) -> FlowResult {
            match user_input {
                None => FlowResult::form(OPTIONS_FLOW_STEP, DataSchema::new()),
                Some(input) => FlowResult::create_entry("", input),
            }
        }
    }

    struct DemoFactory;

    impl FlowHandlerFactory for DemoFactory {
        fn create_flow(&self) -> Box<dyn FlowHandler> {
            Box::new(NameFlow)
        }

        fn create_options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn FlowHandler>> {
            Some(Box::new(OptionsOnly))
        }
    }

    fn setup() -> (TempDir, Arc<ConfigEntries>, FlowManager) {
        let temp_dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(temp_dir.path()))));
        let manager = FlowManager::new(entries.clone());
        manager.register_handler(DOMAIN, Arc::new(DemoFactory));
        (temp_dir, entries, manager)
    }

    fn input(name: &str) -> FlowData {
        FlowData::from([("name".to_string(), json!(name))])
    }

    #[tokio::test]
    async fn test_config_flow_creates_entry() {
        let (_dir, entries, manager) = setup();

        let result = manager.async_init(DOMAIN, "user").await.unwrap();
        assert_eq!(result.result_type, FlowResultType::Form);
        assert_eq!(result.handler, DOMAIN);
        assert_eq!(manager.list_flows().await.len(), 1);

        let result = manager
            .async_configure(&result.flow_id, input("front"))
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        assert!(manager.list_flows().await.is_empty());

        let entry = entries.get_by_unique_id(DOMAIN, "front").unwrap();
        assert_eq!(entry.title, "front");
        assert_eq!(entry.version, 2);
        assert_eq!(entry.data["name"], json!("front"));
    }

    #[tokio::test]
    async fn test_duplicate_unique_id_aborts() {
        let (_dir, entries, manager) = setup();

        for expected in [FlowResultType::CreateEntry, FlowResultType::Abort] {
            let flow = manager.async_init(DOMAIN, "user").await.unwrap();
            let result = manager
                .async_configure(&flow.flow_id, input("same"))
                .await
                .unwrap();
            assert_eq!(result.result_type, expected);
        }

        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_flow_is_forgotten() {
        let (_dir, _entries, manager) = setup();

        let flow = manager.async_init(DOMAIN, "user").await.unwrap();
        manager
            .async_configure(&flow.flow_id, input("x"))
            .await
            .unwrap();

        assert!(matches!(
            manager.async_configure(&flow.flow_id, input("x")).await,
            Err(FlowError::UnknownFlow(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_step_aborts_immediately() {
        let (_dir, _entries, manager) = setup();

        let result = manager.async_init(DOMAIN, "reauth").await.unwrap();
        assert_eq!(result.result_type, FlowResultType::Abort);
        assert!(manager.list_flows().await.is_empty());
    }

    #[tokio::test]
    async fn test_options_flow_replaces_options_only() {
        let (_dir, entries, manager) = setup();

        let entry = entries
            .add(
                ConfigEntry::new(DOMAIN, "Demo")
                    .with_data(FlowData::from([("host".to_string(), json!("old"))])),
            )
            .await
            .unwrap();

        let flow = manager.async_init_options(&entry.entry_id).await.unwrap();
        assert_eq!(flow.step_id.as_deref(), Some(OPTIONS_FLOW_STEP));

        let result = manager
            .async_configure(
                &flow.flow_id,
                FlowData::from([("host".to_string(), json!("new"))]),
            )
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);

        let stored = entries.get(&entry.entry_id).unwrap();
        assert_eq!(stored.data["host"], json!("old"));
        assert_eq!(stored.options["host"], json!("new"));
    }

    #[tokio::test]
    async fn test_unknown_handler_and_entry() {
        let (_dir, _entries, manager) = setup();

        assert!(matches!(
            manager.async_init("nope", "user").await,
            Err(FlowError::UnknownHandler(_))
        ));
        assert!(matches!(
            manager.async_init_options("missing").await,
            Err(FlowError::UnknownEntry(_))
        ));
    }

    /// Submitting takes a while, like a device probe
    struct SlowFlow;

    #[async_trait]
    impl FlowHandler for SlowFlow {
        async fn async_step(&mut self, _step_id: &str, user_input: Option<FlowData>) -> FlowResult {
            match user_input {
                None => FlowResult::form("user", DataSchema::new()),
                Some(input) => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    FlowResult::create_entry("slow", input)
                }
            }
        }
    }

    struct SlowFactory;

    impl FlowHandlerFactory for SlowFactory {
        fn create_flow(&self) -> Box<dyn FlowHandler> {
            Box::new(SlowFlow)
        }

        fn create_options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn FlowHandler>> {
            None
        }
    }

    #[tokio::test]
    async fn test_list_flows_while_step_runs() {
        let (_dir, entries, manager) = setup();
        manager.register_handler("slow", Arc::new(SlowFactory));
        let flow = manager.async_init("slow", "user").await.unwrap();

        let listed_during_step = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            manager.list_flows().await
        };
        let (result, _) = tokio::time::timeout(Duration::from_secs(3), async {
            tokio::join!(
                manager.async_configure(&flow.flow_id, FlowData::new()),
                listed_during_step
            )
        })
        .await
        .expect("listing flows during a step must not block forever");

        assert_eq!(result.unwrap().result_type, FlowResultType::CreateEntry);
        assert!(manager.list_flows().await.is_empty());
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_second_submit_after_finish_is_rejected() {
        let (_dir, entries, manager) = setup();
        manager.register_handler("slow", Arc::new(SlowFactory));
        let flow = manager.async_init("slow", "user").await.unwrap();

        let (first, second) = tokio::join!(
            manager.async_configure(&flow.flow_id, FlowData::new()),
            manager.async_configure(&flow.flow_id, FlowData::new())
        );

        assert_eq!(first.unwrap().result_type, FlowResultType::CreateEntry);
        assert!(matches!(second, Err(FlowError::UnknownFlow(_))));
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_flows_run_on_spawned_tasks() {
        let (_dir, entries, manager) = setup();
        let manager = Arc::new(manager);

        let init = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.async_init(DOMAIN, "user").await })
        };
        let flow = init.await.unwrap().unwrap();

        let configure = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .async_configure(&flow.flow_id, input("spawned"))
                    .await
            })
        };
        let result = configure.await.unwrap().unwrap();

        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        assert!(entries.get_by_unique_id(DOMAIN, "spawned").is_some());
    }

    #[tokio::test]
    async fn test_abort_in_flight_flow() {
        let (_dir, _entries, manager) = setup();

        let flow = manager.async_init(DOMAIN, "user").await.unwrap();
        manager.async_abort(&flow.flow_id).await.unwrap();
        assert!(manager.list_flows().await.is_empty());
        assert!(manager.async_abort(&flow.flow_id).await.is_err());
    }
}
