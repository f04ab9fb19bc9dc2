//! Config Entries
//!
//! The host side of an integration: configuration entries, their lifecycle,
//! version migration, and the data entry flows (config and options) that
//! create and edit them.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`EntryHandler`] - Integration hooks for setup, unload and migration
//! - [`FlowResult`] / [`DataSchema`] - What a flow step shows or produces
//! - [`FlowManager`] - Runs config and options flows to completion
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries` with
//! version tracking for migrations.

pub mod entry;
pub mod flow;
pub mod flow_manager;
pub mod manager;
pub mod state_machine;
pub mod storage;

// Re-export main types
pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
};

pub use flow::{
    DataSchema, FieldType, FlowData, FlowResult, FlowResultType, FormField, SchemaError,
};

pub use flow_manager::{
    FlowContext, FlowError, FlowHandler, FlowHandlerFactory, FlowManager, FlowManagerResult,
    OPTIONS_FLOW_STEP,
};

pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, EntryHandler,
    SetupHandler, STORAGE_KEY, STORAGE_MINOR_VERSION, STORAGE_VERSION,
};

pub use state_machine::InvalidTransition;

pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
