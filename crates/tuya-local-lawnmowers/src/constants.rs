//! Keys, reasons and versions shared by the flows and migration

use std::time::Duration;

pub const DOMAIN: &str = "tuya_local_lawnmowers";

pub const CONF_DEVICE_ID: &str = "device_id";
pub const CONF_HOST: &str = "host";
pub const CONF_LOCAL_KEY: &str = "local_key";
pub const CONF_PROTOCOL_VERSION: &str = "protocol_version";
pub const CONF_DEVICE_CID: &str = "device_cid";
pub const CONF_POLL_ONLY: &str = "poll_only";
pub const CONF_TYPE: &str = "type";
pub const CONF_NAME: &str = "name";
pub const CONF_SETUP_MODE: &str = "setup_mode";

pub const SETUP_MODE_MANUAL: &str = "manual";

/// Stored `type` of entries created before the type was resolved at setup
pub const TYPE_AUTO: &str = "auto";

/// Entry schema version written by the current config flow
pub const CONFIG_VERSION: u32 = 13;

/// Keys a persisted entry's data may hold besides `type`
pub const CONNECTION_KEYS: &[&str] = &[
    CONF_DEVICE_ID,
    CONF_HOST,
    CONF_LOCAL_KEY,
    CONF_PROTOCOL_VERSION,
    CONF_DEVICE_CID,
    CONF_POLL_ONLY,
];

/// Per-entity enable flags that early versions stored in the entry
pub const LEGACY_FEATURE_FLAGS: &[&str] = &[
    "lawn_mower",
    "sensor_battery",
    "binary_sensor_problem",
    "sensor_problem_state",
];

pub const ERROR_CONNECTION: &str = "connection";
pub const ERROR_BASE: &str = "base";
pub const ABORT_NOT_SUPPORTED: &str = "not_supported";

/// How long one protocol attempt may take to return state
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
