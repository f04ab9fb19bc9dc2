//! Shared helpers

pub mod device_config;

pub use device_config::{
    DeviceProfiles, DeviceSignals, DeviceTypeProfile, DpConfig, DpType, EntityConfig,
    ProductConfig, PRODUCT_MATCH,
};
