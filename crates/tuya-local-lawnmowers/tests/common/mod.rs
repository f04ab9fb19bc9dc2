//! Common test utilities
//!
//! Mock devices and a mock transport, plus helpers that build a host with
//! the integration registered.

#![allow(dead_code)]

mod fixtures;
mod mock_device;

pub use fixtures::*;
pub use mock_device::*;
