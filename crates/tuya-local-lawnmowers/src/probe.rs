//! Device probe
//!
//! Opens a connection with candidate parameters and checks that the device
//! actually answers. Any running device under the same probe key is paused
//! for the duration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::{ConnectionConfig, ProtocolVersion};
use crate::constants::PROBE_TIMEOUT;
use crate::device::{DeviceConnector, DeviceHandle, RunningDevices};

pub struct DeviceProbe {
    connector: Arc<dyn DeviceConnector>,
    running: Arc<RunningDevices>,
    timeout: Duration,
}

impl DeviceProbe {
    pub fn new(connector: Arc<dyn DeviceConnector>, running: Arc<RunningDevices>) -> Self {
        Self {
            connector,
            running,
            timeout: PROBE_TIMEOUT,
        }
    }

    /// Versions to try, in order
    fn attempts(config: &ConnectionConfig) -> Vec<ProtocolVersion> {
        match config.protocol_version {
            ProtocolVersion::Auto => ProtocolVersion::PROBE_ORDER.to_vec(),
            version => vec![version],
        }
    }

    /// A handle that has returned state, or None.
    ///
    /// For `auto` the returned handle carries the version that answered.
    pub async fn test_connection(&self, config: &ConnectionConfig) -> Option<DeviceHandle> {
        let _paused = self.running.pause(config.probe_key());

        for version in Self::attempts(config) {
            let attempt = config.clone().with_protocol_version(version);
            debug!(
                "Probing device {} at {} with protocol {}",
                config.device_id, config.host, version
            );

            let device = self.connector.connect(&attempt);
            match tokio::time::timeout(self.timeout, device.async_refresh()).await {
                Ok(Ok(())) if device.has_returned_state() => {
                    debug!("Device {} answered on protocol {}", config.device_id, version);
                    return Some(device);
                }
                Ok(Ok(())) => debug!("Device {} returned no state", config.device_id),
                Ok(Err(err)) => debug!("Device {} probe failed: {}", config.device_id, err),
                Err(_) => debug!(
                    "Device {} did not answer within {:?}",
                    config.device_id, self.timeout
                ),
            }
            device.async_close().await;
        }

        warn!(
            "Could not connect to device {} at {}",
            config.device_id, config.host
        );
        None
    }
}
