//! In-memory device adapter.
//!
//! Holds a fixed table of devices, usually seeded from the `[[devices]]`
//! entries of the server config.  Connect and disconnect flip the device's
//! `connected` flag.  This is what the server runs with when no host
//! Bluetooth binding is available, and what the integration tests drive.

use std::sync::Mutex;

use async_trait::async_trait;
use btremote_core::DeviceSnapshot;
use tracing::info;

use crate::application::{AdapterError, DeviceAdapter};

pub struct InMemoryAdapter {
    devices: Mutex<Vec<DeviceSnapshot>>,
}

impl InMemoryAdapter {
    pub fn new(devices: Vec<DeviceSnapshot>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }

    /// Returns a copy of every device, trusted or not.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeviceSnapshot>> {
        // Writers only flip a bool, so a poisoned table is still consistent.
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_connected(&self, address: &str, connected: bool) -> Result<(), AdapterError> {
        let mut devices = self.lock();
        let device = devices
            .iter_mut()
            .find(|d| d.address.eq_ignore_ascii_case(address))
            .ok_or_else(|| AdapterError::DeviceNotFound(address.to_string()))?;
        device.connected = connected;
        info!(
            "device {} ({}) {}",
            device.address,
            device.name,
            if connected { "connected" } else { "disconnected" }
        );
        Ok(())
    }
}

#[async_trait]
impl DeviceAdapter for InMemoryAdapter {
    async fn list_trusted_devices(&self) -> Result<Vec<DeviceSnapshot>, AdapterError> {
        Ok(self.lock().iter().filter(|d| d.trusted).cloned().collect())
    }

    async fn connect(&self, address: &str) -> Result<(), AdapterError> {
        self.set_connected(address, true)
    }

    async fn disconnect(&self, address: &str) -> Result<(), AdapterError> {
        self.set_connected(address, false)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn device(address: &str, trusted: bool) -> DeviceSnapshot {
        DeviceSnapshot {
            address: address.to_string(),
            name: format!("dev-{address}"),
            trusted,
            paired: true,
            connected: false,
            battery: None,
            icon: None,
        }
    }

    fn adapter() -> InMemoryAdapter {
        InMemoryAdapter::new(vec![
            device("AA:AA:AA:AA:AA:AA", true),
            device("BB:BB:BB:BB:BB:BB", false),
            device("CC:CC:CC:CC:CC:CC", true),
        ])
    }

    #[tokio::test]
    async fn test_list_returns_only_trusted_devices_in_order() {
        // Arrange
        let adapter = adapter();

        // Act
        let listed = adapter.list_trusted_devices().await.unwrap();

        // Assert
        let addrs: Vec<_> = listed.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(addrs, ["AA:AA:AA:AA:AA:AA", "CC:CC:CC:CC:CC:CC"]);
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_flips_connected_flag() {
        let adapter = adapter();

        adapter.connect("aa:aa:aa:aa:aa:aa").await.unwrap();
        assert!(adapter.snapshot()[0].connected);

        adapter.disconnect("AA:AA:AA:AA:AA:AA").await.unwrap();
        assert!(!adapter.snapshot()[0].connected);
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let adapter = adapter();
        let result = adapter.connect("00:00:00:00:00:00").await;
        assert_eq!(
            result,
            Err(AdapterError::DeviceNotFound("00:00:00:00:00:00".to_string()))
        );
    }
}
