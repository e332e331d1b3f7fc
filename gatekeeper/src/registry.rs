//! Device registry - tracks the approver devices eligible to vote.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::types::Device;

/// Registry of approver devices.
///
/// The registry is the only component that mutates [`Device`] records.
/// Device identity is self-reported: any claimed ID is accepted.
/// Authenticated registration is an extension point, not implemented.
pub struct DeviceRegistry {
    config: RegistryConfig,
    devices: Arc<RwLock<HashMap<String, Device>>>,
}

impl DeviceRegistry {
    /// Create an empty registry with default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            devices: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a device (idempotent upsert).
    ///
    /// Re-registering refreshes `last_seen_at` and updates the trust
    /// weight; a revoked device stays revoked.
    pub async fn register(&self, device_id: impl Into<String>, trust_weight: f32) {
        let device_id = device_id.into();
        let mut devices = self.devices.write().await;

        match devices.get_mut(&device_id) {
            Some(device) => {
                device.trust_weight = trust_weight.clamp(0.0, 1.0);
                device.last_seen_at = Utc::now();
                debug!(device_id = %device_id, "Device re-registered");
            }
            None => {
                info!(
                    device_id = %device_id,
                    trust_weight = trust_weight.clamp(0.0, 1.0),
                    "Device registered"
                );
                devices.insert(device_id.clone(), Device::new(device_id, trust_weight));
            }
        }
    }

    /// Record a heartbeat. Silent no-op for unknown devices.
    pub async fn heartbeat(&self, device_id: &str) {
        let mut devices = self.devices.write().await;

        if let Some(device) = devices.get_mut(device_id) {
            device.last_seen_at = Utc::now();
        } else {
            debug!(device_id = %device_id, "Heartbeat from unregistered device ignored");
        }
    }

    /// Revoke a device. It stays registered but is excluded from
    /// quorum calculations permanently.
    pub async fn revoke(&self, device_id: &str) -> bool {
        let mut devices = self.devices.write().await;

        if let Some(device) = devices.get_mut(device_id) {
            device.revoked = true;
            warn!(device_id = %device_id, "Device revoked");
            true
        } else {
            false
        }
    }

    /// Devices whose last heartbeat falls inside the staleness window,
    /// excluding revoked devices.
    pub async fn active_devices(&self, now: DateTime<Utc>) -> Vec<Device> {
        let stale_window = Duration::seconds(self.config.stale_window_secs as i64);
        let devices = self.devices.read().await;

        devices
            .values()
            .filter(|d| d.is_active(now, stale_window))
            .cloned()
            .collect()
    }

    /// Look up a device by ID.
    pub async fn get(&self, device_id: &str) -> Option<Device> {
        let devices = self.devices.read().await;
        devices.get(device_id).cloned()
    }

    /// Total registered devices (active or not).
    pub async fn count(&self) -> usize {
        let devices = self.devices.read().await;
        devices.len()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_idempotent() {
        let registry = DeviceRegistry::new();

        registry.register("phone", 0.9).await;
        registry.register("phone", 0.8).await;

        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.get("phone").await.unwrap().trust_weight, 0.8);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_device_is_noop() {
        let registry = DeviceRegistry::new();

        registry.heartbeat("ghost").await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_devices_excluded() {
        let registry = DeviceRegistry::new();

        registry.register("phone", 0.9).await;
        registry.register("yubikey", 0.95).await;

        let now = Utc::now();
        assert_eq!(registry.active_devices(now).await.len(), 2);

        // Both devices fall outside the window when queried far in the future
        let later = now + Duration::seconds(60);
        assert_eq!(registry.active_devices(later).await.len(), 0);

        // A heartbeat brings a device back
        registry.heartbeat("phone").await;
        let active = registry.active_devices(Utc::now()).await;
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn test_revoked_device_never_active() {
        let registry = DeviceRegistry::new();

        registry.register("evil-laptop", 0.7).await;
        assert!(registry.revoke("evil-laptop").await);
        assert!(!registry.revoke("missing").await);

        assert!(registry.active_devices(Utc::now()).await.is_empty());

        // Re-registration does not clear revocation
        registry.register("evil-laptop", 0.7).await;
        assert!(registry.active_devices(Utc::now()).await.is_empty());
        assert_eq!(registry.count().await, 1);
    }
}
