//! Device session manager.
//!
//! Owns the per-user device records. "Primary" is load-bearing (it gates
//! restricted users) and always goes through the store's atomic switch.
//! "Current" is advisory: it is cleared on the other devices and then set,
//! in two steps, so two logins racing each other may both end up current
//! until the next login.

use std::sync::Arc;

use tracing::{debug, info};

use parley_shared::types::{DeviceId, UserId};
use parley_shared::DeviceView;
use parley_store::Device;

use crate::error::ServiceError;
use crate::store::ChatStore;

pub struct DeviceManager {
    store: Arc<dyn ChatStore>,
}

impl DeviceManager {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Create the device for this (name, info) fingerprint, or refresh the
    /// existing one. A device becomes primary when asked to, or when the
    /// user has no primary device at all.
    pub async fn register_or_update(
        &self,
        user: UserId,
        device_name: &str,
        device_info: &str,
        is_primary_hint: bool,
        is_current: bool,
    ) -> Result<Device, ServiceError> {
        let (mut device, created) = self
            .store
            .register_device(user, device_name.to_string(), device_info.to_string(), is_current)
            .await
            .map_err(|e| ServiceError::from_store("Device", e))?;
        if created {
            info!(user = %user, device = %device.id, name = device_name, "new device registered");
        }

        if is_current {
            let cleared = self
                .store
                .clear_current_devices(user, Some(device.id))
                .await
                .map_err(|e| ServiceError::from_store("Device", e))?;
            debug!(user = %user, cleared, "cleared current flag on other devices");
        }

        if !device.is_primary {
            let needs_primary = is_primary_hint
                || self
                    .store
                    .primary_device(user)
                    .await
                    .map_err(|e| ServiceError::from_store("Device", e))?
                    .is_none();
            if needs_primary {
                device = self.set_primary(user, device.id).await?;
            }
        }

        Ok(device)
    }

    /// Atomically make `device` the user's only primary device.
    pub async fn set_primary(&self, user: UserId, device: DeviceId) -> Result<Device, ServiceError> {
        if device.is_nil() {
            return Err(ServiceError::Validation("Device id is required".into()));
        }
        let device = self
            .store
            .set_primary_device(user, device)
            .await
            .map_err(|e| ServiceError::from_store("Device", e))?;
        info!(user = %user, device = %device.id, "primary device set");
        Ok(device)
    }

    /// Current first, then primary, then most recently active.
    pub async fn list(&self, user: UserId) -> Result<Vec<Device>, ServiceError> {
        self.store
            .list_devices(user)
            .await
            .map_err(|e| ServiceError::from_store("Device", e))
    }

    /// Delete one of the user's devices. Unknown ids and other users'
    /// devices are ignored.
    pub async fn remove(&self, user: UserId, device: DeviceId) -> Result<(), ServiceError> {
        let removed = self
            .store
            .delete_device(user, device)
            .await
            .map_err(|e| ServiceError::from_store("Device", e))?;
        if removed {
            info!(user = %user, device = %device, "device removed");
        }
        Ok(())
    }

    /// Best guess at the device behind a connection: exact name match, then
    /// case-insensitive substring match, then the most recently active
    /// device. `NotFound` only when the user has no devices.
    pub async fn resolve_current(
        &self,
        user: UserId,
        name_hint: Option<&str>,
    ) -> Result<Device, ServiceError> {
        let devices = self.list(user).await?;
        pick_current(devices, name_hint)
            .ok_or_else(|| ServiceError::NotFound("No devices registered".into()))
    }
}

fn pick_current(devices: Vec<Device>, name_hint: Option<&str>) -> Option<Device> {
    let hint = name_hint.map(str::trim).filter(|h| !h.is_empty());

    if let Some(hint) = hint {
        if let Some(exact) = devices.iter().find(|d| d.device_name == hint) {
            return Some(exact.clone());
        }
        let needle = hint.to_lowercase();
        if let Some(partial) = devices.iter().find(|d| {
            let name = d.device_name.to_lowercase();
            name.contains(&needle) || needle.contains(&name)
        }) {
            return Some(partial.clone());
        }
    }

    devices.into_iter().max_by_key(|d| d.last_active)
}

pub fn to_view(device: Device) -> DeviceView {
    DeviceView {
        id: device.id,
        user_id: device.user_id,
        device_name: device.device_name,
        device_info: device.device_info,
        is_primary: device.is_primary,
        is_current: device.is_current,
        created_at: device.created_at,
        last_active: device.last_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use parley_store::NewUser;

    async fn setup() -> (DeviceManager, Arc<dyn ChatStore>, UserId) {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let user = store
            .create_user(NewUser {
                username: "alice".into(),
                password_hash: "hash".into(),
                display_name: "Alice".into(),
            })
            .await
            .unwrap();
        (DeviceManager::new(store.clone()), store, user.id)
    }

    fn count(devices: &[Device], pred: impl Fn(&Device) -> bool) -> usize {
        devices.iter().filter(|d| pred(d)).count()
    }

    #[tokio::test]
    async fn same_fingerprint_updates_instead_of_duplicating() {
        let (devices, _, alice) = setup().await;

        let first = devices
            .register_or_update(alice, "Pixel", "Android 14", false, true)
            .await
            .unwrap();
        let again = devices
            .register_or_update(alice, "Pixel", "Android 14", false, true)
            .await
            .unwrap();

        assert_eq!(first.id, again.id);
        assert!(again.last_active >= first.last_active);
        assert_eq!(devices.list(alice).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_logins_from_one_device_share_a_row() {
        let (devices, _, alice) = setup().await;

        for round in 0..20 {
            let name = format!("Pixel {round}");
            let (a, b) = tokio::join!(
                devices.register_or_update(alice, &name, "Android", false, true),
                devices.register_or_update(alice, &name, "Android", false, true),
            );
            assert_eq!(a.unwrap().id, b.unwrap().id);
        }

        let all = devices.list(alice).await.unwrap();
        assert_eq!(all.len(), 20);
        assert_eq!(count(&all, |d| d.is_primary), 1);
    }

    #[tokio::test]
    async fn first_device_becomes_primary_and_later_ones_do_not() {
        let (devices, _, alice) = setup().await;

        let phone = devices
            .register_or_update(alice, "Pixel", "Android 14", false, true)
            .await
            .unwrap();
        assert!(phone.is_primary);

        let laptop = devices
            .register_or_update(alice, "Laptop", "Linux", false, true)
            .await
            .unwrap();
        assert!(!laptop.is_primary);

        let all = devices.list(alice).await.unwrap();
        assert_eq!(count(&all, |d| d.is_primary), 1);
        assert_eq!(count(&all, |d| d.is_current), 1);
        assert_eq!(all[0].id, laptop.id, "current device lists first");
    }

    #[tokio::test]
    async fn primary_hint_takes_over() {
        let (devices, _, alice) = setup().await;
        devices
            .register_or_update(alice, "Pixel", "Android 14", true, true)
            .await
            .unwrap();
        let tablet = devices
            .register_or_update(alice, "Tablet", "iPadOS", true, true)
            .await
            .unwrap();

        assert!(tablet.is_primary);
        let all = devices.list(alice).await.unwrap();
        assert_eq!(count(&all, |d| d.is_primary), 1);
    }

    #[tokio::test]
    async fn primary_stays_singleton_across_switches() {
        let (devices, _, alice) = setup().await;
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            ids.push(
                devices
                    .register_or_update(alice, name, "x", false, false)
                    .await
                    .unwrap()
                    .id,
            );
        }

        for target in [ids[2], ids[1], ids[1], ids[0]] {
            devices.set_primary(alice, target).await.unwrap();
            let all = devices.list(alice).await.unwrap();
            assert_eq!(count(&all, |d| d.is_primary), 1);
            assert!(all.iter().any(|d| d.id == target && d.is_primary));
        }
    }

    #[tokio::test]
    async fn set_primary_on_foreign_device_is_not_found() {
        let (devices, store, alice) = setup().await;
        let bob = store
            .create_user(NewUser {
                username: "bob".into(),
                password_hash: "hash".into(),
                display_name: "Bob".into(),
            })
            .await
            .unwrap();
        let bobs = devices
            .register_or_update(bob.id, "Bob's phone", "iOS", true, true)
            .await
            .unwrap();

        assert!(matches!(
            devices.set_primary(alice, bobs.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            devices.set_primary(alice, DeviceId(uuid::Uuid::nil())).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (devices, _, alice) = setup().await;
        let phone = devices
            .register_or_update(alice, "Pixel", "Android 14", false, true)
            .await
            .unwrap();

        devices.remove(alice, phone.id).await.unwrap();
        devices.remove(alice, phone.id).await.unwrap();
        devices.remove(alice, DeviceId::new()).await.unwrap();
        assert!(devices.list(alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_current_falls_back_in_order() {
        let (devices, _, alice) = setup().await;
        assert!(matches!(
            devices.resolve_current(alice, Some("anything")).await,
            Err(ServiceError::NotFound(_))
        ));

        let phone = devices
            .register_or_update(alice, "Pixel 8 Pro", "Android 14", false, false)
            .await
            .unwrap();
        let laptop = devices
            .register_or_update(alice, "Work Laptop", "Linux", false, false)
            .await
            .unwrap();

        let exact = devices.resolve_current(alice, Some("Pixel 8 Pro")).await.unwrap();
        assert_eq!(exact.id, phone.id);

        let partial = devices.resolve_current(alice, Some("pixel")).await.unwrap();
        assert_eq!(partial.id, phone.id);

        // No match: most recently active wins.
        let fallback = devices.resolve_current(alice, Some("Smart Fridge")).await.unwrap();
        assert_eq!(fallback.id, laptop.id);
        let no_hint = devices.resolve_current(alice, None).await.unwrap();
        assert_eq!(no_hint.id, laptop.id);
    }
}
