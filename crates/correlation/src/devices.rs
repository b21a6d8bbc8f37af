//! Custom Device Registry
//!
//! Every device name an alert batch maps to is registered once as a
//! Dynatrace custom device and remembered in `customDevices.json`.

use crate::error::CorrelationError;
use chrono::{DateTime, Utc};
use device_id::DeviceIds;
use dynatrace_client::{CustomDevice, DynatraceApi};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use storage::{JsonStore, Migration, Snapshot};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// File name of the device cache inside the cache directory
pub const DEVICE_CACHE_FILE: &str = "customDevices.json";

/// A custom device known to exist in Dynatrace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDeviceRecord {
    /// Dynatrace entity id
    pub id: String,
    /// Display name
    pub name: String,
    /// Custom device group
    pub group: String,
}

/// Snapshot persisted in `customDevices.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCache {
    pub custom_devices: Vec<CustomDeviceRecord>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl DeviceCache {
    /// Record registered under the entity id, or under the name in `group`
    pub fn find(&self, ids: &DeviceIds, name: &str, group: &str) -> Option<&CustomDeviceRecord> {
        self.custom_devices.iter().find(|device| {
            device.id == ids.device_id || (device.name == name && device.group == group)
        })
    }
}

impl Snapshot for DeviceCache {
    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = Some(now);
    }
}

/// First schema: a bare list of entity ids
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceCacheV1 {
    custom_devices: Vec<String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// Migration from the id-list schema. Names are unknown at this point and
/// default to the id until [`DeviceRegistry::backfill_display_names`] runs.
pub fn legacy_device_migration(group: String) -> Migration<DeviceCache> {
    Box::new(move |raw| {
        let legacy: DeviceCacheV1 = serde_json::from_str(raw).ok()?;
        Some(DeviceCache {
            custom_devices: legacy
                .custom_devices
                .into_iter()
                .map(|id| CustomDeviceRecord {
                    name: id.clone(),
                    id,
                    group: group.clone(),
                })
                .collect(),
            last_updated: legacy.last_updated,
        })
    })
}

/// Idempotent custom device registration backed by the device cache
pub struct DeviceRegistry {
    store: JsonStore<DeviceCache>,
    api: Arc<dyn DynatraceApi>,
    group: String,
    /// One creation lock per derived device id
    creating: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DeviceRegistry {
    /// Open the registry in `dir` for devices of `group`
    pub fn new(dir: &Path, api: Arc<dyn DynatraceApi>, group: impl Into<String>) -> Self {
        let group = group.into();
        let store = JsonStore::with_migration(
            dir.join(DEVICE_CACHE_FILE),
            legacy_device_migration(group.clone()),
        );
        Self {
            store,
            api,
            group,
            creating: Mutex::new(HashMap::new()),
        }
    }

    fn creation_lock(&self, device_id: &str) -> Arc<AsyncMutex<()>> {
        let mut creating = self
            .creating
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        creating
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    /// Custom device group devices are registered in
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Known devices, possibly stale
    pub async fn devices(&self) -> Vec<CustomDeviceRecord> {
        self.store.load().await.custom_devices
    }

    /// Make sure a custom device named `name` exists.
    ///
    /// Returns `true` if the device was created by this call. A per-device
    /// lock stays held across the remote call so concurrent batches for the
    /// same new device create it once, while other devices proceed.
    pub async fn ensure_registered(
        &self,
        name: &str,
        ids: &DeviceIds,
    ) -> Result<bool, CorrelationError> {
        let creation = self.creation_lock(&ids.device_id);
        let _creating = creation.lock().await;

        if let Some(device) = self.store.load().await.find(ids, name, &self.group) {
            debug!("Custom device {} already registered as {}", name, device.id);
            return Ok(false);
        }

        info!(
            device_id = %ids.device_id,
            "Creating custom device {} in group {}", name, self.group
        );
        let device = CustomDevice {
            display_name: name.to_string(),
            group: Some(self.group.clone()),
            device_type: None,
        };
        let response = self.api.create_custom_device(name, &device).await?;

        let id = if response.entity_id.is_empty() {
            ids.device_id.clone()
        } else {
            response.entity_id
        };
        if id != ids.device_id {
            warn!(
                "Dynatrace assigned {} to {}, expected {}",
                id, name, ids.device_id
            );
        }

        let record = CustomDeviceRecord {
            id,
            name: name.to_string(),
            group: self.group.clone(),
        };
        self.store
            .mutate(move |cache| cache.custom_devices.push(record))
            .await?;
        Ok(true)
    }

    /// Replace placeholder names of migrated records with the display name
    /// Dynatrace knows. Returns the number of records updated.
    pub async fn backfill_display_names(&self) -> Result<usize, CorrelationError> {
        let placeholders: Vec<String> = self
            .devices()
            .await
            .into_iter()
            .filter(|device| device.name == device.id)
            .map(|device| device.id)
            .collect();
        if placeholders.is_empty() {
            return Ok(0);
        }

        info!("Looking up display names of {} devices", placeholders.len());
        let mut names = Vec::new();
        for id in placeholders {
            match self.api.entity_display_name(&id).await {
                Ok(name) if !name.is_empty() => names.push((id, name)),
                Ok(_) => debug!("Entity {} has an empty display name", id),
                Err(e) => warn!("Could not look up display name of {}: {}", id, e),
            }
        }

        let updated = self
            .store
            .mutate(|cache| {
                let mut updated = 0;
                for (id, name) in names {
                    if let Some(device) = cache
                        .custom_devices
                        .iter_mut()
                        .find(|device| device.id == id && device.name == id)
                    {
                        device.name = name;
                        updated += 1;
                    }
                }
                updated
            })
            .await?;
        Ok(updated)
    }
}
