// ── Device registry ──
//
// Authoritative in-memory view of every device on the account. Writes come
// from the session (device lists, pushed state) and from optimistic command
// updates; the entity bridge consumes the change feed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, watch};

use crate::error::CoreError;
use crate::model::{Device, DeviceId, DeviceUpdate};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A single observable registry mutation.
#[derive(Debug, Clone)]
pub enum DeviceChange {
    Added(Arc<Device>),
    Updated(Arc<Device>),
    Removed(DeviceId),
}

impl DeviceChange {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::Added(d) | Self::Updated(d) => &d.id,
            Self::Removed(id) => id,
        }
    }
}

/// Thread-safe device store.
///
/// Readers always see whole `Device` values: every write replaces the
/// stored `Arc`. Change notifications for a given device are emitted while
/// its map entry is locked, so they arrive in write order.
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, Arc<Device>>,
    changes: broadcast::Sender<DeviceChange>,
    snapshot: watch::Sender<Arc<Vec<Arc<Device>>>>,
    last_full_load: watch::Sender<Option<DateTime<Utc>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (last_full_load, _) = watch::channel(None);
        Self {
            devices: DashMap::new(),
            changes,
            snapshot,
            last_full_load,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &DeviceId) -> Result<Arc<Device>, CoreError> {
        self.devices
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CoreError::NotFound { id: id.to_string() })
    }

    /// Find a device by id, falling back to a case-insensitive name match.
    pub fn find(&self, id_or_name: &str) -> Option<Arc<Device>> {
        if let Ok(device) = self.get(&DeviceId::from(id_or_name)) {
            return Some(device);
        }
        self.snapshot()
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(id_or_name))
            .cloned()
    }

    /// All devices, sorted by name.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.snapshot.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Per-device change feed.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceChange> {
        self.changes.subscribe()
    }

    /// Whole-registry snapshots, republished after every change.
    pub fn watch_devices(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.snapshot.subscribe()
    }

    /// Time of the last full device-list load, `None` before the first.
    pub fn last_full_load(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_full_load.subscribe()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Replace the registry contents with a freshly fetched device list.
    ///
    /// Devices that are new emit `Added`, devices whose state differs emit
    /// `Updated`, devices missing from the list emit `Removed`. Unchanged
    /// devices emit nothing.
    pub fn bulk_load(&self, devices: Vec<Device>) {
        let incoming: HashSet<DeviceId> = devices.iter().map(|d| d.id.clone()).collect();

        let stale: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|entry| !incoming.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            if self.devices.remove(&id).is_some() {
                let _ = self.changes.send(DeviceChange::Removed(id));
            }
        }

        for device in devices {
            let device = Arc::new(device);
            match self.devices.entry(device.id.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&device));
                    let _ = self.changes.send(DeviceChange::Added(device));
                }
                Entry::Occupied(mut existing) => {
                    if **existing.get() != *device {
                        existing.insert(Arc::clone(&device));
                        let _ = self.changes.send(DeviceChange::Updated(device));
                    }
                }
            }
        }

        self.rebuild_snapshot();
        let _ = self.last_full_load.send(Some(Utc::now()));
    }

    /// Merge a partial update into one device.
    ///
    /// Returns `true` and emits exactly one `Updated` if the state changed.
    /// Unknown devices and no-op updates are ignored.
    pub fn apply_update(&self, id: &DeviceId, update: &DeviceUpdate) -> bool {
        {
            let Some(mut entry) = self.devices.get_mut(id) else {
                tracing::debug!(device = %id, "ignoring update for unknown device");
                return false;
            };

            let mut next = Device::clone(entry.value());
            if !next.apply(update) {
                return false;
            }
            let next = Arc::new(next);
            *entry.value_mut() = Arc::clone(&next);
            let _ = self.changes.send(DeviceChange::Updated(next));
        }

        self.rebuild_snapshot();
        true
    }

    /// Drop every device, emitting `Removed` for each.
    pub fn clear(&self) {
        let ids: Vec<DeviceId> = self.devices.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if self.devices.remove(&id).is_some() {
                let _ = self.changes.send(DeviceChange::Removed(id));
            }
        }
        self.rebuild_snapshot();
    }

    fn rebuild_snapshot(&self) {
        let mut devices: Vec<Arc<Device>> =
            self.devices.iter().map(|e| Arc::clone(e.value())).collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        self.snapshot.send_replace(Arc::new(devices));
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
