// ── Reactive device collection ──
//
// Concurrent storage with O(1) lookups and push-based change
// notification via `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{Device, DeviceId};

/// Lock-free map of published device snapshots.
///
/// Every mutation bumps a version counter and rebuilds the sorted full
/// snapshot that subscribers receive. Entries are replaced whole, so a
/// reader holding an `Arc<Device>` always sees one committed payload.
pub(crate) struct DeviceCollection {
    by_id: DashMap<DeviceId, Arc<Device>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot sorted by device id.
    snapshot: watch::Sender<Arc<Vec<Arc<Device>>>>,
}

impl DeviceCollection {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_id: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace a device. Returns `true` if the id was new.
    pub(crate) fn upsert(&self, device: Device) -> bool {
        let id = device.id.clone();
        let is_new = self.by_id.insert(id, Arc::new(device)).is_none();
        self.rebuild_snapshot();
        self.bump_version();
        is_new
    }

    pub(crate) fn remove(&self, id: &DeviceId) -> Option<Arc<Device>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
            self.bump_version();
        }
        removed
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<Device>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<Device>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
