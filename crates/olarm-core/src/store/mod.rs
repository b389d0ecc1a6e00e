// ── Published state ──
//
// The only place readers look. The reconciler writes whole device
// snapshots here after each commit; everyone else reads `Arc`s.

mod collection;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::model::{Device, DeviceId};
use crate::stream::DeviceStream;

use collection::DeviceCollection;

/// Counters for payloads the reconciler did not apply.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    applied: AtomicU64,
    stale: AtomicU64,
    malformed: AtomicU64,
    unknown_device: AtomicU64,
}

/// Point-in-time copy of the reconcile counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub applied: u64,
    /// Replays and out-of-order payloads.
    pub stale: u64,
    pub malformed: u64,
    pub unknown_device: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Outcome {
    Applied,
    Stale,
    Malformed,
    UnknownDevice,
}

pub struct DataStore {
    devices: DeviceCollection,
    counters: Counters,
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            devices: DeviceCollection::new(),
            counters: Counters::default(),
        }
    }

    // ── Writes (reconciler only) ─────────────────────────────────────

    pub(crate) fn publish(&self, device: Device) {
        self.devices.upsert(device);
    }

    pub(crate) fn unpublish(&self, id: &DeviceId) {
        self.devices.remove(id);
    }

    pub(crate) fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Applied => &self.counters.applied,
            Outcome::Stale => &self.counters.stale,
            Outcome::Malformed => &self.counters.malformed,
            Outcome::UnknownDevice => &self.counters.unknown_device,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn subscribe_devices(&self) -> DeviceStream {
        DeviceStream::new(self.devices.subscribe())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Mutation counter; increases on every published change.
    pub fn version(&self) -> u64 {
        self.devices.version()
    }

    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            applied: self.counters.applied.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            unknown_device: self.counters.unknown_device.load(Ordering::Relaxed),
        }
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
