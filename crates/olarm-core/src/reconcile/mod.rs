// ── State reconciliation ──
//
// Applies inbound payloads to the declared device tables. For each payload:
// reject undeclared devices, parse, drop anything not strictly newer than
// the last applied timestamp, diff field by field, then commit and publish
// the whole device at once. Events go out only after the commit.
//
// The timestamp gate covers payloads carrying `deviceState`, including any
// LINK or MAX readings they bundle. Payloads with only LINK or MAX
// readings have no timestamp; they apply in delivery order and leave the
// ordering key alone.

pub mod payload;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{
    AreaState, Device, DeviceDescriptor, DeviceId, IoKind, IoState, PowerState, StateChangeEvent,
    ZoneStatus,
};
use crate::store::{DataStore, Outcome};

use payload::{ParsedIo, ParsedState};

/// Owner of the mutable device model. Only the supervisor task holds one.
pub struct StateReconciler {
    limit: usize,
    devices: BTreeMap<DeviceId, Device>,
    store: Arc<DataStore>,
    events: broadcast::Sender<Arc<StateChangeEvent>>,
}

impl StateReconciler {
    pub fn new(
        limit: usize,
        store: Arc<DataStore>,
        events: broadcast::Sender<Arc<StateChangeEvent>>,
    ) -> Self {
        Self {
            limit,
            devices: BTreeMap::new(),
            store,
            events,
        }
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Declare a device. Returns `Ok(false)` if it was already declared,
    /// in which case its tables are left untouched.
    pub fn register(&mut self, descriptor: &DeviceDescriptor) -> Result<bool, CoreError> {
        if self.devices.contains_key(&descriptor.id) {
            return Ok(false);
        }
        if self.devices.len() >= self.limit {
            warn!(device_id = %descriptor.id, limit = self.limit, "device limit reached");
            return Err(CoreError::DeviceLimitExceeded { limit: self.limit });
        }

        let mut device = Device::from_descriptor(descriptor);
        if let Some(initial) = &descriptor.initial_state {
            match payload::parse_value(initial) {
                Ok(parsed) => {
                    // Seed silently: the first real payload diffs against this.
                    if let Some(state) = &parsed.state {
                        let _ = diff_into(&mut device, state);
                        device.last_applied = Some(state.timestamp);
                    }
                    let _ = diff_io(&mut device, &parsed.io);
                }
                Err(reason) => {
                    debug!(device_id = %descriptor.id, %reason, "ignoring unparseable directory state");
                }
            }
        }

        info!(
            device_id = %descriptor.id,
            areas = device.areas.len(),
            zones = device.zones.len(),
            io_points = device.io.len(),
            "device registered"
        );
        self.store.publish(device.clone());
        self.devices.insert(descriptor.id.clone(), device);
        Ok(true)
    }

    /// Forget a device and its published state.
    pub fn remove(&mut self, id: &DeviceId) -> bool {
        let removed = self.devices.remove(id).is_some();
        if removed {
            self.store.unpublish(id);
            info!(device_id = %id, "device removed");
        }
        removed
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Declared device ids, sorted.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    // ── Apply ────────────────────────────────────────────────────────

    /// Apply one raw payload and return the change events it produced.
    ///
    /// Never fails: undeclared devices, malformed and stale payloads are
    /// dropped, logged and counted.
    pub fn apply(
        &mut self,
        device_id: &DeviceId,
        raw: &[u8],
        received_at: DateTime<Utc>,
    ) -> Vec<StateChangeEvent> {
        match self.try_apply(device_id, raw, received_at) {
            Ok(events) => events,
            Err(e @ CoreError::UnknownDevice { .. }) => {
                warn!(device_id = %device_id, reason = %e, "dropping payload");
                Vec::new()
            }
            Err(e) => {
                warn!(device_id = %device_id, reason = %e, "dropping malformed payload");
                Vec::new()
            }
        }
    }

    /// Like [`apply`](Self::apply) but reports why a payload was dropped.
    /// Stale payloads are not errors and yield `Ok(vec![])`.
    pub fn try_apply(
        &mut self,
        device_id: &DeviceId,
        raw: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<Vec<StateChangeEvent>, CoreError> {
        let Some(current) = self.devices.get(device_id) else {
            self.store.record(Outcome::UnknownDevice);
            return Err(CoreError::UnknownDevice {
                device_id: device_id.to_string(),
            });
        };

        let parsed = match payload::parse(raw) {
            Ok(parsed) if parsed.is_empty() => {
                debug!(device_id = %device_id, "payload carries no device state");
                return Ok(Vec::new());
            }
            Ok(parsed) => parsed,
            Err(reason) => {
                self.store.record(Outcome::Malformed);
                return Err(CoreError::MalformedPayload {
                    device_id: device_id.to_string(),
                    reason,
                });
            }
        };

        if let (Some(state), Some(last)) = (&parsed.state, current.last_applied) {
            if state.timestamp <= last {
                self.store.record(Outcome::Stale);
                debug!(
                    device_id = %device_id,
                    timestamp = state.timestamp,
                    last_applied = last,
                    "dropping stale payload"
                );
                return Ok(Vec::new());
            }
        }

        // Diff into a copy; the committed tables stay untouched until the
        // whole payload has been processed.
        let mut next = current.clone();
        let mut changes = Vec::new();
        if let Some(state) = &parsed.state {
            changes = diff_into(&mut next, state);
            next.last_applied = Some(state.timestamp);
        }
        changes.extend(diff_io(&mut next, &parsed.io));
        next.updated_at = Some(received_at);

        let timestamp = parsed.state.as_ref().map(|s| s.timestamp);
        let at = timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(received_at);
        let events: Vec<StateChangeEvent> = changes
            .into_iter()
            .map(|change| change.into_event(device_id, at))
            .collect();

        self.store.publish(next.clone());
        self.devices.insert(device_id.clone(), next);
        self.store.record(Outcome::Applied);

        for event in &events {
            // No receivers is fine: events are also reflected in the store.
            let _ = self.events.send(Arc::new(event.clone()));
        }

        debug!(
            device_id = %device_id,
            ?timestamp,
            changes = events.len(),
            "payload applied"
        );
        Ok(events)
    }
}

// ── Diffing ──────────────────────────────────────────────────────────

enum Change {
    Area {
        index: u32,
        old: AreaState,
        new: AreaState,
    },
    Zone {
        index: u32,
        old: ZoneStatus,
        new: ZoneStatus,
    },
    Power {
        old: PowerState,
        new: PowerState,
    },
    Io {
        kind: IoKind,
        link_id: Option<String>,
        index: u32,
        old: IoState,
        new: IoState,
    },
}

impl Change {
    fn into_event(self, device_id: &DeviceId, at: DateTime<Utc>) -> StateChangeEvent {
        match self {
            Self::Area { index, old, new } => {
                StateChangeEvent::area(device_id.clone(), index, old, new, at)
            }
            Self::Zone { index, old, new } => {
                StateChangeEvent::zone(device_id.clone(), index, old, new, at)
            }
            Self::Power { old, new } => StateChangeEvent::power(device_id.clone(), old, new, at),
            Self::Io {
                kind,
                link_id,
                index,
                old,
                new,
            } => StateChangeEvent::io(device_id.clone(), kind, link_id, index, old, new, at),
        }
    }
}

/// Write `state` into `device`, returning every field that changed, in
/// area, zone, power order. Entries beyond the declared tables are
/// ignored; missing entries leave the declared value as it was.
fn diff_into(device: &mut Device, state: &ParsedState) -> Vec<Change> {
    let mut changes = Vec::new();

    if let Some(areas) = &state.areas {
        for (area, &new) in device.areas.iter_mut().zip(areas) {
            if area.state != new {
                changes.push(Change::Area {
                    index: area.index,
                    old: area.state,
                    new,
                });
                area.state = new;
            }
        }
        if areas.len() > device.areas.len() {
            debug!(
                device_id = %device.id,
                declared = device.areas.len(),
                reported = areas.len(),
                "ignoring undeclared areas"
            );
        }
    }

    if let Some(zones) = &state.zones {
        for (zone, &new) in device.zones.iter_mut().zip(zones) {
            if zone.status != new {
                changes.push(Change::Zone {
                    index: zone.index,
                    old: zone.status,
                    new,
                });
                zone.status = new;
            }
        }
        if zones.len() > device.zones.len() {
            debug!(
                device_id = %device.id,
                declared = device.zones.len(),
                reported = zones.len(),
                "ignoring undeclared zones"
            );
        }
    }

    if let Some(new) = state.power {
        if device.power != new {
            changes.push(Change::Power {
                old: device.power,
                new,
            });
            device.power = new;
        }
    }

    changes
}

/// Write reported LINK and MAX levels into the declared points, in table
/// order. Readings for undeclared points are ignored.
fn diff_io(device: &mut Device, io: &ParsedIo) -> Vec<Change> {
    if io.is_empty() {
        return Vec::new();
    }
    let mut changes = Vec::new();
    for point in &mut device.io {
        let Some(new) = io.lookup(point.kind, point.link_id.as_deref(), point.index) else {
            continue;
        };
        if point.state != new {
            changes.push(Change::Io {
                kind: point.kind,
                link_id: point.link_id.clone(),
                index: point.index,
                old: point.state,
                new,
            });
            point.state = new;
        }
    }
    changes
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ChangeKind, IoDecl, StateValue};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn reconciler() -> (StateReconciler, Arc<DataStore>, broadcast::Receiver<Arc<StateChangeEvent>>) {
        let store = Arc::new(DataStore::new());
        let (tx, rx) = broadcast::channel(64);
        (StateReconciler::new(5, Arc::clone(&store), tx), store, rx)
    }

    fn payload(ts: i64, areas: &[&str], zones: &[&str]) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "deviceState": { "timestamp": ts, "areas": areas, "zones": zones }
        }))
        .unwrap()
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::from(s)
    }

    #[test]
    fn first_payload_reports_every_known_field() {
        let (mut rec, store, _rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 1, 2)).unwrap();

        let events = rec.apply(&id("gen1-001"), &payload(10, &["disarm"], &["c", "a"]), Utc::now());

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, ChangeKind::Area);
        assert_eq!(events[0].old_value, StateValue::Area(AreaState::Unknown));
        assert_eq!(events[2].new_value, StateValue::Zone(ZoneStatus::Open));
        let device = store.device("gen1-001").unwrap();
        assert_eq!(device.last_applied, Some(10));
        assert_eq!(device.zone(2).unwrap().status, ZoneStatus::Open);
    }

    #[test]
    fn replay_is_idempotent() {
        let (mut rec, store, _rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 1, 2)).unwrap();
        let raw = payload(10, &["arm"], &["c", "c"]);

        assert_eq!(rec.apply(&id("gen1-001"), &raw, Utc::now()).len(), 3);
        assert!(rec.apply(&id("gen1-001"), &raw, Utc::now()).is_empty());
        assert_eq!(store.stats().stale, 1);
    }

    #[test]
    fn newer_payload_with_same_state_emits_nothing() {
        let (mut rec, _store, _rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 1, 1)).unwrap();
        rec.apply(&id("gen1-001"), &payload(10, &["arm"], &["c"]), Utc::now());

        let events = rec.apply(&id("gen1-001"), &payload(11, &["arm"], &["c"]), Utc::now());
        assert!(events.is_empty());
        assert_eq!(rec.device(&id("gen1-001")).unwrap().last_applied, Some(11));
    }

    #[test]
    fn older_payload_is_discarded() {
        let (mut rec, store, _rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 1, 1)).unwrap();

        rec.apply(&id("gen1-001"), &payload(20, &["arm"], &["a"]), Utc::now());
        let events = rec.apply(&id("gen1-001"), &payload(19, &["disarm"], &["c"]), Utc::now());

        assert!(events.is_empty());
        let device = store.device("gen1-001").unwrap();
        assert_eq!(device.area(1).unwrap().state, AreaState::Armed);
        assert_eq!(device.zone(1).unwrap().status, ZoneStatus::Open);
        assert_eq!(device.last_applied, Some(20));
    }

    #[test]
    fn directory_state_seeds_tables_and_ordering() {
        let (mut rec, _store, _rx) = reconciler();
        let mut desc = DeviceDescriptor::new("gen1-001", 1, 3);
        desc.initial_state = Some(json!({
            "deviceState": { "timestamp": 100, "areas": ["disarm"], "zones": ["c", "c", "c"] }
        }));
        rec.register(&desc).unwrap();

        // Older than the directory's view.
        assert!(rec.apply(&id("gen1-001"), &payload(50, &["arm"], &["a", "a", "a"]), Utc::now()).is_empty());

        let events = rec.apply(&id("gen1-001"), &payload(101, &["disarm"], &["c", "a", "c"]), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            StateChangeEvent::zone(
                id("gen1-001"),
                2,
                ZoneStatus::Closed,
                ZoneStatus::Open,
                DateTime::from_timestamp_millis(101).unwrap(),
            )
        );
    }

    #[test]
    fn unknown_device_is_counted_and_dropped() {
        let (mut rec, store, _rx) = reconciler();
        let err = rec
            .try_apply(&id("xyz"), &payload(1, &[], &["a"]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownDevice { ref device_id } if device_id == "xyz"));
        assert!(rec.apply(&id("xyz"), &payload(1, &[], &["a"]), Utc::now()).is_empty());
        assert_eq!(store.stats().unknown_device, 2);
        assert_eq!(store.device_count(), 0);
    }

    #[test]
    fn malformed_payload_leaves_state_alone() {
        let (mut rec, store, _rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 1, 1)).unwrap();
        rec.apply(&id("gen1-001"), &payload(5, &["arm"], &["c"]), Utc::now());

        let err = rec
            .try_apply(&id("gen1-001"), br#"{"deviceState":{"zones":["a"]}}"#, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedPayload { .. }));
        assert_eq!(store.device("gen1-001").unwrap().zone(1).unwrap().status, ZoneStatus::Closed);
        assert_eq!(store.stats().malformed, 1);
    }

    #[test]
    fn power_changes_are_reported_at_index_zero() {
        let (mut rec, _store, _rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 0, 0)).unwrap();

        let raw = serde_json::to_vec(&json!({ "deviceState": { "timestamp": 1, "powerAC": "off" } })).unwrap();
        let events = rec.apply(&id("gen1-001"), &raw, Utc::now());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Power);
        assert_eq!(events[0].index, 0);
        assert_eq!(events[0].new_value, StateValue::Power(PowerState::Fault));
    }

    #[test]
    fn extra_entries_beyond_declaration_are_ignored() {
        let (mut rec, _store, _rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 1, 1)).unwrap();
        let events = rec.apply(&id("gen1-001"), &payload(1, &["arm", "arm"], &["a", "a", "a"]), Utc::now());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn sixth_device_exceeds_limit() {
        let (mut rec, _store, _rx) = reconciler();
        for i in 0..5 {
            assert!(rec.register(&DeviceDescriptor::new(format!("dev-{i}"), 1, 1)).unwrap());
        }
        let err = rec.register(&DeviceDescriptor::new("dev-5", 1, 1)).unwrap_err();
        assert!(matches!(err, CoreError::DeviceLimitExceeded { limit: 5 }));
        assert_eq!(rec.len(), 5);

        // Re-registering a known device is not a new registration.
        assert!(!rec.register(&DeviceDescriptor::new("dev-0", 1, 1)).unwrap());
    }

    #[test]
    fn events_are_broadcast_after_commit() {
        let (mut rec, store, mut rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 0, 1)).unwrap();
        rec.apply(&id("gen1-001"), &payload(1, &[], &["a"]), Utc::now());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.index, 1);
        // The store already holds the committed state when the event is seen.
        assert_eq!(store.device("gen1-001").unwrap().zone(1).unwrap().status, ZoneStatus::Open);
    }

    #[test]
    fn remove_unpublishes() {
        let (mut rec, store, _rx) = reconciler();
        rec.register(&DeviceDescriptor::new("gen1-001", 1, 1)).unwrap();
        assert!(rec.remove(&id("gen1-001")));
        assert!(!rec.remove(&id("gen1-001")));
        assert!(store.device("gen1-001").is_none());
        assert!(rec.is_empty());
    }

    // ── LINK and MAX I/O ─────────────────────────────────────────────

    fn io_device() -> DeviceDescriptor {
        let mut desc = DeviceDescriptor::new("pro-001", 1, 1);
        let decl = |kind: IoKind, link_id: Option<&str>, index: u32| IoDecl {
            kind,
            link_id: link_id.map(str::to_owned),
            index,
            label: format!("{kind} {index}"),
        };
        desc.io = vec![
            decl(IoKind::LinkInput, Some("lk-1"), 1),
            decl(IoKind::LinkRelay, Some("lk-1"), 1),
            decl(IoKind::MaxOutput, None, 2),
        ];
        desc
    }

    fn io_payload(input: &str, relay: &str, max_outputs: &[&str]) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "deviceLinks": { "lk-1": { "inputs": [input], "relays": [relay] } },
            "deviceIO": { "outputs": max_outputs }
        }))
        .unwrap()
    }

    #[test]
    fn link_and_max_readings_update_declared_points() {
        let (mut rec, store, _rx) = reconciler();
        rec.register(&io_device()).unwrap();
        let received = DateTime::from_timestamp_millis(7_000).unwrap();

        let events = rec.apply(&id("pro-001"), &io_payload("high", "unlatched", &["open", "closed"]), received);

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            StateChangeEvent::io(
                id("pro-001"),
                IoKind::LinkRelay,
                Some("lk-1".into()),
                1,
                IoState::Unknown,
                IoState::Unlatched,
                received,
            )
        );
        assert_eq!(events[2].kind, ChangeKind::MaxOutput);
        assert_eq!(events[2].new_value, StateValue::Io(IoState::Closed));

        let device = store.device("pro-001").unwrap();
        assert_eq!(device.io_point(IoKind::LinkInput, Some("lk-1"), 1).unwrap().state, IoState::High);
        // I/O-only payloads carry no ordering key.
        assert_eq!(device.last_applied, None);
        assert_eq!(store.stats().applied, 1);
    }

    #[test]
    fn io_only_payloads_apply_in_delivery_order() {
        let (mut rec, _store, _rx) = reconciler();
        rec.register(&io_device()).unwrap();
        rec.apply(&id("pro-001"), &payload(50, &["arm"], &["c"]), Utc::now());

        rec.apply(&id("pro-001"), &io_payload("high", "latched", &[]), Utc::now());
        let events = rec.apply(&id("pro-001"), &io_payload("low", "latched", &[]), Utc::now());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_value, StateValue::Io(IoState::High));
        assert_eq!(events[0].new_value, StateValue::Io(IoState::Low));
        assert_eq!(rec.device(&id("pro-001")).unwrap().last_applied, Some(50));
    }

    #[test]
    fn stale_state_payload_drops_its_bundled_io() {
        let (mut rec, store, _rx) = reconciler();
        rec.register(&io_device()).unwrap();
        rec.apply(&id("pro-001"), &payload(20, &["arm"], &["c"]), Utc::now());

        let raw = serde_json::to_vec(&json!({
            "deviceState": { "timestamp": 19, "areas": ["arm"], "zones": ["c"] },
            "deviceLinks": { "lk-1": { "inputs": ["high"] } }
        }))
        .unwrap();
        assert!(rec.apply(&id("pro-001"), &raw, Utc::now()).is_empty());

        let device = store.device("pro-001").unwrap();
        assert_eq!(device.io_point(IoKind::LinkInput, Some("lk-1"), 1).unwrap().state, IoState::Unknown);
        assert_eq!(store.stats().stale, 1);
    }

    #[test]
    fn state_events_precede_io_events_and_share_the_timestamp() {
        let (mut rec, _store, _rx) = reconciler();
        rec.register(&io_device()).unwrap();

        let raw = serde_json::to_vec(&json!({
            "deviceState": { "timestamp": 30, "zones": ["a"] },
            "deviceIO": { "outputs": ["open", "closed"] }
        }))
        .unwrap();
        let events = rec.apply(&id("pro-001"), &raw, Utc::now());

        let kinds: Vec<ChangeKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Zone, ChangeKind::MaxOutput]);
        assert!(events.iter().all(|e| e.at == DateTime::from_timestamp_millis(30).unwrap()));
    }

    #[test]
    fn directory_io_seeds_points_silently() {
        let (mut rec, _store, mut rx) = reconciler();
        let mut desc = io_device();
        desc.initial_state = Some(json!({
            "deviceLinks": { "lk-1": { "inputs": ["low"], "relays": ["latched"] } }
        }));
        rec.register(&desc).unwrap();

        assert!(rx.try_recv().is_err());
        let device = rec.device(&id("pro-001")).unwrap();
        assert_eq!(device.io_point(IoKind::LinkRelay, Some("lk-1"), 1).unwrap().state, IoState::Latched);
        assert_eq!(device.last_applied, None);
    }
}
