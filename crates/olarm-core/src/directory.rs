// ── Account directory ──
//
// Enumerates the account's devices and their declared layout. The engine
// only depends on `AccountDirectory`; `OlarmDirectory` adapts the REST
// device API.

use std::collections::BTreeSet;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use olarm_api::{DeviceClient, DeviceRecord};

use crate::credential::Credential;
use crate::error::CoreError;
use crate::model::{
    Capability, DeviceDescriptor, DeviceId, DeviceModel, IoDecl, IoKind, ZoneAreaLink, ZoneDecl,
};

/// Source of the account's declared devices.
pub trait AccountDirectory: Send + Sync {
    fn list_devices<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<Vec<DeviceDescriptor>, CoreError>>;
}

/// [`AccountDirectory`] backed by the device REST API.
pub struct OlarmDirectory {
    client: DeviceClient,
}

impl OlarmDirectory {
    pub fn new(client: DeviceClient) -> Self {
        Self { client }
    }
}

impl AccountDirectory for OlarmDirectory {
    fn list_devices<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<Vec<DeviceDescriptor>, CoreError>> {
        Box::pin(async move {
            let records = self
                .client
                .list_devices(credential.access_token())
                .await
                .map_err(directory_error)?;
            debug!(count = records.len(), "directory listed devices");
            Ok(records.into_iter().map(descriptor_from_record).collect())
        })
    }
}

fn directory_error(err: olarm_api::Error) -> CoreError {
    if err.is_auth_revoked() {
        CoreError::from(err)
    } else {
        CoreError::Directory {
            message: err.to_string(),
        }
    }
}

/// Convert a REST record into the engine's declared-device shape.
///
/// Labels come from the profile. When the profile declares nothing, the
/// counts fall back to the lengths of the last known state arrays. LINK
/// and MAX points come from `deviceProfileLinks` and `deviceProfileIO`;
/// only enabled points are declared.
pub fn descriptor_from_record(record: DeviceRecord) -> DeviceDescriptor {
    let profile = record.device_profile.unwrap_or_default();
    let state = record.device_state.filter(Value::is_object);

    let mut areas = profile.areas_labels;
    if areas.is_empty() {
        let count = state_len(state.as_ref(), "areas");
        areas = (1..=count).map(|i| format!("Area {i}")).collect();
    }

    let mut zones: Vec<ZoneDecl> = profile
        .zones_labels
        .into_iter()
        .enumerate()
        .map(|(i, label)| ZoneDecl {
            label,
            zone_type: profile.zones_types.get(i).and_then(Value::as_i64),
        })
        .collect();
    if zones.is_empty() {
        let count = state_len(state.as_ref(), "zones");
        zones = (1..=count)
            .map(|i| ZoneDecl {
                label: format!("Zone {i}"),
                zone_type: None,
            })
            .collect();
    }

    let zone_areas = (1_u32..)
        .zip(&profile.zones_areas)
        .flat_map(|(zone, members)| {
            members.iter().map(move |&area| ZoneAreaLink { zone, area })
        })
        .collect();

    let mut capabilities = BTreeSet::new();
    let has_links = |links: &Option<Map<String, Value>>| links.as_ref().is_some_and(|l| !l.is_empty());
    if has_links(&record.device_links) || has_links(&record.device_profile_links) {
        capabilities.insert(Capability::Link);
    }
    if record.device_profile_io.as_ref().is_some_and(|io| !io.is_null()) {
        capabilities.insert(Capability::Max);
    }

    let mut io = link_declarations(record.device_profile_links.as_ref());
    io.extend(max_declarations(record.device_profile_io.as_ref()));

    let mut initial = Map::new();
    if let Some(state) = state {
        initial.insert("deviceState".into(), state);
    }
    if let Some(links) = record.device_links.filter(|l| !l.is_empty()) {
        initial.insert("deviceLinks".into(), Value::Object(links));
    }
    if let Some(max) = record.device_io.filter(Value::is_object) {
        initial.insert("deviceIO".into(), max);
    }

    DeviceDescriptor {
        name: record
            .device_name
            .unwrap_or_else(|| record.device_id.clone()),
        id: DeviceId::from(record.device_id),
        model: record
            .device_type
            .as_deref()
            .map_or(DeviceModel::Other(String::new()), DeviceModel::from_tag),
        capabilities,
        areas,
        zones,
        zone_areas,
        pgm_count: profile.pgm_labels.len(),
        ukey_count: profile.ukeys_labels.len(),
        io,
        initial_state: (!initial.is_empty()).then_some(Value::Object(initial)),
    }
}

/// Enabled inputs, outputs and relays of every declared LINK module.
///
/// Inputs and outputs share one `io` list; a point's position in it is its
/// index into the module's `inputs` or `outputs` readings. Relays are
/// numbered by their position in `relays`.
fn link_declarations(profile: Option<&Map<String, Value>>) -> Vec<IoDecl> {
    let Some(profile) = profile else {
        return Vec::new();
    };
    let mut decls = Vec::new();
    for (link_id, link) in profile {
        let name = link.get("name").and_then(Value::as_str).unwrap_or(link_id);
        for (index, point) in enabled_points(link, "io") {
            let (kind, noun) = match point.get("type").and_then(Value::as_str) {
                Some("input") => (IoKind::LinkInput, "Input"),
                Some("output") => (IoKind::LinkOutput, "Output"),
                _ => continue,
            };
            decls.push(IoDecl {
                kind,
                link_id: Some(link_id.clone()),
                index,
                label: point_label(point, &format!("{name} {noun} {index}")),
            });
        }
        for (index, relay) in enabled_points(link, "relays") {
            decls.push(IoDecl {
                kind: IoKind::LinkRelay,
                link_id: Some(link_id.clone()),
                index,
                label: point_label(relay, &format!("{name} Relay {index}")),
            });
        }
    }
    decls
}

/// Enabled inputs and outputs on the MAX board.
fn max_declarations(profile: Option<&Value>) -> Vec<IoDecl> {
    let Some(profile) = profile else {
        return Vec::new();
    };
    enabled_points(profile, "io")
        .filter_map(|(index, point)| {
            let (kind, noun) = match point.get("type").and_then(Value::as_str) {
                Some("input") => (IoKind::MaxInput, "MAX Input"),
                Some("output") => (IoKind::MaxOutput, "MAX Output"),
                _ => return None,
            };
            Some(IoDecl {
                kind,
                link_id: None,
                index,
                label: point_label(point, &format!("{noun} {index}")),
            })
        })
        .collect()
}

/// `(1-based position, entry)` for every entry of `block[key]` flagged
/// `enabled`.
fn enabled_points<'a>(block: &'a Value, key: &str) -> impl Iterator<Item = (u32, &'a Value)> + 'a {
    block
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .zip(1_u32..)
        .filter(|(point, _)| point.get("enabled").and_then(Value::as_bool).unwrap_or(false))
        .map(|(point, index)| (index, point))
}

fn point_label(point: &Value, fallback: &str) -> String {
    point
        .get("label")
        .and_then(Value::as_str)
        .filter(|l| !l.trim().is_empty())
        .map_or_else(|| fallback.to_owned(), str::to_owned)
}

fn state_len(state: Option<&Value>, key: &str) -> usize {
    state
        .and_then(|s| s.get(key))
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(json: Value) -> DeviceRecord {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn profile_labels_and_membership() {
        let desc = descriptor_from_record(record(json!({
            "deviceId": "gen1-001",
            "deviceName": "Home",
            "deviceType": "GEN1-Paradox",
            "deviceProfile": {
                "areasLabels": ["House", "Garage"],
                "zonesLabels": ["Front door", "Lounge", "Garage door"],
                "zonesTypes": [10, 20],
                "zonesAreas": [[1], [1], [1, 2]],
                "pgmLabels": ["Gate"]
            }
        })));

        assert_eq!(desc.id.as_str(), "gen1-001");
        assert_eq!(desc.model, DeviceModel::Gen1Paradox);
        assert_eq!(desc.areas, vec!["House", "Garage"]);
        assert_eq!(desc.zones[0].zone_type, Some(10));
        assert_eq!(desc.zones[2].zone_type, None);
        assert_eq!(desc.zone_areas.len(), 4);
        assert!(desc.zone_areas.contains(&ZoneAreaLink { zone: 3, area: 2 }));
        assert_eq!(desc.pgm_count, 1);
        assert!(desc.capabilities.is_empty());
        assert!(desc.initial_state.is_none());
    }

    #[test]
    fn counts_fall_back_to_state_arrays() {
        let desc = descriptor_from_record(record(json!({
            "deviceId": "pro-1",
            "deviceState": { "timestamp": 5, "areas": ["disarm"], "zones": ["c", "c", "a"] },
            "deviceLinks": { "l1": {} },
            "deviceProfileIO": { "io": [] }
        })));

        assert_eq!(desc.name, "pro-1");
        assert_eq!(desc.areas, vec!["Area 1"]);
        assert_eq!(desc.zones.len(), 3);
        assert!(desc.capabilities.contains(&Capability::Link));
        assert!(desc.capabilities.contains(&Capability::Max));
        assert_eq!(desc.initial_state.unwrap()["deviceState"]["timestamp"], 5);
    }

    #[test]
    fn link_and_max_profiles_declare_enabled_points() {
        let desc = descriptor_from_record(record(json!({
            "deviceId": "pro-2",
            "deviceProfileLinks": {
                "lk-1": {
                    "name": "Gate",
                    "io": [
                        { "enabled": true, "type": "input", "label": "Beam" },
                        { "enabled": false, "type": "input", "label": "Spare" },
                        { "enabled": true, "type": "output", "outputMode": "latch", "label": "" }
                    ],
                    "relays": [{ "enabled": true, "relayMode": "pulse", "label": "Motor" }]
                }
            },
            "deviceProfileIO": {
                "io": [
                    { "enabled": true, "type": "input", "label": "Fence" },
                    { "enabled": true, "type": "output", "label": "Siren" }
                ]
            },
            "deviceLinks": { "lk-1": { "inputs": ["high", "low", "low"], "outputs": ["open", "open", "closed"] } },
            "deviceIO": { "inputs": ["low"], "outputs": ["open", "closed"] }
        })));

        let points: Vec<(IoKind, Option<&str>, u32, &str)> = desc
            .io
            .iter()
            .map(|d| (d.kind, d.link_id.as_deref(), d.index, d.label.as_str()))
            .collect();
        assert_eq!(
            points,
            vec![
                (IoKind::LinkInput, Some("lk-1"), 1, "Beam"),
                (IoKind::LinkOutput, Some("lk-1"), 3, "Gate Output 3"),
                (IoKind::LinkRelay, Some("lk-1"), 1, "Motor"),
                (IoKind::MaxInput, None, 1, "Fence"),
                (IoKind::MaxOutput, None, 2, "Siren"),
            ]
        );
        assert!(desc.capabilities.contains(&Capability::Link));
        assert!(desc.capabilities.contains(&Capability::Max));

        let initial = desc.initial_state.unwrap();
        assert!(initial.get("deviceState").is_none());
        assert_eq!(initial["deviceLinks"]["lk-1"]["outputs"][2], "closed");
        assert_eq!(initial["deviceIO"]["outputs"][1], "closed");
    }

    #[test]
    fn auth_failures_stay_terminal() {
        let err = directory_error(olarm_api::Error::Authentication {
            message: "401".into(),
        });
        assert!(err.is_terminal());

        let err = directory_error(olarm_api::Error::Api {
            status: 500,
            message: "boom".into(),
        });
        assert!(matches!(err, CoreError::Directory { .. }));
    }
}
