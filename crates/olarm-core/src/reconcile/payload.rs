// Inbound payload parsing.
//
// Shape of a state push:
//
//   { "deviceState": { "timestamp": 1700000000000,
//                      "areas": ["disarm", "stay"],
//                      "zones": ["c", "a", "b"],
//                      "powerAC": "ok" },
//     "deviceLinks": { "<linkId>": { "inputs": ["high"],
//                                    "outputs": ["closed"],
//                                    "relays": ["latched"] } },
//     "deviceIO": { "inputs": ["low"], "outputs": ["open"] } }
//
// Every block is optional. `timestamp` (epoch milliseconds) is the
// ordering key and is mandatory whenever `deviceState` is present.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::model::{AreaState, IoKind, IoState, PowerState, ZoneStatus};

/// Typed snapshot of one `deviceState` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedState {
    pub timestamp: i64,
    /// `None` when the payload carries no area information.
    pub areas: Option<Vec<AreaState>>,
    pub zones: Option<Vec<ZoneStatus>>,
    pub power: Option<PowerState>,
}

/// Point levels reported for one LINK module or for the MAX board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoReadings {
    pub inputs: Option<Vec<IoState>>,
    pub outputs: Option<Vec<IoState>>,
    pub relays: Option<Vec<IoState>>,
}

/// The `deviceLinks` and `deviceIO` blocks of one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedIo {
    pub links: BTreeMap<String, IoReadings>,
    pub max: Option<IoReadings>,
}

impl ParsedIo {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.max.is_none()
    }

    /// Reported level of one declared point, if this payload carries it.
    pub fn lookup(&self, kind: IoKind, link_id: Option<&str>, index: u32) -> Option<IoState> {
        let readings = if kind.is_link() {
            self.links.get(link_id?)?
        } else {
            self.max.as_ref()?
        };
        let list = match kind {
            IoKind::LinkInput | IoKind::MaxInput => &readings.inputs,
            IoKind::LinkOutput | IoKind::MaxOutput => &readings.outputs,
            IoKind::LinkRelay => &readings.relays,
        };
        let position = usize::try_from(index.checked_sub(1)?).ok()?;
        list.as_ref()?.get(position).copied()
    }
}

/// Everything a payload says about one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPayload {
    pub state: Option<ParsedState>,
    pub io: ParsedIo,
}

impl ParsedPayload {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.io.is_empty()
    }
}

/// Parse a raw payload. `Err` carries a human-readable schema violation.
pub fn parse(raw: &[u8]) -> Result<ParsedPayload, String> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| format!("invalid JSON: {e}"))?;
    parse_value(&value)
}

/// Parse an already-decoded payload object.
pub fn parse_value(value: &Value) -> Result<ParsedPayload, String> {
    let Value::Object(root) = value else {
        return Err("payload is not a JSON object".into());
    };
    Ok(ParsedPayload {
        state: parse_state(root)?,
        io: ParsedIo {
            links: parse_links(root)?,
            max: parse_max(root)?,
        },
    })
}

fn parse_state(root: &Map<String, Value>) -> Result<Option<ParsedState>, String> {
    let state = match root.get("deviceState") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(state)) => state,
        Some(_) => return Err("deviceState is not an object".into()),
    };

    let timestamp = state
        .get("timestamp")
        .and_then(Value::as_i64)
        .ok_or("deviceState.timestamp missing or not an integer")?;

    let areas = codes(state, "deviceState", "areas")?
        .map(|c| c.iter().map(|s| AreaState::from_code(s)).collect());
    let zones = codes(state, "deviceState", "zones")?
        .map(|c| c.iter().map(|s| ZoneStatus::from_code(s)).collect());
    let power = match state.get("powerAC") {
        None | Some(Value::Null) => None,
        Some(Value::String(code)) => Some(PowerState::from_code(code)),
        Some(Value::Bool(true)) => Some(PowerState::Ok),
        Some(Value::Bool(false)) => Some(PowerState::Fault),
        Some(_) => Some(PowerState::Unknown),
    };

    Ok(Some(ParsedState {
        timestamp,
        areas,
        zones,
        power,
    }))
}

fn parse_links(root: &Map<String, Value>) -> Result<BTreeMap<String, IoReadings>, String> {
    let links = match root.get("deviceLinks") {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(links)) => links,
        Some(_) => return Err("deviceLinks is not an object".into()),
    };
    links
        .iter()
        .map(|(link_id, link)| {
            let path = format!("deviceLinks.{link_id}");
            let Value::Object(link) = link else {
                return Err(format!("{path} is not an object"));
            };
            Ok((link_id.clone(), readings(link, &path)?))
        })
        .collect()
}

fn parse_max(root: &Map<String, Value>) -> Result<Option<IoReadings>, String> {
    match root.get("deviceIO") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(io)) => readings(io, "deviceIO").map(Some),
        Some(_) => Err("deviceIO is not an object".into()),
    }
}

fn readings(block: &Map<String, Value>, path: &str) -> Result<IoReadings, String> {
    let levels = |key: &str| -> Result<Option<Vec<IoState>>, String> {
        Ok(codes(block, path, key)?.map(|c| c.iter().map(|s| IoState::from_code(s)).collect()))
    };
    Ok(IoReadings {
        inputs: levels("inputs")?,
        outputs: levels("outputs")?,
        relays: levels("relays")?,
    })
}

/// Read an optional array of status code strings.
fn codes<'a>(
    block: &'a Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<Option<Vec<&'a str>>, String> {
    let Some(value) = block.get(key) else {
        return Ok(None);
    };
    let Value::Array(items) = value else {
        return Err(format!("{path}.{key} is not an array"));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str()
                .ok_or_else(|| format!("{path}.{key}[{i}] is not a string"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
