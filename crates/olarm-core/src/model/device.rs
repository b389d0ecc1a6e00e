// ── Device domain types ──
//
// A Device owns flat, index-keyed tables of Areas, Zones and auxiliary
// I/O points (LINK modules and MAX I/O). Zone-to-area membership lives in
// its own relation (`ZoneAreaLink`) so zones spanning several areas never
// form object cycles. All indices are 1-based, the same numbering the
// panel keypad and the command wire format use.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use strum::{Display, EnumString};

use super::device_id::DeviceId;

// ── Enums ────────────────────────────────────────────────────────────

/// Communicator hardware family, from the directory's `deviceType` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString)]
#[strum(ascii_case_insensitive)]
#[non_exhaustive]
pub enum DeviceModel {
    #[strum(serialize = "GEN1-Paradox")]
    Gen1Paradox,
    #[strum(serialize = "GEN1-Universal")]
    Gen1Universal,
    #[strum(serialize = "PRO")]
    Pro,
    #[strum(serialize = "PRO4G")]
    Pro4g,
    #[strum(serialize = "MAX")]
    Max,
    #[strum(serialize = "HUB")]
    Hub,
    /// A tag this build does not know about. Kept verbatim.
    #[strum(default)]
    Other(String),
}

impl DeviceModel {
    /// Parse a directory tag. Never fails: unknown tags become `Other`.
    pub fn from_tag(tag: &str) -> Self {
        tag.parse()
            .unwrap_or_else(|_| Self::Other(tag.to_owned()))
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Gen1Paradox => "GEN1-Paradox",
            Self::Gen1Universal => "GEN1-Universal",
            Self::Pro => "PRO",
            Self::Pro4g => "PRO4G",
            Self::Max => "MAX",
            Self::Hub => "HUB",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Serialize for DeviceModel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

/// Auxiliary hardware attached to a communicator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display, EnumString,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Capability {
    Link,
    Max,
}

/// Armed state of one area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AreaState {
    Disarmed,
    Armed,
    ArmedStay,
    ArmedSleep,
    Alarm,
    Unknown,
}

impl AreaState {
    /// Map a panel area code (`"disarm"`, `"stay"`, ...) onto the enum.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "disarm" | "notready" => Self::Disarmed,
            "arm" => Self::Armed,
            "stay" => Self::ArmedStay,
            "sleep" => Self::ArmedSleep,
            "alarm" | "emergency" | "fire" | "medical" => Self::Alarm,
            _ => Self::Unknown,
        }
    }

    pub fn is_armed(self) -> bool {
        matches!(self, Self::Armed | Self::ArmedStay | Self::ArmedSleep)
    }
}

/// Status of one zone input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ZoneStatus {
    Closed,
    Open,
    Alarm,
    Bypassed,
    Unknown,
}

impl ZoneStatus {
    /// Map a panel zone code (`"c"`, `"a"`, `"b"`, ...) onto the enum.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "c" | "closed" => Self::Closed,
            "a" | "active" | "open" => Self::Open,
            "b" | "bypassed" => Self::Bypassed,
            "alarm" => Self::Alarm,
            _ => Self::Unknown,
        }
    }
}

/// Mains power as reported by the communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Ok,
    Fault,
    Unknown,
}

impl PowerState {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "ok" | "on" => Self::Ok,
            "off" | "fail" | "fault" | "lost" => Self::Fault,
            _ => Self::Unknown,
        }
    }
}

/// Which auxiliary table a point belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum IoKind {
    LinkInput,
    LinkOutput,
    LinkRelay,
    MaxInput,
    MaxOutput,
}

impl IoKind {
    /// Points on a LINK module are addressed by link id as well as index.
    pub fn is_link(self) -> bool {
        matches!(self, Self::LinkInput | Self::LinkOutput | Self::LinkRelay)
    }
}

/// Level of one auxiliary input, output or relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IoState {
    High,
    Low,
    Closed,
    Open,
    Latched,
    Unlatched,
    Unknown,
}

impl IoState {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            "closed" => Self::Closed,
            "open" => Self::Open,
            "latched" => Self::Latched,
            "unlatched" => Self::Unlatched,
            _ => Self::Unknown,
        }
    }

    /// High input, closed output or latched relay.
    pub fn is_active(self) -> bool {
        matches!(self, Self::High | Self::Closed | Self::Latched)
    }
}

// ── Tables ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Area {
    pub index: u32,
    pub label: String,
    pub state: AreaState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub index: u32,
    pub label: String,
    /// Installer zone type code, when the profile declares one.
    pub zone_type: Option<i64>,
    pub status: ZoneStatus,
}

/// Membership of one zone in one area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ZoneAreaLink {
    pub zone: u32,
    pub area: u32,
}

/// One LINK or MAX input, output or relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoPoint {
    pub kind: IoKind,
    /// Owning LINK module, `None` for MAX points.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    pub index: u32,
    pub label: String,
    pub state: IoState,
}

/// Auxiliary point as declared by the directory profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoDecl {
    pub kind: IoKind,
    pub link_id: Option<String>,
    pub index: u32,
    pub label: String,
}

/// Zone as declared by the directory, before any state is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneDecl {
    pub label: String,
    pub zone_type: Option<i64>,
}

// ── DeviceDescriptor ─────────────────────────────────────────────────

/// A device as declared by the account directory at discovery time.
///
/// The declared areas and zones are fixed for the lifetime of the device
/// in a session; a changed layout needs re-discovery.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub model: DeviceModel,
    pub capabilities: BTreeSet<Capability>,
    /// Area labels, position `i` is area `i + 1`.
    pub areas: Vec<String>,
    /// Zone declarations, position `i` is zone `i + 1`.
    pub zones: Vec<ZoneDecl>,
    pub zone_areas: Vec<ZoneAreaLink>,
    pub pgm_count: usize,
    pub ukey_count: usize,
    /// Enabled LINK and MAX points from the profile.
    pub io: Vec<IoDecl>,
    /// Last state the directory knew about, same shape as a push payload.
    pub initial_state: Option<serde_json::Value>,
}

impl DeviceDescriptor {
    /// A bare descriptor with generated labels, mostly useful in tests.
    pub fn new(id: impl Into<DeviceId>, area_count: usize, zone_count: usize) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            model: DeviceModel::Other(String::new()),
            capabilities: BTreeSet::new(),
            areas: (1..=area_count).map(|i| format!("Area {i}")).collect(),
            zones: (1..=zone_count)
                .map(|i| ZoneDecl {
                    label: format!("Zone {i}"),
                    zone_type: None,
                })
                .collect(),
            zone_areas: Vec::new(),
            pgm_count: 0,
            ukey_count: 0,
            io: Vec::new(),
            initial_state: None,
        }
    }
}

// ── Device ───────────────────────────────────────────────────────────

/// Published, immutable view of one device after the last applied payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub model: DeviceModel,
    pub capabilities: BTreeSet<Capability>,
    pub areas: Vec<Area>,
    pub zones: Vec<Zone>,
    pub zone_areas: Vec<ZoneAreaLink>,
    pub power: PowerState,
    pub pgm_count: usize,
    pub ukey_count: usize,
    pub io: Vec<IoPoint>,
    /// Source timestamp (epoch ms) of the last applied payload.
    pub last_applied: Option<i64>,
    /// When the last applied payload was received.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Fresh state for a declared device: everything `Unknown`.
    pub fn from_descriptor(desc: &DeviceDescriptor) -> Self {
        Self {
            id: desc.id.clone(),
            name: desc.name.clone(),
            model: desc.model.clone(),
            capabilities: desc.capabilities.clone(),
            areas: (1_u32..)
                .zip(&desc.areas)
                .map(|(index, label)| Area {
                    index,
                    label: label.clone(),
                    state: AreaState::Unknown,
                })
                .collect(),
            zones: (1_u32..)
                .zip(&desc.zones)
                .map(|(index, decl)| Zone {
                    index,
                    label: decl.label.clone(),
                    zone_type: decl.zone_type,
                    status: ZoneStatus::Unknown,
                })
                .collect(),
            zone_areas: desc.zone_areas.clone(),
            power: PowerState::Unknown,
            pgm_count: desc.pgm_count,
            ukey_count: desc.ukey_count,
            io: desc
                .io
                .iter()
                .map(|decl| IoPoint {
                    kind: decl.kind,
                    link_id: decl.link_id.clone(),
                    index: decl.index,
                    label: decl.label.clone(),
                    state: IoState::Unknown,
                })
                .collect(),
            last_applied: None,
            updated_at: None,
        }
    }

    pub fn area(&self, index: u32) -> Option<&Area> {
        self.areas.iter().find(|a| a.index == index)
    }

    pub fn zone(&self, index: u32) -> Option<&Zone> {
        self.zones.iter().find(|z| z.index == index)
    }

    pub fn io_point(&self, kind: IoKind, link_id: Option<&str>, index: u32) -> Option<&IoPoint> {
        self.io
            .iter()
            .find(|p| p.kind == kind && p.index == index && p.link_id.as_deref() == link_id)
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Zones that belong to `area` according to the membership relation.
    pub fn zones_in_area(&self, area: u32) -> impl Iterator<Item = &Zone> + '_ {
        self.zone_areas
            .iter()
            .filter(move |link| link.area == area)
            .filter_map(|link| self.zone(link.zone))
    }
}
