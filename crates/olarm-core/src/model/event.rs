// ── State change events ──
//
// One event per changed field of one applied payload. Events for a given
// device are emitted in commit order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use strum::Display;

use super::device::{AreaState, IoKind, IoState, PowerState, ZoneStatus};
use super::device_id::DeviceId;

/// What part of the device changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Area,
    Zone,
    /// Device-level mains power. Always index 0.
    Power,
    LinkInput,
    LinkOutput,
    LinkRelay,
    MaxInput,
    MaxOutput,
}

impl From<IoKind> for ChangeKind {
    fn from(kind: IoKind) -> Self {
        match kind {
            IoKind::LinkInput => Self::LinkInput,
            IoKind::LinkOutput => Self::LinkOutput,
            IoKind::LinkRelay => Self::LinkRelay,
            IoKind::MaxInput => Self::MaxInput,
            IoKind::MaxOutput => Self::MaxOutput,
        }
    }
}

/// Old or new value carried by a [`StateChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Area(AreaState),
    Zone(ZoneStatus),
    Power(PowerState),
    Io(IoState),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Area(s) => write!(f, "{s}"),
            Self::Zone(s) => write!(f, "{s}"),
            Self::Power(s) => write!(f, "{s}"),
            Self::Io(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChangeEvent {
    pub device_id: DeviceId,
    pub kind: ChangeKind,
    /// LINK module of a LINK point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    /// 1-based area/zone/point index, 0 for device-level fields.
    pub index: u32,
    pub old_value: StateValue,
    pub new_value: StateValue,
    /// Source timestamp of the payload that caused the change.
    pub at: DateTime<Utc>,
}

impl StateChangeEvent {
    pub fn zone(
        device_id: DeviceId,
        index: u32,
        old: ZoneStatus,
        new: ZoneStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            kind: ChangeKind::Zone,
            link_id: None,
            index,
            old_value: StateValue::Zone(old),
            new_value: StateValue::Zone(new),
            at,
        }
    }

    pub fn area(
        device_id: DeviceId,
        index: u32,
        old: AreaState,
        new: AreaState,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            kind: ChangeKind::Area,
            link_id: None,
            index,
            old_value: StateValue::Area(old),
            new_value: StateValue::Area(new),
            at,
        }
    }

    pub fn power(device_id: DeviceId, old: PowerState, new: PowerState, at: DateTime<Utc>) -> Self {
        Self {
            device_id,
            kind: ChangeKind::Power,
            link_id: None,
            index: 0,
            old_value: StateValue::Power(old),
            new_value: StateValue::Power(new),
            at,
        }
    }

    pub fn io(
        device_id: DeviceId,
        kind: IoKind,
        link_id: Option<String>,
        index: u32,
        old: IoState,
        new: IoState,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            kind: kind.into(),
            link_id,
            index,
            old_value: StateValue::Io(old),
            new_value: StateValue::Io(new),
            at,
        }
    }
}

impl fmt::Display for StateChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link_id {
            Some(link_id) => write!(
                f,
                "{} {}[{link_id}/{}] {} -> {}",
                self.device_id, self.kind, self.index, self.old_value, self.new_value
            ),
            None => write!(
                f,
                "{} {}[{}] {} -> {}",
                self.device_id, self.kind, self.index, self.old_value, self.new_value
            ),
        }
    }
}
