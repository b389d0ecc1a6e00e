// ── Command API ──
//
// Everything a caller can ask a device to do flows through `Command`.
// Commands are validated against the device's declared layout, then
// published on the device's control topic by the supervisor task.
//
// Wire shape: {"method":"POST","data":[action, index]}, or
// [action, linkId, index] for LINK outputs and relays. Indices are
// 1-based.

use std::fmt;

use serde_json::{Value, json};
use strum::{Display, EnumString};
use tokio::sync::oneshot;

use crate::error::CoreError;
use crate::model::{Capability, Device, DeviceId};

/// A command envelope sent through the supervisor's control queue.
pub(crate) struct CommandEnvelope {
    pub device_id: DeviceId,
    pub command: Command,
    pub response_tx: oneshot::Sender<Result<(), CoreError>>,
}

/// Action on a switched output (PGM, LINK or MAX output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputAction {
    Open,
    Close,
    Pulse,
}

/// Action on a LINK relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RelayAction {
    Latch,
    Unlatch,
    Pulse,
}

/// All operations that can be sent to a communicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // ── Areas ────────────────────────────────────────────────────────
    AreaDisarm { area: u32 },
    AreaArm { area: u32 },
    AreaStay { area: u32 },
    AreaSleep { area: u32 },

    // ── Zones ────────────────────────────────────────────────────────
    ZoneBypass { zone: u32 },
    ZoneUnbypass { zone: u32 },

    // ── Panel outputs ────────────────────────────────────────────────
    Pgm { pgm: u32, action: OutputAction },
    UtilityKey { key: u32 },

    // ── LINK module ──────────────────────────────────────────────────
    LinkOutput {
        link_id: String,
        output: u32,
        action: OutputAction,
    },
    LinkRelay {
        link_id: String,
        relay: u32,
        action: RelayAction,
    },

    // ── MAX I/O ──────────────────────────────────────────────────────
    MaxOutput { output: u32, action: OutputAction },
}

impl Command {
    /// Wire action name.
    pub fn action(&self) -> String {
        match self {
            Self::AreaDisarm { .. } => "area-disarm".into(),
            Self::AreaArm { .. } => "area-arm".into(),
            Self::AreaStay { .. } => "area-stay".into(),
            Self::AreaSleep { .. } => "area-sleep".into(),
            Self::ZoneBypass { .. } => "zone-bypass".into(),
            Self::ZoneUnbypass { .. } => "zone-unbypass".into(),
            Self::Pgm { action, .. } => format!("pgm-{action}"),
            Self::UtilityKey { .. } => "ukey-activate".into(),
            Self::LinkOutput { action, .. } => format!("link-output-{action}"),
            Self::LinkRelay { action, .. } => format!("link-relay-{action}"),
            Self::MaxOutput { action, .. } => format!("max-output-{action}"),
        }
    }

    /// 1-based target index.
    pub fn index(&self) -> u32 {
        match self {
            Self::AreaDisarm { area }
            | Self::AreaArm { area }
            | Self::AreaStay { area }
            | Self::AreaSleep { area } => *area,
            Self::ZoneBypass { zone } | Self::ZoneUnbypass { zone } => *zone,
            Self::Pgm { pgm, .. } => *pgm,
            Self::UtilityKey { key } => *key,
            Self::LinkOutput { output, .. } | Self::MaxOutput { output, .. } => *output,
            Self::LinkRelay { relay, .. } => *relay,
        }
    }

    /// Capability the device must have for this command.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Self::LinkOutput { .. } | Self::LinkRelay { .. } => Some(Capability::Link),
            Self::MaxOutput { .. } => Some(Capability::Max),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::LinkOutput { link_id, .. } | Self::LinkRelay { link_id, .. } => json!({
                "method": "POST",
                "data": [self.action(), link_id, self.index()],
            }),
            _ => json!({
                "method": "POST",
                "data": [self.action(), self.index()],
            }),
        }
    }

    /// Serialized control payload.
    pub fn encode(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    /// Check the command against the device's declared layout.
    pub fn validate(&self, device: &Device) -> Result<(), CoreError> {
        let index = self.index();
        if index == 0 {
            return Err(invalid("indices start at 1"));
        }

        if let Some(capability) = self.required_capability() {
            if !device.has(capability) {
                return Err(CoreError::Unsupported {
                    operation: self.action(),
                    required: format!("{capability} module on device {}", device.id),
                });
            }
        }

        let (what, declared) = match self {
            Self::AreaDisarm { .. }
            | Self::AreaArm { .. }
            | Self::AreaStay { .. }
            | Self::AreaSleep { .. } => ("area", device.areas.len()),
            Self::ZoneBypass { .. } | Self::ZoneUnbypass { .. } => ("zone", device.zones.len()),
            Self::Pgm { .. } => ("pgm", device.pgm_count),
            Self::UtilityKey { .. } => ("utility key", device.ukey_count),
            Self::LinkOutput { link_id, .. } | Self::LinkRelay { link_id, .. } => {
                if link_id.trim().is_empty() {
                    return Err(invalid("LINK id must not be empty"));
                }
                return Ok(());
            }
            Self::MaxOutput { .. } => return Ok(()),
        };

        if usize::try_from(index).map_or(true, |i| i > declared) {
            return Err(invalid(format!(
                "{what} {index} is not declared on device {} ({declared} declared)",
                device.id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkOutput { link_id, .. } | Self::LinkRelay { link_id, .. } => {
                write!(f, "{} {link_id}/{}", self.action(), self.index())
            }
            _ => write!(f, "{} {}", self.action(), self.index()),
        }
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::InvalidCommand {
        message: message.into(),
    }
}
