// ── Domain model ──
//
// Canonical, transport-independent representation of an account's
// communicators, their areas, zones and auxiliary I/O, and state changes.

pub mod device;
pub mod device_id;
pub mod event;

pub use device::{
    Area, AreaState, Capability, Device, DeviceDescriptor, DeviceModel, IoDecl, IoKind, IoPoint,
    IoState, PowerState, Zone, ZoneAreaLink, ZoneDecl, ZoneStatus,
};
pub use device_id::DeviceId;
pub use event::{ChangeKind, StateChangeEvent, StateValue};
