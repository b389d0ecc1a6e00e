//! Device state synchronization engine for Olarm alarm communicators.
//!
//! Keeps one authoritative, in-memory view of an account's devices and
//! their areas and zones, fed by the cloud's push channel:
//!
//! - **[`Session`]**: facade over one account. [`start()`](Session::start)
//!   authenticates, lists devices through an [`AccountDirectory`], then
//!   spawns the token refresh task and the reconnect supervisor.
//!
//! - **[`TokenManager`]**: owns the single current [`Credential`], refreshes
//!   it ahead of expiry and announces rotations on a `watch` channel.
//!
//! - **[`MessageChannel`]**: one multiplexed publish/subscribe connection
//!   per account. [`MqttChannel`] is the production transport.
//!
//! - **[`StateReconciler`]**: applies raw payloads to the declared device
//!   tables. Drops undeclared devices, malformed and stale payloads, and
//!   emits one [`StateChangeEvent`] per changed field.
//!
//! - **[`DataStore`]**: lock-free published snapshots (`DashMap` + `watch`)
//!   that readers consume without ever seeing a partial payload.

pub mod backoff;
pub mod channel;
pub mod command;
pub mod config;
pub mod credential;
pub mod directory;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod stream;
pub mod supervisor;
pub mod token;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backoff::Backoff;
pub use channel::{ChannelEvent, InboundPayload, InboundStream, MessageChannel, MqttChannel};
pub use command::{Command, OutputAction, RelayAction};
pub use config::{BackoffConfig, MAX_DEVICES_PER_ACCOUNT, MqttSettings, SessionConfig};
pub use credential::{Clock, Credential, CredentialStore, MemoryCredentialStore, SystemClock};
pub use directory::{AccountDirectory, OlarmDirectory, descriptor_from_record};
pub use error::CoreError;
pub use reconcile::StateReconciler;
pub use session::Session;
pub use store::{DataStore, ReconcileStats};
pub use stream::{DeviceEvents, DeviceStream, DeviceWatchStream};
pub use supervisor::{Availability, ConnectionState, RediscoverReport};
pub use token::{ApiTokenRefresher, CredentialStatus, RefreshedToken, TokenManager, TokenRefresher};

pub use model::{
    Area, AreaState, Capability, ChangeKind, Device, DeviceDescriptor, DeviceId, DeviceModel,
    IoDecl, IoKind, IoPoint, IoState, PowerState, StateChangeEvent, StateValue, Zone,
    ZoneAreaLink, ZoneDecl, ZoneStatus,
};
