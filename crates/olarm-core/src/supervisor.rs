// ── Reconnect supervisor ──
//
// Owns the message channel lifecycle and the reconciler. One task runs
// the state machine
//
//   Disconnected -> Connecting -> Subscribing -> Live -> Disconnected
//
// and is the only consumer of inbound payloads, credential rotations and
// control requests. Everything the reconciler touches is therefore
// mutated from this task alone.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use strum::Display;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::channel::{ChannelEvent, InboundStream, MessageChannel};
use crate::command::CommandEnvelope;
use crate::credential::Credential;
use crate::error::CoreError;
use crate::model::{DeviceDescriptor, DeviceId};
use crate::reconcile::StateReconciler;
use crate::token::{CredentialStatus, TokenManager};

// ── Observable state ─────────────────────────────────────────────────

/// Channel lifecycle as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribing,
    Live,
    /// The credential was revoked. Nothing reconnects until re-login.
    Unauthenticated,
}

/// How much consumers should trust the published state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Availability {
    /// Live channel, state is current.
    Available,
    /// Transient disconnect, last-known state retained.
    Degraded,
    /// Unauthenticated or shut down.
    Unavailable,
}

/// Result of a re-discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RediscoverReport {
    pub added: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
}

// ── Control messages ─────────────────────────────────────────────────

pub(crate) enum Control {
    Command(CommandEnvelope),
    Register {
        descriptor: Box<DeviceDescriptor>,
        reply: oneshot::Sender<Result<bool, CoreError>>,
    },
    Remove {
        device_id: DeviceId,
        reply: oneshot::Sender<bool>,
    },
    Rediscover {
        descriptors: Vec<DeviceDescriptor>,
        reply: oneshot::Sender<Result<RediscoverReport, CoreError>>,
    },
}

/// Why one connection attempt ended.
enum Exit {
    Cancelled,
    Unauthenticated(String),
    /// Credential rotated and the channel cannot re-authenticate in place.
    Rotated { live_for: Duration },
    Failed {
        error: CoreError,
        live_for: Option<Duration>,
    },
}

// ── Supervisor ───────────────────────────────────────────────────────

pub(crate) struct Supervisor {
    pub reconciler: StateReconciler,
    pub channel: Arc<dyn MessageChannel>,
    pub tokens: Arc<TokenManager>,
    pub backoff: Backoff,
    pub refresh_margin: Duration,
    pub subscribe_timeout: Duration,
    pub state: watch::Sender<ConnectionState>,
    pub availability: watch::Sender<Availability>,
    pub control: mpsc::Receiver<Control>,
    pub cancel: CancellationToken,
}

impl Supervisor {
    /// Run until cancelled. Reconnects indefinitely; only a revoked
    /// credential stops reconnection.
    pub async fn run(mut self) {
        loop {
            let exit = self.connect_once().await;
            self.channel.disconnect().await;

            match exit {
                Exit::Cancelled => break,
                Exit::Unauthenticated(reason) => {
                    error!(%reason, "session unauthenticated, channel stays down");
                    self.set_state(ConnectionState::Unauthenticated);
                    self.availability.send_replace(Availability::Unavailable);
                    self.idle_unauthenticated().await;
                    break;
                }
                Exit::Rotated { live_for } => {
                    self.backoff.on_disconnect(live_for);
                    info!("credential rotated, reconnecting");
                    self.set_state(ConnectionState::Disconnected);
                    self.availability.send_replace(Availability::Degraded);
                }
                Exit::Failed { error, live_for } => {
                    if let Some(live_for) = live_for {
                        if self.backoff.on_disconnect(live_for) {
                            debug!(live_secs = live_for.as_secs(), "backoff reset after healthy period");
                        }
                    }
                    self.set_state(ConnectionState::Disconnected);
                    self.availability.send_replace(Availability::Degraded);

                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %error,
                        attempt = self.backoff.attempt(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "channel down, reconnecting after backoff"
                    );
                    if !self.wait_offline(delay).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.availability.send_replace(Availability::Unavailable);
        debug!("supervisor stopped");
    }

    // ── One connection ───────────────────────────────────────────────

    async fn connect_once(&mut self) -> Exit {
        if self.cancel.is_cancelled() {
            return Exit::Cancelled;
        }
        self.set_state(ConnectionState::Connecting);

        let credential = match self.tokens.ensure_fresh(self.refresh_margin).await {
            Ok(credential) => credential,
            Err(CoreError::Unauthenticated { reason }) => return Exit::Unauthenticated(reason),
            Err(error) => {
                return Exit::Failed {
                    error,
                    live_for: None,
                };
            }
        };

        // Rotations from here on are reported by the watch.
        let mut rotations = self.tokens.subscribe();

        let mut inbound = match self.channel.connect(&credential).await {
            Ok(inbound) => inbound,
            Err(error) => {
                return Exit::Failed {
                    error,
                    live_for: None,
                };
            }
        };
        info!(version = credential.version(), "channel connected");

        self.set_state(ConnectionState::Subscribing);
        if let Err(exit) = self.subscribe_all(&mut inbound).await {
            return exit;
        }

        self.set_state(ConnectionState::Live);
        self.availability.send_replace(Availability::Available);
        let live_since = Instant::now();
        info!(devices = self.reconciler.len(), "channel live");

        // A rotation that landed while connecting.
        let status = *rotations.borrow_and_update();
        if let Some(exit) = self.on_rotation(status, &credential, live_since).await {
            return exit;
        }

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Exit::Cancelled,
                changed = rotations.changed() => {
                    if changed.is_err() {
                        return Exit::Cancelled;
                    }
                    let status = *rotations.borrow_and_update();
                    if let Some(exit) = self.on_rotation(status, &credential, live_since).await {
                        return exit;
                    }
                }
                msg = self.control.recv() => {
                    let Some(msg) = msg else { return Exit::Cancelled };
                    if let Err(error) = self.handle_control(msg, true).await {
                        return Exit::Failed { error, live_for: Some(live_since.elapsed()) };
                    }
                }
                event = inbound.next() => {
                    let live_for = Some(live_since.elapsed());
                    match event {
                        Some(ChannelEvent::Payload(p)) => {
                            self.reconciler.apply(&p.device_id, &p.payload, p.received_at);
                        }
                        Some(ChannelEvent::SubscriptionAck { granted }) => {
                            debug!(granted, "late subscription ack");
                        }
                        Some(ChannelEvent::Closed { reason }) => {
                            return Exit::Failed { error: CoreError::channel(reason), live_for };
                        }
                        None => {
                            return Exit::Failed {
                                error: CoreError::channel("inbound stream ended"),
                                live_for,
                            };
                        }
                    }
                }
            }
        }
    }

    /// Subscribe every declared device and wait for the acks.
    async fn subscribe_all(&mut self, inbound: &mut InboundStream) -> Result<(), Exit> {
        let ids = self.reconciler.device_ids();
        for id in &ids {
            if let Err(error) = self.channel.subscribe(id).await {
                return Err(Exit::Failed {
                    error,
                    live_for: None,
                });
            }
            debug!(device_id = %id, "subscribed");
        }

        if !self.channel.acknowledges_subscriptions() {
            return Ok(());
        }

        let mut pending = ids.len();
        let deadline = tokio::time::sleep(self.subscribe_timeout);
        tokio::pin!(deadline);

        while pending > 0 {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Exit::Cancelled),
                () = &mut deadline => {
                    return Err(Exit::Failed {
                        error: CoreError::channel(format!(
                            "{pending} of {} subscriptions not acknowledged",
                            ids.len()
                        )),
                        live_for: None,
                    });
                }
                event = inbound.next() => match event {
                    Some(ChannelEvent::SubscriptionAck { granted }) => {
                        pending -= 1;
                        if !granted {
                            warn!("broker rejected a device subscription");
                        }
                    }
                    Some(ChannelEvent::Payload(p)) => {
                        self.reconciler.apply(&p.device_id, &p.payload, p.received_at);
                    }
                    Some(ChannelEvent::Closed { reason }) => {
                        return Err(Exit::Failed { error: CoreError::channel(reason), live_for: None });
                    }
                    None => {
                        return Err(Exit::Failed {
                            error: CoreError::channel("inbound stream ended while subscribing"),
                            live_for: None,
                        });
                    }
                },
            }
        }
        Ok(())
    }

    /// React to a credential status change while live.
    async fn on_rotation(
        &mut self,
        status: CredentialStatus,
        connected_with: &Credential,
        live_since: Instant,
    ) -> Option<Exit> {
        match status {
            CredentialStatus::Revoked => {
                Some(Exit::Unauthenticated("refresh token was revoked".into()))
            }
            CredentialStatus::Missing => Some(Exit::Unauthenticated("logged out".into())),
            CredentialStatus::Valid { version } if version == connected_with.version() => None,
            CredentialStatus::Valid { version } => {
                let credential = match self.tokens.current_credential() {
                    Ok(credential) => credential,
                    Err(CoreError::Unauthenticated { reason }) => {
                        return Some(Exit::Unauthenticated(reason));
                    }
                    Err(error) => {
                        return Some(Exit::Failed {
                            error,
                            live_for: Some(live_since.elapsed()),
                        });
                    }
                };
                match self.channel.reauthenticate(&credential).await {
                    Ok(true) => {
                        info!(version, "channel re-authenticated in place");
                        None
                    }
                    Ok(false) => Some(Exit::Rotated {
                        live_for: live_since.elapsed(),
                    }),
                    Err(error) => Some(Exit::Failed {
                        error,
                        live_for: Some(live_since.elapsed()),
                    }),
                }
            }
        }
    }

    // ── Control requests ─────────────────────────────────────────────

    /// Serve one control request. `Err` means the live channel failed.
    async fn handle_control(&mut self, msg: Control, live: bool) -> Result<(), CoreError> {
        match msg {
            Control::Command(envelope) => {
                // A failed publish is reported to the caller only; a dead
                // connection also closes the inbound stream.
                let result = self.execute(&envelope, live).await;
                if let Err(e) = &result {
                    debug!(device_id = %envelope.device_id, error = %e, "command rejected");
                }
                let _ = envelope.response_tx.send(result);
            }
            Control::Register { descriptor, reply } => {
                let result = self.reconciler.register(&descriptor);
                let channel_result = if live && matches!(result, Ok(true)) {
                    self.channel.subscribe(&descriptor.id).await
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
                channel_result?;
            }
            Control::Remove { device_id, reply } => {
                let removed = self.reconciler.remove(&device_id);
                let channel_result = if live && removed {
                    self.channel.unsubscribe(&device_id).await
                } else {
                    Ok(())
                };
                let _ = reply.send(removed);
                channel_result?;
            }
            Control::Rediscover { descriptors, reply } => match self.rediscover(descriptors) {
                Ok(report) => {
                    let channel_result = if live {
                        self.resubscribe(&report).await
                    } else {
                        Ok(())
                    };
                    let _ = reply.send(Ok(report));
                    channel_result?;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
        }
        Ok(())
    }

    async fn execute(&self, envelope: &CommandEnvelope, live: bool) -> Result<(), CoreError> {
        let device = self
            .reconciler
            .device(&envelope.device_id)
            .ok_or_else(|| CoreError::DeviceNotFound {
                device_id: envelope.device_id.to_string(),
            })?;
        envelope.command.validate(device)?;

        let state = *self.state.borrow();
        if self.tokens.is_revoked() || state == ConnectionState::Unauthenticated {
            return Err(CoreError::unauthenticated("session needs re-authorization"));
        }
        if !live {
            return Err(CoreError::channel(format!("channel is {state}")));
        }

        self.channel
            .publish(&envelope.device_id, envelope.command.encode())
            .await?;
        info!(device_id = %envelope.device_id, command = %envelope.command, "command sent");
        Ok(())
    }

    /// Replace the declared device set. Devices present before and after
    /// keep their state.
    fn rediscover(
        &mut self,
        descriptors: Vec<DeviceDescriptor>,
    ) -> Result<RediscoverReport, CoreError> {
        let limit = self.reconciler.limit();
        let wanted: BTreeSet<DeviceId> = descriptors.iter().map(|d| d.id.clone()).collect();
        if wanted.len() > limit {
            return Err(CoreError::DeviceLimitExceeded { limit });
        }

        let mut report = RediscoverReport::default();
        for id in self.reconciler.device_ids() {
            if !wanted.contains(&id) && self.reconciler.remove(&id) {
                report.removed.push(id);
            }
        }
        for descriptor in &descriptors {
            if self.reconciler.register(descriptor)? {
                report.added.push(descriptor.id.clone());
            }
        }

        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            "device set rediscovered"
        );
        Ok(report)
    }

    async fn resubscribe(&self, report: &RediscoverReport) -> Result<(), CoreError> {
        for id in &report.removed {
            self.channel.unsubscribe(id).await?;
        }
        for id in &report.added {
            self.channel.subscribe(id).await?;
        }
        Ok(())
    }

    // ── Waiting ──────────────────────────────────────────────────────

    /// Sleep out a backoff delay while still serving control requests.
    /// Returns `false` when cancelled.
    async fn wait_offline(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                msg = self.control.recv() => {
                    let Some(msg) = msg else { return false };
                    // Offline requests never touch the channel.
                    let _ = self.handle_control(msg, false).await;
                }
            }
        }
    }

    /// Park after revocation, answering requests until cancelled.
    async fn idle_unauthenticated(&mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                msg = self.control.recv() => {
                    let Some(msg) = msg else { return };
                    let _ = self.handle_control(msg, false).await;
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state");
        }
    }
}
