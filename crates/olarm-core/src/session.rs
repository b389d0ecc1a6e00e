// ── Session facade ──
//
// One authenticated, connected lifetime of the engine for one account.
// Builds the token manager, discovers devices, then spawns the refresh
// task and the reconnect supervisor. Consumers read published state and
// event streams; writes go through the supervisor's control queue.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::channel::MessageChannel;
use crate::command::{Command, CommandEnvelope};
use crate::config::SessionConfig;
use crate::credential::{Clock, CredentialStore, SystemClock};
use crate::directory::AccountDirectory;
use crate::error::CoreError;
use crate::model::{Device, DeviceDescriptor, DeviceId, StateChangeEvent};
use crate::reconcile::StateReconciler;
use crate::store::{DataStore, ReconcileStats};
use crate::stream::{DeviceEvents, DeviceStream};
use crate::supervisor::{Availability, ConnectionState, Control, RediscoverReport, Supervisor};
use crate::token::{CredentialStatus, TokenManager, TokenRefresher};

const CONTROL_CHANNEL_SIZE: usize = 64;
const EVENT_CHANNEL_SIZE: usize = 256;

/// Running synchronization engine for one account.
///
/// Cheaply cloneable. Dropping every clone does not stop the background
/// tasks; call [`shutdown()`](Self::shutdown).
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    store: Arc<DataStore>,
    tokens: Arc<TokenManager>,
    directory: Arc<dyn AccountDirectory>,
    channel: Arc<dyn MessageChannel>,
    events: broadcast::Sender<Arc<StateChangeEvent>>,
    connection_state: watch::Receiver<ConnectionState>,
    availability: watch::Receiver<Availability>,
    control_tx: mpsc::Sender<Control>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Authenticate, discover devices and start the background tasks.
    ///
    /// Transient refresh and directory failures are retried with the
    /// configured backoff. Fails with `Unauthenticated` when the store
    /// holds no usable credential and with `DeviceLimitExceeded` when the
    /// account lists more devices than allowed. Nothing is spawned on
    /// failure.
    pub async fn start(
        config: SessionConfig,
        directory: Arc<dyn AccountDirectory>,
        channel: Arc<dyn MessageChannel>,
        refresher: Arc<dyn TokenRefresher>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, CoreError> {
        Self::start_with_clock(
            config,
            directory,
            channel,
            refresher,
            credentials,
            Arc::new(SystemClock),
        )
        .await
    }

    /// [`start`](Self::start) with an explicit clock for credential expiry.
    pub async fn start_with_clock(
        config: SessionConfig,
        directory: Arc<dyn AccountDirectory>,
        channel: Arc<dyn MessageChannel>,
        refresher: Arc<dyn TokenRefresher>,
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let tokens = Arc::new(TokenManager::new(refresher, credentials, clock)?);
        if tokens.status() == CredentialStatus::Missing {
            return Err(CoreError::unauthenticated(
                "no stored credential, log in first",
            ));
        }

        let descriptors = filter_devices(&config, discover(&config, &tokens, &*directory).await?);
        if descriptors.len() > config.max_devices {
            warn!(
                listed = descriptors.len(),
                limit = config.max_devices,
                "account lists too many devices"
            );
            return Err(CoreError::DeviceLimitExceeded {
                limit: config.max_devices,
            });
        }

        let store = Arc::new(DataStore::new());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let mut reconciler =
            StateReconciler::new(config.max_devices, Arc::clone(&store), events.clone());
        for descriptor in &descriptors {
            reconciler.register(descriptor)?;
        }
        info!(devices = reconciler.len(), "devices discovered");

        let (state_tx, connection_state) = watch::channel(ConnectionState::Disconnected);
        let (availability_tx, availability) = watch::channel(Availability::Degraded);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            reconciler,
            channel: Arc::clone(&channel),
            tokens: Arc::clone(&tokens),
            backoff: Backoff::new(config.backoff.clone()),
            refresh_margin: config.refresh_margin,
            subscribe_timeout: config.subscribe_timeout,
            state: state_tx,
            availability: availability_tx,
            control: control_rx,
            cancel: cancel.clone(),
        };

        let handles = vec![
            tokio::spawn(Arc::clone(&tokens).run_refresh_loop(
                config.refresh_margin,
                config.backoff.clone(),
                cancel.clone(),
            )),
            tokio::spawn(supervisor.run()),
        ];

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                store,
                tokens,
                directory,
                channel,
                events,
                connection_state,
                availability,
                control_tx,
                cancel,
                task_handles: Mutex::new(handles),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    // ── State observation ────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.store.devices_snapshot()
    }

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.inner.store.device(id)
    }

    pub fn devices(&self) -> DeviceStream {
        self.inner.store.subscribe_devices()
    }

    /// Every state change of every device, in commit order.
    pub fn events(&self) -> broadcast::Receiver<Arc<StateChangeEvent>> {
        self.inner.events.subscribe()
    }

    /// Ordered change events for one device.
    pub fn device_events(&self, id: impl Into<DeviceId>) -> DeviceEvents {
        DeviceEvents::new(id.into(), self.inner.events.subscribe())
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.clone()
    }

    pub fn availability(&self) -> watch::Receiver<Availability> {
        self.inner.availability.clone()
    }

    pub fn credential_status(&self) -> watch::Receiver<CredentialStatus> {
        self.inner.tokens.subscribe()
    }

    pub fn stats(&self) -> ReconcileStats {
        self.inner.store.stats()
    }

    // ── Device set ───────────────────────────────────────────────────

    /// Declare one more device. `Ok(false)` if it was already declared.
    pub async fn register_device(&self, descriptor: DeviceDescriptor) -> Result<bool, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Register {
            descriptor: Box::new(descriptor),
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    pub async fn remove_device(&self, id: impl Into<DeviceId>) -> Result<bool, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Remove {
            device_id: id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoreError::SessionClosed)
    }

    /// Fetch the device list again and replace the declared set.
    pub async fn rediscover(&self) -> Result<RediscoverReport, CoreError> {
        let credential = self
            .inner
            .tokens
            .ensure_fresh(self.inner.config.refresh_margin)
            .await?;
        let descriptors = filter_devices(
            &self.inner.config,
            self.inner.directory.list_devices(&credential).await?,
        );

        let (reply, rx) = oneshot::channel();
        self.send(Control::Rediscover { descriptors, reply }).await?;
        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Validate and publish a command on the device's control topic.
    pub async fn send_command(
        &self,
        device_id: impl Into<DeviceId>,
        command: Command,
    ) -> Result<(), CoreError> {
        let (response_tx, rx) = oneshot::channel();
        self.send(Control::Command(CommandEnvelope {
            device_id: device_id.into(),
            command,
            response_tx,
        }))
        .await?;
        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Cancel the background tasks, wait for them and close the channel.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        self.inner.channel.disconnect().await;
        debug!("session shut down");
    }

    /// Forget the stored credential and shut down.
    pub async fn logout(&self) -> Result<(), CoreError> {
        let result = self.inner.tokens.logout();
        self.shutdown().await;
        info!("logged out");
        result
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    async fn send(&self, msg: Control) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::SessionClosed);
        }
        self.inner
            .control_tx
            .send(msg)
            .await
            .map_err(|_| CoreError::SessionClosed)
    }
}

/// Fetch a fresh credential and the account's device list, retrying
/// transient failures until they succeed or turn terminal.
async fn discover(
    config: &SessionConfig,
    tokens: &TokenManager,
    directory: &dyn AccountDirectory,
) -> Result<Vec<DeviceDescriptor>, CoreError> {
    let mut backoff = Backoff::new(config.backoff.clone());
    loop {
        let attempt = async {
            let credential = tokens.ensure_fresh(config.refresh_margin).await?;
            directory.list_devices(&credential).await
        };
        match attempt.await {
            Ok(descriptors) => return Ok(descriptors),
            Err(e) if e.is_transient() => {
                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    attempt = backoff.attempt(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "session start failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn filter_devices(config: &SessionConfig, listed: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    match &config.device_filter {
        Some(wanted) => listed
            .into_iter()
            .filter(|d| wanted.contains(&d.id))
            .collect(),
        None => listed,
    }
}
