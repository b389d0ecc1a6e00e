// Test doubles shared by the olarm-core integration tests.
#![allow(clippy::unwrap_used, dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use olarm_core::{
    AccountDirectory, BackoffConfig, ChannelEvent, Clock, ConnectionState, CoreError, Credential,
    DeviceDescriptor, DeviceId, InboundPayload, InboundStream, MemoryCredentialStore,
    MessageChannel, RefreshedToken, Session, SessionConfig, TokenRefresher,
};

// ── Clock ───────────────────────────────────────────────────────────

/// Wall clock that follows tokio's (possibly paused) timer.
pub struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + TimeDelta::from_std(self.start.elapsed()).unwrap()
    }
}

// ── Message channel ─────────────────────────────────────────────────

#[derive(Default)]
struct ChannelState {
    fail_connects: usize,
    sender: Option<mpsc::Sender<ChannelEvent>>,
    subscribed: BTreeSet<DeviceId>,
    published: Vec<(DeviceId, Value)>,
    tokens_seen: Vec<String>,
    reauths: usize,
    withhold_acks: bool,
}

/// In-memory `MessageChannel` driven by the test.
pub struct FakeChannel {
    state: Mutex<ChannelState>,
    attempts: AtomicUsize,
    connects: watch::Sender<usize>,
    gate: watch::Sender<bool>,
    acks: bool,
    reauth: bool,
}

impl FakeChannel {
    pub fn new(acks: bool, reauth: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChannelState::default()),
            attempts: AtomicUsize::new(0),
            connects: watch::channel(0).0,
            gate: watch::channel(true).0,
            acks,
            reauth,
        })
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().unwrap().fail_connects = n;
    }

    /// Park every connect attempt until [`release_connects`](Self::release_connects).
    pub fn hold_connects(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_connects(&self) {
        self.gate.send_replace(true);
    }

    pub fn withhold_acks(&self) {
        self.state.lock().unwrap().withhold_acks = true;
    }

    /// Deliver one state payload for `device`.
    pub fn push(&self, device: &str, payload: &Value) {
        let sender = self.state.lock().unwrap().sender.clone().unwrap();
        sender
            .try_send(ChannelEvent::Payload(InboundPayload {
                device_id: DeviceId::from(device),
                payload: Bytes::from(serde_json::to_vec(payload).unwrap()),
                received_at: Utc::now(),
            }))
            .unwrap();
    }

    /// Simulate the broker dropping the connection.
    pub fn close(&self, reason: &str) {
        let sender = self.state.lock().unwrap().sender.take().unwrap();
        sender
            .try_send(ChannelEvent::Closed {
                reason: reason.to_owned(),
            })
            .unwrap();
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn wait_connects(&self, n: usize) {
        let mut rx = self.connects.subscribe();
        tokio::time::timeout(Duration::from_secs(300), rx.wait_for(|c| *c >= n))
            .await
            .unwrap()
            .unwrap();
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .subscribed
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn published(&self) -> Vec<(DeviceId, Value)> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens_seen.clone()
    }

    pub fn reauths(&self) -> usize {
        self.state.lock().unwrap().reauths
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().sender.is_some()
    }
}

fn not_connected() -> CoreError {
    CoreError::ChannelError {
        reason: "not connected".into(),
    }
}

impl MessageChannel for FakeChannel {
    fn connect<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<InboundStream, CoreError>> {
        Box::pin(async move {
            let mut gate = self.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let rx = {
                let mut state = self.state.lock().unwrap();
                state
                    .tokens_seen
                    .push(credential.access_token().expose_secret().to_owned());
                if state.fail_connects > 0 {
                    state.fail_connects -= 1;
                    return Err(CoreError::ChannelError {
                        reason: "connection refused".into(),
                    });
                }
                let (tx, rx) = mpsc::channel(64);
                state.sender = Some(tx);
                state.subscribed.clear();
                rx
            };
            self.connects.send_modify(|c| *c += 1);
            Ok(ReceiverStream::new(rx).boxed())
        })
    }

    fn subscribe<'a>(&'a self, device_id: &'a DeviceId) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let sender = state.sender.clone().ok_or_else(not_connected)?;
            state.subscribed.insert(device_id.clone());
            if self.acks && !state.withhold_acks {
                let _ = sender.try_send(ChannelEvent::SubscriptionAck { granted: true });
            }
            Ok(())
        })
    }

    fn unsubscribe<'a>(
        &'a self,
        device_id: &'a DeviceId,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.sender.as_ref().ok_or_else(not_connected)?;
            state.subscribed.remove(device_id);
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        device_id: &'a DeviceId,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.sender.as_ref().ok_or_else(not_connected)?;
            let value = serde_json::from_slice(&payload).unwrap();
            state.published.push((device_id.clone(), value));
            Ok(())
        })
    }

    fn reauthenticate<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<bool, CoreError>> {
        Box::pin(async move {
            if !self.reauth {
                return Ok(false);
            }
            let mut state = self.state.lock().unwrap();
            state.reauths += 1;
            state
                .tokens_seen
                .push(credential.access_token().expose_secret().to_owned());
            Ok(true)
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.sender = None;
            state.subscribed.clear();
        })
    }

    fn acknowledges_subscriptions(&self) -> bool {
        self.acks
    }
}

// ── Token refresher ─────────────────────────────────────────────────

pub enum RefreshMode {
    Rotate,
    Revoke,
    /// Fail transiently this many times, then rotate.
    FailThenRotate(usize),
}

pub struct StubRefresher {
    mode: RefreshMode,
    calls: AtomicUsize,
}

impl StubRefresher {
    pub fn new(mode: RefreshMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for StubRefresher {
    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a SecretString,
    ) -> BoxFuture<'a, Result<RefreshedToken, CoreError>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.mode {
                RefreshMode::Revoke => Err(CoreError::Unauthenticated {
                    reason: "invalid_grant".into(),
                }),
                RefreshMode::FailThenRotate(failures) if n <= failures => {
                    Err(CoreError::RefreshFailed {
                        reason: "503 service unavailable".into(),
                    })
                }
                RefreshMode::Rotate | RefreshMode::FailThenRotate(_) => Ok(RefreshedToken {
                    access_token: SecretString::from(format!("at-{n}")),
                    refresh_token: Some(SecretString::from(format!("rt-{n}"))),
                    expires_in: Duration::from_secs(3600),
                }),
            }
        })
    }
}

// ── Directory ───────────────────────────────────────────────────────

pub struct StaticDirectory {
    devices: Mutex<Vec<DeviceDescriptor>>,
    failures: AtomicUsize,
    lists: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            failures: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_lists(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn set(&self, devices: Vec<DeviceDescriptor>) {
        *self.devices.lock().unwrap() = devices;
    }
}

impl AccountDirectory for StaticDirectory {
    fn list_devices<'a>(
        &'a self,
        _credential: &'a Credential,
    ) -> BoxFuture<'a, Result<Vec<DeviceDescriptor>, CoreError>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let devices = self.devices.lock().unwrap().clone();
        Box::pin(async move {
            if failing {
                return Err(CoreError::Directory {
                    message: "502 bad gateway".into(),
                });
            }
            Ok(devices)
        })
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Options {
    pub devices: Vec<DeviceDescriptor>,
    pub acks: bool,
    pub reauth: bool,
    pub fail_connects: usize,
    pub fail_lists: usize,
    pub credential_ttl: Duration,
    pub refresh: RefreshMode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            devices: vec![DeviceDescriptor::new("gen1-001", 1, 3)],
            acks: true,
            reauth: false,
            fail_connects: 0,
            fail_lists: 0,
            credential_ttl: Duration::from_secs(3600),
            refresh: RefreshMode::Rotate,
        }
    }
}

pub struct Harness {
    pub session: Session,
    pub channel: Arc<FakeChannel>,
    pub refresher: Arc<StubRefresher>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub directory: Arc<StaticDirectory>,
}

pub fn config() -> SessionConfig {
    let mut config = SessionConfig::new("user-1").unwrap();
    config.backoff = BackoffConfig {
        initial: Duration::from_secs(1),
        max: Duration::from_secs(8),
        reset_after: Duration::from_secs(60),
        jitter: 0.0,
    };
    config.refresh_margin = Duration::from_secs(60);
    config.subscribe_timeout = Duration::from_secs(5);
    config
}

pub async fn try_start(options: Options) -> Result<Harness, CoreError> {
    let clock = Arc::new(TokioClock::new());
    let expires_at = clock.now() + TimeDelta::from_std(options.credential_ttl).unwrap();
    let credentials = Arc::new(MemoryCredentialStore::new(Some(Credential::new(
        SecretString::from("at-0".to_owned()),
        SecretString::from("rt-0".to_owned()),
        expires_at,
    ))));

    let channel = FakeChannel::new(options.acks, options.reauth);
    channel.fail_next_connects(options.fail_connects);
    let refresher = StubRefresher::new(options.refresh);
    let directory = StaticDirectory::new(options.devices);
    directory.fail_next_lists(options.fail_lists);

    let session = Session::start_with_clock(
        config(),
        directory.clone(),
        channel.clone(),
        refresher.clone(),
        credentials.clone(),
        clock,
    )
    .await?;

    Ok(Harness {
        session,
        channel,
        refresher,
        credentials,
        directory,
    })
}

pub async fn start(options: Options) -> Harness {
    try_start(options).await.unwrap()
}

pub async fn wait_state(session: &Session, want: ConnectionState) {
    let mut rx = session.connection_state();
    tokio::time::timeout(Duration::from_secs(300), rx.wait_for(|s| *s == want))
        .await
        .unwrap()
        .unwrap();
}
