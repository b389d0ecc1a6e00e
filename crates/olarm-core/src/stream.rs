// ── Reactive streams ──
//
// Two ways to follow the engine: snapshot streams over the DataStore
// (latest full state, intermediate states may be skipped) and event
// streams over the change broadcast (every transition, in order).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use crate::model::{Device, DeviceId, StateChangeEvent};

// ── DeviceStream ─────────────────────────────────────────────────────

/// A subscription to the published device snapshots.
pub struct DeviceStream {
    current: Arc<Vec<Arc<Device>>>,
    receiver: watch::Receiver<Arc<Vec<Arc<Device>>>>,
}

impl DeviceStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<Vec<Arc<Device>>>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation or at the last `changed()`.
    pub fn current(&self) -> &Arc<Vec<Arc<Device>>> {
        &self.current
    }

    /// Latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Arc<Vec<Arc<Device>>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Arc<Vec<Arc<Device>>>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    pub fn into_stream(self) -> DeviceWatchStream {
        DeviceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding each new snapshot.
pub struct DeviceWatchStream {
    inner: WatchStream<Arc<Vec<Arc<Device>>>>,
}

impl Stream for DeviceWatchStream {
    type Item = Arc<Vec<Arc<Device>>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ── DeviceEvents ─────────────────────────────────────────────────────

/// Ordered change events for one device.
pub struct DeviceEvents {
    device_id: DeviceId,
    receiver: broadcast::Receiver<Arc<StateChangeEvent>>,
}

impl DeviceEvents {
    pub(crate) fn new(
        device_id: DeviceId,
        receiver: broadcast::Receiver<Arc<StateChangeEvent>>,
    ) -> Self {
        Self {
            device_id,
            receiver,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Next event for this device. `None` once the session is gone.
    ///
    /// A consumer that falls behind the broadcast buffer loses the
    /// oldest events; the loss is logged and the snapshot stays
    /// authoritative.
    pub async fn recv(&mut self) -> Option<Arc<StateChangeEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.device_id == self.device_id => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(device_id = %self.device_id, skipped, "event consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<StateChangeEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.device_id == self.device_id => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(device_id = %self.device_id, skipped, "event consumer lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
