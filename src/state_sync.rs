use crate::actuator::ActuatorBank;
use crate::hardware::OutputLine;
use crate::notification::NotificationKind;
use std::future::Future;
use tokio::sync::mpsc::{self, error::TryRecvError, Receiver, Sender};
use tracing::{debug, info, warn};

/// What a store client may push into the notification queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Notification(NotificationKind),
    /// The transport went quiet for too long; the client resumes on its own
    Timeout,
}

/// Connection state of the desired-state subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Subscribing,
    Streaming,
    TimedOut,
}

/// A remote store able to stream changes below a path.
///
/// Implementations deliver parsed updates through the queue sender they were
/// built with, see [`notification_queue`].
pub trait RemoteStateStore {
    fn begin_stream(&mut self, path: &str) -> impl Future<Output = anyhow::Result<()>>;
}

/// Bounded queue between the store client and the synchronization engine.
pub fn notification_queue(capacity: usize) -> (Sender<StreamEvent>, Receiver<StreamEvent>) {
    mpsc::channel(capacity)
}

/// Keeps relay outputs in line with the desired states held by a remote store.
pub struct StateSyncEngine<S, O> {
    store: S,
    path: String,
    state: SyncState,
    actuators: ActuatorBank<O>,
    events: Receiver<StreamEvent>,
}

impl<S: RemoteStateStore, O: OutputLine> StateSyncEngine<S, O> {
    pub fn new(
        store: S,
        path: impl Into<String>,
        actuators: ActuatorBank<O>,
        events: Receiver<StreamEvent>,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            state: SyncState::Disconnected,
            actuators,
            events,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn actuators(&self) -> &ActuatorBank<O> {
        &self.actuators
    }

    /// Opens the stream on the collection path. A failure is logged and
    /// leaves the engine disconnected; retrying is up to the caller.
    pub async fn subscribe(&mut self) -> SyncState {
        self.state = SyncState::Subscribing;
        match self.store.begin_stream(&self.path).await {
            Ok(()) => {
                info!("Successfully started stream at {}", self.path);
                self.state = SyncState::Streaming;
            }
            Err(e) => {
                warn!("Could not begin stream at {}: {e:#}", self.path);
                self.state = SyncState::Disconnected;
            }
        }
        self.state
    }

    /// Drains everything currently queued without waiting.
    /// Returns the number of events handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.handle(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.state != SyncState::Disconnected {
                        warn!("Notification queue closed, stream lost");
                        self.state = SyncState::Disconnected;
                    }
                    break;
                }
            }
        }
        handled
    }

    /// Waits for the next queued event. `None` once every sender is gone.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Timeout if self.state == SyncState::Disconnected => {
                debug!("Ignoring stream timeout while disconnected");
            }
            StreamEvent::Timeout => {
                self.state = SyncState::TimedOut;
                info!("Stream timeout, resuming...");
                self.state = SyncState::Streaming;
            }
            StreamEvent::Notification(notification) => {
                if self.state == SyncState::Streaming {
                    self.apply(&notification);
                } else {
                    debug!("Dropping notification while {:?}: {notification:?}", self.state);
                }
            }
        }
    }

    /// Drives the relays named by `notification`. Unknown ids are discarded
    /// without touching any output. Returns how many relays were written.
    pub fn apply(&mut self, notification: &NotificationKind) -> usize {
        match notification {
            NotificationKind::Leaf { id, value } => match self.actuators.set(*id, *value) {
                Some(_) => {
                    info!("Switch {id} -> {}", on_off(*value));
                    1
                }
                None => {
                    warn!("Discarding update for unknown switch {id}");
                    0
                }
            },
            NotificationKind::Snapshot(states) => {
                let mut written = 0;
                for (id, value) in states {
                    if self.actuators.set(*id, *value).is_some() {
                        written += 1;
                    } else {
                        debug!("Ignoring snapshot entry for unknown switch {id}");
                    }
                }
                info!("Applied snapshot to {written} switches: {:?}", self.actuators.states());
                written
            }
        }
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}
