//! The fan-out engine described in spec §4.6.
//!
//! A single distributor task owns the watcher set. Producers enqueue onto a
//! bounded `incoming` channel; membership changes (add/remove a watcher) are
//! themselves tunneled through that same channel as internal markers so they
//! serialize with event flow without a second lock on the hot path (spec §9,
//! "Membership serialization via internal events"). This realizes the
//! `{Added,Modified,Deleted,Bookmark,Error,Internal}` event taxonomy of
//! spec §3: the five public variants live in [`apiserver_types::Event`] and
//! are all a subscriber ever sees; `Internal` is this module's own
//! queue-entry wrapper and never crosses the `Watcher` boundary.
use apiserver_types::Event;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify, RwLock};

/// What to do when a watcher's outbound queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FullChannelPolicy {
    /// Block the distributor until the watcher drains or stops.
    WaitIfFull,
    /// Drop the event for that one watcher and move on.
    DropIfFull,
}

/// Returned by mutating/subscribing calls once the broadcaster has shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("broadcaster is shut down")]
pub struct Stopped;

const DEFAULT_INCOMING_CAPACITY: usize = 25;

enum Internal<T> {
    Event(Event<T>),
    AddWatcher {
        id: u64,
        capacity: usize,
        prefix: Vec<Event<T>>,
        resp: oneshot::Sender<WatcherParts<T>>,
    },
    RemoveWatcher {
        id: u64,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

struct WatcherEntry<T> {
    id: u64,
    tx: mpsc::Sender<Event<T>>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

/// Everything the distributor hands back to `watch`/`watch_with_prefix` once
/// a watcher has been registered.
struct WatcherParts<T> {
    rx: mpsc::Receiver<Event<T>>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

/// A handle to a subscriber's outbound queue.
///
/// `Watcher` never closes its own channel -- only the distributor does, on
/// `stop()` being observed or on broadcaster shutdown (the single-closer
/// rule of spec §5).
pub struct Watcher<T> {
    id: u64,
    rx: mpsc::Receiver<Event<T>>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    control_tx: mpsc::Sender<Internal<T>>,
}

impl<T> Watcher<T> {
    /// Receives the next event, or `None` once the broadcaster has closed
    /// this watcher's channel.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        self.rx.recv().await
    }

    /// Idempotent. Unblocks any in-flight `WaitIfFull` send targeting this
    /// watcher and asks the distributor to drop it from the watcher set.
    /// The outbound channel is closed by the distributor, never by this call.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_notify.notify_one();
        let control_tx = self.control_tx.clone();
        let id = self.id;
        tokio::spawn(async move {
            let _ = control_tx.send(Internal::RemoveWatcher { id }).await;
        });
    }
}

impl<T> futures::Stream for Watcher<T> {
    type Item = Event<T>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

struct Inner<T> {
    incoming_tx: mpsc::Sender<Internal<T>>,
    shutdown_started: AtomicBool,
    incoming_block: RwLock<()>,
    next_watcher_id: AtomicU64,
    default_watcher_capacity: usize,
}

/// A process-local, totally-ordered event bus with bounded per-subscriber
/// queues (spec §4.6). Cloning shares the same distributor.
#[derive(Clone)]
pub struct Broadcaster<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// `watcher_capacity` is the default per-watcher outbound queue length Q.
    pub fn new(watcher_capacity: usize, policy: FullChannelPolicy) -> Self {
        Self::with_incoming_capacity(DEFAULT_INCOMING_CAPACITY, watcher_capacity, policy)
    }

    pub fn with_incoming_capacity(
        incoming_capacity: usize,
        watcher_capacity: usize,
        policy: FullChannelPolicy,
    ) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(incoming_capacity);
        tokio::spawn(distribute(incoming_rx, policy));
        Self {
            inner: Arc::new(Inner {
                incoming_tx,
                shutdown_started: AtomicBool::new(false),
                incoming_block: RwLock::new(()),
                next_watcher_id: AtomicU64::new(0),
                default_watcher_capacity: watcher_capacity,
            }),
        }
    }

    /// Enqueues an event, blocking while `incoming` is full.
    pub async fn action(&self, event: Event<T>) -> Result<(), Stopped> {
        self.send_internal(Internal::Event(event)).await
    }

    /// Non-blocking `action`: returns `(false, None)` instead of blocking
    /// when `incoming` is full.
    pub fn action_or_drop(&self, event: Event<T>) -> (bool, Option<Stopped>) {
        if self.inner.shutdown_started.load(Ordering::Acquire) {
            return (false, Some(Stopped));
        }
        match self.inner.incoming_tx.try_send(Internal::Event(event)) {
            Ok(()) => (true, None),
            Err(mpsc::error::TrySendError::Full(_)) => (false, None),
            Err(mpsc::error::TrySendError::Closed(_)) => (false, Some(Stopped)),
        }
    }

    /// Registers a new watcher; it will never see an event accepted before
    /// this call returns (spec §4.6.2's visibility invariant).
    pub async fn watch(&self) -> Result<Watcher<T>, Stopped> {
        self.watch_with_prefix(Vec::new()).await
    }

    /// As [`Self::watch`], but pre-seeds the watcher's queue with `prefix`.
    /// Its capacity is `max(Q, prefix.len() + 1)`.
    pub async fn watch_with_prefix(&self, prefix: Vec<Event<T>>) -> Result<Watcher<T>, Stopped> {
        let capacity = self.inner.default_watcher_capacity.max(prefix.len() + 1);
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send_internal(Internal::AddWatcher {
            id,
            capacity,
            prefix,
            resp: resp_tx,
        })
        .await?;
        let parts = resp_rx.await.map_err(|_| Stopped)?;
        Ok(Watcher {
            id,
            rx: parts.rx,
            stopped: parts.stopped,
            stop_notify: parts.stop_notify,
            control_tx: self.inner.incoming_tx.clone(),
        })
    }

    async fn send_internal(&self, msg: Internal<T>) -> Result<(), Stopped> {
        let _guard = self.inner.incoming_block.read().await;
        if self.inner.shutdown_started.load(Ordering::Acquire) {
            return Err(Stopped);
        }
        self.inner.incoming_tx.send(msg).await.map_err(|_| Stopped)
    }

    /// Stops accepting new events, waits for everything already queued to be
    /// dispatched to every live watcher, then closes every watcher's
    /// outbound channel.
    pub async fn shutdown(&self) {
        let _guard = self.inner.incoming_block.write().await;
        if self.inner.shutdown_started.swap(true, Ordering::AcqRel) {
            return; // already shut down
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .inner
            .incoming_tx
            .send(Internal::Shutdown { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

async fn distribute<T: Clone + Send + 'static>(
    mut incoming_rx: mpsc::Receiver<Internal<T>>,
    policy: FullChannelPolicy,
) {
    let mut watchers: Vec<WatcherEntry<T>> = Vec::new();
    while let Some(msg) = incoming_rx.recv().await {
        match msg {
            Internal::Event(ev) => {
                let mut dead = Vec::new();
                for (idx, entry) in watchers.iter().enumerate() {
                    if !dispatch_one(entry, &ev, policy).await {
                        dead.push(idx);
                    }
                }
                for idx in dead.into_iter().rev() {
                    watchers.remove(idx);
                }
            }
            Internal::AddWatcher {
                id,
                capacity,
                prefix,
                resp,
            } => {
                let (tx, rx) = mpsc::channel(capacity);
                for ev in prefix {
                    // Capacity was sized to fit the prefix, so this never blocks.
                    let _ = tx.try_send(ev);
                }
                let stopped = Arc::new(AtomicBool::new(false));
                let stop_notify = Arc::new(Notify::new());
                watchers.push(WatcherEntry {
                    id,
                    tx,
                    stopped: stopped.clone(),
                    stop_notify: stop_notify.clone(),
                });
                let _ = resp.send(WatcherParts {
                    rx,
                    stopped,
                    stop_notify,
                });
                tracing::debug!(watcher_id = id, capacity, "watcher added");
            }
            Internal::RemoveWatcher { id } => {
                watchers.retain(|w| w.id != id);
                tracing::debug!(watcher_id = id, remaining = watchers.len(), "watcher removed");
            }
            Internal::Shutdown { done } => {
                tracing::info!(watchers = watchers.len(), "broadcaster shutting down");
                watchers.clear();
                let _ = done.send(());
                return;
            }
        }
    }
}

async fn dispatch_one<T: Clone>(entry: &WatcherEntry<T>, ev: &Event<T>, policy: FullChannelPolicy) -> bool {
    if entry.stopped.load(Ordering::Acquire) {
        return false;
    }
    match policy {
        FullChannelPolicy::DropIfFull => match entry.tx.try_send(ev.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        },
        FullChannelPolicy::WaitIfFull => {
            tokio::select! {
                biased;
                _ = entry.stop_notify.notified() => false,
                permit = entry.tx.reserve() => match permit {
                    Ok(p) => { p.send(ev.clone()); true }
                    Err(_) => false,
                },
            }
        }
    }
}
