// ── Peer broker ──
//
// At most one physical connection per identity. Concurrent acquires
// for the same identity queue behind a single in-flight connect; a
// failed connect rejects every queued waiter and leaves nothing
// behind, so the next acquire retries from scratch.
//
// Locking discipline: slot mutations happen under the identity's
// DashMap shard and nowhere else. Waiters and close hooks are always
// moved OUT of the slot before being fired, so user code never runs
// under a shard lock and the drain can only happen once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use statewire_api::{ConnectOptions, Connection, Transport};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::identity::PeerIdentity;

type Waiter<C> = oneshot::Sender<Result<C, CoreError>>;
// The hook sits inside the DashMap, so it must be `Sync` for the
// broker handle to stay `Send` across spawned tasks.
type CloseHook = Box<dyn FnOnce() + Send + Sync>;

// ── Slot state ───────────────────────────────────────────────────────

enum PeerState<C> {
    /// Physical connect in flight; callers queue here.
    Connecting { waiters: Vec<Waiter<C>> },
    Open(C),
}

struct PeerSlot<C> {
    /// Guards the slot against stale task callbacks. A connect task
    /// or close watcher may only finalize the slot generation it was
    /// spawned for; a forced release bumps the table past it.
    epoch: u64,
    state: PeerState<C>,
    on_close: Vec<CloseHook>,
}

// ── Broker ───────────────────────────────────────────────────────────

/// Shared connection table. Cheaply cloneable handle.
pub struct PeerBroker<T: Transport> {
    inner: Arc<BrokerInner<T>>,
}

impl<T: Transport> Clone for PeerBroker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct BrokerInner<T: Transport> {
    transport: T,
    slots: DashMap<PeerIdentity, PeerSlot<T::Conn>>,
    epochs: AtomicU64,
}

impl<T: Transport> PeerBroker<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                transport,
                slots: DashMap::new(),
                epochs: AtomicU64::new(1),
            }),
        }
    }

    /// Get the open connection for these credentials, connecting if
    /// necessary. Concurrent callers for one identity share a single
    /// connect attempt and all settle the same way.
    pub async fn acquire(&self, opts: &ConnectOptions) -> Result<T::Conn, CoreError> {
        let identity = PeerIdentity::of(opts);
        let rx = {
            match self.inner.slots.entry(identity.clone()) {
                Entry::Occupied(mut occupied) => match &mut occupied.get_mut().state {
                    PeerState::Open(conn) => return Ok(conn.clone()),
                    PeerState::Connecting { waiters } => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        rx
                    }
                },
                Entry::Vacant(vacant) => {
                    let epoch = self.inner.epochs.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel();
                    vacant.insert(PeerSlot {
                        epoch,
                        state: PeerState::Connecting { waiters: vec![tx] },
                        on_close: Vec::new(),
                    });
                    debug!(%identity, epoch, "connecting");

                    let inner = Arc::clone(&self.inner);
                    let opts = opts.clone();
                    let id = identity.clone();
                    tokio::spawn(async move {
                        run_connect(&inner, id, &opts, epoch).await;
                    });
                    rx
                }
            }
        };

        match rx.await {
            Ok(settled) => settled,
            // Waiter dropped without settling: the broker went away
            // while we were queued.
            Err(_) => Err(CoreError::Disconnected),
        }
    }

    /// Register a callback fired exactly once when this identity's
    /// connection goes away. If the identity is already gone, the
    /// callback fires immediately.
    pub fn on_close(&self, identity: &PeerIdentity, hook: impl FnOnce() + Send + Sync + 'static) {
        match self.inner.slots.get_mut(identity) {
            Some(mut slot) => slot.on_close.push(Box::new(hook)),
            None => hook(),
        }
    }

    /// Close the connection for `identity`.
    ///
    /// Graceful (`force == false`): if open, asks the transport to
    /// close and waits for the request to go out; while still
    /// connecting, does nothing (the in-flight connect settles the
    /// queued waiters).
    ///
    /// Forced: discards the slot synchronously. Queued waiters are
    /// rejected with [`CoreError::ForcedClose`] and no transport
    /// acknowledgment is awaited. For daemons known to be dead.
    pub async fn release(&self, identity: &PeerIdentity, force: bool) {
        if force {
            let Some((_, slot)) = self.inner.slots.remove(identity) else {
                return;
            };
            debug!(%identity, "forced release");
            match slot.state {
                PeerState::Connecting { waiters } => {
                    for waiter in waiters {
                        let _ = waiter.send(Err(CoreError::ForcedClose));
                    }
                }
                PeerState::Open(conn) => {
                    // Best effort; never wait on a dead peer's close
                    // handshake.
                    tokio::spawn(async move {
                        if let Err(e) = conn.close().await {
                            debug!(error = %e, "close after forced release failed");
                        }
                    });
                }
            }
            fire_hooks(slot.on_close);
            return;
        }

        let removed = match self.inner.slots.entry(identity.clone()) {
            Entry::Occupied(occupied) => match &occupied.get().state {
                PeerState::Open(_) => Some(occupied.remove()),
                PeerState::Connecting { .. } => None,
            },
            Entry::Vacant(_) => None,
        };
        let Some(slot) = removed else {
            debug!(%identity, "release ignored, no open connection");
            return;
        };
        if let PeerState::Open(conn) = slot.state {
            if let Err(e) = conn.close().await {
                warn!(%identity, error = %e, "graceful close failed");
            }
        }
        fire_hooks(slot.on_close);
    }

    /// Whether an open connection currently exists for `identity`.
    pub fn is_open(&self, identity: &PeerIdentity) -> bool {
        self.inner
            .slots
            .get(identity)
            .is_some_and(|slot| matches!(slot.state, PeerState::Open(_)))
    }
}

// ── Connect task ─────────────────────────────────────────────────────

async fn run_connect<T: Transport>(
    inner: &Arc<BrokerInner<T>>,
    identity: PeerIdentity,
    opts: &ConnectOptions,
    epoch: u64,
) {
    match inner.transport.connect(opts).await {
        Ok(conn) => {
            let waiters = {
                let Some(mut slot) = inner.slots.get_mut(&identity) else {
                    // Forced release raced the connect; the slot is
                    // gone and nobody wants this connection.
                    drop(close_orphan(conn));
                    return;
                };
                if slot.epoch != epoch {
                    drop(slot);
                    drop(close_orphan(conn));
                    return;
                }
                match std::mem::replace(&mut slot.state, PeerState::Open(conn.clone())) {
                    PeerState::Connecting { waiters } => waiters,
                    // A slot cannot be Open twice within one epoch.
                    PeerState::Open(_) => Vec::new(),
                }
            };
            debug!(%identity, waiters = waiters.len(), "connected");
            for waiter in waiters {
                let _ = waiter.send(Ok(conn.clone()));
            }

            // Watch for involuntary disconnect.
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                conn.closed().await;
                handle_closed(&inner, &identity, epoch);
            });
        }
        Err(e) => {
            let error = CoreError::from(e);
            let error = match error {
                CoreError::ConnectionFailed { reason, .. } => CoreError::ConnectionFailed {
                    url: opts.url.to_string(),
                    reason,
                },
                other => other,
            };
            warn!(%identity, %error, "connect failed");
            let Some((_, slot)) = inner
                .slots
                .remove_if(&identity, |_, slot| slot.epoch == epoch)
            else {
                return;
            };
            if let PeerState::Connecting { waiters } = slot.state {
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
            // Connect never succeeded, so close hooks do not fire;
            // the rejection above already notified everyone involved.
        }
    }
}

fn handle_closed<T: Transport>(inner: &Arc<BrokerInner<T>>, identity: &PeerIdentity, epoch: u64) {
    let Some((_, slot)) = inner
        .slots
        .remove_if(identity, |_, slot| slot.epoch == epoch)
    else {
        // Already released, or the identity reconnected under a new
        // epoch. Not ours to clean up.
        return;
    };
    debug!(%identity, "peer disconnected");
    fire_hooks(slot.on_close);
}

fn fire_hooks(hooks: Vec<CloseHook>) {
    for hook in hooks {
        hook();
    }
}

fn close_orphan<C: Connection>(conn: C) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "orphan close failed");
        }
    })
}
