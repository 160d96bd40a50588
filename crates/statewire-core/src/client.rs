// ── Sync client ──
//
// Facade over the broker, registries, and correlator. Every operation
// derives the peer identity from the caller's connect options, so two
// calls with the same credentials share one physical connection.
//
// All observable effects flow out through one broadcast channel of
// [`SyncEvent`]s; view projections are fed from a receiver and never
// touch the transport directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use statewire_api::{
    ConnectOptions, Connection, ElementSpec, EntryChange, FetchPacket, MatchExpr, RoutedHandler,
    Transport,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::correlate::RequestCorrelator;
use crate::elements::ElementRegistry;
use crate::error::CoreError;
use crate::event::{FetchId, RequestOutcome, SyncEvent, WritePayload};
use crate::fetches::FetchRegistry;
use crate::identity::PeerIdentity;
use crate::peers::PeerBroker;

const EVENT_CAPACITY: usize = 256;

/// Client-side synchronization layer. Cheaply cloneable handle.
pub struct SyncClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for SyncClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<T: Transport> {
    broker: PeerBroker<T>,
    fetches: FetchRegistry<T::Conn>,
    elements: ElementRegistry<T::Conn>,
    correlator: RequestCorrelator,
    events: broadcast::Sender<SyncEvent>,
    /// Identities whose close hook is currently installed.
    hooked: dashmap::DashMap<PeerIdentity, ()>,
}

impl<T: Transport> SyncClient<T> {
    pub fn new(transport: T) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                broker: PeerBroker::new(transport),
                fetches: FetchRegistry::new(),
                elements: ElementRegistry::new(),
                correlator: RequestCorrelator::new(),
                events,
                hooked: dashmap::DashMap::new(),
            }),
        }
    }

    /// Subscribe to the event stream. Feed these into view
    /// projections via their `apply` methods.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Establish (or join) the connection for these credentials.
    pub async fn connect(&self, opts: &ConnectOptions) -> Result<PeerIdentity, CoreError> {
        self.acquire(opts).await.map(|(identity, _)| identity)
    }

    /// Close the connection for these credentials. `force` rejects
    /// pending waiters immediately and skips the close handshake.
    pub async fn close(&self, opts: &ConnectOptions, force: bool) {
        let identity = PeerIdentity::of(opts);
        self.inner.broker.release(&identity, force).await;
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Install (or replace) the subscription at `fetch` for these
    /// credentials. Any previous subscription under the same id is
    /// cancelled first, so no event tagged with the old expression is
    /// delivered after this settles.
    pub async fn subscribe(
        &self,
        opts: &ConnectOptions,
        fetch: &FetchId,
        expr: &MatchExpr,
    ) -> Result<(), CoreError> {
        let identity = PeerIdentity::of(opts);

        // Silence the previous registration before announcing the
        // restart. Cancelling the pump first guarantees that packets
        // already buffered for the old expression never reach the
        // stream after the new `FetchStarted`; the remote unfetch is
        // best effort on top of that.
        if let Some(old) = self.inner.fetches.take(&identity, fetch) {
            old.stop.cancel();
            if let Err(e) = old.conn.unfetch(&old.token).await {
                warn!(%identity, %fetch, error = %e, "unfetch of replaced subscription failed");
            }
        }

        self.emit(SyncEvent::FetchStarted {
            fetch: fetch.clone(),
        });

        let conn = match self.acquire(opts).await {
            Ok((_, conn)) => conn,
            Err(e) => {
                self.emit(SyncEvent::FetchFailed {
                    fetch: fetch.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        // The daemon may deliver the first data packet before its own
        // fetch acknowledgment. Whichever side wins synthesizes the
        // ready transition exactly once.
        let readied = Arc::new(AtomicBool::new(false));
        let stop = CancellationToken::new();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<FetchPacket>();
        {
            let events = self.inner.events.clone();
            let fetch = fetch.clone();
            let readied = Arc::clone(&readied);
            let stop = stop.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = stop.cancelled() => break,
                        packet = sink_rx.recv() => {
                            let Some(packet) = packet else { break };
                            if !readied.swap(true, Ordering::AcqRel) {
                                let _ = events.send(SyncEvent::FetchReady {
                                    fetch: fetch.clone(),
                                });
                            }
                            let _ = events.send(SyncEvent::FetchData {
                                fetch: fetch.clone(),
                                packet,
                            });
                        }
                    }
                }
                debug!(%fetch, "subscription stream ended");
            });
        }

        match conn.fetch(expr, sink_tx).await {
            Ok(token) => {
                if !readied.swap(true, Ordering::AcqRel) {
                    self.emit(SyncEvent::FetchReady {
                        fetch: fetch.clone(),
                    });
                }
                self.inner.fetches.install(&identity, fetch, conn, token, stop);
                Ok(())
            }
            Err(e) => {
                let error = CoreError::from(e);
                self.emit(SyncEvent::FetchFailed {
                    fetch: fetch.clone(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Cancel the subscription at `fetch`. Unknown ids are a no-op.
    pub async fn unsubscribe(
        &self,
        opts: &ConnectOptions,
        fetch: &FetchId,
    ) -> Result<(), CoreError> {
        let identity = PeerIdentity::of(opts);
        let Some(slot) = self.inner.fetches.take(&identity, fetch) else {
            return Ok(());
        };
        slot.stop.cancel();
        slot.conn.unfetch(&slot.token).await?;
        Ok(())
    }

    /// One-shot snapshot of everything matching `expr`, delivered both
    /// as the return value and as a snapshot event under `fetch`.
    pub async fn get(
        &self,
        opts: &ConnectOptions,
        fetch: &FetchId,
        expr: &MatchExpr,
    ) -> Result<Vec<EntryChange>, CoreError> {
        let (_, conn) = self.acquire(opts).await?;
        match conn.get(expr).await {
            Ok(entries) => {
                self.emit(SyncEvent::SnapshotLoaded {
                    fetch: fetch.clone(),
                    entries: entries.clone(),
                });
                Ok(entries)
            }
            Err(e) => {
                let error = CoreError::from(e);
                self.emit(SyncEvent::SnapshotFailed {
                    fetch: fetch.clone(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Set a remote state entry to a new value.
    pub async fn set(
        &self,
        opts: &ConnectOptions,
        path: &str,
        value: Value,
    ) -> Result<Value, CoreError> {
        let (_, conn) = self.acquire(opts).await?;
        let payload = WritePayload::Value(value.clone());
        self.correlated(path, payload, conn.set(path, value)).await
    }

    /// Call a remote method with arguments.
    pub async fn call(
        &self,
        opts: &ConnectOptions,
        path: &str,
        args: Vec<Value>,
    ) -> Result<Value, CoreError> {
        let (_, conn) = self.acquire(opts).await?;
        let payload = WritePayload::Args(args.clone());
        self.correlated(path, payload, conn.call(path, args)).await
    }

    /// Issue one correlated write: register the id, announce it, run
    /// the transport future, settle, announce the outcome.
    async fn correlated(
        &self,
        path: &str,
        payload: WritePayload,
        op: impl Future<Output = Result<Value, statewire_api::Error>> + Send,
    ) -> Result<Value, CoreError> {
        let (pending, _settled) = self.inner.correlator.issue(path, payload);
        let id = pending.id;
        self.emit(SyncEvent::RequestIssued(pending));

        let result = op.await;
        let outcome = match &result {
            Ok(value) => RequestOutcome::Success(value.clone()),
            Err(e) => RequestOutcome::Failure(e.to_string()),
        };
        if let Some(path) = self.inner.correlator.settle(id, outcome.clone()) {
            self.emit(SyncEvent::RequestSettled { id, path, outcome });
        }
        result.map_err(CoreError::from)
    }

    // ── Owned elements ───────────────────────────────────────────────

    /// Publish an element into the daemon's namespace. Ownership is
    /// recorded only once the daemon acknowledges the registration.
    pub async fn publish(
        &self,
        opts: &ConnectOptions,
        element: ElementSpec,
        handler: Option<RoutedHandler>,
    ) -> Result<(), CoreError> {
        let (identity, conn) = self.acquire(opts).await?;
        let path = element.path.clone();
        conn.add(element, handler).await?;
        self.inner.elements.insert(&identity, &path, conn);
        Ok(())
    }

    /// Withdraw a published element. Fails locally with
    /// [`CoreError::ElementNotFound`] if `path` was never published.
    pub async fn unpublish(&self, opts: &ConnectOptions, path: &str) -> Result<(), CoreError> {
        let identity = PeerIdentity::of(opts);
        let conn = self.inner.elements.lookup(&identity, path)?;
        conn.remove(path).await?;
        let _ = self.inner.elements.remove(&identity, path);
        Ok(())
    }

    /// Push a new value for a published element. Fails locally if
    /// `path` was never published.
    pub async fn mutate(
        &self,
        opts: &ConnectOptions,
        path: &str,
        value: Value,
    ) -> Result<(), CoreError> {
        let identity = PeerIdentity::of(opts);
        let conn = self.inner.elements.lookup(&identity, path)?;
        conn.change(path, value).await?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn acquire(&self, opts: &ConnectOptions) -> Result<(PeerIdentity, T::Conn), CoreError> {
        let identity = PeerIdentity::of(opts);
        let conn = self.inner.broker.acquire(opts).await?;
        self.install_close_hook(&identity);
        Ok((identity, conn))
    }

    /// Ensure exactly one close hook per live identity. The hook
    /// clears everything tied to the peer and announces the loss;
    /// after a reconnect the next acquire installs a fresh one.
    fn install_close_hook(&self, identity: &PeerIdentity) {
        use dashmap::mapref::entry::Entry;
        let Entry::Vacant(vacant) = self.inner.hooked.entry(identity.clone()) else {
            return;
        };
        vacant.insert(());

        let inner = Arc::clone(&self.inner);
        let hooked = identity.clone();
        self.inner.broker.on_close(identity, move || {
            let identity = hooked;
            debug!(%identity, "peer gone, clearing state");
            inner.hooked.remove(&identity);
            inner.fetches.clear_peer(&identity);
            inner.elements.clear_peer(&identity);
            let _ = inner.events.send(SyncEvent::PeerClosed { identity });
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine; projections are optional.
        let _ = self.inner.events.send(event);
    }
}
