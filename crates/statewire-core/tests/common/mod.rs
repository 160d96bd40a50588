// Scripted in-memory transport shared by the integration tests.
//
// Connect behavior is driven by a plan queue: each physical connect
// attempt consumes one plan (succeed, fail, or park until the test
// releases a gate). Connections log every wire call and let the test
// inject fetch packets or a disconnect.

#![allow(clippy::unwrap_used, dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{Value, json};
use statewire_api::{
    ConnectOptions, Connection, ElementSpec, EntryChange, Error, FetchPacket, FetchToken,
    MatchExpr, RoutedHandler, Transport,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

// ── Transport ───────────────────────────────────────────────────────

pub enum ConnectPlan {
    /// Succeed immediately.
    Ready,
    /// Fail immediately.
    Fail(String),
    /// Park until the test settles the gate.
    Hold(oneshot::Receiver<Result<(), String>>),
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub state: Arc<MockState>,
}

#[derive(Default)]
pub struct MockState {
    plans: Mutex<VecDeque<ConnectPlan>>,
    /// Physical connect attempts observed.
    pub connects: AtomicUsize,
    /// Every connection ever handed out, in creation order.
    pub conns: Mutex<Vec<MockConn>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self, plan: ConnectPlan) {
        self.state.plans.lock().unwrap().push_back(plan);
    }

    /// Queue a parked connect; the returned sender releases it.
    pub fn plan_hold(&self) -> oneshot::Sender<Result<(), String>> {
        let (tx, rx) = oneshot::channel();
        self.plan(ConnectPlan::Hold(rx));
        tx
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn last_conn(&self) -> MockConn {
        self.state.conns.lock().unwrap().last().unwrap().clone()
    }
}

impl Transport for MockTransport {
    type Conn = MockConn;

    async fn connect(&self, _opts: &ConnectOptions) -> Result<MockConn, Error> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let plan = {
            let mut plans = self.state.plans.lock().unwrap();
            plans.pop_front().unwrap_or(ConnectPlan::Ready)
        };
        match plan {
            ConnectPlan::Ready => {}
            ConnectPlan::Fail(reason) => return Err(Error::Connect(reason)),
            ConnectPlan::Hold(gate) => match gate.await {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => return Err(Error::Connect(reason)),
                Err(_) => return Err(Error::Connect("gate dropped".into())),
            },
        }
        let conn = MockConn::new(self.state.conns.lock().unwrap().len());
        self.state.conns.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

// ── Connection ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MockConn {
    pub inner: Arc<ConnInner>,
}

pub struct ConnInner {
    pub id: usize,
    pub closed: CancellationToken,
    /// Wire calls in issue order, e.g. `"fetch f_0"`, `"set lamp/1"`.
    pub log: Mutex<Vec<String>>,
    /// Live fetch sinks by token, for packet injection.
    pub sinks: Mutex<HashMap<String, mpsc::UnboundedSender<FetchPacket>>>,
    /// Packets delivered into the sink during `fetch`, before the
    /// acknowledgment returns. Simulates data-beats-ack daemons.
    pub emit_on_fetch: Mutex<Vec<FetchPacket>>,
    /// When set, every request fails with a daemon rejection.
    pub fail_requests: AtomicBool,
    /// Scripted result for `get`.
    pub get_result: Mutex<Vec<EntryChange>>,
    next_token: AtomicUsize,
}

impl std::fmt::Debug for MockConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConn")
            .field("id", &self.inner.id)
            .field("closed", &self.inner.closed.is_cancelled())
            .finish()
    }
}

impl MockConn {
    fn new(id: usize) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                id,
                closed: CancellationToken::new(),
                log: Mutex::new(Vec::new()),
                sinks: Mutex::new(HashMap::new()),
                emit_on_fetch: Mutex::new(Vec::new()),
                fail_requests: AtomicBool::new(false),
                get_result: Mutex::new(Vec::new()),
                next_token: AtomicUsize::new(0),
            }),
        }
    }

    pub fn same_as(&self, other: &MockConn) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }

    fn record(&self, line: String) {
        self.inner.log.lock().unwrap().push(line);
    }

    fn checked(&self) -> Result<(), Error> {
        if self.inner.fail_requests.load(Ordering::SeqCst) {
            return Err(Error::Daemon {
                code: -32600,
                message: "rejected".into(),
            });
        }
        Ok(())
    }

    /// Simulate the daemon dropping this connection.
    pub fn drop_from_remote(&self) {
        self.inner.closed.cancel();
    }

    /// Push a packet into the live fetch identified by `token`.
    pub fn push(&self, token: &FetchToken, packet: FetchPacket) {
        let sinks = self.inner.sinks.lock().unwrap();
        sinks.get(token.as_str()).unwrap().send(packet).unwrap();
    }

    /// Push a packet into the only live fetch.
    pub fn push_sole(&self, packet: FetchPacket) {
        let sinks = self.inner.sinks.lock().unwrap();
        assert_eq!(sinks.len(), 1, "expected exactly one live fetch");
        sinks.values().next().unwrap().send(packet).unwrap();
    }
}

impl Connection for MockConn {
    async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    async fn close(&self) -> Result<(), Error> {
        self.record("close".into());
        self.inner.closed.cancel();
        Ok(())
    }

    async fn set(&self, path: &str, _value: Value) -> Result<Value, Error> {
        self.record(format!("set {path}"));
        self.checked()?;
        Ok(json!({ "ok": true }))
    }

    async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value, Error> {
        self.record(format!("call {path}"));
        self.checked()?;
        Ok(Value::Array(args))
    }

    async fn get(&self, _expr: &MatchExpr) -> Result<Vec<EntryChange>, Error> {
        self.record("get".into());
        self.checked()?;
        Ok(self.inner.get_result.lock().unwrap().clone())
    }

    async fn fetch(
        &self,
        _expr: &MatchExpr,
        sink: mpsc::UnboundedSender<FetchPacket>,
    ) -> Result<FetchToken, Error> {
        let token = format!("f_{}", self.inner.next_token.fetch_add(1, Ordering::SeqCst));
        self.record(format!("fetch {token}"));
        self.checked()?;
        for packet in self.inner.emit_on_fetch.lock().unwrap().drain(..) {
            sink.send(packet).unwrap();
        }
        self.inner
            .sinks
            .lock()
            .unwrap()
            .insert(token.clone(), sink);
        Ok(FetchToken::new(token))
    }

    async fn unfetch(&self, token: &FetchToken) -> Result<(), Error> {
        self.record(format!("unfetch {}", token.as_str()));
        self.inner.sinks.lock().unwrap().remove(token.as_str());
        self.checked()?;
        Ok(())
    }

    async fn add(&self, element: ElementSpec, _handler: Option<RoutedHandler>) -> Result<(), Error> {
        self.record(format!("add {}", element.path));
        self.checked()?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), Error> {
        self.record(format!("remove {path}"));
        self.checked()?;
        Ok(())
    }

    async fn change(&self, path: &str, _value: Value) -> Result<(), Error> {
        self.record(format!("change {path}"));
        self.checked()?;
        Ok(())
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

pub fn opts(url: &str) -> ConnectOptions {
    ConnectOptions::new(url::Url::parse(url).unwrap())
}

/// Let spawned broker/client tasks make progress.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
