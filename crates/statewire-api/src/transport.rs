//! The trait seam between the synchronization layer and the wire.
//!
//! `statewire-core` is generic over [`Transport`]; production code plugs
//! in the WebSocket peer from [`crate::ws`], tests plug in a scripted
//! fake. Every method that crosses the wire suspends the caller until
//! the daemon responds and never blocks other connections.

use std::future::Future;
use std::sync::Arc;

use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Error;
use crate::proto::{ElementSpec, EntryChange, FetchPacket, MatchExpr};

// ── Connect options ──────────────────────────────────────────────────

/// How to reach and authenticate with a daemon.
///
/// Built by the caller and handed in; this crate never reads config
/// files. Two option sets with the same url/user/password/headers are
/// the same connection identity upstream.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Daemon WebSocket url, e.g. `ws://127.0.0.1:11123`.
    pub url: Url,
    /// User to authenticate as. `None` skips the authenticate exchange.
    pub user: Option<String>,
    /// Password belonging to `user`.
    pub password: Option<SecretString>,
    /// Extra headers for the upgrade request (alternative auth schemes).
    pub headers: Vec<(String, String)>,
}

impl ConnectOptions {
    /// Anonymous connection to `url`.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            user: None,
            password: None,
            headers: Vec::new(),
        }
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ── Routed requests ──────────────────────────────────────────────────

/// A request the daemon routed back to the owner of an element.
#[derive(Debug, Clone)]
pub enum Routed {
    /// A peer asked to set the owned state to a new value.
    Set(Value),
    /// A peer called the owned method with these arguments.
    Call(Vec<Value>),
}

/// Handler invoked for routed requests against an owned element.
///
/// The `Ok` value is returned to the requesting peer; `Err` becomes a
/// daemon error response. Runs on the connection's read task, so it
/// must not block.
pub type RoutedHandler = Arc<dyn Fn(Routed) -> Result<Value, String> + Send + Sync>;

/// Opaque token identifying a live fetch on one connection.
///
/// Obtained from [`Connection::fetch`], surrendered to
/// [`Connection::unfetch`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchToken(pub(crate) String);

impl FetchToken {
    /// Wrap a raw daemon-side fetch id. Mostly useful for transports
    /// outside this crate and for tests.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ── Traits ───────────────────────────────────────────────────────────

/// Factory for physical connections.
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;

    /// Establish one physical connection. Includes authentication;
    /// an auth rejection is a connect failure.
    fn connect(&self, opts: &ConnectOptions)
    -> impl Future<Output = Result<Self::Conn, Error>> + Send;
}

/// One live connection to a daemon.
///
/// Cheaply cloneable; all clones share the underlying socket. Request
/// methods may be invoked concurrently from any number of tasks.
pub trait Connection: Clone + Send + Sync + 'static {
    /// Resolves exactly once, when the connection is gone, whether the
    /// daemon hung up, the socket died, or [`close`](Self::close) ran.
    fn closed(&self) -> impl Future<Output = ()> + Send;

    /// Request a graceful shutdown.
    fn close(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Ask the owner of `path` to take a new value.
    fn set(&self, path: &str, value: Value) -> impl Future<Output = Result<Value, Error>> + Send;

    /// Invoke the method at `path`.
    fn call(
        &self,
        path: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, Error>> + Send;

    /// One-shot snapshot of everything matching `expr`.
    fn get(
        &self,
        expr: &MatchExpr,
    ) -> impl Future<Output = Result<Vec<EntryChange>, Error>> + Send;

    /// Register a live subscription. Change notifications flow into
    /// `sink` until [`unfetch`](Self::unfetch) or disconnect; the first
    /// packet may arrive before this future resolves.
    fn fetch(
        &self,
        expr: &MatchExpr,
        sink: mpsc::UnboundedSender<FetchPacket>,
    ) -> impl Future<Output = Result<FetchToken, Error>> + Send;

    /// Cancel a live subscription.
    fn unfetch(&self, token: &FetchToken) -> impl Future<Output = Result<(), Error>> + Send;

    /// Publish an owned element. `handler` services requests the daemon
    /// routes back to this side.
    fn add(
        &self,
        element: ElementSpec,
        handler: Option<RoutedHandler>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Withdraw an owned element.
    fn remove(&self, path: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Post a new value for an owned state.
    fn change(&self, path: &str, value: Value) -> impl Future<Output = Result<(), Error>> + Send;
}
