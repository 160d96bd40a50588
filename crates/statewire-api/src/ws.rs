//! WebSocket peer implementation of the [`Transport`] seam.
//!
//! One [`WsConn`] owns one socket. A writer task serializes outgoing
//! frames, a reader task decodes incoming ones and routes them to the
//! matching waiter (responses), fetch sink (notifications), or element
//! handler (daemon-routed requests).
//!
//! # Example
//!
//! ```rust,ignore
//! use statewire_api::{ConnectOptions, Transport, WsTransport};
//! use url::Url;
//!
//! let transport = WsTransport::new();
//! let opts = ConnectOptions::new(Url::parse("ws://127.0.0.1:11123")?)
//!     .with_credentials("admin", "secret");
//! let conn = transport.connect(&opts).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::proto::{
    ElementSpec, EntryChange, FetchPacket, Incoming, MatchExpr, WireError, WireRequest,
    decode_frame,
};
use crate::transport::{
    ConnectOptions, Connection, FetchToken, Routed, RoutedHandler, Transport,
};

// ── Daemon error codes for routed replies ────────────────────────────

const CODE_NO_SUCH_ELEMENT: i64 = -32601;
const CODE_HANDLER_REJECTED: i64 = -32602;

// ── WsTransport ──────────────────────────────────────────────────────

/// Connection factory for the daemon's WebSocket protocol.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    type Conn = WsConn;

    async fn connect(&self, opts: &ConnectOptions) -> Result<WsConn, Error> {
        WsConn::establish(opts).await
    }
}

// ── WsConn ───────────────────────────────────────────────────────────

/// One live WebSocket connection.
///
/// Cheaply cloneable; all clones share the socket, the in-flight
/// request table, and the fetch sink table.
#[derive(Clone)]
pub struct WsConn {
    shared: Arc<WsShared>,
}

struct WsShared {
    /// Writer task inbox.
    out_tx: mpsc::UnboundedSender<Message>,
    /// Requests awaiting a response, keyed by wire id.
    pending: DashMap<String, oneshot::Sender<Result<Value, WireError>>>,
    /// Live fetch sinks, keyed by fetch token.
    fetches: DashMap<String, mpsc::UnboundedSender<FetchPacket>>,
    /// Routed-request handlers for owned elements, keyed by path.
    handlers: DashMap<String, RoutedHandler>,
    /// Cancelled exactly once when the connection is gone.
    closed: CancellationToken,
    /// Wire id source (per-connection; the wire only needs uniqueness
    /// within one socket's lifetime).
    seq: AtomicU64,
}

impl WsShared {
    fn new(out_tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            out_tx,
            pending: DashMap::new(),
            fetches: DashMap::new(),
            handlers: DashMap::new(),
            closed: CancellationToken::new(),
            seq: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> String {
        self.seq.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Tear down shared state once the socket is gone. Dropping the
    /// pending senders rejects every in-flight request; dropping the
    /// fetch sinks ends every subscription stream.
    fn teardown(&self) {
        self.pending.clear();
        self.fetches.clear();
        self.handlers.clear();
        self.closed.cancel();
    }
}

impl WsConn {
    async fn establish(opts: &ConnectOptions) -> Result<Self, Error> {
        let uri: tungstenite::http::Uri = opts
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::Connect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        for (name, value) in &opts.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        debug!(url = %opts.url, "socket established");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(WsShared::new(out_tx));
        let conn = Self {
            shared: Arc::clone(&shared),
        };

        // Writer task: drain the outbox until teardown or a send
        // failure. The sender lives inside the shared state, so the
        // cancellation token is what actually ends this loop.
        let writer_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_shared.closed.cancelled() => break,
                    msg = out_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = write.send(msg).await {
                            debug!(error = %e, "socket write failed");
                            break;
                        }
                    }
                }
            }
            writer_shared.teardown();
        });

        // Reader task: decode and route frames until the stream ends.
        let reader_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = reader_shared.closed.cancelled() => break,
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                handle_frame(&reader_shared, text.as_str());
                            }
                            Some(Ok(Message::Ping(_))) => {
                                // tungstenite answers pongs automatically
                                trace!("ping");
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                debug!(error = %e, "socket read failed");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            reader_shared.teardown();
        });

        // Authenticate before handing the connection out. A rejection
        // is a connect failure, not a per-request failure.
        if let Some(user) = &opts.user {
            let password = opts
                .password
                .as_ref()
                .map_or("", |p| p.expose_secret())
                .to_owned();
            let params = json!({ "user": user, "password": password });
            conn.request("authenticate", params).await.map_err(|e| {
                conn.shared.teardown();
                match e {
                    Error::Daemon { message, .. } => Error::Authentication { message },
                    other => other,
                }
            })?;
            debug!(user, "authenticated");
        }

        Ok(conn)
    }

    /// Issue one request and await its response.
    async fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
        let id = self.shared.next_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id.clone(), tx);

        let frame = serde_json::to_string(&WireRequest {
            id: Some(&id),
            method,
            params,
        })
        .map_err(|e| Error::serialization(&e))?;
        trace!(%id, method, "-> request");

        if self.shared.out_tx.send(Message::text(frame)).is_err() {
            self.shared.pending.remove(&id);
            return Err(Error::ConnectionClosed);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::Daemon {
                code: err.code,
                message: err.message,
            }),
            // Sender dropped: the socket died with this request in flight.
            Err(_) => Err(Error::ConnectionClosed),
        }
    }
}

impl Connection for WsConn {
    async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    async fn close(&self) -> Result<(), Error> {
        // Best effort: if the outbox is already gone, so is the socket.
        let _ = self.shared.out_tx.send(Message::Close(None));
        Ok(())
    }

    async fn set(&self, path: &str, value: Value) -> Result<Value, Error> {
        self.request("set", json!({ "path": path, "value": value }))
            .await
    }

    async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value, Error> {
        self.request("call", json!({ "path": path, "args": args }))
            .await
    }

    async fn get(&self, expr: &MatchExpr) -> Result<Vec<EntryChange>, Error> {
        let result = self
            .request("get", serde_json::to_value(expr).map_err(|e| Error::serialization(&e))?)
            .await?;
        serde_json::from_value(result).map_err(|e| Error::serialization(&e))
    }

    async fn fetch(
        &self,
        expr: &MatchExpr,
        sink: mpsc::UnboundedSender<FetchPacket>,
    ) -> Result<FetchToken, Error> {
        let token = format!("f_{}", self.shared.next_id());

        // Register the sink before asking the daemon: the first
        // notification may beat the acknowledgment.
        self.shared.fetches.insert(token.clone(), sink);

        let params = json!({ "id": token, "match": expr });
        match self.request("fetch", params).await {
            Ok(_) => Ok(FetchToken(token)),
            Err(e) => {
                self.shared.fetches.remove(&token);
                Err(e)
            }
        }
    }

    async fn unfetch(&self, token: &FetchToken) -> Result<(), Error> {
        // Stop local delivery immediately, even if the daemon round
        // trip fails afterwards.
        self.shared.fetches.remove(token.as_str());
        self.request("unfetch", json!({ "id": token.as_str() }))
            .await?;
        Ok(())
    }

    async fn add(&self, element: ElementSpec, handler: Option<RoutedHandler>) -> Result<(), Error> {
        let path = element.path.clone();
        if let Some(handler) = handler {
            self.shared.handlers.insert(path.clone(), handler);
        }
        let params = serde_json::to_value(&element).map_err(|e| Error::serialization(&e))?;
        match self.request("add", params).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.shared.handlers.remove(&path);
                Err(e)
            }
        }
    }

    async fn remove(&self, path: &str) -> Result<(), Error> {
        self.request("remove", json!({ "path": path })).await?;
        self.shared.handlers.remove(path);
        Ok(())
    }

    async fn change(&self, path: &str, value: Value) -> Result<(), Error> {
        self.request("change", json!({ "path": path, "value": value }))
            .await?;
        Ok(())
    }
}

// ── Frame routing ────────────────────────────────────────────────────

/// Decode one incoming text frame and route it. Malformed or unknown
/// frames are logged and dropped; this function never fails.
fn handle_frame(shared: &WsShared, text: &str) {
    let Some(incoming) = decode_frame(text) else {
        debug!("dropping undecodable frame");
        return;
    };

    match incoming {
        Incoming::Response { id, result } => {
            match shared.pending.remove(&id) {
                Some((_, tx)) => {
                    // Receiver may have given up (e.g. caller dropped).
                    let _ = tx.send(result);
                }
                None => debug!(%id, "response for unknown request id"),
            }
        }
        Incoming::Notification { method, params } => {
            let Some(sink) = shared.fetches.get(&method) else {
                debug!(fetch = %method, "notification for unknown fetch");
                return;
            };
            match FetchPacket::from_params(&params) {
                Some(packet) => {
                    let _ = sink.send(packet);
                }
                None => debug!(fetch = %method, "dropping malformed fetch payload"),
            }
        }
        Incoming::Routed { id, method, params } => {
            let reply = dispatch_routed(shared, &method, &params);
            if let Some(id) = id {
                send_routed_reply(shared, &id, reply);
            }
        }
    }
}

/// Run the element handler for a daemon-routed `set`/`call`.
fn dispatch_routed(shared: &WsShared, method: &str, params: &Value) -> Result<Value, WireError> {
    let path = params.get("path").and_then(Value::as_str).unwrap_or("");
    let Some(handler) = shared.handlers.get(path) else {
        warn!(path, method, "routed request for unowned path");
        return Err(WireError {
            code: CODE_NO_SUCH_ELEMENT,
            message: format!("no such element: {path}"),
        });
    };

    let routed = if method == "call" {
        let args = params
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Routed::Call(args)
    } else {
        Routed::Set(params.get("value").cloned().unwrap_or(Value::Null))
    };

    handler(routed).map_err(|message| WireError {
        code: CODE_HANDLER_REJECTED,
        message,
    })
}

fn send_routed_reply(shared: &WsShared, id: &str, reply: Result<Value, WireError>) {
    let frame = match reply {
        Ok(result) => json!({ "id": id, "result": result }),
        Err(err) => json!({ "id": id, "error": { "code": err.code, "message": err.message } }),
    };
    let _ = shared.out_tx.send(Message::text(frame.to_string()));
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detached_shared() -> (Arc<WsShared>, mpsc::UnboundedReceiver<Message>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (Arc::new(WsShared::new(out_tx)), out_rx)
    }

    #[tokio::test]
    async fn response_frame_settles_pending_request() {
        let (shared, _out) = detached_shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.insert("5".into(), tx);

        handle_frame(&shared, r#"{"id":"5","result":123}"#);

        assert_eq!(rx.await.unwrap().unwrap(), json!(123));
        assert!(shared.pending.is_empty());
    }

    #[test]
    fn response_for_unknown_id_is_ignored() {
        let (shared, _out) = detached_shared();
        // Must not panic or touch anything.
        handle_frame(&shared, r#"{"id":"999","result":1}"#);
    }

    #[tokio::test]
    async fn notification_routes_to_fetch_sink() {
        let (shared, _out) = detached_shared();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        shared.fetches.insert("f_1".into(), sink_tx);

        handle_frame(
            &shared,
            r#"{"method":"f_1","params":{"path":"a","event":"add","value":1}}"#,
        );

        let packet = sink_rx.recv().await.unwrap();
        assert_eq!(
            packet,
            FetchPacket::Entry(EntryChange {
                path: "a".into(),
                value: Some(json!(1)),
                event: crate::proto::ChangeKind::Add,
                index: None,
            })
        );
    }

    #[test]
    fn malformed_fetch_payload_is_dropped() {
        let (shared, _out) = detached_shared();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        shared.fetches.insert("f_1".into(), sink_tx);

        handle_frame(&shared, r#"{"method":"f_1","params":{"bogus":true}}"#);

        assert!(sink_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn routed_set_invokes_handler_and_replies() {
        let (shared, mut out) = detached_shared();
        let handler: RoutedHandler = Arc::new(|routed| match routed {
            Routed::Set(value) => Ok(value),
            Routed::Call(_) => Err("not callable".into()),
        });
        shared.handlers.insert("own/x".into(), handler);

        handle_frame(
            &shared,
            r#"{"id":"9","method":"set","params":{"path":"own/x","value":7}}"#,
        );

        let Message::Text(reply) = out.recv().await.unwrap() else {
            panic!("expected a text reply");
        };
        let reply: Value = serde_json::from_str(reply.as_str()).unwrap();
        assert_eq!(reply["id"], "9");
        assert_eq!(reply["result"], 7);
    }

    #[tokio::test]
    async fn routed_request_for_unowned_path_replies_error() {
        let (shared, mut out) = detached_shared();

        handle_frame(
            &shared,
            r#"{"id":"9","method":"call","params":{"path":"nobody/home","args":[]}}"#,
        );

        let Message::Text(reply) = out.recv().await.unwrap() else {
            panic!("expected a text reply");
        };
        let reply: Value = serde_json::from_str(reply.as_str()).unwrap();
        assert_eq!(reply["error"]["code"], CODE_NO_SUCH_ELEMENT);
    }

    #[tokio::test]
    async fn teardown_rejects_in_flight_requests() {
        let (shared, _out) = detached_shared();
        let (tx, rx) = oneshot::channel();
        shared.pending.insert("5".into(), tx);

        shared.teardown();

        assert!(rx.await.is_err());
        assert!(shared.closed.is_cancelled());
    }
}
