//! Wire-level data model for the daemon protocol.
//!
//! The daemon speaks line-oriented JSON text frames with a JSON-RPC-like
//! shape: requests carry `{id, method, params}`, responses `{id, result}`
//! or `{id, error}`, and subscription traffic arrives as notifications
//! whose `method` is the fetch token assigned at registration time.
//!
//! The one place payload shape is ever inspected is
//! [`FetchPacket::from_params`]; downstream code only ever sees the
//! tagged variant, never raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Match expressions ────────────────────────────────────────────────

/// Sorting directive for an ordered fetch.
///
/// `from`/`to` are 1-based daemon-side bounds; the daemon reports each
/// matched entry with an absolute index inside that window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    #[serde(rename = "byPath", default)]
    pub by_path: bool,
    pub from: u64,
    pub to: u64,
}

/// A match expression selecting a subset of the daemon's namespace.
///
/// All path predicates are optional and combined conjunctively. Adding
/// a [`SortSpec`] turns the fetch into an ordered window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchExpr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
    #[serde(rename = "startsWith", skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<String>,
    #[serde(rename = "endsWith", skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
}

impl MatchExpr {
    /// Match exactly one path. The natural expression for single-value
    /// projections.
    pub fn equals(path: impl Into<String>) -> Self {
        Self {
            equals: Some(path.into()),
            ..Self::default()
        }
    }

    /// Match every path under a prefix.
    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Self {
            starts_with: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Request a path-ordered window `[from, to]` over the matches.
    pub fn sorted_by_path(mut self, from: u64, to: u64) -> Self {
        self.sort = Some(SortSpec {
            by_path: true,
            from,
            to,
        });
        self
    }

    /// `true` if this expression produces indexed-batch notifications.
    pub fn is_sorted(&self) -> bool {
        self.sort.is_some()
    }
}

// ── Change events ────────────────────────────────────────────────────

/// What happened to a matched entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Entry newly matches the expression. Also the implied kind for
    /// one-shot `get` results, which carry no event field.
    #[default]
    Add,
    Change,
    Remove,
}

/// One entry in a change notification or snapshot result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryChange {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub event: ChangeKind,
    /// Absolute position within the sort window. Only present on
    /// entries inside an indexed batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

/// Payload of one fetch notification, shape-resolved once at the
/// transport boundary.
///
/// Ordered fetches deliver [`Batch`](Self::Batch) (changed entries plus
/// the window's total length); unordered fetches deliver one
/// [`Entry`](Self::Entry) per notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FetchPacket {
    Batch { entries: Vec<EntryChange>, total: u64 },
    Entry(EntryChange),
}

impl FetchPacket {
    /// Classify a notification's params.
    ///
    /// Returns `None` for anything that matches neither shape; the
    /// caller drops such frames instead of guessing.
    pub fn from_params(params: &Value) -> Option<Self> {
        if let (Some(changes), Some(total)) = (params.get("changes"), params.get("n")) {
            let entries: Vec<EntryChange> = serde_json::from_value(changes.clone()).ok()?;
            return Some(Self::Batch {
                entries,
                total: total.as_u64()?,
            });
        }
        if params.get("path").is_some() && params.get("event").is_some() {
            let entry: EntryChange = serde_json::from_value(params.clone()).ok()?;
            return Some(Self::Entry(entry));
        }
        None
    }
}

// ── Owned elements ───────────────────────────────────────────────────

/// Description of an element this client publishes into the namespace.
///
/// A `value` makes it a state (peers may request changes via `set`);
/// no value makes it a callable method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ElementSpec {
    pub fn state(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn method(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: None,
        }
    }

    pub fn is_state(&self) -> bool {
        self.value.is_some()
    }
}

// ── Wire envelopes ───────────────────────────────────────────────────

/// Outgoing request frame. `id: None` makes it a notification.
#[derive(Debug, Serialize)]
pub(crate) struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'a str>,
    pub method: &'a str,
    pub params: Value,
}

/// Error object inside a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

/// One decoded incoming frame, classified by role.
#[derive(Debug)]
pub(crate) enum Incoming {
    /// Completion of a request this side issued.
    Response {
        id: String,
        result: Result<Value, WireError>,
    },
    /// Subscription traffic: `method` is the fetch token.
    Notification { method: String, params: Value },
    /// A daemon-routed request against an element this side owns.
    Routed {
        id: Option<String>,
        method: String,
        params: Value,
    },
}

/// Decode one text frame. Returns `None` for frames that fit no role;
/// the read loop logs and drops those.
pub(crate) fn decode_frame(text: &str) -> Option<Incoming> {
    let raw: RawFrame = serde_json::from_str(text).ok()?;
    match (raw.id, raw.method) {
        // A frame with a method is a request or notification aimed at us.
        (id, Some(method)) => {
            let params = raw.params.unwrap_or(Value::Null);
            if matches!(method.as_str(), "set" | "call") {
                Some(Incoming::Routed { id, method, params })
            } else {
                Some(Incoming::Notification { method, params })
            }
        }
        // No method: must be a response to something we sent.
        (Some(id), None) => {
            let result = match (raw.result, raw.error) {
                (_, Some(err)) => Err(err),
                (Some(value), None) => Ok(value),
                // Bare ack; daemon omits `result` on plain success.
                (None, None) => Ok(Value::Null),
            };
            Some(Incoming::Response { id, result })
        }
        (None, None) => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn match_expr_serializes_camel_case_and_skips_empty() {
        let expr = MatchExpr::starts_with("lamp/").sorted_by_path(1, 10);
        let value = serde_json::to_value(&expr).unwrap();
        assert_eq!(
            value,
            json!({
                "startsWith": "lamp/",
                "sort": { "byPath": true, "from": 1, "to": 10 }
            })
        );
    }

    #[test]
    fn fetch_packet_classifies_indexed_batch() {
        let params = json!({
            "changes": [
                { "path": "a", "value": 1, "event": "add", "index": 1 },
                { "path": "b", "value": 2, "event": "change", "index": 2 }
            ],
            "n": 2
        });

        let packet = FetchPacket::from_params(&params).unwrap();
        match packet {
            FetchPacket::Batch { entries, total } => {
                assert_eq!(total, 2);
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].path, "a");
                assert_eq!(entries[1].event, ChangeKind::Change);
                assert_eq!(entries[1].index, Some(2));
            }
            FetchPacket::Entry(_) => panic!("expected a batch"),
        }
    }

    #[test]
    fn fetch_packet_classifies_single_entry() {
        let params = json!({ "path": "foo/bar", "value": 42, "event": "change" });

        let packet = FetchPacket::from_params(&params).unwrap();
        assert_eq!(
            packet,
            FetchPacket::Entry(EntryChange {
                path: "foo/bar".into(),
                value: Some(json!(42)),
                event: ChangeKind::Change,
                index: None,
            })
        );
    }

    #[test]
    fn fetch_packet_rejects_unknown_shapes() {
        assert!(FetchPacket::from_params(&json!({"weird": true})).is_none());
        assert!(FetchPacket::from_params(&json!(17)).is_none());
        // Batch-ish but with a malformed changes array.
        assert!(FetchPacket::from_params(&json!({"changes": 3, "n": 1})).is_none());
    }

    #[test]
    fn entry_without_event_defaults_to_add() {
        let entry: EntryChange = serde_json::from_value(json!({
            "path": "foo", "value": true
        }))
        .unwrap();
        assert_eq!(entry.event, ChangeKind::Add);
    }

    #[test]
    fn decode_frame_classifies_response_success() {
        let frame = decode_frame(r#"{"id":"7","result":{"ok":true}}"#).unwrap();
        match frame {
            Incoming::Response { id, result } => {
                assert_eq!(id, "7");
                assert_eq!(result.unwrap(), json!({"ok": true}));
            }
            _ => panic!("expected a response"),
        }
    }

    #[test]
    fn decode_frame_classifies_response_error() {
        let frame =
            decode_frame(r#"{"id":"8","error":{"code":-32602,"message":"no such state"}}"#)
                .unwrap();
        match frame {
            Incoming::Response { id, result } => {
                assert_eq!(id, "8");
                let err = result.unwrap_err();
                assert_eq!(err.code, -32602);
                assert_eq!(err.message, "no such state");
            }
            _ => panic!("expected a response"),
        }
    }

    #[test]
    fn decode_frame_classifies_fetch_notification() {
        let frame = decode_frame(r#"{"method":"f_3","params":{"path":"a","event":"add"}}"#)
            .unwrap();
        match frame {
            Incoming::Notification { method, params } => {
                assert_eq!(method, "f_3");
                assert_eq!(params["path"], "a");
            }
            _ => panic!("expected a notification"),
        }
    }

    #[test]
    fn decode_frame_classifies_routed_set() {
        let frame =
            decode_frame(r#"{"id":"21","method":"set","params":{"path":"own/x","value":5}}"#)
                .unwrap();
        match frame {
            Incoming::Routed { id, method, params } => {
                assert_eq!(id.as_deref(), Some("21"));
                assert_eq!(method, "set");
                assert_eq!(params["path"], "own/x");
            }
            _ => panic!("expected a routed request"),
        }
    }

    #[test]
    fn decode_frame_drops_garbage() {
        assert!(decode_frame("not json").is_none());
        assert!(decode_frame("{}").is_none());
        assert!(decode_frame(r#"{"params":{}}"#).is_none());
    }
}
