// statewire-api: wire protocol and WebSocket peer for the state daemon

pub mod error;
pub mod proto;
pub mod transport;
pub mod ws;

pub use error::Error;
pub use proto::{ChangeKind, ElementSpec, EntryChange, FetchPacket, MatchExpr, SortSpec};
pub use transport::{ConnectOptions, Connection, FetchToken, Routed, RoutedHandler, Transport};
pub use ws::{WsConn, WsTransport};
