//! Studio chat: streamed conversation turns with citations
//!
//! A [`StudioChat`] owns a [`Session`] (the conversation state machine) and a
//! [`ChatTransport`]. The production transport is a [`TransportSelector`]
//! that sends over the persistent socket ([`WsTransport`]) when it is open
//! and falls back to the HTTP streaming endpoint ([`HttpStreamTransport`])
//! otherwise.

pub mod frames;
pub mod http;
pub mod mock;
pub mod session;
pub mod studio;
pub mod transport;
pub mod types;
pub mod ws;

pub use frames::decode_events;
pub use http::HttpStreamTransport;
pub use mock::MockTransport;
pub use session::{Applied, ChatContext, Session, StreamState};
pub use studio::{ChatUpdate, StudioChat};
pub use transport::{ChatTransport, EventStream, TransportKind, TransportSelector};
pub use types::{
    ChatRequest, Citation, ClientFrame, HistoryEntry, Message, Role, StreamEvent,
    StreamRequestBody,
};
pub use ws::{ReconnectPolicy, SocketConnector, UrlConnector, WsTransport};
